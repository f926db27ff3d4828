//! xpbridge-core — wire format, configuration, and sink payload types.
//! Nothing in this crate touches a socket; the services and daemon crates
//! depend on it for every byte they put on the wire.

pub mod config;
pub mod message;
pub mod wire;

pub use message::{AircraftUpdate, PositionUpdate, StreamMessage};
