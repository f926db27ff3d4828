//! xpbridge-services — the simulator-facing client.
//!
//! Discovery, subscription management, value reception, and the higher
//! level readers built on top of them. The daemon wires these together;
//! nothing here spawns tasks on its own.

pub mod aircraft;
pub mod discovery;
pub mod receiver;
pub mod sink;
pub mod store;
pub mod string_reader;
pub mod subscription;

pub use aircraft::{derive_registration, AircraftMonitor};
pub use discovery::{discover, discover_with_retries, BeaconInfo, DiscoveryError};
pub use receiver::{Receiver, ReceiverState};
pub use sink::{SinkError, TcpSink, TelemetrySink};
pub use store::{DatarefRegistry, DatarefStore, ValueCache};
pub use string_reader::{StringReadOptions, StringReader};
pub use subscription::{Endpoint, SimLink, SubscribeError, Subscriber, SubscriptionChannel};
