//! Messages delivered to the telemetry sink.
//!
//! Every message is a JSON object `{"type":"STREAM","name":..,"data":..}`
//! written to the sink as raw bytes, without framing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Envelope for a streamed update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub data: T,
}

impl<T: Serialize> StreamMessage<T> {
    fn stream(name: &str, data: T) -> Self {
        Self {
            kind: "STREAM".to_string(),
            name: name.to_string(),
            data,
        }
    }

    /// Serialize to the bytes handed to the sink.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl StreamMessage<AircraftUpdate> {
    pub fn aircraft(update: AircraftUpdate) -> Self {
        Self::stream("AIRCRAFT_UPDATE", update)
    }
}

impl StreamMessage<PositionUpdate> {
    pub fn position(update: PositionUpdate) -> Self {
        Self::stream("POSITION_UPDATE", update)
    }
}

/// Identity of the aircraft currently loaded in the simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AircraftUpdate {
    pub title: String,
    /// ICAO type designator, e.g. "C172".
    #[serde(rename = "type")]
    pub icao_type: String,
    pub model: String,
    pub registration: String,
    pub airline: String,
}

impl AircraftUpdate {
    /// The simulator only exposes the ICAO designator, so it doubles as
    /// the model. Title and airline are unknown.
    pub fn new(icao: &str, registration: &str) -> Self {
        Self {
            title: String::new(),
            icao_type: icao.to_string(),
            model: icao.to_string(),
            registration: registration.to_string(),
            airline: String::new(),
        }
    }
}

/// Periodic position and state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Feet above mean sea level.
    pub altitude_amsl: f64,
    /// Feet above ground level.
    pub altitude_agl: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub pitch: f32,
    pub bank: f32,
    pub heading_true: f32,
    pub ground_speed: f32,
    pub vertical_speed: f32,
    pub fuel_kg: f32,
    pub gravity: f32,
    /// Squawk code, always four digits.
    pub transponder: String,
    pub on_ground: bool,
    pub slew: bool,
    pub paused: bool,
    pub in_replay_mode: bool,
    pub fps: f32,
    pub time_acceleration: f32,
    pub autopilot_engaged: bool,
    pub engines_running: bool,
    pub parking_brake: bool,
    pub sim_abbreviation: String,
    pub sim_version: String,
    pub wind_speed: f32,
    pub wind_direction: f32,
}
