//! Position publisher — turns cached telemetry into POSITION_UPDATE
//! messages at the configured rate.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use xpbridge_core::message::{PositionUpdate, StreamMessage};
use xpbridge_services::{DatarefStore, TelemetrySink};

const METERS_TO_FEET: f64 = 3.28084;

const SIM_ABBREVIATION: &str = "xp12";
const SIM_VERSION: &str = "12.320";

/// Build a position update from the cache. Missing values read as 0.0.
pub fn snapshot(store: &DatarefStore) -> PositionUpdate {
    let val = |name: &str| store.value_or_default(name);
    let flag = |name: &str| val(name) > 0.5;

    let frame_period = val("sim/graphics/view/framerate_period");
    let fps = if frame_period > 0.0 { 1.0 / frame_period } else { 0.0 };

    PositionUpdate {
        altitude_amsl: f64::from(val("sim/flightmodel/position/elevation")) * METERS_TO_FEET,
        altitude_agl: f64::from(val("sim/flightmodel/position/y_agl")) * METERS_TO_FEET,
        latitude: f64::from(val("sim/flightmodel/position/latitude")),
        longitude: f64::from(val("sim/flightmodel/position/longitude")),
        pitch: val("sim/flightmodel/position/theta"),
        bank: val("sim/flightmodel/position/phi"),
        heading_true: val("sim/flightmodel/position/psi"),
        ground_speed: val("sim/flightmodel/position/groundspeed"),
        vertical_speed: val("sim/flightmodel/position/vh_ind_fpm"),
        fuel_kg: val("sim/flightmodel/weight/m_fuel_total"),
        gravity: val("sim/physics/gravity_normal"),
        transponder: format!("{:04}", val("sim/cockpit/radios/transponder_code") as i32),
        on_ground: flag("sim/flightmodel/failures/onground_any"),
        slew: flag("sim/operation/override/override_planepath"),
        paused: flag("sim/time/paused"),
        in_replay_mode: flag("sim/operation/prefs/replay_mode"),
        fps,
        time_acceleration: val("sim/time/time_accel"),
        autopilot_engaged: val("sim/cockpit/autopilot/autopilot_mode") > 0.0,
        engines_running: flag("sim/flightmodel/engine/ENGN_running"),
        parking_brake: flag("sim/cockpit2/controls/parking_brake_ratio"),
        sim_abbreviation: SIM_ABBREVIATION.to_string(),
        sim_version: SIM_VERSION.to_string(),
        wind_speed: val("sim/weather/wind_speed_kt"),
        wind_direction: val("sim/weather/wind_direction_degt"),
    }
}

/// Publish a snapshot every `period`. Runs forever — cancel by dropping
/// the task handle.
pub async fn publish_loop<K: TelemetrySink>(store: Arc<DatarefStore>, sink: K, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(period_ms = period.as_millis() as u64, "position publisher starting");

    loop {
        interval.tick().await;

        let payload = match StreamMessage::position(snapshot(&store)).to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode position update");
                continue;
            }
        };

        // no consumer is a normal condition; the next tick carries fresh data
        if let Err(e) = sink.send(payload).await {
            tracing::debug!(error = %e, "position update not delivered");
        }
    }
}
