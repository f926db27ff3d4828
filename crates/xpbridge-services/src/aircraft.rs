//! Aircraft change monitor.
//!
//! Keeps a 1 Hz subscription to the first four bytes of the ICAO dataref.
//! When that prefix changes, the full identity (ICAO code, tail number,
//! livery path) is read through the [`StringReader`] and an
//! `AIRCRAFT_UPDATE` is sent to the sink.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::time::MissedTickBehavior;

use xpbridge_core::message::{AircraftUpdate, StreamMessage};

use crate::sink::TelemetrySink;
use crate::string_reader::{bytes_to_text, element_name, StringReader};
use crate::subscription::Subscriber;

pub const ICAO_DATAREF: &str = "sim/aircraft/view/acf_ICAO";
pub const TAILNUM_DATAREF: &str = "sim/aircraft/view/acf_tailnum";
pub const LIVERY_DATAREF: &str = "sim/aircraft/view/acf_livery_path";

pub const ICAO_MAX_LEN: usize = 40;
pub const TAILNUM_MAX_LEN: usize = 40;
pub const LIVERY_MAX_LEN: usize = 255;

/// ICAO bytes watched for changes.
pub const TRIGGER_LEN: usize = 4;

const TRIGGER_FREQ_HZ: u32 = 1;

/// Registration formats: `D-ABCD`, `G-ABC` style two-character prefixes,
/// and US `N` numbers.
const REGISTRATION_PATTERN: &str = r"[A-Z]-[A-Z]{4}|([A-Z]|[1-9]){2}-[A-Z]{3}|N[0-9]{1,5}[A-Z]{0,2}";

fn registration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REGISTRATION_PATTERN).expect("registration pattern is valid"))
}

/// Registration found in the livery path, else the tail number.
pub fn derive_registration(livery_path: &str, tail_number: &str) -> String {
    registration_regex()
        .find(livery_path)
        .map(|m| m.as_str())
        .unwrap_or(tail_number)
        .to_string()
}

/// What the trigger should compare against after a successful update:
/// the first four characters of the full identifier, or the trigger
/// prefix itself if the identifier read came back empty.
fn next_prefix(full_icao: &str, trigger: &str) -> String {
    if full_icao.is_empty() {
        trigger.to_string()
    } else {
        full_icao.chars().take(TRIGGER_LEN).collect()
    }
}

pub struct AircraftMonitor<S, K> {
    reader: StringReader<S>,
    sink: K,
    interval: Duration,
    last_prefix: String,
}

impl<S: Subscriber, K: TelemetrySink> AircraftMonitor<S, K> {
    pub fn new(reader: StringReader<S>, sink: K, interval: Duration) -> Self {
        Self {
            reader,
            sink,
            interval,
            last_prefix: String::new(),
        }
    }

    pub fn last_prefix(&self) -> &str {
        &self.last_prefix
    }

    /// Subscribe the trigger bytes. Repeating this is harmless.
    pub async fn arm(&self) {
        for i in 0..TRIGGER_LEN {
            let name = element_name(ICAO_DATAREF, i);
            if let Err(e) = self.reader.subscriber().set_frequency(&name, TRIGGER_FREQ_HZ).await {
                tracing::warn!(error = %e, dataref = %name, "trigger subscribe failed");
            }
        }
    }

    /// Current trigger prefix from cached bytes, stopping at the first
    /// zero or missing byte.
    pub fn trigger_prefix(&self) -> String {
        let store = self.reader.store();
        let mut prefix = Vec::with_capacity(TRIGGER_LEN);
        for i in 0..TRIGGER_LEN {
            let byte = store.value_or_default(&element_name(ICAO_DATAREF, i)) as u8;
            if byte == 0 {
                break;
            }
            prefix.push(byte);
        }
        // same mapping as the string reader, so it lines up with next_prefix
        bytes_to_text(&prefix)
    }

    /// One check. Returns the update if one was delivered.
    pub async fn tick(&mut self) -> Option<AircraftUpdate> {
        let prefix = self.trigger_prefix();
        if prefix.is_empty() || prefix == self.last_prefix {
            return None;
        }
        tracing::info!(prefix = %prefix, "aircraft change detected, fetching details");

        let icao = self.reader.read(ICAO_DATAREF, ICAO_MAX_LEN).await;
        let tail_number = self.reader.read(TAILNUM_DATAREF, TAILNUM_MAX_LEN).await;
        let livery_path = self.reader.read(LIVERY_DATAREF, LIVERY_MAX_LEN).await;

        // the ICAO read unsubscribed the trigger bytes along with the rest
        self.arm().await;

        let registration = derive_registration(&livery_path, &tail_number);
        let update = AircraftUpdate::new(&icao, &registration);

        let payload = match StreamMessage::aircraft(update.clone()).to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode aircraft update");
                return None;
            }
        };

        tracing::info!(icao = %icao, registration = %registration, "sending aircraft update");
        match self.sink.send(payload).await {
            Ok(()) => {
                // TODO: when the trigger bytes disagree with the fetched
                // identifier every tick refetches and resends the same
                // aircraft; decide which of the two should win.
                self.last_prefix = next_prefix(&icao, &prefix);
                Some(update)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to send aircraft update");
                None
            }
        }
    }

    /// Runs forever — cancel by dropping the task handle.
    pub async fn run(mut self) {
        self.arm().await;

        let mut interval = tokio::time::interval(self.interval);
        // a refetch can take several seconds; don't burst afterwards
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
