//! Telemetry receiver — decodes value packets into the dataref store.
//!
//! Two states. `Idle` until the simulator endpoint has been installed,
//! rechecking every second. `Listening` once it has: each read waits at
//! most five seconds, and an expired wait just starts the next read. Read
//! errors are logged and the loop carries on; the receiver is the sole
//! writer of cached values and has no terminal state besides shutdown.

use std::sync::Arc;
use std::time::Duration;

use xpbridge_core::wire::{decode_values, ValueRecord, VALUES_PREFIX};

use crate::store::DatarefStore;
use crate::subscription::{Endpoint, SimLink};

/// How often an idle receiver checks for the endpoint.
pub const IDLE_RECHECK: Duration = Duration::from_secs(1);

/// Per-read deadline while listening.
pub const READ_DEADLINE: Duration = Duration::from_secs(5);

/// Values in (-NOISE_FLOOR, 0) are stored as exactly 0.0.
pub const NOISE_FLOOR: f32 = 0.001;

/// Large enough for any UDP datagram, so a value packet is never cut short.
const RECV_BUF_LEN: usize = 65536 + 1024;

/// Receiver lifecycle.
#[derive(Debug, Clone)]
pub enum ReceiverState {
    Idle,
    Listening(Arc<Endpoint>),
}

/// Reads value packets and writes them into the store.
pub struct Receiver {
    link: Arc<SimLink>,
    store: Arc<DatarefStore>,
    state: ReceiverState,
}

impl Receiver {
    pub fn new(link: Arc<SimLink>, store: Arc<DatarefStore>) -> Self {
        Self {
            link,
            store,
            state: ReceiverState::Idle,
        }
    }

    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    /// Runs forever — cancel by dropping the task handle.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            self.step(&mut buf).await;
        }
    }

    /// Advance the state machine by one wait or one read.
    pub async fn step(&mut self, buf: &mut [u8]) {
        let endpoint = match self.state.clone() {
            ReceiverState::Listening(endpoint) => endpoint,
            ReceiverState::Idle => {
                match self.link.get() {
                    Some(endpoint) => {
                        tracing::info!(
                            local = ?endpoint.socket.local_addr().ok(),
                            sim = %endpoint.dest,
                            "receiver listening"
                        );
                        self.state = ReceiverState::Listening(endpoint);
                    }
                    None => tokio::time::sleep(IDLE_RECHECK).await,
                }
                return;
            }
        };

        match tokio::time::timeout(READ_DEADLINE, endpoint.socket.recv_from(buf)).await {
            Err(_) => tracing::trace!("no datagram within read deadline"),
            Ok(Err(e)) => tracing::warn!(error = %e, "udp read failed"),
            Ok(Ok((len, _from))) => {
                handle_datagram(&self.store, &buf[..len]);
            }
        }
    }
}

/// Decode one datagram and store its values. Datagrams that are not value
/// packets are ignored. Returns how many values were stored.
pub fn handle_datagram(store: &DatarefStore, datagram: &[u8]) -> usize {
    let records = match decode_values(datagram) {
        Ok(records) => records,
        Err(_) => {
            let head = &datagram[..datagram.len().min(VALUES_PREFIX.len())];
            tracing::trace!(prefix = hex::encode(head), "ignoring non-value datagram");
            return 0;
        }
    };

    let cleaned: Vec<ValueRecord> = records
        .into_iter()
        .map(|r| ValueRecord::new(r.index.get(), clamp_noise(r.value.get())))
        .collect();

    let applied = store.apply(&cleaned);
    if applied < cleaned.len() {
        tracing::trace!(
            dropped = cleaned.len() - applied,
            "values for unregistered indices dropped"
        );
    }
    applied
}

/// Physically non-negative quantities arrive with tiny negative jitter.
pub fn clamp_noise(value: f32) -> f32 {
    if value < 0.0 && value > -NOISE_FLOOR {
        0.0
    } else {
        value
    }
}
