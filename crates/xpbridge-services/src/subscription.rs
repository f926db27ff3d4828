//! Subscription channel — asks the simulator to start or stop streaming
//! datarefs.
//!
//! One locally bound UDP socket carries both our subscribe requests and the
//! simulator's value packets. The socket and the simulator's address are
//! installed into a [`SimLink`] once discovery has completed; until then
//! every request fails with [`SubscribeError::NotInitialized`].

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};

use tokio::net::UdpSocket;
use zerocopy::AsBytes;

use xpbridge_core::wire::{SubscribeRequest, INDEX_SENTINEL};

use crate::discovery::BeaconInfo;
use crate::store::DatarefStore;

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// The local socket and the simulator address it talks to.
#[derive(Debug)]
pub struct Endpoint {
    pub socket: UdpSocket,
    pub dest: SocketAddr,
}

impl Endpoint {
    /// Bind an ephemeral local port and target `dest`.
    pub async fn bind(dest: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        Ok(Self { socket, dest })
    }

    /// Bind an endpoint aimed at a discovered simulator.
    pub async fn for_beacon(beacon: &BeaconInfo) -> std::io::Result<Self> {
        Self::bind(beacon.addr()).await
    }
}

/// Holds the endpoint once it exists. Installed at most once.
#[derive(Debug, Default)]
pub struct SimLink {
    endpoint: OnceLock<Arc<Endpoint>>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the endpoint. Returns false if one was already installed.
    pub fn install(&self, endpoint: Endpoint) -> bool {
        self.endpoint.set(Arc::new(endpoint)).is_ok()
    }

    pub fn get(&self) -> Option<Arc<Endpoint>> {
        self.endpoint.get().cloned()
    }
}

// ── Subscriber ────────────────────────────────────────────────────────────────

/// Anything that can change the streaming rate of a named dataref.
///
/// `freq_hz == 0` unsubscribes.
pub trait Subscriber: Send + Sync {
    fn set_frequency(
        &self,
        name: &str,
        freq_hz: u32,
    ) -> impl Future<Output = Result<(), SubscribeError>> + Send;
}

impl<S: Subscriber> Subscriber for Arc<S> {
    fn set_frequency(
        &self,
        name: &str,
        freq_hz: u32,
    ) -> impl Future<Output = Result<(), SubscribeError>> + Send {
        (**self).set_frequency(name, freq_hz)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("simulator socket not initialized")]
    NotInitialized,

    #[error("failed to send subscribe request: {0}")]
    SendFailure(#[source] std::io::Error),
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Sends subscribe requests, keeping the store's registry in step with
/// what the simulator has been asked for.
#[derive(Debug, Clone)]
pub struct SubscriptionChannel {
    link: Arc<SimLink>,
    store: Arc<DatarefStore>,
}

impl SubscriptionChannel {
    pub fn new(link: Arc<SimLink>, store: Arc<DatarefStore>) -> Self {
        Self { link, store }
    }

    pub fn store(&self) -> &Arc<DatarefStore> {
        &self.store
    }

    /// Subscribe every name in `names` at `freq_hz`. Failures are logged
    /// and skipped. Returns how many requests were sent.
    pub async fn subscribe_all<I, N>(&self, names: I, freq_hz: u32) -> usize
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let mut sent = 0;
        for name in names {
            let name = name.as_ref();
            match self.set_frequency(name, freq_hz).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(error = %e, dataref = name, "subscribe failed"),
            }
        }
        sent
    }

    /// Unsubscribe everything still registered.
    pub async fn unsubscribe_all(&self) {
        if !self.store.has_subscriptions() {
            tracing::debug!("no datarefs to unsubscribe");
            return;
        }
        let names = self.store.subscribed();
        tracing::info!(count = names.len(), "unsubscribing from datarefs");
        for name in &names {
            if let Err(e) = self.set_frequency(name, 0).await {
                tracing::warn!(error = %e, dataref = %name, "unsubscribe failed");
            }
        }
    }
}

impl Subscriber for SubscriptionChannel {
    async fn set_frequency(&self, name: &str, freq_hz: u32) -> Result<(), SubscribeError> {
        let endpoint = self.link.get().ok_or(SubscribeError::NotInitialized)?;

        // Registry changes happen before the send and the lock is released
        // before any I/O.
        let index = if freq_hz == 0 {
            self.store.release(name).unwrap_or(INDEX_SENTINEL)
        } else {
            self.store.allocate(name)
        };

        let frequency = i32::try_from(freq_hz).unwrap_or(i32::MAX);
        let request = SubscribeRequest::new(frequency, index, name);

        endpoint
            .socket
            .send_to(request.as_bytes(), endpoint.dest)
            .await
            .map_err(SubscribeError::SendFailure)?;

        tracing::trace!(dataref = name, index, freq_hz, "subscribe request sent");
        Ok(())
    }
}
