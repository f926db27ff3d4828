//! String datarefs, read one byte at a time.
//!
//! The simulator only streams numbers, so a text dataref such as the
//! aircraft ICAO code is read by subscribing to each element `base[i]` of
//! its byte array, waiting until a contiguous run of elements ends in a
//! zero byte (or fills `max_len`), and unsubscribing again. Elements can
//! arrive in any order across packets; a scan that hits a missing element
//! simply waits for the next tick.

use std::sync::Arc;
use std::time::Duration;

use crate::store::DatarefStore;
use crate::subscription::Subscriber;

/// Requests sent back to back before yielding. A livery path alone is
/// 255 elements.
pub const REQUEST_BURST: usize = 16;

/// Text for a byte-array dataref. Each byte maps to the char with the
/// same code point, so the text of a byte prefix is always a prefix of the
/// text of the whole array.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

/// Timing for a string read.
#[derive(Debug, Clone, Copy)]
pub struct StringReadOptions {
    /// Delay between scans of the cached bytes.
    pub poll_interval: Duration,
    /// Upper bound on the whole read.
    pub timeout: Duration,
    /// Rate requested for each element.
    pub frequency_hz: u32,
}

impl Default for StringReadOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(3),
            frequency_hz: 1,
        }
    }
}

impl StringReadOptions {
    /// Number of scans that fit in the timeout. At least one.
    fn max_polls(&self) -> u32 {
        let poll = self.poll_interval.as_millis().max(1);
        u32::try_from(self.timeout.as_millis() / poll).unwrap_or(u32::MAX).max(1)
    }
}

/// Reconstructs strings from byte-array datarefs.
#[derive(Debug, Clone)]
pub struct StringReader<S> {
    subscriber: S,
    store: Arc<DatarefStore>,
    options: StringReadOptions,
}

/// Name of element `i` of the array dataref `base`.
pub fn element_name(base: &str, i: usize) -> String {
    format!("{base}[{i}]")
}

impl<S: Subscriber> StringReader<S> {
    pub fn new(subscriber: S, store: Arc<DatarefStore>, options: StringReadOptions) -> Self {
        Self {
            subscriber,
            store,
            options,
        }
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn store(&self) -> &Arc<DatarefStore> {
        &self.store
    }

    /// Read the string dataref `base`, at most `max_len` bytes long.
    ///
    /// Returns an empty string if the read times out. Every element that
    /// was subscribed is unsubscribed before returning.
    pub async fn read(&self, base: &str, max_len: usize) -> String {
        let names: Vec<String> = (0..max_len).map(|i| element_name(base, i)).collect();

        self.set_all(&names, self.options.frequency_hz).await;
        let result = self.poll_until_complete(&names).await;
        self.set_all(&names, 0).await;

        match result {
            Some(bytes) => bytes_to_text(&bytes),
            None => {
                tracing::debug!(dataref = base, "string read timed out");
                String::new()
            }
        }
    }

    /// Send one request per element, yielding every [`REQUEST_BURST`]
    /// requests so the peer can drain its socket.
    async fn set_all(&self, names: &[String], freq_hz: u32) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 && i % REQUEST_BURST == 0 {
                tokio::task::yield_now().await;
            }
            if let Err(e) = self.subscriber.set_frequency(name, freq_hz).await {
                tracing::warn!(error = %e, dataref = %name, freq_hz, "string element request failed");
            }
        }
    }

    /// Bounded retry loop: one scan per poll interval until a scan
    /// completes or the poll budget is spent.
    async fn poll_until_complete(&self, names: &[String]) -> Option<Vec<u8>> {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        // the first tick of an interval fires immediately
        ticker.tick().await;

        for _ in 0..self.options.max_polls() {
            ticker.tick().await;
            if let Some(bytes) = scan(&self.store, names) {
                return Some(bytes);
            }
        }
        None
    }
}

/// Scan cached elements in order. `Some` once the string is terminated by
/// a zero byte or reaches `names.len()` bytes; `None` at the first element
/// with no value yet.
fn scan(store: &DatarefStore, names: &[String]) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(names.len());
    for name in names {
        let byte = store.get(name)? as u8;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    Some(bytes)
}
