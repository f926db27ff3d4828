//! Telemetry sink — where formatted updates go.
//!
//! The downstream consumer listens on a local TCP port. The sink connects
//! lazily on the first send and forgets the connection on any write error,
//! so the following send reconnects. It never retries on its own: callers
//! publish the latest state on their next tick instead.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink connection error: {0}")]
    Connection(#[from] std::io::Error),
}

/// Consumer of outbound telemetry payloads.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, payload: Bytes) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<T: TelemetrySink> TelemetrySink for Arc<T> {
    fn send(&self, payload: Bytes) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).send(payload)
    }
}

/// TCP sink with lazy connect and drop-on-error.
#[derive(Debug)]
pub struct TcpSink {
    addr: String,
    conn: Mutex<Option<TcpStream>>,
}

impl TcpSink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

impl TelemetrySink for TcpSink {
    async fn send(&self, payload: Bytes) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().await;

        if conn.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            tracing::info!(addr = %self.addr, "connected to telemetry sink");
            *conn = Some(stream);
        }

        if let Some(stream) = conn.as_mut() {
            if let Err(e) = stream.write_all(&payload).await {
                tracing::debug!(addr = %self.addr, error = %e, "sink write failed, dropping connection");
                *conn = None;
                return Err(e.into());
            }
        }
        Ok(())
    }
}
