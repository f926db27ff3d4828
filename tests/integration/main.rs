//! xpbridge integration test harness.
//!
//! Tests in this file drive the bridge against a scripted simulator on the
//! loopback interface. No simulator install or multicast routing is needed:
//!
//!   cargo test --test integration
//!
//! The fake simulator answers subscribe requests the way the real one
//! does. When a dataref is subscribed it streams that dataref's scripted
//! value back to the requesting socket under the requested index, and it
//! keeps streaming on every `stream()` call until the dataref is
//! unsubscribed. Every request it sees is recorded for assertions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use zerocopy::byteorder::{I32, U16, U32};
use zerocopy::AsBytes;

use xpbridge_core::wire::{encode_values, BeaconHeader, SubscribeRequest, ValueRecord, BEACON_PREFIX};
use xpbridge_services::{DatarefStore, Endpoint, Receiver, SimLink, SubscriptionChannel};

mod subscriptions;

// ── Harness ───────────────────────────────────────────────────────────────────

const SIM_RECV_BUFFER: usize = 4 * 1024 * 1024;

/// One subscribe request as the simulator saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    pub name: String,
    pub frequency: i32,
    pub index: i32,
}

#[derive(Default)]
struct SimState {
    values: HashMap<String, f32>,
    active: HashMap<String, (i32, SocketAddr)>,
    requests: Vec<SeenRequest>,
}

/// Scripted simulator listening on 127.0.0.1.
pub struct FakeSimulator {
    addr: SocketAddr,
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<SimState>>,
    task: JoinHandle<()>,
}

impl FakeSimulator {
    pub async fn start() -> Result<Self> {
        let socket = Arc::new(bind_simulator_socket()?);
        let addr = socket.local_addr()?;
        let state = Arc::new(Mutex::new(SimState::default()));

        let task = {
            let socket = socket.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                loop {
                    let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                        return;
                    };
                    let Ok(request) = SubscribeRequest::decode(&buf[..len]) else {
                        continue;
                    };
                    let reply = handle_request(&state, &request, from);
                    if let Some(packet) = reply {
                        let _ = socket.send_to(&packet, from).await;
                    }
                }
            })
        };

        Ok(Self {
            addr,
            socket,
            state,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Script the value the simulator reports for `name`.
    pub fn set_value(&self, name: &str, value: f32) {
        self.state.lock().unwrap().values.insert(name.to_string(), value);
    }

    /// Script a string dataref as its per-byte elements, null-terminated.
    pub fn set_string(&self, base: &str, text: &str) {
        let mut state = self.state.lock().unwrap();
        let prefix = format!("{base}[");
        state.values.retain(|k, _| !k.starts_with(&prefix));
        for (i, b) in text.bytes().chain(std::iter::once(0)).enumerate() {
            state.values.insert(format!("{base}[{i}]"), f32::from(b));
        }
    }

    /// Send one value packet per subscriber with every active dataref.
    pub async fn stream(&self) -> Result<()> {
        let batches: HashMap<SocketAddr, Vec<ValueRecord>> = {
            let state = self.state.lock().unwrap();
            let mut batches: HashMap<SocketAddr, Vec<ValueRecord>> = HashMap::new();
            for (name, (index, to)) in &state.active {
                if let Some(&value) = state.values.get(name) {
                    batches.entry(*to).or_default().push(ValueRecord::new(*index, value));
                }
            }
            batches
        };
        for (to, records) in batches {
            self.socket.send_to(&encode_values(&records), to).await?;
        }
        Ok(())
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().active.keys().cloned().collect();
        names.sort();
        names
    }

    /// Beacon datagram advertising this simulator's request port.
    pub fn beacon(&self) -> Vec<u8> {
        let header = BeaconHeader {
            major_version: 1,
            minor_version: 2,
            host_id: I32::new(1),
            version_number: I32::new(121400),
            role: U32::new(1),
            port: U16::new(self.addr.port()),
        };
        let mut out = BEACON_PREFIX.to_vec();
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(b"fake-sim\0");
        out
    }
}

impl Drop for FakeSimulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Loopback socket with room for a full string read's worth of requests.
fn bind_simulator_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(SIM_RECV_BUFFER)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn handle_request(state: &Mutex<SimState>, request: &SubscribeRequest, from: SocketAddr) -> Option<Vec<u8>> {
    let name = request.name();
    let frequency = request.frequency.get();
    let index = request.index.get();

    let mut state = state.lock().unwrap();
    state.requests.push(SeenRequest {
        name: name.clone(),
        frequency,
        index,
    });

    if frequency == 0 {
        state.active.remove(&name);
        return None;
    }
    state.active.insert(name.clone(), (index, from));
    let value = *state.values.get(&name)?;
    Some(encode_values(&[ValueRecord::new(index, value)]))
}

/// A bridge wired to a fake simulator: store, link, channel and a running
/// receiver.
pub struct Bridge {
    pub store: Arc<DatarefStore>,
    pub link: Arc<SimLink>,
    pub channel: SubscriptionChannel,
    receiver: JoinHandle<()>,
}

impl Bridge {
    /// Receiver and channel with no endpoint installed yet.
    pub fn idle() -> Self {
        let store = Arc::new(DatarefStore::new());
        let link = Arc::new(SimLink::new());
        let channel = SubscriptionChannel::new(link.clone(), store.clone());
        let receiver = tokio::spawn(Receiver::new(link.clone(), store.clone()).run());
        Self {
            store,
            link,
            channel,
            receiver,
        }
    }

    /// Bridge already connected to `sim`.
    pub async fn connected(sim: &FakeSimulator) -> Result<Self> {
        let bridge = Self::idle();
        let endpoint = Endpoint::bind(sim.addr()).await.context("bind endpoint")?;
        bridge.link.install(endpoint);
        Ok(bridge)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

/// Poll `cond` every 20ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness itself: a subscribe request is recorded and answered.
#[tokio::test]
async fn test_fake_simulator_answers_requests() -> Result<()> {
    let sim = FakeSimulator::start().await?;
    sim.set_value("sim/time/paused", 1.0);

    let client = UdpSocket::bind("127.0.0.1:0").await?;
    let request = SubscribeRequest::new(5, 3, "sim/time/paused");
    client.send_to(request.as_bytes(), sim.addr()).await?;

    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf)).await??;
    let records = xpbridge_core::wire::decode_values(&buf[..len])?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index.get(), 3);
    assert_eq!(records[0].value.get(), 1.0);

    assert_eq!(
        sim.requests(),
        vec![SeenRequest {
            name: "sim/time/paused".to_string(),
            frequency: 5,
            index: 3,
        }]
    );
    Ok(())
}
