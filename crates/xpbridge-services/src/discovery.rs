//! Beacon discovery.
//!
//! The simulator multicasts a BECN datagram about once a second. We join
//! the beacon group on every interface that is up and multicast-capable,
//! wait for one datagram, and decode it into a [`BeaconInfo`]. A single
//! call makes a single attempt; [`discover_with_retries`] loops over
//! attempts that saw a foreign datagram.

use std::collections::HashSet;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use xpbridge_core::config::DiscoveryConfig;
use xpbridge_core::wire::{decode_beacon, WireError};

/// Largest beacon we expect to receive.
const BEACON_BUF_LEN: usize = 2048;

/// A running simulator, as advertised by its beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconInfo {
    /// Source address of the beacon datagram.
    pub ip: IpAddr,
    /// Port the simulator accepts subscribe requests on.
    pub port: u16,
    pub hostname: String,
    pub major_version: u8,
    pub minor_version: u8,
    pub version_number: i32,
    pub role: u32,
}

impl BeaconInfo {
    /// Where subscribe requests go.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no beacon received within {0:?}")]
    Timeout(Duration),

    #[error("no simulator found after {attempts} attempts")]
    NotFound { attempts: u32 },

    #[error("unexpected datagram from {from}: {reason}")]
    UnexpectedPacket { from: SocketAddr, reason: WireError },

    #[error("unsupported beacon: version {major}.{minor}, host id {host_id}")]
    UnsupportedVersion { major: u8, minor: u8, host_id: i32 },

    #[error("failed to join the beacon group on any interface")]
    NoMulticastInterface,

    #[error("discovery socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::UnexpectedPacket { .. })
    }
}

/// Decode a datagram received from `from` into a [`BeaconInfo`].
pub fn parse_beacon(packet: &[u8], from: SocketAddr) -> Result<BeaconInfo, DiscoveryError> {
    let beacon = decode_beacon(packet)
        .map_err(|reason| DiscoveryError::UnexpectedPacket { from, reason })?;
    let header = &beacon.header;

    if !header.is_supported() {
        return Err(DiscoveryError::UnsupportedVersion {
            major: header.major_version,
            minor: header.minor_version,
            host_id: header.host_id.get(),
        });
    }

    Ok(BeaconInfo {
        ip: from.ip(),
        port: header.port.get(),
        hostname: beacon.hostname,
        major_version: header.major_version,
        minor_version: header.minor_version,
        version_number: header.version_number.get(),
        role: header.role.get(),
    })
}

/// Wait for one datagram on `socket` and decode it as a beacon.
pub async fn await_beacon(socket: &UdpSocket, timeout: Duration) -> Result<BeaconInfo, DiscoveryError> {
    let mut buf = vec![0u8; BEACON_BUF_LEN];
    let (len, from) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| DiscoveryError::Timeout(timeout))??;
    parse_beacon(&buf[..len], from)
}

/// Single discovery attempt on the configured group and port.
pub async fn discover(config: &DiscoveryConfig) -> Result<BeaconInfo, DiscoveryError> {
    let socket = make_beacon_socket(config.multicast_group, config.port)?;
    let socket = UdpSocket::from_std(socket)?;

    tracing::debug!(
        group = %config.multicast_group,
        port = config.port,
        timeout_secs = config.timeout_secs,
        "waiting for simulator beacon"
    );
    await_beacon(&socket, config.timeout()).await
}

/// Repeat [`discover`] while attempts see foreign datagrams.
pub async fn discover_with_retries(config: &DiscoveryConfig) -> Result<BeaconInfo, DiscoveryError> {
    retry_attempts(config.attempts, || discover(config)).await
}

/// Run `attempt` up to `attempts` times (at least once), retrying only
/// failures that [`DiscoveryError::is_retryable`] allows.
pub async fn retry_attempts<F, Fut>(attempts: u32, mut attempt: F) -> Result<BeaconInfo, DiscoveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<BeaconInfo, DiscoveryError>>,
{
    let attempts = attempts.max(1);
    for n in 1..=attempts {
        match attempt().await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(attempt = n, error = %e, "ignoring non-beacon datagram");
            }
            other => return other,
        }
    }
    Err(DiscoveryError::NotFound { attempts })
}

/// Bind the beacon port with SO_REUSEADDR and join `group` on every
/// viable interface. Succeeds if at least one join worked.
fn make_beacon_socket(group: Ipv4Addr, port: u16) -> Result<std::net::UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

    let mut joined = 0;
    for (name, addr) in multicast_interfaces()? {
        match socket.join_multicast_v4(&group, &addr) {
            Ok(()) => {
                tracing::trace!(interface = %name, %addr, "joined beacon group");
                joined += 1;
            }
            Err(e) => tracing::trace!(interface = %name, error = %e, "beacon group join failed"),
        }
    }

    if joined == 0 {
        return Err(DiscoveryError::NoMulticastInterface);
    }
    Ok(socket.into())
}

/// One IPv4 address per interface that is up and multicast-capable.
fn multicast_interfaces() -> Result<Vec<(String, Ipv4Addr)>, DiscoveryError> {
    let wanted = InterfaceFlags::IFF_UP | InterfaceFlags::IFF_MULTICAST;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for ifaddr in getifaddrs().map_err(std::io::Error::from)? {
        if !ifaddr.flags.contains(wanted) {
            continue;
        }
        let Some(sin) = ifaddr.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        if seen.insert(ifaddr.interface_name.clone()) {
            out.push((ifaddr.interface_name, *SocketAddrV4::from(*sin).ip()));
        }
    }
    Ok(out)
}
