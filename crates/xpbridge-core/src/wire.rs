//! Simulator UDP wire format.
//!
//! Three datagram shapes cross the wire, each introduced by a 5-byte magic
//! prefix:
//!
//!   BECN\0  beacon, multicast by the simulator to advertise itself
//!   RREF\0  subscribe request, sent by us to the simulator
//!   RREF,   value packet, sent by the simulator for subscribed datarefs
//!
//! All multi-byte integers and floats are little-endian. The fixed-layout
//! parts are zerocopy structs built from unaligned byteorder types, so every
//! struct here has alignment 1 and no padding. There is no unsafe code in
//! this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, F32, I32, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Magic prefixes ────────────────────────────────────────────────────────────

/// Length shared by every magic prefix.
pub const PREFIX_LEN: usize = 5;

/// Beacon datagram prefix.
pub const BEACON_PREFIX: [u8; PREFIX_LEN] = *b"BECN\0";

/// Subscribe request prefix.
pub const SUBSCRIBE_PREFIX: [u8; PREFIX_LEN] = *b"RREF\0";

/// Value packet prefix. Note the comma: the simulator answers with a
/// different fifth byte than the one it expects in requests.
pub const VALUES_PREFIX: [u8; PREFIX_LEN] = *b"RREF,";

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default multicast group the simulator beacons on.
pub const MULTICAST_GROUP: &str = "239.255.1.1";

/// Default multicast port the simulator beacons on.
pub const MULTICAST_PORT: u16 = 49707;

/// Fixed width of the dataref name field in a subscribe request.
pub const DATAREF_NAME_LEN: usize = 400;

/// Index sent when unsubscribing a dataref that was never registered.
/// The simulator ignores unsubscribes for indices it does not know.
pub const INDEX_SENTINEL: i32 = -9999;

/// Only beacon major version we understand.
pub const BEACON_MAJOR_VERSION: u8 = 1;

/// Highest beacon minor version we understand.
pub const BEACON_MAX_MINOR_VERSION: u8 = 2;

/// Application host id advertised by the simulator itself (as opposed to
/// other products that speak the same beacon protocol).
pub const HOST_ID_SIMULATOR: i32 = 1;

// ── Beacon ────────────────────────────────────────────────────────────────────

/// Fixed part of a beacon datagram, immediately after the prefix.
/// Followed on the wire by a null-terminated hostname.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct BeaconHeader {
    pub major_version: u8,
    pub minor_version: u8,
    /// 1 = the simulator, 2 = planner tools. Anything else is rejected.
    pub host_id: I32<LittleEndian>,
    /// Simulator version number, e.g. 120300.
    pub version_number: I32<LittleEndian>,
    /// 1 = master, 2 = external visual, 3 = IOS.
    pub role: U32<LittleEndian>,
    /// UDP port the simulator accepts subscribe requests on.
    pub port: U16<LittleEndian>,
}

assert_eq_size!(BeaconHeader, [u8; 16]);

impl BeaconHeader {
    /// Whether this beacon comes from a simulator speaking a protocol
    /// revision we can talk to.
    pub fn is_supported(&self) -> bool {
        self.major_version == BEACON_MAJOR_VERSION
            && self.minor_version <= BEACON_MAX_MINOR_VERSION
            && self.host_id.get() == HOST_ID_SIMULATOR
    }
}

/// A decoded beacon datagram.
#[derive(Debug, Clone)]
pub struct BeaconPacket {
    pub header: BeaconHeader,
    pub hostname: String,
}

/// Decode a beacon datagram.
///
/// The hostname is the bytes after the fixed header up to the first null,
/// or up to the end of the datagram if no null is present. Version checks
/// are left to the caller via [`BeaconHeader::is_supported`].
pub fn decode_beacon(packet: &[u8]) -> Result<BeaconPacket, WireError> {
    let body = strip_prefix(packet, &BEACON_PREFIX)?;
    let header_len = std::mem::size_of::<BeaconHeader>();
    let header = BeaconHeader::read_from_prefix(body).ok_or(WireError::Truncated {
        needed: PREFIX_LEN + header_len,
        got: packet.len(),
    })?;

    let tail = &body[header_len..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let hostname = String::from_utf8_lossy(&tail[..end]).into_owned();

    Ok(BeaconPacket { header, hostname })
}

// ── Subscribe request ─────────────────────────────────────────────────────────

/// Request the simulator to stream one dataref at a given rate.
///
/// A frequency of 0 cancels the subscription for `index`.
///
/// Wire size: 413 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct SubscribeRequest {
    pub prefix: [u8; PREFIX_LEN],
    /// Updates per second. 0 = unsubscribe.
    pub frequency: I32<LittleEndian>,
    /// Locally assigned index the simulator echoes back in value packets.
    pub index: I32<LittleEndian>,
    /// Dataref name, zero-padded. Longer names are truncated.
    pub name: [u8; DATAREF_NAME_LEN],
}

assert_eq_size!(SubscribeRequest, [u8; 413]);

impl SubscribeRequest {
    pub fn new(frequency: i32, index: i32, name: &str) -> Self {
        let mut field = [0u8; DATAREF_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(DATAREF_NAME_LEN);
        field[..n].copy_from_slice(&bytes[..n]);

        Self {
            prefix: SUBSCRIBE_PREFIX,
            frequency: I32::new(frequency),
            index: I32::new(index),
            name: field,
        }
    }

    /// Decode a request previously produced by [`SubscribeRequest::new`].
    pub fn decode(packet: &[u8]) -> Result<Self, WireError> {
        strip_prefix(packet, &SUBSCRIBE_PREFIX)?;
        Self::read_from(packet).ok_or(WireError::Truncated {
            needed: std::mem::size_of::<Self>(),
            got: packet.len(),
        })
    }

    /// The dataref name with zero padding removed.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DATAREF_NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

// ── Value packet ──────────────────────────────────────────────────────────────

/// One (index, value) pair inside a value packet.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ValueRecord {
    pub index: I32<LittleEndian>,
    pub value: F32<LittleEndian>,
}

assert_eq_size!(ValueRecord, [u8; 8]);

/// Size of a single value record.
pub const VALUE_RECORD_LEN: usize = std::mem::size_of::<ValueRecord>();

impl ValueRecord {
    pub fn new(index: i32, value: f32) -> Self {
        Self {
            index: I32::new(index),
            value: F32::new(value),
        }
    }
}

/// Decode a value packet into its records.
///
/// Record count is the payload length divided by 8; a trailing partial
/// record is ignored.
pub fn decode_values(packet: &[u8]) -> Result<Vec<ValueRecord>, WireError> {
    let body = strip_prefix(packet, &VALUES_PREFIX)?;
    Ok(body
        .chunks_exact(VALUE_RECORD_LEN)
        .filter_map(ValueRecord::read_from)
        .collect())
}

/// Encode a value packet. The simulator is the only real producer; this
/// exists for fakes and tests.
pub fn encode_values(records: &[ValueRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_LEN + records.len() * VALUE_RECORD_LEN);
    out.extend_from_slice(&VALUES_PREFIX);
    for record in records {
        out.extend_from_slice(record.as_bytes());
    }
    out
}

fn strip_prefix<'a>(packet: &'a [u8], prefix: &[u8; PREFIX_LEN]) -> Result<&'a [u8], WireError> {
    packet.strip_prefix(prefix.as_slice()).ok_or(WireError::BadPrefix)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram does not carry the expected magic prefix")]
    BadPrefix,

    #[error("datagram truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
