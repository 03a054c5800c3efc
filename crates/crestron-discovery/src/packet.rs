//! Crestron autodiscovery datagram encoding and reply parsing
//!
//! The probe is a fixed 10-byte header, the sender's hostname in ASCII and
//! NUL padding up to 266 bytes. Replies start with a 4-byte magic prefix
//! followed by the device hostname, NUL padding, a description ending in
//! `]` and an optional `@<device id>` suffix.

use crestron_core::DeviceRecord;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use tracing::warn;

/// UDP port Crestron devices listen on for autodiscovery
pub const DISCOVERY_PORT: u16 = 41794;

/// Fixed header of every outbound discovery datagram
pub const DISCOVERY_HEADER: [u8; 10] = [0x14, 0x00, 0x00, 0x00, 0x01, 0x04, 0x00, 0x03, 0x00, 0x00];

/// Total length of an outbound discovery datagram
pub const DISCOVERY_PACKET_LEN: usize = 266;

/// Longest hostname that fits in a discovery datagram
pub const MAX_HOSTNAME_LEN: usize = DISCOVERY_PACKET_LEN - DISCOVERY_HEADER.len();

/// Prefix identifying a discovery reply
pub const RESPONSE_MAGIC: [u8; 4] = [0x15, 0x00, 0x00, 0x00];

static REPLY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<hostname>[\w-]*)\x00+(?<description>[\x20-\x7E]*\])(\s*@(?<devid>[\x20-\x7E]*))?")
        .expect("reply pattern is valid")
});

/// Parsed body of a discovery reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub hostname: String,
    pub description: String,
    pub device_id: String,
}

impl DiscoveryReply {
    /// Build a device record, using the reply's source address as identity
    pub fn into_record(self, from: IpAddr) -> DeviceRecord {
        DeviceRecord::new(from.to_string(), self.hostname, self.description, self.device_id)
    }
}

/// Encode the discovery datagram announcing `hostname`
///
/// Non-ASCII characters are sent as `?` and the hostname is cut at
/// [`MAX_HOSTNAME_LEN`] bytes so the datagram is always exactly
/// [`DISCOVERY_PACKET_LEN`] bytes long.
pub fn encode_discovery(hostname: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(DISCOVERY_PACKET_LEN);
    packet.extend_from_slice(&DISCOVERY_HEADER);
    packet.extend(
        hostname
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .take(MAX_HOSTNAME_LEN),
    );
    packet.resize(DISCOVERY_PACKET_LEN, 0);
    packet
}

/// Decode a datagram received on the discovery port
///
/// Returns `None` for anything that is not a well-formed discovery reply;
/// such datagrams are expected on a shared broadcast port and are not errors.
pub fn decode_reply(data: &[u8]) -> Option<DiscoveryReply> {
    if data.is_empty() || !data.starts_with(&RESPONSE_MAGIC) {
        return None;
    }

    let body = ascii_lossy(&data[RESPONSE_MAGIC.len()..]);
    let captures = REPLY_PATTERN.captures(&body)?;

    Some(DiscoveryReply {
        hostname: captures.name("hostname")?.as_str().to_string(),
        description: captures.name("description")?.as_str().to_string(),
        device_id: captures
            .name("devid")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    })
}

/// Hostname announced in discovery datagrams
pub fn local_hostname() -> String {
    match sys_info::hostname() {
        Ok(hostname) => hostname,
        Err(e) => {
            warn!(error = %e, "Could not read local hostname, announcing an empty one");
            String::new()
        }
    }
}

// Bytes outside 7-bit ASCII decode to '?'
fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}
