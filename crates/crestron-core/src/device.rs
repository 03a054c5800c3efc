//! Device and adapter types shared by the discovery paths

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A control processor found by broadcast or remote discovery
///
/// Records are built once from a reply (or a line of remote output) and
/// never changed afterwards; events and results carry clones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Address the device answered from (or reported by the remote host)
    pub ip_address: String,
    /// Device hostname
    pub hostname: String,
    /// Model and firmware description, e.g. `CP4 Cntrl Eng [v2.8001.00053 (Jun 08 2023), #00000000]`
    pub description: String,
    /// Device identifier following the `@` marker (may be empty)
    pub device_id: String,
}

impl DeviceRecord {
    pub fn new(
        ip_address: impl Into<String>,
        hostname: impl Into<String>,
        description: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            hostname: hostname.into(),
            description: description.into(),
            device_id: device_id.into(),
        }
    }

    /// Key used to deduplicate records within one discovery call
    pub fn key(&self) -> &str {
        &self.ip_address
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.ip_address)?;
        if !self.device_id.is_empty() {
            write!(f, " @{}", self.device_id)?;
        }
        Ok(())
    }
}

/// An active local IPv4 interface that can carry a discovery broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// OS interface identifier
    pub id: String,
    /// Human-readable interface name
    pub name: String,
    /// Address the probe socket binds to
    pub local_address: Ipv4Addr,
    /// Directed broadcast address for the interface's subnet
    pub broadcast_address: Ipv4Addr,
}

impl AdapterDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        local_address: Ipv4Addr,
        broadcast_address: Ipv4Addr,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            local_address,
            broadcast_address,
        }
    }
}
