//! Local IPv4 adapter enumeration

use anyhow::Result;
use crestron_core::AdapterDescriptor;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use tracing::debug;

/// List every non-loopback IPv4 address on this machine as a probe target
pub fn list_ipv4_adapters() -> Result<Vec<AdapterDescriptor>> {
    let interfaces = NetworkInterface::show()?;

    let adapters: Vec<AdapterDescriptor> = interfaces
        .into_iter()
        .flat_map(|iface| {
            let id = iface.index.to_string();
            let name = iface.name;
            iface.addr.into_iter().filter_map(move |addr| match addr {
                Addr::V4(v4) if !v4.ip.is_loopback() && !v4.ip.is_unspecified() => {
                    Some(AdapterDescriptor::new(
                        id.clone(),
                        name.clone(),
                        v4.ip,
                        v4.broadcast
                            .unwrap_or_else(|| broadcast_address(v4.ip, v4.netmask)),
                    ))
                }
                _ => None,
            })
        })
        .collect();

    debug!("Found {} IPv4 adapters", adapters.len());
    Ok(adapters)
}

/// Directed broadcast address for `ip`, or the limited broadcast without a mask
pub fn broadcast_address(ip: Ipv4Addr, netmask: Option<Ipv4Addr>) -> Ipv4Addr {
    match netmask {
        Some(mask) => Ipv4Addr::from(u32::from(ip) | !u32::from(mask)),
        None => Ipv4Addr::BROADCAST,
    }
}
