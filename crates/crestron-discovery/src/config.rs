//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::packet::DISCOVERY_PORT;

/// Discovery engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port probes are sent to and received on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Initial listening window per adapter in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Window extension applied for every newly discovered device
    #[serde(default = "default_extension_ms")]
    pub extension_ms: u64,
    /// Number of discovery datagrams sent per adapter
    #[serde(default = "default_probe_count")]
    pub probe_count: u32,
    /// Pause between discovery datagrams in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Activity tick period in milliseconds
    #[serde(default = "default_activity_interval_ms")]
    pub activity_interval_ms: u64,
    /// Buffered events per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Remote (SSH) discovery settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            window_ms: default_window_ms(),
            extension_ms: default_extension_ms(),
            probe_count: default_probe_count(),
            probe_interval_ms: default_probe_interval_ms(),
            activity_interval_ms: default_activity_interval_ms(),
            event_capacity: default_event_capacity(),
            remote: RemoteConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn extension(&self) -> Duration {
        Duration::from_millis(self.extension_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn activity_interval(&self) -> Duration {
        Duration::from_millis(self.activity_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// SSH port on the remote processor
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Hard deadline for a remote discovery call in milliseconds
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// TCP connect and SSH operation timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_port: default_ssh_port(),
            deadline_ms: default_deadline_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_port() -> u16 {
    DISCOVERY_PORT
}

fn default_window_ms() -> u64 {
    8000
}

fn default_extension_ms() -> u64 {
    1000
}

fn default_probe_count() -> u32 {
    3
}

fn default_probe_interval_ms() -> u64 {
    500
}

fn default_activity_interval_ms() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    256
}

fn default_ssh_port() -> u16 {
    22
}

fn default_deadline_ms() -> u64 {
    8000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
