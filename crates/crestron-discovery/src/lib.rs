//! Crestron Discovery - Locating control processors on the network
//!
//! This crate provides two discovery methods behind one engine:
//! - UDP broadcast probing on every local IPv4 adapter (port 41794)
//! - Remote discovery, asking a reachable processor over SSH to run
//!   `autodiscovery query` and parsing its answer
//!
//! Only one discovery call, of either kind, runs at a time per engine.

pub mod activity;
pub mod adapters;
pub mod config;
pub mod engine;
pub mod packet;
pub mod probe;
pub mod registry;
pub mod remote;
pub mod session;
pub mod shell;

pub use adapters::list_ipv4_adapters;
pub use config::{DiscoveryConfig, RemoteConfig};
pub use engine::DiscoveryEngine;
pub use registry::DeviceRegistry;
pub use remote::RemoteError;
pub use shell::{CommandOutput, ShellConnector, ShellError, ShellSession, SshConnector};
