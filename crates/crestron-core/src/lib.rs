//! Crestron Core - Shared types for control-processor discovery
//!
//! This crate provides the data model used by every discovery path:
//! - Device records describing a discovered control processor
//! - Adapter descriptors for the local interfaces probed by broadcast
//! - Activity snapshots reported while a discovery call is running

pub mod activity;
pub mod device;

pub use activity::ActivitySnapshot;
pub use device::{AdapterDescriptor, DeviceRecord};
