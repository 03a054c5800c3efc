//! Per-call device registry with serialized event dispatch

use crestron_core::DeviceRecord;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, trace};

#[derive(Default)]
struct Entries {
    keys: HashSet<String>,
    records: Vec<DeviceRecord>,
}

/// Devices seen so far in one discovery call
///
/// Shared by every worker of the call. The same lock guards the map and the
/// event send, so discovered events from concurrent workers never interleave
/// and each worker's events keep its arrival order.
pub struct DeviceRegistry {
    entries: Mutex<Entries>,
    events: broadcast::Sender<DeviceRecord>,
}

impl DeviceRegistry {
    /// Create an empty registry publishing to `events`
    pub fn new(events: broadcast::Sender<DeviceRecord>) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            events,
        }
    }

    /// Insert `record` unless its key is already present
    ///
    /// Returns `true` when the record was new; in that case the discovered
    /// event has been published before this returns. A duplicate key is
    /// dropped silently (first write wins).
    pub fn try_add(&self, record: DeviceRecord) -> bool {
        let mut entries = self.lock();
        if !entries.keys.insert(record.key().to_string()) {
            trace!(ip = %record.ip_address, "Duplicate device ignored");
            return false;
        }

        debug!(
            ip = %record.ip_address,
            hostname = %record.hostname,
            device_id = %record.device_id,
            "Device discovered"
        );
        entries.records.push(record.clone());
        // No subscribers is fine; the record is still part of the result
        let _ = self.events.send(record);
        true
    }

    /// Number of devices accepted so far
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted devices in insertion order
    pub fn records(&self) -> Vec<DeviceRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // A panic while holding the lock cannot leave the entries half-written
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
