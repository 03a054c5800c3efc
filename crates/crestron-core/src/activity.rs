//! Status snapshots emitted while a discovery call runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress of the discovery call currently holding the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    /// Devices accepted so far in this call
    pub devices_discovered: usize,
    /// Time since the call started
    pub elapsed: Duration,
    /// Planned length of the call, including any window extensions
    pub total_planned: Duration,
    /// Whether the call is still running
    pub is_running: bool,
    /// Last error recorded by the call, if any
    pub last_error: Option<String>,
    /// When the snapshot was taken
    pub observed_at: DateTime<Utc>,
}

impl ActivitySnapshot {
    /// Remaining planned time, zero once the plan has elapsed
    pub fn remaining(&self) -> Duration {
        self.total_planned.saturating_sub(self.elapsed)
    }
}
