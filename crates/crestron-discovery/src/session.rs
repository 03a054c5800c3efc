//! State of one in-flight discovery call

use chrono::Utc;
use crestron_core::{ActivitySnapshot, DeviceRecord};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::registry::DeviceRegistry;

struct SessionState {
    is_running: bool,
    total_planned: Duration,
    last_error: Option<String>,
    /// Device count reported once the call has produced its result
    final_count: Option<usize>,
}

/// Everything one discovery call shares between its workers and reporter
///
/// Created when the call has acquired the gate and dropped when it returns;
/// nothing here outlives the call.
pub struct Session {
    started: Instant,
    registry: DeviceRegistry,
    state: Mutex<SessionState>,
}

impl Session {
    /// Start a running session planned to last `planned`
    pub fn new(events: broadcast::Sender<DeviceRecord>, planned: Duration) -> Self {
        Self {
            started: Instant::now(),
            registry: DeviceRegistry::new(events),
            state: Mutex::new(SessionState {
                is_running: true,
                total_planned: planned,
                last_error: None,
                final_count: None,
            }),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Grow the planned duration so it covers `deadline`; never shrinks it
    pub fn extend_plan_to(&self, deadline: Instant) {
        let planned = deadline.saturating_duration_since(self.started);
        let mut state = self.lock();
        if planned > state.total_planned {
            state.total_planned = planned;
        }
    }

    /// Remember the most recent error for the next activity tick
    pub fn record_error(&self, error: impl Into<String>) {
        self.lock().last_error = Some(error.into());
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    /// Mark the call finished with `returned` devices in its result
    pub fn finish(&self, returned: usize) {
        let mut state = self.lock();
        state.is_running = false;
        state.final_count = Some(returned);
    }

    /// Current progress, as reported on the activity stream
    pub fn snapshot(&self) -> ActivitySnapshot {
        let discovered = self.registry.len();
        let state = self.lock();
        ActivitySnapshot {
            devices_discovered: state.final_count.unwrap_or(discovered),
            elapsed: self.started.elapsed(),
            total_planned: state.total_planned,
            is_running: state.is_running,
            last_error: state.last_error.clone(),
            observed_at: Utc::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
