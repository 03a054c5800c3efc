//! Periodic activity reporting for a running discovery call

use crestron_core::ActivitySnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::session::Session;

/// Emits a session snapshot every period until finished
///
/// The first tick fires one period after start. [`ActivityReporter::finish`]
/// stops the ticker before publishing the terminal snapshot, so exactly one
/// `is_running == false` snapshot is published per call. Dropping the
/// reporter without finishing (the discovery future was dropped) stops the
/// ticker and publishes the terminal snapshot with the devices found so far.
pub struct ActivityReporter {
    session: Arc<Session>,
    sink: broadcast::Sender<ActivitySnapshot>,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ActivityReporter {
    pub fn start(
        session: Arc<Session>,
        sink: broadcast::Sender<ActivitySnapshot>,
        period: Duration,
    ) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn({
            let session = session.clone();
            let sink = sink.clone();
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut stopped => break,
                        _ = ticker.tick() => publish(&sink, session.snapshot()),
                    }
                }
            }
        });

        Self {
            session,
            sink,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Stop ticking, mark the session finished and publish the final snapshot
    pub async fn finish(mut self, returned: usize) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Activity reporter task failed");
            }
        }
        self.conclude(returned);
    }

    // Publishes the terminal snapshot at most once per session
    fn conclude(&self, returned: usize) {
        if !self.session.is_running() {
            return;
        }
        self.session.finish(returned);
        publish(&self.sink, self.session.snapshot());
    }
}

impl Drop for ActivityReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        if self.session.is_running() {
            let returned = self.session.registry().len();
            warn!(devices = returned, "Discovery call dropped before completion");
            self.conclude(returned);
        }
    }
}

fn publish(sink: &broadcast::Sender<ActivitySnapshot>, snapshot: ActivitySnapshot) {
    debug!(
        devices = snapshot.devices_discovered,
        elapsed_secs = snapshot.elapsed.as_secs(),
        total_secs = snapshot.total_planned.as_secs(),
        running = snapshot.is_running,
        error = snapshot.last_error.as_deref().unwrap_or(""),
        "Discovery activity"
    );
    let _ = sink.send(snapshot);
}
