//! Discovery engine: single-flight coordination of local and remote discovery

use crestron_core::{ActivitySnapshot, AdapterDescriptor, DeviceRecord};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::activity::ActivityReporter;
use crate::adapters::list_ipv4_adapters;
use crate::config::DiscoveryConfig;
use crate::packet::local_hostname;
use crate::probe::ProbeWorker;
use crate::remote::RemoteDiscoveryClient;
use crate::session::Session;
use crate::shell::{ShellConnector, SshConnector};

/// Discovery engine
///
/// Owns the single-flight gate and the event streams. Every discovery call,
/// local or remote, waits for the gate before doing any I/O, so at most one
/// call runs per engine; later callers queue in arrival order. Build one
/// engine per process and share it.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    gate: Mutex<()>,
    connector: Arc<dyn ShellConnector>,
    device_tx: broadcast::Sender<DeviceRecord>,
    activity_tx: broadcast::Sender<ActivitySnapshot>,
    current: std::sync::Mutex<Option<Arc<Session>>>,
}

impl DiscoveryEngine {
    /// Create an engine that reaches remote hosts over SSH
    pub fn new(config: DiscoveryConfig) -> Self {
        let connector = Arc::new(SshConnector::new(
            config.remote.ssh_port,
            config.remote.connect_timeout(),
        ));
        Self::with_connector(config, connector)
    }

    /// Create an engine using `connector` for remote discovery
    pub fn with_connector(config: DiscoveryConfig, connector: Arc<dyn ShellConnector>) -> Self {
        let capacity = config.event_capacity.max(1);
        let (device_tx, _) = broadcast::channel(capacity);
        let (activity_tx, _) = broadcast::channel(capacity);
        Self {
            config,
            gate: Mutex::new(()),
            connector,
            device_tx,
            activity_tx,
            current: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Subscribe to devices as they are discovered
    ///
    /// Deliveries never overlap and keep each adapter's arrival order.
    pub fn subscribe_devices(&self) -> broadcast::Receiver<DeviceRecord> {
        self.device_tx.subscribe()
    }

    /// Subscribe to activity snapshots (one per tick plus a final one per call)
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivitySnapshot> {
        self.activity_tx.subscribe()
    }

    /// Whether a discovery call currently holds the gate and is running
    pub fn is_discovering(&self) -> bool {
        self.current_session()
            .map(|session| session.is_running())
            .unwrap_or(false)
    }

    /// Snapshot of the running call, if any
    pub fn activity(&self) -> Option<ActivitySnapshot> {
        self.current_session().map(|session| session.snapshot())
    }

    /// Discover devices on every local IPv4 adapter
    pub async fn discover_all_local_adapters(&self) -> Vec<DeviceRecord> {
        match list_ipv4_adapters() {
            Ok(adapters) => self.discover_on_adapters(&adapters).await,
            Err(e) => {
                error!(error = %e, "Failed to enumerate network adapters");
                Vec::new()
            }
        }
    }

    /// Discover devices reachable from a single adapter
    pub async fn discover_on_adapter(&self, adapter: &AdapterDescriptor) -> Vec<DeviceRecord> {
        self.discover_on_adapters(std::slice::from_ref(adapter)).await
    }

    /// Broadcast on every adapter concurrently and collect the replies
    ///
    /// Runs until the last adapter's window (including extensions) closes.
    /// Dropping the returned future stops the workers, publishes the final
    /// activity snapshot and releases the gate.
    pub async fn discover_on_adapters(&self, adapters: &[AdapterDescriptor]) -> Vec<DeviceRecord> {
        let _gate = self.gate.lock().await;
        let (session, _active) = self.open_session(self.config.window());
        let reporter = self.start_reporter(&session);

        info!(adapters = adapters.len(), "Starting local discovery");
        let hostname = local_hostname();
        let mut workers = JoinSet::new();
        for adapter in adapters {
            let worker = ProbeWorker::new(adapter.clone(), &self.config, &hostname);
            workers.spawn(worker.run(session.clone()));
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Discovery worker panicked");
            }
        }

        let devices = session.registry().records();
        info!(found = devices.len(), "Local discovery finished");
        reporter.finish(devices.len()).await;
        devices
    }

    /// Ask `host` to run its own discovery and parse the answer
    ///
    /// The call is bounded by the remote deadline; failures are logged,
    /// reported on the activity stream and yield an empty list.
    pub async fn discover_remote(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Vec<DeviceRecord> {
        let _gate = self.gate.lock().await;
        let deadline = self.config.remote.deadline();
        let (session, _active) = self.open_session(deadline);
        let reporter = self.start_reporter(&session);

        info!(host = %host, user = %username, "Starting remote discovery");
        let client = RemoteDiscoveryClient::new(self.connector.clone(), deadline);
        let devices = client.discover(&session, host, username, password).await;

        info!(host = %host, found = devices.len(), "Remote discovery finished");
        reporter.finish(devices.len()).await;
        devices
    }

    fn open_session(&self, planned: std::time::Duration) -> (Arc<Session>, ActiveCall<'_>) {
        let session = Arc::new(Session::new(self.device_tx.clone(), planned));
        *self.lock_current() = Some(session.clone());
        (session, ActiveCall { engine: self })
    }

    fn start_reporter(&self, session: &Arc<Session>) -> ActivityReporter {
        ActivityReporter::start(
            session.clone(),
            self.activity_tx.clone(),
            self.config.activity_interval(),
        )
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.lock_current().clone()
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<Session>>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the engine's current session when a call ends or is dropped
struct ActiveCall<'a> {
    engine: &'a DiscoveryEngine,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.engine.lock_current().take();
    }
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}
