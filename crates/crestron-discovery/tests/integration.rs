//! End-to-end discovery tests against loopback devices and a scripted shell

use crestron_core::{ActivitySnapshot, AdapterDescriptor, DeviceRecord};
use crestron_discovery::packet::{DISCOVERY_HEADER, RESPONSE_MAGIC};
use crestron_discovery::{
    CommandOutput, DiscoveryConfig, DiscoveryEngine, RemoteConfig, ShellConnector, ShellError,
    ShellSession,
};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::Instant;

const DEVICE_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

fn free_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn local_config(port: u16, window_ms: u64) -> DiscoveryConfig {
    DiscoveryConfig {
        port,
        window_ms,
        extension_ms: 200,
        probe_count: 1,
        probe_interval_ms: 10,
        activity_interval_ms: 100,
        ..DiscoveryConfig::default()
    }
}

/// Adapter on 127.0.0.1 whose "broadcast" reaches the fake device on 127.0.0.2
fn loopback_adapter() -> AdapterDescriptor {
    AdapterDescriptor::new("1", "lo", Ipv4Addr::LOCALHOST, DEVICE_ADDR)
}

/// Fake control processor answering every probe twice
struct FakeDevice {
    probes: Arc<Mutex<Vec<Instant>>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeDevice {
    async fn start(port: u16, hostname: &str) -> Self {
        let socket = UdpSocket::bind((DEVICE_ADDR, port)).await.unwrap();
        let probes = Arc::new(Mutex::new(Vec::new()));

        let mut reply = RESPONSE_MAGIC.to_vec();
        reply.extend_from_slice(hostname.as_bytes());
        reply.extend_from_slice(b"\0\0\0CP4 Cntrl Eng [v2.8001.00053 (Jun 08 2023), #7C7E1D61] @E-00107fe1bc3b\0\0");

        let task = tokio::spawn({
            let probes = probes.clone();
            async move {
                let mut buf = vec![0u8; 1024];
                while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                    if !buf[..len].starts_with(&DISCOVERY_HEADER) {
                        continue;
                    }
                    probes.lock().unwrap().push(Instant::now());
                    let _ = socket.send_to(&reply, from).await;
                    let _ = socket.send_to(&reply, from).await;
                }
            }
        });

        Self { probes, task }
    }

    fn probes(&self) -> Vec<Instant> {
        self.probes.lock().unwrap().clone()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn test_local_discovery_deduplicates_replies() {
    let port = free_port();
    let device = FakeDevice::start(port, "CP4-LOBBY").await;
    let engine = DiscoveryEngine::new(local_config(port, 500));
    let mut events = engine.subscribe_devices();

    let devices = engine.discover_on_adapter(&loopback_adapter()).await;

    assert_eq!(device.probes().len(), 1);
    assert_eq!(devices.len(), 1);
    let record = &devices[0];
    assert_eq!(record.ip_address, "127.0.0.2");
    assert_eq!(record.hostname, "CP4-LOBBY");
    assert_eq!(
        record.description,
        "CP4 Cntrl Eng [v2.8001.00053 (Jun 08 2023), #7C7E1D61]"
    );
    assert_eq!(record.device_id, "E-00107fe1bc3b");

    let events = drain(&mut events);
    assert_eq!(events, devices);
}

#[tokio::test]
async fn test_new_device_extends_window() {
    let port = free_port();
    let _device = FakeDevice::start(port, "CP4-LOBBY").await;
    let engine = DiscoveryEngine::new(local_config(port, 400));

    let started = Instant::now();
    let devices = engine.discover_on_adapter(&loopback_adapter()).await;

    assert_eq!(devices.len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn test_concurrent_calls_run_one_at_a_time() {
    let port = free_port();
    let device = FakeDevice::start(port, "CP4-LOBBY").await;
    let engine = DiscoveryEngine::new(local_config(port, 500));
    let adapter = loopback_adapter();

    let (first, second) = tokio::join!(
        engine.discover_on_adapter(&adapter),
        engine.discover_on_adapter(&adapter)
    );

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);

    // The second call only probes once the first one's extended window closed
    let probes = device.probes();
    assert_eq!(probes.len(), 2);
    assert!(probes[1] - probes[0] >= Duration::from_millis(650));
}

#[tokio::test]
async fn test_activity_ends_with_single_final_snapshot() {
    let port = free_port();
    let _device = FakeDevice::start(port, "CP4-LOBBY").await;
    let engine = DiscoveryEngine::new(local_config(port, 500));
    let mut activity = engine.subscribe_activity();

    let devices = engine.discover_on_adapter(&loopback_adapter()).await;

    let snapshots: Vec<ActivitySnapshot> = drain(&mut activity);
    assert!(snapshots.len() >= 3);
    let (last, ticks) = snapshots.split_last().unwrap();
    assert!(ticks.iter().all(|s| s.is_running));
    assert!(!last.is_running);
    assert_eq!(last.devices_discovered, devices.len());
    assert!(last.total_planned >= Duration::from_millis(700));
}

#[tokio::test]
async fn test_unbindable_adapter_does_not_block_others() {
    let port = free_port();
    let _device = FakeDevice::start(port, "CP4-LOBBY").await;
    let engine = DiscoveryEngine::new(local_config(port, 300));
    let bogus = AdapterDescriptor::new(
        "9",
        "bogus",
        Ipv4Addr::new(203, 0, 113, 7),
        Ipv4Addr::new(203, 0, 113, 255),
    );
    let mut activity = engine.subscribe_activity();

    let devices = engine.discover_on_adapters(&[bogus, loopback_adapter()]).await;

    assert_eq!(devices.len(), 1);
    let last = drain(&mut activity).pop().unwrap();
    assert!(last.last_error.is_some());
}

const IPCONFIG: &str = "Ethernet Adapter [LAN]:\r\n   IP Address ........ : 172.22.0.60\r\n   Subnet Mask ....... : 255.255.255.0\r\n";
const HOSTNAME: &str = "Host Name: CP3-LOBBY\r\n";
const VERSION: &str = "CP3 Cntrl Eng [v1.8001.4976.27034 (Apr 25 2023), #00845E5C] @E-00107f845e5c\r\n";
const QUERY: &str = "Discovered 2 devices:\r\n\
    172.22.0.61 : 00107F9A1B2C : TSW-1070-CONF : TSW-1070 [v3.002.1061 (Mar 01 2023), #7C7E1D61] @E-00107f9a1b2c\r\n\
    172.22.0.62 : 00107F9A1B2D : DM-NVX-E30 : DM-NVX-E30 [v7.1.5245.00045 (Feb 08 2023), #7C7E1D62] @E-00107f9a1b2d\r\n";

/// Scripted console accepting a single password
#[derive(Clone)]
struct FakeConsole {
    password: &'static str,
    query: CommandOutput,
    query_delay: Duration,
}

impl FakeConsole {
    fn new(query: CommandOutput) -> Self {
        Self {
            password: "s3cret",
            query,
            query_delay: Duration::ZERO,
        }
    }
}

impl ShellConnector for FakeConsole {
    fn connect(
        &self,
        _host: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn ShellSession>, ShellError> {
        if password != self.password {
            return Err(ShellError::Authentication(username.to_string()));
        }
        Ok(Box::new(self.clone()))
    }
}

impl ShellSession for FakeConsole {
    fn run(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
        let output = match command {
            "ipconfig" => CommandOutput::new(IPCONFIG, ""),
            "hostname" => CommandOutput::new(HOSTNAME, ""),
            "ver" => CommandOutput::new(VERSION, ""),
            "autodiscovery query" => {
                std::thread::sleep(self.query_delay);
                self.query.clone()
            }
            other => CommandOutput::new("", format!("Bad or Incomplete Command: {other}")),
        };
        Ok(output)
    }
}

fn remote_engine(console: FakeConsole, deadline_ms: u64) -> DiscoveryEngine {
    let config = DiscoveryConfig {
        activity_interval_ms: 100,
        remote: RemoteConfig {
            deadline_ms,
            ..RemoteConfig::default()
        },
        ..DiscoveryConfig::default()
    };
    DiscoveryEngine::with_connector(config, Arc::new(console))
}

#[tokio::test]
async fn test_remote_discovery_reports_self_then_devices() {
    let engine = remote_engine(FakeConsole::new(CommandOutput::new(QUERY, "")), 8000);
    let mut events = engine.subscribe_devices();

    let devices = engine.discover_remote("172.22.0.60", "admin", "s3cret").await;

    let ips: Vec<&str> = devices.iter().map(|d| d.ip_address.as_str()).collect();
    assert_eq!(ips, ["172.22.0.60", "172.22.0.61", "172.22.0.62"]);
    assert_eq!(devices[0].hostname, "CP3-LOBBY");
    assert_eq!(
        devices[0].description,
        "CP3 [v1.8001.4976.27034 (Apr 25 2023), #00845E5C]"
    );
    assert_eq!(devices[1].hostname, "TSW-1070-CONF");

    let events: Vec<DeviceRecord> = drain(&mut events);
    assert_eq!(events, devices);
}

#[tokio::test]
async fn test_remote_bad_password_then_retry() {
    let engine = remote_engine(FakeConsole::new(CommandOutput::new(QUERY, "")), 8000);
    let mut events = engine.subscribe_devices();
    let mut activity = engine.subscribe_activity();

    let devices = engine.discover_remote("172.22.0.60", "admin", "wrong").await;
    assert!(devices.is_empty());
    assert!(drain(&mut events).is_empty());
    let last = drain(&mut activity).pop().unwrap();
    assert!(!last.is_running);
    assert_eq!(last.devices_discovered, 0);
    assert!(last.last_error.unwrap().contains("admin"));

    let devices = engine.discover_remote("172.22.0.60", "admin", "s3cret").await;
    assert_eq!(devices.len(), 3);
}

#[tokio::test]
async fn test_remote_query_error_yields_empty_list() {
    let console = FakeConsole::new(CommandOutput::new("", "autodiscovery: not available\r\n"));
    let engine = remote_engine(console, 8000);
    let mut activity = engine.subscribe_activity();

    let devices = engine.discover_remote("172.22.0.60", "admin", "s3cret").await;

    assert!(devices.is_empty());
    let last = drain(&mut activity).pop().unwrap();
    assert_eq!(last.devices_discovered, 0);
    assert!(last.last_error.unwrap().contains("autodiscovery query"));
}

#[tokio::test]
async fn test_remote_unparsable_query_yields_empty_list() {
    let console = FakeConsole::new(CommandOutput::new("Bad or Incomplete Command\r\n", ""));
    let engine = remote_engine(console, 8000);

    let devices = engine.discover_remote("172.22.0.60", "admin", "s3cret").await;
    assert!(devices.is_empty());
}

#[tokio::test]
async fn test_remote_deadline_releases_gate() {
    let mut console = FakeConsole::new(CommandOutput::new(QUERY, ""));
    console.query_delay = Duration::from_millis(1500);
    let engine = remote_engine(console, 300);
    let mut activity = engine.subscribe_activity();

    let started = Instant::now();
    let devices = engine.discover_remote("172.22.0.60", "admin", "s3cret").await;
    assert!(started.elapsed() < Duration::from_millis(1000));

    // Only the self record arrived before the deadline
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].ip_address, "172.22.0.60");
    let last = drain(&mut activity).pop().unwrap();
    assert!(!last.is_running);
    assert_eq!(last.devices_discovered, 1);
    assert!(last.last_error.is_some());

    assert!(!engine.is_discovering());
    let next = tokio::time::timeout(Duration::from_millis(500), engine.discover_on_adapters(&[]))
        .await
        .expect("gate released after deadline");
    assert!(next.is_empty());
}

#[tokio::test]
async fn test_dropped_remote_call_releases_engine() {
    let mut console = FakeConsole::new(CommandOutput::new(QUERY, ""));
    console.query_delay = Duration::from_millis(1500);
    let engine = remote_engine(console, 8000);
    let mut activity = engine.subscribe_activity();

    let cut_short = tokio::time::timeout(
        Duration::from_millis(300),
        engine.discover_remote("172.22.0.60", "admin", "s3cret"),
    )
    .await;
    assert!(cut_short.is_err());
    assert!(!engine.is_discovering());

    let last = drain(&mut activity).pop().unwrap();
    assert!(!last.is_running);
    assert_eq!(last.devices_discovered, 1);
}
