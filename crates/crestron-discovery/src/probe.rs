//! Per-adapter broadcast probing

use crestron_core::AdapterDescriptor;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, trace, warn};

use crate::config::DiscoveryConfig;
use crate::packet::{decode_reply, encode_discovery};
use crate::session::Session;

/// Receive buffer large enough for any UDP datagram
const RECV_BUFFER_LEN: usize = 65_535;

/// Listens for discovery replies on one adapter
///
/// The worker broadcasts the discovery datagram a few times from a separate
/// task and accepts replies until its window closes. Every newly discovered
/// device pushes the window out by the configured extension.
pub struct ProbeWorker {
    adapter: AdapterDescriptor,
    port: u16,
    window: Duration,
    extension: Duration,
    probe_count: u32,
    probe_interval: Duration,
    packet: Arc<Vec<u8>>,
}

impl ProbeWorker {
    pub fn new(adapter: AdapterDescriptor, config: &DiscoveryConfig, hostname: &str) -> Self {
        Self {
            adapter,
            port: config.port,
            window: config.window(),
            extension: config.extension(),
            probe_count: config.probe_count,
            probe_interval: config.probe_interval(),
            packet: Arc::new(encode_discovery(hostname)),
        }
    }

    /// Probe until the (possibly extended) window closes
    ///
    /// Returns the number of devices this worker added to the session.
    /// Socket failures are logged and only reduce this worker's yield.
    pub async fn run(self, session: Arc<Session>) -> usize {
        let local = self.adapter.local_address;
        let socket = match bind_probe_socket(SocketAddrV4::new(local, self.port)) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                warn!(adapter = %local, port = self.port, error = %e, "Failed to bind discovery socket");
                session.record_error(format!("bind {local}:{}: {e}", self.port));
                return 0;
            }
        };

        debug!(
            adapter = %local,
            broadcast = %self.adapter.broadcast_address,
            window_ms = self.window.as_millis() as u64,
            "Starting discovery on adapter"
        );

        let target = SocketAddr::V4(SocketAddrV4::new(self.adapter.broadcast_address, self.port));
        let sender = tokio::spawn(send_probes(
            socket.clone(),
            self.packet.clone(),
            target,
            self.probe_count,
            self.probe_interval,
        ));

        let found = self.listen(&socket, &session).await;

        sender.abort();
        drop(socket);

        debug!(adapter = %local, found, "Discovery on adapter finished");
        found
    }

    async fn listen(&self, socket: &UdpSocket, session: &Session) -> usize {
        let mut deadline = Instant::now() + self.window;
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let mut found = 0;

        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    warn!(adapter = %self.adapter.local_address, error = %e, "Receive failed");
                    continue;
                }
            };

            let Some(reply) = decode_reply(&buf[..len]) else {
                trace!(from = %from, len, "Ignoring non-discovery datagram");
                continue;
            };

            if session.registry().try_add(reply.into_record(from.ip())) {
                found += 1;
                deadline += self.extension;
                session.extend_plan_to(deadline);
                trace!(from = %from, "Window extended");
            }
        }

        found
    }
}

/// Bind a broadcast-capable UDP socket that can share the discovery port
fn bind_probe_socket(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_recv_buffer_size(RECV_BUFFER_LEN)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    UdpSocket::from_std(socket.into())
}

async fn send_probes(
    socket: Arc<UdpSocket>,
    packet: Arc<Vec<u8>>,
    target: SocketAddr,
    count: u32,
    interval: Duration,
) {
    for attempt in 1..=count {
        match socket.send_to(&packet, target).await {
            Ok(_) => debug!(target = %target, attempt, "Sent discovery datagram"),
            Err(e) => warn!(target = %target, attempt, error = %e, "Failed to send discovery datagram"),
        }
        if attempt < count {
            sleep(interval).await;
        }
    }
}
