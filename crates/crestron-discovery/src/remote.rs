//! Remote discovery through a control processor's console
//!
//! The remote host identifies itself with `ipconfig`, `hostname` and `ver`,
//! then runs `autodiscovery query` and prints one line per device it knows:
//!
//! ```text
//! 172.22.0.60 : 00107F845E5C : CP3-LOBBY : CP3 Cntrl Eng [v1.8001 (Apr 25 2023), #00845E5C] @E-00107f845e5c
//! ```
//!
//! The shell runs on a blocking task that reports progress over a channel.
//! The call stops listening at its deadline; anything reported afterwards is
//! dropped with the channel.

use crestron_core::DeviceRecord;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tracing::{debug, error, info, warn};

use crate::session::Session;
use crate::shell::{CommandOutput, ShellConnector, ShellError};

pub const IPCONFIG_COMMAND: &str = "ipconfig";
pub const HOSTNAME_COMMAND: &str = "hostname";
pub const VERSION_COMMAND: &str = "ver";
pub const QUERY_COMMAND: &str = "autodiscovery query";

/// Literal the console puts in front of its own model name
const CONSOLE_DESCRIPTION_MARKER: &str = "Cntrl Eng ";

static SELF_IP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"IP Address ........ : ([0-9\.]*)").expect("ip pattern is valid"));

static SELF_HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Host Name: (.*)").expect("hostname pattern is valid"));

static SELF_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<Description>.*) @(?<DeviceId>.*)").expect("version pattern is valid")
});

static QUERY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<IpAddress>[0-9\.]*)( :.*? : )(?<Hostname>.*)( :.*? )(?<Description>.*)( @)(?<DeviceId>.*)$",
    )
    .expect("query pattern is valid")
});

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error("Command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("Remote discovery did not finish within {0:?}")]
    DeadlineExceeded(Duration),
    #[error("Remote session ended without a result")]
    SessionLost,
}

/// Progress reported by the blocking shell task
enum Stage {
    Identified(DeviceRecord),
    Queried(CommandOutput),
    Failed(RemoteError),
}

/// Runs remote discovery inside a session the engine has opened
pub struct RemoteDiscoveryClient {
    connector: Arc<dyn ShellConnector>,
    deadline: Duration,
}

impl RemoteDiscoveryClient {
    pub fn new(connector: Arc<dyn ShellConnector>, deadline: Duration) -> Self {
        Self { connector, deadline }
    }

    /// Discover through `host`, returning the self record plus every parsed device
    ///
    /// Connection, authentication and command failures yield an empty list
    /// with the error recorded on the session. At the deadline the call
    /// returns whatever the registry holds so far.
    pub async fn discover(
        &self,
        session: &Session,
        host: &str,
        username: &str,
        password: &str,
    ) -> Vec<DeviceRecord> {
        let deadline = session.started() + self.deadline;
        let (stages, mut progress) = mpsc::unbounded_channel();

        let connector = self.connector.clone();
        let (task_host, task_user, task_password) =
            (host.to_string(), username.to_string(), password.to_string());
        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_shell(
                connector.as_ref(),
                &task_host,
                &task_user,
                &task_password,
                &stages,
            ) {
                let _ = stages.send(Stage::Failed(e));
            }
        });

        loop {
            let stage = match timeout_at(deadline, progress.recv()).await {
                Ok(Some(stage)) => stage,
                Ok(None) => return fail(session, host, RemoteError::SessionLost),
                Err(_) => {
                    let e = RemoteError::DeadlineExceeded(self.deadline);
                    warn!(host = %host, error = %e, "Remote discovery cut off");
                    session.record_error(e.to_string());
                    return session.registry().records();
                }
            };

            match stage {
                Stage::Identified(record) => {
                    info!(host = %host, device = %record, "Remote host identified");
                    session.registry().try_add(record);
                }
                Stage::Failed(e) => return fail(session, host, e),
                Stage::Queried(output) => return collect(session, host, output),
            }
        }
    }
}

/// Blocking part: connect, identify the host, run the query
fn run_shell(
    connector: &dyn ShellConnector,
    host: &str,
    username: &str,
    password: &str,
    stages: &mpsc::UnboundedSender<Stage>,
) -> Result<(), RemoteError> {
    debug!(host = %host, "Connecting to remote host");
    let mut shell = connector.connect(host, username, password)?;

    let ipconfig = shell.run(IPCONFIG_COMMAND)?;
    let hostname = shell.run(HOSTNAME_COMMAND)?;
    let version = shell.run(VERSION_COMMAND)?;
    let identity = parse_self_record(&ipconfig.stdout, &hostname.stdout, &version.stdout);
    if stages.send(Stage::Identified(identity)).is_err() {
        // The caller hit its deadline; nobody is listening any more
        return Ok(());
    }

    let output = shell.run(QUERY_COMMAND)?;
    let _ = stages.send(Stage::Queried(output));
    Ok(())
}

fn fail(session: &Session, host: &str, e: RemoteError) -> Vec<DeviceRecord> {
    error!(host = %host, error = %e, "Remote discovery failed");
    session.record_error(e.to_string());
    Vec::new()
}

fn collect(session: &Session, host: &str, output: CommandOutput) -> Vec<DeviceRecord> {
    if !output.stderr.is_empty() {
        return fail(
            session,
            host,
            RemoteError::Command {
                command: QUERY_COMMAND.to_string(),
                stderr: output.stderr.trim().to_string(),
            },
        );
    }

    let devices = parse_query_output(&output.stdout);
    debug!(host = %host, parsed = devices.len(), "Parsed remote discovery output");
    if devices.is_empty() {
        return Vec::new();
    }

    for device in devices {
        session.registry().try_add(device);
    }
    session.registry().records()
}

/// Build the remote host's own record from its diagnostic command output
pub fn parse_self_record(ipconfig: &str, hostname: &str, version: &str) -> DeviceRecord {
    let ip_address = SELF_IP
        .captures(ipconfig)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let hostname = SELF_HOSTNAME
        .captures(hostname)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let (description, device_id) = match SELF_VERSION.captures(version) {
        Some(c) => (
            c["Description"]
                .replace(CONSOLE_DESCRIPTION_MARKER, "")
                .trim()
                .to_string(),
            c["DeviceId"].trim().to_string(),
        ),
        None => (String::new(), String::new()),
    };

    DeviceRecord::new(ip_address, hostname, description, device_id)
}

/// Parse `autodiscovery query` output, one device per matching line
pub fn parse_query_output(output: &str) -> Vec<DeviceRecord> {
    output
        .lines()
        .filter_map(|line| QUERY_LINE.captures(line))
        .map(|c| {
            DeviceRecord::new(
                &c["IpAddress"],
                &c["Hostname"],
                &c["Description"],
                &c["DeviceId"],
            )
        })
        .collect()
}
