//! Remote command execution used by remote discovery
//!
//! Remote discovery only needs to run a command and read its output. The
//! [`ShellConnector`] / [`ShellSession`] pair is that seam; [`SshConnector`]
//! implements it over SSH with password and keyboard-interactive auth.
//! Both traits are blocking and are driven from a blocking task.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Could not reach {host}: {source}")]
    Connect { host: String, source: io::Error },
    #[error("Authentication rejected for user {0}")]
    Authentication(String),
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Opens authenticated command sessions on a remote host
pub trait ShellConnector: Send + Sync {
    fn connect(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn ShellSession>, ShellError>;
}

/// An authenticated session able to run commands one after another
pub trait ShellSession: Send {
    fn run(&mut self, command: &str) -> Result<CommandOutput, ShellError>;
}

/// SSH implementation of [`ShellConnector`]
#[derive(Debug, Clone)]
pub struct SshConnector {
    port: u16,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

impl ShellConnector for SshConnector {
    fn connect(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn ShellSession>, ShellError> {
        let connect_error = |source: io::Error| ShellError::Connect {
            host: host.to_string(),
            source,
        };

        let addr = (host, self.port)
            .to_socket_addrs()
            .map_err(connect_error)?
            .next()
            .ok_or_else(|| {
                connect_error(io::Error::new(io::ErrorKind::NotFound, "no address for host"))
            })?;

        debug!(host = %host, addr = %addr, "Connecting over SSH");
        let tcp = TcpStream::connect_timeout(&addr, self.timeout).map_err(connect_error)?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake()?;

        let methods = session.auth_methods(username)?.to_string();
        trace!(methods = %methods, "Offered authentication methods");

        if methods.contains("password") {
            // A rejected password is retried below via keyboard-interactive
            let _ = session.userauth_password(username, password);
        }
        if !session.authenticated() && methods.contains("keyboard-interactive") {
            let mut prompt = PasswordPrompt { password };
            let _ = session.userauth_keyboard_interactive(username, &mut prompt);
        }
        if !session.authenticated() {
            return Err(ShellError::Authentication(username.to_string()));
        }

        debug!(host = %host, user = %username, "SSH session authenticated");
        Ok(Box::new(SshSession { session }))
    }
}

/// Answers every prompt that asks for a password
struct PasswordPrompt<'a> {
    password: &'a str,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt<'_> {
    fn prompt<'b>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'b>],
    ) -> Vec<String> {
        prompts
            .iter()
            .map(|p| answer_prompt(&p.text, self.password))
            .collect()
    }
}

fn answer_prompt(text: &str, password: &str) -> String {
    if text.to_lowercase().contains("password") {
        password.to_string()
    } else {
        String::new()
    }
}

struct SshSession {
    session: ssh2::Session,
}

impl ShellSession for SshSession {
    fn run(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout)?;
        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr)?;
        channel.wait_close()?;

        trace!(
            command = %command,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Remote command finished"
        );

        Ok(CommandOutput {
            stdout: latin1(&stdout),
            stderr: latin1(&stderr),
        })
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let _ = self.session.disconnect(None, "discovery finished", None);
    }
}

// Control processors answer in ISO-8859-1, which maps byte-for-byte onto
// the first 256 code points
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
