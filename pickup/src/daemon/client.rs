// Daemon client used by the CLI and tests
// Talks to pickup-daemon over its Unix socket

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::config::Config;
use super::protocol::{
    deserialize_message, serialize_message, DaemonErrorCode, DaemonNotification, DaemonRequest,
    DaemonResponse, MAX_RESPONSE_FRAME_SIZE, PROTOCOL_VERSION,
};
use crate::cli_paths::resolve_daemon_path;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);
const START_POLL_ATTEMPTS: u32 = 20;

/// Connect to the daemon, starting it if necessary
fn connect_or_start_daemon(config: &Config, auto_start: bool) -> Result<UnixStream> {
    if let Ok(stream) = UnixStream::connect(&config.socket_path) {
        return Ok(stream);
    }
    if !auto_start {
        return Err(anyhow!(
            "daemon is not running (no socket at {}) ({})",
            config.socket_path.display(),
            DaemonErrorCode::DaemonUnavailable
        ));
    }

    tracing::info!("daemon not running, starting it");

    let daemon_path = resolve_daemon_path().ok_or_else(|| {
        anyhow!("could not find the pickup-daemon binary; install it next to pickup or set PICKUP_DAEMON")
    })?;

    // inherits PICKUP_DIR, so the daemon serves the socket this client looks for
    Command::new(&daemon_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start daemon at {}", daemon_path.display()))?;

    for _ in 0..START_POLL_ATTEMPTS {
        std::thread::sleep(START_POLL_INTERVAL);
        if config.socket_path.exists() {
            if let Ok(stream) = UnixStream::connect(&config.socket_path) {
                tracing::info!("daemon started");
                return Ok(stream);
            }
        }
    }

    Err(anyhow!(
        "daemon did not start within 2 seconds (socket not found at: {}) ({})",
        config.socket_path.display(),
        DaemonErrorCode::DaemonUnavailable
    ))
}

/// One handshaken connection to the daemon
///
/// Notifications that arrive while waiting for a response are kept and can
/// be drained with `take_notifications`.
pub struct DaemonClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    notifications: Vec<DaemonNotification>,
}

impl DaemonClient {
    pub fn connect(config: &Config, auto_start: bool) -> Result<Self> {
        let stream = connect_or_start_daemon(config, auto_start)?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .context("failed to set read timeout")?;
        let writer = stream.try_clone().context("failed to clone daemon stream")?;

        let mut client = Self {
            reader: BufReader::new(stream),
            writer,
            notifications: Vec::new(),
        };
        client.handshake()?;
        Ok(client)
    }

    fn handshake(&mut self) -> Result<()> {
        let response = self.request(DaemonRequest::Handshake {
            client_version: PROTOCOL_VERSION,
        })?;
        match response {
            DaemonResponse::Handshake { .. } => Ok(()),
            DaemonResponse::Error { code, message } if code == DaemonErrorCode::VersionMismatch => {
                Err(anyhow!("protocol version mismatch: {}", message))
            }
            other => Err(anyhow!("expected handshake response, got: {:?}", other)),
        }
    }

    /// Send `request` and wait for its response
    pub fn request(&mut self, request: DaemonRequest) -> Result<DaemonResponse> {
        let bytes = serialize_message(&request).context("failed to serialize request")?;
        self.writer
            .write_all(&bytes)
            .context("failed to send request to daemon")?;
        self.writer.flush().context("failed to flush daemon stream")?;
        self.read_response()
    }

    pub fn take_notifications(&mut self) -> Vec<DaemonNotification> {
        std::mem::take(&mut self.notifications)
    }

    fn read_response(&mut self) -> Result<DaemonResponse> {
        let mut line = String::new();

        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).map_err(|e| {
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) {
                    anyhow!("daemon read timeout ({})", DaemonErrorCode::Timeout)
                } else {
                    anyhow!("failed to read response from daemon: {}", e)
                }
            })?;

            if read == 0 {
                return Err(anyhow!("daemon closed connection unexpectedly"));
            }
            if line.len() > MAX_RESPONSE_FRAME_SIZE {
                return Err(anyhow!(
                    "response frame too large: {} bytes (max {})",
                    line.len(),
                    MAX_RESPONSE_FRAME_SIZE
                ));
            }

            if let Ok(notification) = deserialize_message::<DaemonNotification>(line.as_bytes()) {
                self.notifications.push(notification);
                continue;
            }

            return deserialize_message::<DaemonResponse>(line.as_bytes()).map_err(|e| {
                anyhow!(
                    "failed to parse daemon response: {} (line: {})",
                    e,
                    line.trim()
                )
            });
        }
    }
}

/// Open a connection, send one request and return its response
pub fn send_request(config: &Config, request: DaemonRequest) -> Result<DaemonResponse> {
    DaemonClient::connect(config, true)?.request(request)
}

/// Turn an error response into an `Err`, passing everything else through
pub fn into_result(response: DaemonResponse) -> Result<DaemonResponse> {
    match response {
        DaemonResponse::Error { code, message } => Err(anyhow!("{} ({})", message, code)),
        other => Ok(other),
    }
}
