use super::polling::{wait_for_file_content, wait_for_path, WaitError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// RAII wrapper that ensures the daemon process is cleaned up.
pub struct DaemonGuard {
    child: Child,
    data_dir: PathBuf,
}

impl DaemonGuard {
    /// Start the compiled daemon with all of its files under `data_dir`.
    pub fn start(data_dir: &Path) -> Result<Self, DaemonError> {
        let child = spawn_daemon(data_dir).map_err(DaemonError::SpawnFailed)?;
        let guard = Self {
            child,
            data_dir: data_dir.to_path_buf(),
        };

        guard.wait_for_ready().map_err(DaemonError::ReadyTimeout)?;
        Ok(guard)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join("pickup.sock")
    }

    fn wait_for_ready(&self) -> Result<(), WaitError> {
        let pid = self.pid();
        wait_for_file_content(
            &self.data_dir.join("pickup.pid"),
            |content| content.trim().parse::<u32>() == Ok(pid),
            READY_TIMEOUT,
        )?;
        wait_for_path(&self.socket_path(), true, READY_TIMEOUT)
    }

    /// Wait for the daemon to exit on its own
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(20));
        }
        None
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        if let Err(err) = self.child.kill() {
            eprintln!(
                "Failed to terminate pickup-daemon pid {}: {}",
                self.child.id(),
                err
            );
            return;
        }

        let _ = self.child.wait();
    }
}

/// Spawn the daemon binary cargo built for this test run.
pub fn spawn_daemon(data_dir: &Path) -> std::io::Result<Child> {
    Command::new(env!("CARGO_BIN_EXE_pickup-daemon"))
        .env("PICKUP_DIR", data_dir)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
}

/// Errors that can occur when starting the daemon for tests.
#[derive(Debug)]
pub enum DaemonError {
    SpawnFailed(std::io::Error),
    ReadyTimeout(WaitError),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(err) => write!(f, "failed to spawn daemon: {}", err),
            Self::ReadyTimeout(err) => write!(f, "daemon never became ready: {}", err),
        }
    }
}

impl std::error::Error for DaemonError {}
