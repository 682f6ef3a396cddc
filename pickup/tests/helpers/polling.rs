use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 25;
const MAX_DELAY_MS: u64 = 500;

/// Timed out waiting for something on disk
#[derive(Debug)]
pub struct WaitError {
    path: PathBuf,
    what: &'static str,
    attempts: u32,
    waited: Duration,
    last_seen: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {} attempts over {:?} waiting for {} at {} (last seen: {})",
            self.attempts,
            self.waited,
            self.what,
            self.path.display(),
            self.last_seen
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("<nothing>")
        )
    }
}

impl std::error::Error for WaitError {}

/// Retry `probe` with exponential backoff until it yields a value
///
/// `probe` returns `Ok(value)` when done, or `Err(observation)` describing
/// what it saw, which ends up in the timeout error.
pub fn poll_until<T>(
    path: &Path,
    what: &'static str,
    timeout: Duration,
    mut probe: impl FnMut() -> Result<T, Option<String>>,
) -> Result<T, WaitError> {
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_seen = None;

    loop {
        attempts += 1;
        match probe() {
            Ok(value) => return Ok(value),
            Err(seen) => last_seen = seen.or(last_seen),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                path: path.to_path_buf(),
                what,
                attempts,
                waited: start.elapsed(),
                last_seen,
            });
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }
}

/// Poll a file until its content satisfies `predicate`
pub fn wait_for_file_content(
    path: &Path,
    predicate: impl Fn(&str) -> bool,
    timeout: Duration,
) -> Result<String, WaitError> {
    poll_until(path, "file content", timeout, || match fs::read_to_string(path) {
        Ok(content) if predicate(&content) => Ok(content),
        Ok(content) => Err(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(None),
        Err(err) => Err(Some(err.to_string())),
    })
}

/// Poll until `path` exists (or no longer exists when `present` is false)
pub fn wait_for_path(path: &Path, present: bool, timeout: Duration) -> Result<(), WaitError> {
    let what = if present { "path to appear" } else { "path to disappear" };
    poll_until(path, what, timeout, || {
        if path.exists() == present {
            Ok(())
        } else {
            Err(None)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wait_for_file_content_returns_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("value.txt");
        fs::write(&file, "ready").unwrap();

        let content =
            wait_for_file_content(&file, |text| text.contains("ready"), Duration::from_secs(1))
                .unwrap();
        assert_eq!(content, "ready");
    }

    #[test]
    fn wait_for_path_times_out_with_context() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("missing.sock");

        let err = wait_for_path(&file, true, Duration::from_millis(1)).unwrap_err();
        assert!(err.to_string().contains("missing.sock"));
        assert!(err.to_string().contains("path to appear"));
    }
}
