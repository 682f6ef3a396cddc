//! File-switch trigger: save when leaving a file after real work on it

use std::time::Duration;

/// Minimum time on a file before leaving it triggers a save
pub const MIN_FILE_DWELL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
struct FocusSession {
    file_path: String,
    opened_at_ms: i64,
    edited: bool,
}

/// Tracks the focused file, when it was focused and whether it was edited
#[derive(Debug, Clone)]
pub struct FileFocusTracker {
    current: Option<FocusSession>,
    min_dwell: Duration,
}

impl Default for FileFocusTracker {
    fn default() -> Self {
        Self::new(MIN_FILE_DWELL)
    }
}

impl FileFocusTracker {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            current: None,
            min_dwell,
        }
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.file_path.as_str())
    }

    pub fn is_edited(&self) -> bool {
        self.current.as_ref().map_or(false, |s| s.edited)
    }

    /// Record that `file_path` gained focus at `now_ms`
    ///
    /// Returns true when the previously focused file should be saved: it was
    /// edited and focused for at least the minimum dwell. Refocusing the same
    /// file keeps the current session.
    pub fn focus(&mut self, file_path: &str, now_ms: i64) -> bool {
        if self.current_file() == Some(file_path) {
            return false;
        }

        let min_dwell_ms = i64::try_from(self.min_dwell.as_millis()).unwrap_or(i64::MAX);
        let due = self
            .current
            .as_ref()
            .map_or(false, |s| s.edited && now_ms - s.opened_at_ms >= min_dwell_ms);

        self.current = Some(FocusSession {
            file_path: file_path.to_string(),
            opened_at_ms: now_ms,
            edited: false,
        });

        due
    }

    /// Mark the focused file as edited; edits to other files are ignored
    pub fn record_edit(&mut self, file_path: &str) {
        if let Some(session) = self.current.as_mut() {
            if session.file_path == file_path {
                session.edited = true;
            }
        }
    }
}
