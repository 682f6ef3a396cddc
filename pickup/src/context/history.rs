//! Per-workspace snapshot history
//!
//! History is stored newest first under a single key in the workspace region
//! and bounded to `max_history_size` entries. Every mutating operation runs
//! its read-modify-write under one store-wide lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::capture::{Clock, SystemClock};
use crate::context::models::WorkContext;
use crate::context::store::{get_or, set_value, KeyValueStore};
use crate::error::HistoryError;

/// Key holding the history array in a workspace region
pub const HISTORY_KEY: &str = "workContextHistory";

/// Key holding the last resume prompt instant in the global region
pub const LAST_SHOWN_KEY: &str = "lastShownTimestamp";

pub const DEFAULT_MAX_HISTORY_SIZE: usize = 10;

/// Minimum gap between two resume prompts
pub const RESUME_POPUP_INTERVAL_MS: i64 = 30 * 60 * 1000;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Line tolerance when both snapshots sit in the same named symbol
const SAME_SYMBOL_LINE_TOLERANCE: u32 = 10;
/// Line tolerance otherwise
const LINE_TOLERANCE: u32 = 5;

/// Result of [`HistoryStore::save_context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Prepended to the history
    Saved,
    /// Same as the current head; nothing written
    Duplicate,
}

/// Whether two snapshots describe the same place closely enough to skip a save
pub fn are_contexts_same(a: &WorkContext, b: &WorkContext) -> bool {
    if a.file_path != b.file_path {
        return false;
    }

    if a.todo_comment != b.todo_comment {
        return false;
    }

    let line_diff = a.line.abs_diff(b.line);

    if let (Some(fa), Some(fb)) = (&a.function_name, &b.function_name) {
        if fa == fb && line_diff <= SAME_SYMBOL_LINE_TOLERANCE {
            return true;
        }
    }

    line_diff <= LINE_TOLERANCE
}

/// Only the contexts whose workspace folder equals `workspace`
pub fn contexts_for_workspace(history: &[WorkContext], workspace: &str) -> Vec<WorkContext> {
    history
        .iter()
        .filter(|ctx| ctx.workspace_folder.as_deref() == Some(workspace))
        .cloned()
        .collect()
}

/// Ordered, bounded, duplicate-suppressing snapshot log for one workspace
pub struct HistoryStore {
    region: Arc<dyn KeyValueStore>,
    global: Arc<dyn KeyValueStore>,
    max_history_size: AtomicUsize,
    clock: Arc<dyn Clock>,
    op_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(
        region: Arc<dyn KeyValueStore>,
        global: Arc<dyn KeyValueStore>,
        max_history_size: usize,
    ) -> Self {
        Self::with_clock(region, global, max_history_size, Arc::new(SystemClock))
    }

    /// Create a history store with a custom clock (for testing)
    pub fn with_clock(
        region: Arc<dyn KeyValueStore>,
        global: Arc<dyn KeyValueStore>,
        max_history_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            region,
            global,
            max_history_size: AtomicUsize::new(max_history_size.max(1)),
            clock,
            op_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<Vec<WorkContext>, HistoryError> {
        Ok(get_or(self.region.as_ref(), HISTORY_KEY, Vec::new())?)
    }

    fn write(&self, history: &[WorkContext]) -> Result<(), HistoryError> {
        Ok(set_value(self.region.as_ref(), HISTORY_KEY, &history)?)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size.load(Ordering::SeqCst)
    }

    /// Bound future saves; the stored history is not trimmed until the next save
    pub fn set_max_history_size(&self, size: usize) {
        self.max_history_size.store(size.max(1), Ordering::SeqCst);
    }

    /// Prepend `ctx` unless it matches the current head
    pub fn save_context(&self, ctx: WorkContext) -> Result<SaveOutcome, HistoryError> {
        let _guard = self.lock();
        let mut history = self.read()?;

        if let Some(head) = history.first() {
            if are_contexts_same(&ctx, head) {
                tracing::debug!(file = %ctx.file_path, line = ctx.line, "context unchanged, skipping duplicate save");
                return Ok(SaveOutcome::Duplicate);
            }
        }

        history.insert(0, ctx);
        history.truncate(self.max_history_size());
        self.write(&history)?;

        tracing::debug!(len = history.len(), "saved new work context");
        Ok(SaveOutcome::Saved)
    }

    pub fn last_context(&self) -> Result<Option<WorkContext>, HistoryError> {
        Ok(self.read()?.into_iter().next())
    }

    /// Full history, newest first
    pub fn history(&self) -> Result<Vec<WorkContext>, HistoryError> {
        self.read()
    }

    pub fn clear_history(&self) -> Result<(), HistoryError> {
        let _guard = self.lock();
        self.write(&[])
    }

    pub fn contexts_for_workspace(&self, workspace: &str) -> Result<Vec<WorkContext>, HistoryError> {
        Ok(contexts_for_workspace(&self.read()?, workspace))
    }

    /// Drop entries older than `max_age_days`; returns how many were removed
    pub fn prune_old_contexts(&self, max_age_days: u32) -> Result<usize, HistoryError> {
        let _guard = self.lock();
        let history = self.read()?;
        let max_age_ms = i64::from(max_age_days) * DAY_MS;
        let now = self.clock.now_millis();

        let before = history.len();
        let recent: Vec<WorkContext> = history
            .into_iter()
            .filter(|ctx| now.saturating_sub(ctx.timestamp) <= max_age_ms)
            .collect();
        let removed = before - recent.len();

        if removed > 0 {
            self.write(&recent)?;
            tracing::info!(removed, max_age_days, "pruned old contexts");
        }

        Ok(removed)
    }

    /// Pretty-printed JSON array of the stored history
    pub fn export_history(&self) -> Result<String, HistoryError> {
        let history = self.read()?;
        serde_json::to_string_pretty(&history)
            .map_err(|e| HistoryError::Persistence(e.into()))
    }

    /// Replace the stored history with `data`, a JSON array of contexts
    ///
    /// The whole payload is validated before anything is written. Returns the
    /// number of imported entries.
    pub fn import_history(&self, data: &str) -> Result<usize, HistoryError> {
        let history: Vec<WorkContext> =
            serde_json::from_str(data).map_err(|e| HistoryError::InvalidImport(e.to_string()))?;

        if let Some(index) = history.iter().position(|ctx| ctx.file_path.trim().is_empty()) {
            return Err(HistoryError::InvalidImport(format!(
                "entry {} has an empty filePath",
                index
            )));
        }

        let _guard = self.lock();
        self.write(&history)?;
        tracing::info!(count = history.len(), "imported work context history");
        Ok(history.len())
    }

    /// True when no resume prompt was shown in the last 30 minutes
    pub fn should_show_resume_popup(&self) -> Result<bool, HistoryError> {
        let last_shown: i64 = get_or(self.global.as_ref(), LAST_SHOWN_KEY, 0)?;
        Ok(self.clock.now_millis().saturating_sub(last_shown) > RESUME_POPUP_INTERVAL_MS)
    }

    pub fn mark_resume_popup_shown(&self) -> Result<(), HistoryError> {
        Ok(set_value(
            self.global.as_ref(),
            LAST_SHOWN_KEY,
            &self.clock.now_millis(),
        )?)
    }
}
