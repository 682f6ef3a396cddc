//! One editor session: monitor, trigger policy, capture and history wired together
//!
//! `AppContext` is created per attached editor and owns everything that reacts
//! to that editor's signals. `start` spawns the idle listener; `shutdown`
//! flushes the current position and releases the timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::context::capture::CaptureService;
use crate::context::history::{HistoryStore, SaveOutcome};
use crate::context::models::{CaptureReason, CursorContext, WorkContext};
use crate::daemon::settings::Settings;
use crate::error::HistoryError;
use crate::tracking::{ExcludeFilter, FileFocusTracker, IdleMonitor};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Result of one snapshot trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Saved { context: WorkContext },
    /// Matched the newest entry; history unchanged
    Duplicate,
    /// The file is not tracked
    Excluded,
    /// No position observed yet
    NoContext,
}

/// Events published by an editor session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    ContextSaved {
        context: WorkContext,
        reason: CaptureReason,
    },
}

struct AppInner {
    workspace_folder: Option<String>,
    monitor: IdleMonitor,
    focus: Mutex<FileFocusTracker>,
    filter: RwLock<ExcludeFilter>,
    capture: CaptureService,
    history: Arc<HistoryStore>,
    events: broadcast::Sender<AppEvent>,
}

pub struct AppContext {
    inner: Arc<AppInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

fn idle_timeout(settings: &Settings) -> Duration {
    Duration::from_secs(settings.idle_timeout_minutes.max(1) * 60)
}

impl AppContext {
    pub fn new(
        workspace_folder: Option<String>,
        settings: &Settings,
        capture: CaptureService,
        history: Arc<HistoryStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = AppInner {
            workspace_folder,
            monitor: IdleMonitor::new(idle_timeout(settings)),
            focus: Mutex::new(FileFocusTracker::default()),
            filter: RwLock::new(ExcludeFilter::new(&settings.exclude_patterns)),
            capture,
            history,
            events,
        };
        inner.capture.set_todo_keywords(&settings.todo_keywords);
        inner.history.set_max_history_size(settings.max_history_size);

        Self {
            inner: Arc::new(inner),
            listener: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Spawn the idle listener; calling it again is a no-op
    pub fn start(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if listener.is_some() || self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let mut idle_rx = self.inner.monitor.subscribe();
        let weak: Weak<AppInner> = Arc::downgrade(&self.inner);

        *listener = Some(tokio::spawn(async move {
            loop {
                let cursor = match idle_rx.recv().await {
                    Ok(cursor) => cursor,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "idle listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = inner.capture(Some(cursor), CaptureReason::IdleTimeout).await {
                    tracing::warn!(error = %e, "failed to save idle snapshot");
                }
            }
        }));
    }

    pub fn workspace_folder(&self) -> Option<&str> {
        self.inner.workspace_folder.as_deref()
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.events.subscribe()
    }

    pub fn current_context(&self) -> Option<CursorContext> {
        self.inner.monitor.current_context()
    }

    fn cursor(&self, file_path: &str, line: u32, column: u32) -> CursorContext {
        let cursor = CursorContext::new(file_path, line, column);
        match &self.inner.workspace_folder {
            Some(workspace) => cursor.with_workspace(workspace.clone()),
            None => cursor,
        }
    }

    /// Cursor moved or text was typed at a position
    pub fn record_activity(&self, file_path: &str, line: u32, column: u32) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.inner
            .monitor
            .record_activity(self.cursor(file_path, line, column));
    }

    /// Another file became active
    ///
    /// Saves the position from before the switch when the previous file was
    /// edited and focused for at least the minimum dwell. Returns None when no
    /// save was due.
    pub async fn focus_changed(
        &self,
        file_path: &str,
        line: u32,
        column: u32,
    ) -> Result<Option<CaptureOutcome>, HistoryError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let now = self.inner.capture.clock().now_millis();
        let due = {
            let mut focus = self.inner.focus.lock().unwrap_or_else(|e| e.into_inner());
            focus.focus(file_path, now)
        };
        let previous = self.inner.monitor.current_context();
        self.record_activity(file_path, line, column);

        if !due {
            return Ok(None);
        }
        tracing::debug!(to = %file_path, "leaving edited file, saving its position");
        self.inner
            .capture(previous, CaptureReason::FileSwitch)
            .await
            .map(Some)
    }

    pub fn document_edited(&self, file_path: &str) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        self.inner
            .focus
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_edit(file_path);
        self.inner.monitor.touch();
    }

    /// Window focus changed; losing focus saves the current position
    pub async fn window_state(&self, focused: bool) -> Result<Option<CaptureOutcome>, HistoryError> {
        if focused || self.shut_down.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let current = self.inner.monitor.current_context();
        self.inner
            .capture(current, CaptureReason::WindowBlur)
            .await
            .map(Some)
    }

    pub async fn save_now(&self) -> Result<CaptureOutcome, HistoryError> {
        let current = self.inner.monitor.current_context();
        self.inner.capture(current, CaptureReason::Manual).await
    }

    /// Push changed settings into every component
    pub fn apply_settings(&self, settings: &Settings) {
        self.inner.monitor.set_idle_timeout(idle_timeout(settings));
        self.inner
            .history
            .set_max_history_size(settings.max_history_size);
        self.inner
            .capture
            .set_todo_keywords(&settings.todo_keywords);
        self.inner
            .filter
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_patterns(&settings.exclude_patterns);
    }

    /// Save the current position once and stop reacting to signals
    ///
    /// Later calls return `Ok(None)`.
    pub async fn shutdown(&self) -> Result<Option<CaptureOutcome>, HistoryError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            listener.abort();
        }

        let current = self.inner.monitor.current_context();
        self.inner.monitor.dispose();

        match current {
            Some(cursor) => self
                .inner
                .capture(Some(cursor), CaptureReason::Shutdown)
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            listener.abort();
        }
    }
}

impl AppInner {
    async fn capture(
        &self,
        cursor: Option<CursorContext>,
        reason: CaptureReason,
    ) -> Result<CaptureOutcome, HistoryError> {
        let Some(cursor) = cursor else {
            return Ok(CaptureOutcome::NoContext);
        };

        let tracked = self
            .filter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .should_track(&cursor.file_path);
        if !tracked {
            tracing::debug!(file = %cursor.file_path, %reason, "file excluded from tracking");
            return Ok(CaptureOutcome::Excluded);
        }

        let context = self.capture.enhance(&cursor).await;
        match self.history.save_context(context.clone())? {
            SaveOutcome::Duplicate => Ok(CaptureOutcome::Duplicate),
            SaveOutcome::Saved => {
                tracing::info!(
                    file = %context.file_path,
                    line = context.line,
                    %reason,
                    "saved work context"
                );
                // no subscribers is fine
                let _ = self.events.send(AppEvent::ContextSaved {
                    context: context.clone(),
                    reason,
                });
                Ok(CaptureOutcome::Saved { context })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::store::MemoryKvStore;
    use crate::test_utils::TestClock;
    use tokio::time::timeout;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        app: AppContext,
        clock: Arc<TestClock>,
    }

    fn fixture(settings: Settings) -> Fixture {
        let clock = Arc::new(TestClock::new(T0));
        let capture = CaptureService::with_clock(None, None, clock.clone());
        let history = Arc::new(HistoryStore::with_clock(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryKvStore::new()),
            settings.max_history_size,
            clock.clone(),
        ));
        let app = AppContext::new(Some("/w".to_string()), &settings, capture, history);
        Fixture { app, clock }
    }

    fn saved(outcome: Option<CaptureOutcome>) -> WorkContext {
        match outcome {
            Some(CaptureOutcome::Saved { context }) => context,
            other => panic!("expected a save, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_saves_last_position() {
        let f = fixture(Settings::default());
        let mut events = f.app.subscribe();
        f.app.start();

        f.app.record_activity("/w/src/a.ts", 3, 1);
        f.app.record_activity("/w/src/a.ts", 12, 4);

        let event = timeout(Duration::from_secs(3600), events.recv())
            .await
            .expect("idle save")
            .unwrap();
        let AppEvent::ContextSaved { context, reason } = event;
        assert_eq!(reason, CaptureReason::IdleTimeout);
        assert_eq!(context.line, 12);
        assert_eq!(context.workspace_folder.as_deref(), Some("/w"));
        assert_eq!(context.note.as_deref(), Some("Editing a.ts"));

        let head = f.app.history().last_context().unwrap().unwrap();
        assert_eq!(head, context);
    }

    #[tokio::test]
    async fn test_file_switch_saves_pre_switch_position() {
        let f = fixture(Settings::default());

        assert_eq!(f.app.focus_changed("/w/a.ts", 0, 0).await.unwrap(), None);
        f.app.document_edited("/w/a.ts");
        f.app.record_activity("/w/a.ts", 40, 2);

        f.clock.advance(Duration::from_secs(3 * 60));
        let context = saved(f.app.focus_changed("/w/b.ts", 7, 0).await.unwrap());
        assert_eq!(context.file_path, "/w/a.ts");
        assert_eq!(context.line, 40);

        // the new focus starts a fresh session
        assert_eq!(f.app.current_context().unwrap().file_path, "/w/b.ts");
        f.clock.advance(Duration::from_secs(3 * 60));
        assert_eq!(f.app.focus_changed("/w/c.ts", 0, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_short_visit_does_not_save() {
        let f = fixture(Settings::default());
        f.app.focus_changed("/w/a.ts", 0, 0).await.unwrap();
        f.app.document_edited("/w/a.ts");
        f.clock.advance(Duration::from_secs(60));
        assert_eq!(f.app.focus_changed("/w/b.ts", 0, 0).await.unwrap(), None);
        assert!(f.app.history().history().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_window_blur_saves_and_focus_does_not() {
        let f = fixture(Settings::default());
        let mut events = f.app.subscribe();
        f.app.record_activity("/w/a.ts", 5, 0);

        assert_eq!(f.app.window_state(true).await.unwrap(), None);
        let context = saved(f.app.window_state(false).await.unwrap());
        assert_eq!(context.line, 5);

        let AppEvent::ContextSaved { reason, .. } = events.recv().await.unwrap();
        assert_eq!(reason, CaptureReason::WindowBlur);

        // same spot again is suppressed
        assert_eq!(
            f.app.window_state(false).await.unwrap(),
            Some(CaptureOutcome::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_save_now_outcomes() {
        let f = fixture(Settings {
            exclude_patterns: vec!["*.log".to_string()],
            ..Settings::default()
        });

        assert_eq!(f.app.save_now().await.unwrap(), CaptureOutcome::NoContext);

        f.app.record_activity("/w/server.log", 1, 0);
        assert_eq!(f.app.save_now().await.unwrap(), CaptureOutcome::Excluded);

        f.app.record_activity("untitled:1", 1, 0);
        assert_eq!(f.app.save_now().await.unwrap(), CaptureOutcome::Excluded);

        f.app.record_activity("/w/main.rs", 1, 0);
        assert!(matches!(
            f.app.save_now().await.unwrap(),
            CaptureOutcome::Saved { .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_settings_reaches_components() {
        let f = fixture(Settings::default());
        let settings = Settings {
            idle_timeout_minutes: 3,
            max_history_size: 2,
            exclude_patterns: vec!["secret".to_string()],
            todo_keywords: vec!["REVIEW".to_string()],
            ..Settings::default()
        };
        f.app.apply_settings(&settings);

        assert_eq!(f.app.inner.monitor.idle_timeout(), Duration::from_secs(180));
        assert_eq!(f.app.history().max_history_size(), 2);
        assert_eq!(f.app.inner.capture.todo_keywords(), vec!["REVIEW"]);

        f.app.record_activity("/w/secret/key.ts", 1, 0);
        assert_eq!(f.app.save_now().await.unwrap(), CaptureOutcome::Excluded);

        for line in [10, 30, 50] {
            f.app.record_activity("/w/a.ts", line, 0);
            f.app.save_now().await.unwrap();
        }
        let lines: Vec<u32> = f
            .app
            .history()
            .history()
            .unwrap()
            .iter()
            .map(|c| c.line)
            .collect();
        assert_eq!(lines, vec![50, 30]);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_once() {
        let f = fixture(Settings::default());
        f.app.start();
        f.app.record_activity("/w/a.ts", 8, 0);

        let context = saved(f.app.shutdown().await.unwrap());
        assert_eq!(context.line, 8);
        assert_eq!(f.app.shutdown().await.unwrap(), None);

        // signals after shutdown are ignored
        f.app.record_activity("/w/b.ts", 1, 0);
        assert_eq!(f.app.current_context().unwrap().file_path, "/w/a.ts");
        assert_eq!(f.app.history().history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_activity_saves_nothing() {
        let f = fixture(Settings::default());
        assert_eq!(f.app.shutdown().await.unwrap(), None);
        assert!(f.app.history().history().unwrap().is_empty());
    }
}
