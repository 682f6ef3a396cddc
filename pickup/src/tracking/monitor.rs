//! Idle detection over editor activity signals
//!
//! A single debounce timer is rearmed on every activity signal. When it fires
//! the last observed cursor position is broadcast as the idle event and
//! nothing is rescheduled until the next signal.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::models::CursorContext;

const IDLE_CHANNEL_CAPACITY: usize = 16;

struct MonitorState {
    current: Option<CursorContext>,
    last_activity: Option<Instant>,
    idle_timeout: Duration,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every arm so a superseded timer never fires
    generation: u64,
    idle_tx: Option<broadcast::Sender<CursorContext>>,
}

impl MonitorState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Watches activity and raises one idle event per idle period
pub struct IdleMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl IdleMonitor {
    pub fn new(idle_timeout: Duration) -> Self {
        let (idle_tx, _) = broadcast::channel(IDLE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                current: None,
                last_activity: None,
                idle_timeout,
                timer: None,
                generation: 0,
                idle_tx: Some(idle_tx),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive idle events; the receiver closes when the monitor is disposed
    pub fn subscribe(&self) -> broadcast::Receiver<CursorContext> {
        match &self.lock().idle_tx {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Last observed cursor position
    pub fn current_context(&self) -> Option<CursorContext> {
        self.lock().current.clone()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.lock().idle_timeout
    }

    /// Whether an idle event is scheduled
    pub fn is_pending(&self) -> bool {
        self.lock().timer.is_some()
    }

    /// Activity at `ctx`: refresh the current context and restart the idle timer
    ///
    /// Must be called from within a tokio runtime.
    pub fn record_activity(&self, ctx: CursorContext) {
        let mut state = self.lock();
        if state.idle_tx.is_none() {
            return;
        }
        state.current = Some(ctx);
        self.touch_locked(&mut state);
    }

    /// Activity without a new position
    pub fn touch(&self) {
        let mut state = self.lock();
        if state.idle_tx.is_none() {
            return;
        }
        self.touch_locked(&mut state);
    }

    fn touch_locked(&self, state: &mut MonitorState) {
        let now = Instant::now();
        state.last_activity = Some(now);
        let deadline = now + state.idle_timeout;
        arm(state, Arc::downgrade(&self.state), deadline);
    }

    /// Change the idle timeout
    ///
    /// A pending timer is rearmed to fire at `last_activity + timeout`, or
    /// right away when that instant has already passed.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        let mut state = self.lock();
        state.idle_timeout = timeout;

        if state.timer.is_some() {
            if let Some(last) = state.last_activity {
                arm(&mut state, Arc::downgrade(&self.state), last + timeout);
            }
        }
    }

    /// Cancel the pending timer and close every subscription
    pub fn dispose(&self) {
        let mut state = self.lock();
        state.cancel_timer();
        state.generation += 1;
        state.idle_tx = None;
    }
}

impl Drop for IdleMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn arm(state: &mut MonitorState, weak: Weak<Mutex<MonitorState>>, deadline: Instant) {
    state.cancel_timer();
    state.generation += 1;
    let generation = state.generation;

    state.timer = Some(tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;

        let Some(shared) = weak.upgrade() else {
            return;
        };
        let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
        if state.generation != generation {
            return;
        }
        state.timer = None;

        if let (Some(ctx), Some(tx)) = (state.current.clone(), state.idle_tx.as_ref()) {
            tracing::debug!(file = %ctx.file_path, line = ctx.line, "idle timeout reached");
            // no subscribers is fine
            let _ = tx.send(ctx);
        }
    }));
}
