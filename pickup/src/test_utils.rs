//! Helpers for time-dependent tests
//!
//! A settable clock for history and capture code, plus a retry helper for
//! async tests that wait on a daemon or background task.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::context::capture::Clock;

/// Manually advanced clock
#[derive(Debug)]
pub struct TestClock {
    now_ms: AtomicI64,
}

impl TestClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by_ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Retry `probe` every `interval` until it returns `Ok`, panicking after `timeout`
///
/// The error of the last attempt is included in the panic message.
///
/// ```rust,ignore
/// let ctx = assert_eventually(
///     "idle snapshot to be stored",
///     Duration::from_secs(3),
///     Duration::from_millis(50),
///     || async {
///         match history.last_context() {
///             Ok(Some(ctx)) => Ok(ctx),
///             Ok(None) => Err("history still empty".to_string()),
///             Err(e) => Err(e.to_string()),
///         }
///     },
/// )
/// .await;
/// ```
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let last_error = match probe().await {
            Ok(value) => return value,
            Err(e) => e,
        };

        if start.elapsed() >= timeout {
            panic!(
                "Timeout waiting for {} after {} attempts over {:?}; last error: {}",
                desc,
                attempt,
                start.elapsed(),
                last_error
            );
        }
        tokio::time::sleep(interval).await;
    }
}
