//! Human-readable rendering of snapshots for editor plugins and the CLI
//!
//! Plugins show these strings as-is; the only decision left to them is where.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::context::capture::{read_source_text, run_lookup, DEFAULT_LOOKUP_TIMEOUT};
use crate::context::history::HistoryStore;
use crate::context::locator::{TextBuffer, PREVIEW_CONTEXT_LINES};
use crate::context::models::WorkContext;
use crate::error::NavigationError;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Longest commit subject shown before truncation
pub const COMMIT_DISPLAY_CHARS: usize = 50;

fn plural(n: i64, unit: &str) -> String {
    if n > 1 {
        format!("{} {}s ago", n, unit)
    } else {
        format!("{} {} ago", n, unit)
    }
}

/// "just now", "5 minutes ago", "2 hours ago", "3 days ago", or "on <date>"
/// after a week
pub fn time_ago(timestamp: i64, now: i64) -> String {
    let diff = now.saturating_sub(timestamp);
    let minutes = diff / MINUTE_MS;
    let hours = diff / HOUR_MS;
    let days = diff / DAY_MS;

    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else if days < 7 {
        plural(days, "day")
    } else {
        match DateTime::from_timestamp_millis(timestamp) {
            Some(utc) => format!("on {}", utc.with_timezone(&Local).format("%Y-%m-%d")),
            None => "a long time ago".to_string(),
        }
    }
}

/// Compact form for status bars: "now", "5m ago", "3h ago"
pub fn short_time_ago(timestamp: i64, now: i64) -> String {
    let diff = now.saturating_sub(timestamp);
    let minutes = diff / MINUTE_MS;
    if minutes < 1 {
        "now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else {
        format!("{}h ago", diff / HOUR_MS)
    }
}

pub fn status_text(ctx: &WorkContext, now: i64) -> String {
    format!("Last: {}", short_time_ago(ctx.timestamp, now))
}

pub fn status_tooltip(ctx: &WorkContext) -> String {
    format!(
        "Last active: {}\nClick to view history",
        ctx.function_name.as_deref().unwrap_or("Unknown")
    )
}

/// Commit subject cut to `COMMIT_DISPLAY_CHARS` characters plus "..."
pub fn truncate_commit(subject: &str) -> String {
    if subject.chars().count() > COMMIT_DISPLAY_CHARS {
        let head: String = subject.chars().take(COMMIT_DISPLAY_CHARS).collect();
        format!("{}...", head)
    } else {
        subject.to_string()
    }
}

/// Branch, change count and last commit, one line each; None without git data
pub fn git_summary(ctx: &WorkContext) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(branch) = &ctx.git_branch {
        parts.push(format!("Branch: {}", branch));
    }
    if let Some(n) = ctx.git_uncommitted_files.filter(|n| *n > 0) {
        parts.push(format!("Uncommitted files: {}", n));
    }

    let mut lines = Vec::new();
    if !parts.is_empty() {
        lines.push(format!("🔀 {}", parts.join(" • ")));
    }
    if let Some(commit) = &ctx.git_last_commit {
        lines.push(format!("💬 Last commit: {}", truncate_commit(commit)));
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Short confirmation shown after a save
pub fn saved_message(ctx: &WorkContext) -> String {
    let mut message = format!("🧠 Context saved • 📄 {}", ctx.file_name());
    if let Some(symbol) = &ctx.function_name {
        message.push_str(&format!(" • {}", symbol));
    }
    if let Some(branch) = &ctx.git_branch {
        message.push_str(&format!(" 🔀 {}", branch));
    }
    message
}

/// Body of the "welcome back" prompt
pub fn resume_message(ctx: &WorkContext, now: i64) -> String {
    let mut message = format!(
        "🧠 Welcome back! You were last active {}",
        time_ago(ctx.timestamp, now)
    );

    match &ctx.function_name {
        Some(symbol) => message.push_str(&format!("\n📄 {} → {}", ctx.file_name(), symbol)),
        None => message.push_str(&format!("\n📄 {}", ctx.file_name())),
    }

    if let Some(todo) = &ctx.todo_comment {
        message.push_str(&format!("\n📝 {}", todo));
    }

    if let Some(branch) = &ctx.git_branch {
        message.push_str(&format!("\n🔀 {}", branch));
        if let Some(n) = ctx.git_uncommitted_files.filter(|n| *n > 0) {
            message.push_str(&format!(" • {} uncommitted", n));
        }
    }

    message
}

/// One row of a history picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// File name
    pub label: String,
    /// Note, else symbol, else the 1-based line
    pub description: String,
    /// Age, comment and branch joined with " • "
    pub detail: String,
}

pub fn history_item(ctx: &WorkContext, now: i64) -> HistoryItem {
    let description = ctx
        .note
        .clone()
        .or_else(|| ctx.function_name.clone())
        .unwrap_or_else(|| format!("Line {}", ctx.line + 1));

    let mut detail = vec![time_ago(ctx.timestamp, now)];
    if let Some(todo) = &ctx.todo_comment {
        detail.push(todo.clone());
    }
    if let Some(branch) = &ctx.git_branch {
        match ctx.git_uncommitted_files.filter(|n| *n > 0) {
            Some(n) => detail.push(format!("🔀 {} ({} uncommitted)", branch, n)),
            None => detail.push(format!("🔀 {}", branch)),
        }
    }

    HistoryItem {
        label: ctx.file_name().to_string(),
        description,
        detail: detail.join(" • "),
    }
}

pub fn history_items(history: &[WorkContext], now: i64) -> Vec<HistoryItem> {
    history.iter().map(|ctx| history_item(ctx, now)).collect()
}

/// Lines around the saved position, or None when the file can't be read
pub async fn code_preview(file_path: &str, line: u32) -> Option<String> {
    let path = PathBuf::from(file_path);
    let text = run_lookup("preview", DEFAULT_LOOKUP_TIMEOUT, move || {
        read_source_text(&path)
    })
    .await?;
    let preview = TextBuffer::from_text(&text).code_preview(line, PREVIEW_CONTEXT_LINES);
    (!preview.is_empty()).then_some(preview)
}

/// Where an editor should navigate to resume a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpTarget {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Resolve history entry `index` (0 = newest)
///
/// A snapshot whose file is gone is reported as `FileMissing` and stays in
/// history.
pub async fn resolve_jump(
    history: &HistoryStore,
    index: usize,
) -> Result<JumpTarget, NavigationError> {
    let ctx = history
        .history()?
        .into_iter()
        .nth(index)
        .ok_or(NavigationError::NoSuchEntry(index))?;

    match tokio::fs::metadata(&ctx.file_path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(NavigationError::FileMissing(ctx.file_path)),
    }

    let preview = code_preview(&ctx.file_path, ctx.line).await;
    Ok(JumpTarget {
        file_path: ctx.file_path,
        line: ctx.line,
        column: ctx.column,
        symbol: ctx.function_name,
        preview,
    })
}

/// A "welcome back" prompt ready to show
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePrompt {
    pub context: WorkContext,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Build the resume prompt for the newest snapshot
///
/// Unless `force` is set the prompt is only produced when `enabled` and no
/// prompt was shown in the last 30 minutes; producing one records it as shown.
pub async fn resume_prompt(
    history: &HistoryStore,
    enabled: bool,
    force: bool,
) -> Result<Option<ResumePrompt>, NavigationError> {
    if !force && (!enabled || !history.should_show_resume_popup()?) {
        return Ok(None);
    }

    let Some(context) = history.last_context()? else {
        return Ok(None);
    };

    history.mark_resume_popup_shown()?;

    let now = history.clock().now_millis();
    let preview = code_preview(&context.file_path, context.line).await;
    Ok(Some(ResumePrompt {
        message: resume_message(&context, now),
        git_summary: git_summary(&context),
        preview,
        context,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::store::MemoryKvStore;
    use crate::test_utils::TestClock;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000_000;

    fn ctx(file: &str) -> WorkContext {
        WorkContext::new(file, 9, 4, NOW)
    }

    fn store(clock: Arc<TestClock>) -> HistoryStore {
        HistoryStore::with_clock(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryKvStore::new()),
            10,
            clock,
        )
    }

    #[test]
    fn test_time_ago_buckets() {
        assert_eq!(time_ago(NOW - 30_000, NOW), "just now");
        assert_eq!(time_ago(NOW - MINUTE_MS, NOW), "1 minute ago");
        assert_eq!(time_ago(NOW - 5 * MINUTE_MS, NOW), "5 minutes ago");
        assert_eq!(time_ago(NOW - HOUR_MS, NOW), "1 hour ago");
        assert_eq!(time_ago(NOW - 23 * HOUR_MS, NOW), "23 hours ago");
        assert_eq!(time_ago(NOW - 3 * DAY_MS, NOW), "3 days ago");
        assert!(time_ago(NOW - 8 * DAY_MS, NOW).starts_with("on "));
    }

    #[test]
    fn test_time_ago_extreme_timestamps() {
        assert_eq!(time_ago(i64::MIN, NOW), "a long time ago");
        assert_eq!(time_ago(i64::MAX, NOW), "just now");
        assert_eq!(short_time_ago(i64::MAX, NOW), "now");
        assert!(short_time_ago(i64::MIN, NOW).ends_with("h ago"));
    }

    #[test]
    fn test_status_text() {
        let mut c = ctx("/w/a.ts");
        assert_eq!(status_text(&c, NOW), "Last: now");
        c.timestamp = NOW - 5 * MINUTE_MS;
        assert_eq!(status_text(&c, NOW), "Last: 5m ago");
        c.timestamp = NOW - 3 * DAY_MS;
        assert_eq!(status_text(&c, NOW), "Last: 72h ago");
        assert_eq!(status_tooltip(&c), "Last active: Unknown\nClick to view history");
    }

    #[test]
    fn test_saved_message() {
        let mut c = ctx("/w/src/store.ts");
        assert_eq!(saved_message(&c), "🧠 Context saved • 📄 store.ts");

        c.function_name = Some("Method: save()".to_string());
        c.git_branch = Some("main".to_string());
        assert_eq!(
            saved_message(&c),
            "🧠 Context saved • 📄 store.ts • Method: save() 🔀 main"
        );
    }

    #[test]
    fn test_resume_message() {
        let mut c = ctx("/w/src/store.ts");
        c.timestamp = NOW - 2 * HOUR_MS;
        c.function_name = Some("Method: save()".to_string());
        c.todo_comment = Some("TODO: fix bug".to_string());
        c.git_branch = Some("main".to_string());
        c.git_uncommitted_files = Some(3);

        assert_eq!(
            resume_message(&c, NOW),
            "🧠 Welcome back! You were last active 2 hours ago\n\
             📄 store.ts → Method: save()\n\
             📝 TODO: fix bug\n\
             🔀 main • 3 uncommitted"
        );

        let bare = ctx("/w/readme.md");
        assert_eq!(
            resume_message(&bare, NOW),
            "🧠 Welcome back! You were last active just now\n📄 readme.md"
        );
    }

    #[test]
    fn test_git_summary_truncates_commit() {
        let mut c = ctx("/w/a.ts");
        assert_eq!(git_summary(&c), None);

        c.git_last_commit = Some("x".repeat(60));
        c.git_uncommitted_files = Some(0);
        let summary = git_summary(&c).unwrap();
        assert_eq!(summary, format!("💬 Last commit: {}...", "x".repeat(50)));

        c.git_branch = Some("dev".to_string());
        c.git_uncommitted_files = Some(2);
        c.git_last_commit = Some("short".to_string());
        assert_eq!(
            git_summary(&c).unwrap(),
            "🔀 Branch: dev • Uncommitted files: 2\n💬 Last commit: short"
        );
    }

    #[test]
    fn test_history_item_fallbacks() {
        let mut c = ctx("/w/src/a.ts");
        c.timestamp = NOW - 5 * MINUTE_MS;
        let item = history_item(&c, NOW);
        assert_eq!(item.label, "a.ts");
        assert_eq!(item.description, "Line 10");
        assert_eq!(item.detail, "5 minutes ago");

        c.function_name = Some("Function: run()".to_string());
        assert_eq!(history_item(&c, NOW).description, "Function: run()");

        c.note = Some("fix bug in Function: run()".to_string());
        c.todo_comment = Some("TODO: fix bug".to_string());
        c.git_branch = Some("main".to_string());
        c.git_uncommitted_files = Some(4);
        let item = history_item(&c, NOW);
        assert_eq!(item.description, "fix bug in Function: run()");
        assert_eq!(
            item.detail,
            "5 minutes ago • TODO: fix bug • 🔀 main (4 uncommitted)"
        );
    }

    #[tokio::test]
    async fn test_resolve_jump() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.rs");
        std::fs::write(&file, "a\nb\nc\nd\ne\n").unwrap();
        let path = file.to_string_lossy().to_string();

        let history = store(Arc::new(TestClock::new(NOW)));
        history.save_context(WorkContext::new(&path, 1, 0, NOW)).unwrap();
        history
            .save_context(WorkContext::new("/gone/missing.rs", 50, 0, NOW))
            .unwrap();

        let err = resolve_jump(&history, 0).await.unwrap_err();
        assert!(matches!(err, NavigationError::FileMissing(p) if p == "/gone/missing.rs"));
        // still there
        assert_eq!(history.history().unwrap().len(), 2);

        let target = resolve_jump(&history, 1).await.unwrap();
        assert_eq!(target.file_path, path);
        assert_eq!(target.line, 1);
        assert_eq!(
            target.preview.as_deref(),
            Some("  1: a\n→ 2: b\n  3: c\n  4: d\n  5: e")
        );

        assert!(matches!(
            resolve_jump(&history, 2).await,
            Err(NavigationError::NoSuchEntry(2))
        ));
    }

    #[tokio::test]
    async fn test_resume_prompt_gating() {
        let clock = Arc::new(TestClock::new(NOW));
        let history = store(clock.clone());

        // nothing saved yet
        assert_eq!(resume_prompt(&history, true, false).await.unwrap(), None);

        history.save_context(ctx("/w/a.ts")).unwrap();
        let prompt = resume_prompt(&history, true, false).await.unwrap().unwrap();
        assert!(prompt.message.starts_with("🧠 Welcome back!"));

        // shown once per interval
        clock.advance(Duration::from_secs(10 * 60));
        assert_eq!(resume_prompt(&history, true, false).await.unwrap(), None);
        assert!(resume_prompt(&history, true, true).await.unwrap().is_some());

        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(resume_prompt(&history, false, false).await.unwrap(), None);
        assert!(resume_prompt(&history, true, false).await.unwrap().is_some());
    }
}
