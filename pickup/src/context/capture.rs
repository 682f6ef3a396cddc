//! Capture routines for building snapshots from a cursor position
//!
//! Defines the SymbolSource, BufferSource and RepoInfoSource trait contracts
//! that the host implements, so capture never depends on how symbols, buffer
//! text or repository state are obtained.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::context::locator::{locate_symbol, CommentLocator, TextBuffer};
use crate::context::models::{CursorContext, DocumentSymbol, RepoInfo, WorkContext};
use crate::context::synth::synthesize;

/// Upper bound for a single symbol or repository lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Files larger than this are never read for comments or previews
pub const MAX_SOURCE_FILE_BYTES: u64 = 4 * 1024 * 1024;

/// Clock trait for testable time
pub trait Clock: Send + Sync {
    /// Current instant in epoch milliseconds
    fn now_millis(&self) -> i64;
}

/// Real system clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Provides the document symbol tree for a file
///
/// Called on a blocking thread; implementations may do I/O.
pub trait SymbolSource: Send + Sync {
    fn document_symbols(&self, file_path: &str) -> anyhow::Result<Option<Vec<DocumentSymbol>>>;
}

/// Provides the editor's unsaved buffer text for a file
///
/// Called on a blocking thread. `None` means the file is read from disk.
pub trait BufferSource: Send + Sync {
    fn buffer_text(&self, file_path: &str) -> anyhow::Result<Option<String>>;
}

/// Provides repository state for a file
///
/// Called on a blocking thread; implementations may spawn processes.
pub trait RepoInfoSource: Send + Sync {
    fn repo_info(&self, file_path: &str) -> anyhow::Result<Option<RepoInfo>>;
}

/// Builds snapshots, degrading each lookup independently
pub struct CaptureService {
    symbols: Option<Arc<dyn SymbolSource>>,
    buffers: Option<Arc<dyn BufferSource>>,
    repo: Option<Arc<dyn RepoInfoSource>>,
    comments: RwLock<CommentLocator>,
    clock: Arc<dyn Clock>,
    lookup_timeout: Duration,
}

impl CaptureService {
    pub fn new(
        symbols: Option<Arc<dyn SymbolSource>>,
        repo: Option<Arc<dyn RepoInfoSource>>,
    ) -> Self {
        Self::with_clock(symbols, repo, Arc::new(SystemClock))
    }

    /// Create a capture service with a custom clock (for testing)
    pub fn with_clock(
        symbols: Option<Arc<dyn SymbolSource>>,
        repo: Option<Arc<dyn RepoInfoSource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            symbols,
            buffers: None,
            repo,
            comments: RwLock::new(CommentLocator::default()),
            clock,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Prefer editor-pushed buffer text over the file on disk
    pub fn with_buffers(mut self, buffers: Arc<dyn BufferSource>) -> Self {
        self.buffers = Some(buffers);
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Replace the comment keywords used by subsequent captures
    pub fn set_todo_keywords(&self, keywords: &[String]) {
        let mut comments = self.comments.write().unwrap_or_else(|e| e.into_inner());
        comments.set_keywords(keywords);
    }

    pub fn todo_keywords(&self) -> Vec<String> {
        let comments = self.comments.read().unwrap_or_else(|e| e.into_inner());
        comments.keywords().into_iter().map(str::to_string).collect()
    }

    /// Build a snapshot for `cursor`
    ///
    /// Never fails: an unreadable file, a failing source, or a lookup that
    /// exceeds the timeout leaves the matching fields absent.
    pub async fn enhance(&self, cursor: &CursorContext) -> WorkContext {
        let timestamp = self.clock.now_millis();

        let (text, symbol, repo) = tokio::join!(
            self.lookup_text(&cursor.file_path),
            self.lookup_symbol(cursor),
            self.lookup_repo(&cursor.file_path),
        );

        let comment = text.and_then(|text| {
            let comments = self.comments.read().unwrap_or_else(|e| e.into_inner());
            comments.locate(&TextBuffer::from_text(&text), cursor.line)
        });

        synthesize(cursor, symbol, comment, repo, timestamp)
    }

    async fn lookup_text(&self, file_path: &str) -> Option<String> {
        let buffers = self.buffers.clone();
        let path = file_path.to_string();

        run_lookup("comments", self.lookup_timeout, move || {
            let pushed = match &buffers {
                Some(source) => source.buffer_text(&path)?,
                None => None,
            };
            match pushed {
                Some(text) => Ok(Some(text)),
                None => read_source_text(Path::new(&path)),
            }
        })
        .await
    }

    async fn lookup_symbol(&self, cursor: &CursorContext) -> Option<String> {
        let source = Arc::clone(self.symbols.as_ref()?);
        let path = cursor.file_path.clone();
        let position = cursor.position();

        run_lookup("symbols", self.lookup_timeout, move || {
            let tree = source.document_symbols(&path)?;
            Ok(tree.and_then(|tree| locate_symbol(&tree, position)))
        })
        .await
    }

    async fn lookup_repo(&self, file_path: &str) -> Option<RepoInfo> {
        let source = Arc::clone(self.repo.as_ref()?);
        let path = file_path.to_string();

        run_lookup("repository", self.lookup_timeout, move || {
            source.repo_info(&path)
        })
        .await
        .filter(|info| !info.is_empty())
    }
}

/// Read a regular file of at most [`MAX_SOURCE_FILE_BYTES`]
///
/// Missing files, directories, pipes and oversized files give `None` without
/// opening anything. Invalid UTF-8 is replaced.
pub fn read_source_text(path: &Path) -> anyhow::Result<Option<String>> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() || meta.len() > MAX_SOURCE_FILE_BYTES {
        tracing::debug!(file = %path.display(), size = meta.len(), "not reading source file");
        return Ok(None);
    }

    let mut bytes = Vec::new();
    File::open(path)?
        .take(MAX_SOURCE_FILE_BYTES)
        .read_to_end(&mut bytes)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Run a blocking lookup off the async threads under `timeout`
pub(crate) async fn run_lookup<T, F>(what: &'static str, timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<Option<T>> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(Ok(found))) => found,
        Ok(Ok(Err(e))) => {
            tracing::warn!(lookup = what, error = %e, "lookup failed");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(lookup = what, error = %e, "lookup task aborted");
            None
        }
        Err(_) => {
            tracing::debug!(lookup = what, ?timeout, "lookup timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::{Range, SymbolKind};
    use crate::test_utils::TestClock;
    use tempfile::TempDir;

    struct FixedSymbols(Vec<DocumentSymbol>);

    impl SymbolSource for FixedSymbols {
        fn document_symbols(&self, _file_path: &str) -> anyhow::Result<Option<Vec<DocumentSymbol>>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct FixedRepo(RepoInfo);

    impl RepoInfoSource for FixedRepo {
        fn repo_info(&self, _file_path: &str) -> anyhow::Result<Option<RepoInfo>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct FailingRepo;

    impl RepoInfoSource for FailingRepo {
        fn repo_info(&self, _file_path: &str) -> anyhow::Result<Option<RepoInfo>> {
            anyhow::bail!("git exploded")
        }
    }

    struct FixedBuffer(String);

    impl BufferSource for FixedBuffer {
        fn buffer_text(&self, _file_path: &str) -> anyhow::Result<Option<String>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct NoBuffers;

    impl BufferSource for NoBuffers {
        fn buffer_text(&self, _file_path: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    struct SlowSymbols;

    impl SymbolSource for SlowSymbols {
        fn document_symbols(&self, _file_path: &str) -> anyhow::Result<Option<Vec<DocumentSymbol>>> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(Some(vec![DocumentSymbol::new(
                "late",
                SymbolKind::Function,
                Range::lines(0, 100),
            )]))
        }
    }

    fn write_source(dir: &TempDir) -> String {
        let path = dir.path().join("store.ts");
        std::fs::write(
            &path,
            "class Store {\n  save() {\n    // TODO: fix bug\n    write();\n  }\n}\n",
        )
        .unwrap();
        path.to_string_lossy().to_string()
    }

    fn store_symbols() -> Arc<dyn SymbolSource> {
        Arc::new(FixedSymbols(vec![DocumentSymbol::new(
            "Store",
            SymbolKind::Class,
            Range::lines(0, 5),
        )
        .with_children(vec![DocumentSymbol::new(
            "save",
            SymbolKind::Method,
            Range::lines(1, 4),
        )])]))
    }

    #[tokio::test]
    async fn test_enhance_combines_all_lookups() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        let repo = RepoInfo {
            branch: Some("feature/x".to_string()),
            last_commit: Some("Wire up store".to_string()),
            uncommitted_files: Some(1),
        };
        let service = CaptureService::with_clock(
            Some(store_symbols()),
            Some(Arc::new(FixedRepo(repo))),
            Arc::new(TestClock::new(42)),
        );

        let cursor = CursorContext::new(path.clone(), 3, 4).with_workspace("/ws");
        let ctx = service.enhance(&cursor).await;

        assert_eq!(ctx.file_path, path);
        assert_eq!(ctx.timestamp, 42);
        assert_eq!(ctx.function_name.as_deref(), Some("Method: save()"));
        assert_eq!(ctx.todo_comment.as_deref(), Some("TODO: fix bug"));
        assert_eq!(ctx.note.as_deref(), Some("fix bug in Method: save()"));
        assert_eq!(ctx.git_branch.as_deref(), Some("feature/x"));
        assert_eq!(ctx.workspace_folder.as_deref(), Some("/ws"));
    }

    #[tokio::test]
    async fn test_failing_sources_degrade_to_absent_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        let service = CaptureService::new(None, Some(Arc::new(FailingRepo)));

        let ctx = service.enhance(&CursorContext::new(path, 3, 0)).await;

        assert!(ctx.function_name.is_none());
        assert!(ctx.git_branch.is_none());
        assert_eq!(ctx.todo_comment.as_deref(), Some("TODO: fix bug"));
    }

    #[tokio::test]
    async fn test_missing_file_still_produces_snapshot() {
        let service = CaptureService::new(Some(store_symbols()), None);
        let ctx = service
            .enhance(&CursorContext::new("/definitely/missing/file.ts", 2, 0))
            .await;

        assert!(ctx.todo_comment.is_none());
        assert_eq!(ctx.function_name.as_deref(), Some("Method: save()"));
        assert_eq!(
            ctx.note.as_deref(),
            Some("Working on Method: save() in file.ts")
        );
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let service = CaptureService::new(Some(Arc::new(SlowSymbols)), None)
            .with_lookup_timeout(Duration::from_millis(50));

        let ctx = service
            .enhance(&CursorContext::new("/missing.ts", 1, 0))
            .await;

        assert!(ctx.function_name.is_none());
        assert_eq!(ctx.note.as_deref(), Some("Editing missing.ts"));
    }

    #[tokio::test]
    async fn test_keyword_update_applies_to_next_capture() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.py");
        std::fs::write(&path, "x = 1\n# REVIEW: naming\n# TODO: later\n").unwrap();
        let cursor = CursorContext::new(path.to_string_lossy().to_string(), 1, 0);

        let service = CaptureService::new(None, None);
        let ctx = service.enhance(&cursor).await;
        assert_eq!(ctx.todo_comment.as_deref(), Some("TODO: later"));

        service.set_todo_keywords(&["REVIEW".to_string()]);
        assert_eq!(service.todo_keywords(), vec!["REVIEW".to_string()]);
        let ctx = service.enhance(&cursor).await;
        assert_eq!(ctx.todo_comment.as_deref(), Some("REVIEW: naming"));
    }

    #[tokio::test]
    async fn test_unsaved_buffer_wins_over_disk() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir);
        let unsaved =
            "class Store {\n  save() {\n    // HACK: typed but not saved\n    write();\n  }\n}\n";
        let service = CaptureService::new(None, None)
            .with_buffers(Arc::new(FixedBuffer(unsaved.to_string())));

        let ctx = service.enhance(&CursorContext::new(path.clone(), 3, 0)).await;
        assert_eq!(ctx.todo_comment.as_deref(), Some("HACK: typed but not saved"));

        // no pushed text falls back to the saved file
        let service = CaptureService::new(None, None).with_buffers(Arc::new(NoBuffers));
        let ctx = service.enhance(&CursorContext::new(path, 3, 0)).await;
        assert_eq!(ctx.todo_comment.as_deref(), Some("TODO: fix bug"));
    }

    #[tokio::test]
    async fn test_fifo_path_does_not_block_capture() {
        let dir = TempDir::new().unwrap();
        let fifo = dir.path().join("pipe.ts");
        let c_path = std::ffi::CString::new(fifo.to_string_lossy().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);

        let service = CaptureService::new(None, None).with_lookup_timeout(Duration::from_millis(50));
        let cursor = CursorContext::new(fifo.to_string_lossy().to_string(), 0, 0);
        let ctx = tokio::time::timeout(Duration::from_secs(5), service.enhance(&cursor))
            .await
            .expect("capture blocked on a fifo");

        assert!(ctx.todo_comment.is_none());
        assert_eq!(ctx.note.as_deref(), Some("Editing pipe.ts"));
    }

    #[test]
    fn test_read_source_text_skips_special_and_oversized_files() {
        let dir = TempDir::new().unwrap();
        assert!(read_source_text(dir.path()).unwrap().is_none());
        assert!(read_source_text(&dir.path().join("missing.ts")).unwrap().is_none());

        let big = dir.path().join("big.ts");
        let file = File::create(&big).unwrap();
        file.set_len(MAX_SOURCE_FILE_BYTES + 1).unwrap();
        assert!(read_source_text(&big).unwrap().is_none());

        let binary = dir.path().join("blob.ts");
        std::fs::write(&binary, b"ok\xff\n").unwrap();
        assert_eq!(read_source_text(&binary).unwrap().as_deref(), Some("ok\u{fffd}\n"));
    }
}
