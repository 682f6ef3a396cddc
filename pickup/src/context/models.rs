//! Work context snapshot models
//!
//! Field names serialize as camelCase so exported histories stay readable by
//! other tools that share the same JSON shape.

use serde::{Deserialize, Serialize};

/// Reason why a snapshot was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureReason {
    /// No activity for the configured idle timeout
    IdleTimeout,
    /// Editor window lost focus
    WindowBlur,
    /// Switched away from a file after editing it for a while
    FileSwitch,
    /// User explicitly asked for a save
    Manual,
    /// Editor session or daemon shutting down
    Shutdown,
}

impl std::fmt::Display for CaptureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureReason::IdleTimeout => write!(f, "idle timeout"),
            CaptureReason::WindowBlur => write!(f, "window blur"),
            CaptureReason::FileSwitch => write!(f, "file switch"),
            CaptureReason::Manual => write!(f, "manual"),
            CaptureReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Last observed cursor location, as tracked by the idle monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorContext {
    /// Absolute path of the focused file
    pub file_path: String,
    /// Zero-based line
    pub line: u32,
    /// Zero-based column
    pub column: u32,
    /// Workspace root owning the file, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,
}

impl CursorContext {
    pub fn new(file_path: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column,
            workspace_folder: None,
        }
    }

    pub fn with_workspace(mut self, workspace_folder: impl Into<String>) -> Self {
        self.workspace_folder = Some(workspace_folder.into());
        self
    }

    pub fn position(&self) -> Position {
        Position {
            line: self.line,
            character: self.column,
        }
    }
}

/// Repository state for the tracked file; every field is independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// First line of the HEAD commit message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    /// Staged plus unstaged changed files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncommitted_files: Option<u32>,
}

impl RepoInfo {
    pub fn is_empty(&self) -> bool {
        self.branch.is_none() && self.last_commit.is_none() && self.uncommitted_files.is_none()
    }
}

/// Work context snapshot
///
/// Immutable once created: the history store only inserts, shifts and drops
/// whole records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkContext {
    /// Absolute path of the tracked file
    pub file_path: String,
    /// Zero-based cursor line at capture time
    pub line: u32,
    /// Zero-based cursor column at capture time
    pub column: u32,
    /// Innermost enclosing symbol, e.g. "Method: save()"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    /// Nearest keyword-tagged comment, e.g. "TODO: fix bug"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_comment: Option<String>,
    /// Generated one-line summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_last_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_uncommitted_files: Option<u32>,
    /// Capture instant in epoch milliseconds
    pub timestamp: i64,
    /// Workspace root used to partition history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,
}

impl WorkContext {
    /// Create a bare snapshot with no derived metadata
    pub fn new(file_path: impl Into<String>, line: u32, column: u32, timestamp: i64) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column,
            function_name: None,
            todo_comment: None,
            note: None,
            git_branch: None,
            git_last_commit: None,
            git_uncommitted_files: None,
            timestamp,
            workspace_folder: None,
        }
    }

    /// File name component of `file_path`, accepting both separators
    pub fn file_name(&self) -> &str {
        basename(&self.file_path)
    }

    pub fn cursor(&self) -> CursorContext {
        CursorContext {
            file_path: self.file_path.clone(),
            line: self.line,
            column: self.column,
            workspace_folder: self.workspace_folder.clone(),
        }
    }
}

/// Last path component, splitting on `/` and `\`
pub fn basename(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\')
        .find(|part| !part.is_empty())
        .unwrap_or("unknown file")
}

/// Zero-based position in a text buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Declared range of a symbol; both ends inclusive for containment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Line-only range, covering every column of `start_line..=end_line`
    pub fn lines(start_line: u32, end_line: u32) -> Self {
        Self {
            start: Position::new(start_line, 0),
            end: Position::new(end_line, u32::MAX),
        }
    }

    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }
}

/// Kind of a named code construct reported by the symbol source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Constructor,
    Property,
    Variable,
    Constant,
    #[serde(other)]
    Other,
}

impl SymbolKind {
    /// Human-readable kind used in formatted symbol names
    pub fn label(self) -> &'static str {
        match self {
            SymbolKind::Function => "Function",
            SymbolKind::Method => "Method",
            SymbolKind::Class => "Class",
            SymbolKind::Interface => "Interface",
            SymbolKind::Constructor => "Constructor",
            SymbolKind::Property => "Property",
            SymbolKind::Variable => "Variable",
            SymbolKind::Constant => "Constant",
            SymbolKind::Other => "Code",
        }
    }

    pub fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

/// Node of a document symbol tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub range: Range,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DocumentSymbol>,
}

impl DocumentSymbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, range: Range) -> Self {
        Self {
            name: name.into(),
            kind,
            range,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<DocumentSymbol>) -> Self {
        self.children = children;
        self
    }
}
