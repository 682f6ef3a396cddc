// Daemon protocol - shared messages for editor plugin / CLI <-> daemon traffic
// Newline-delimited JSON frames over a Unix socket

use serde::{Deserialize, Serialize};

use crate::app::CaptureOutcome;
use crate::context::models::{CaptureReason, DocumentSymbol, WorkContext};
use crate::daemon::settings::{Settings, SettingsPatch};
use crate::present::{HistoryItem, JumpTarget, ResumePrompt};

/// Bumped on any incompatible message change
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest request line the daemon accepts (imports carry whole histories)
pub const MAX_REQUEST_FRAME_SIZE: usize = 1024 * 1024;

/// Largest response line a client accepts
pub const MAX_RESPONSE_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Machine-readable error category carried by `DaemonResponse::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonErrorCode {
    /// Frame could not be parsed or was sent out of order
    InvalidRequest,
    VersionMismatch,
    /// Well-formed request with unusable arguments (e.g. malformed import)
    InvalidInput,
    NotFound,
    /// Jump target no longer exists on disk
    FileMissing,
    StoreUnavailable,
    Internal,
    /// Client-side: could not reach the daemon
    DaemonUnavailable,
    /// Client-side: no response within the read timeout
    Timeout,
}

impl std::fmt::Display for DaemonErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DaemonErrorCode::InvalidRequest => "invalid_request",
            DaemonErrorCode::VersionMismatch => "version_mismatch",
            DaemonErrorCode::InvalidInput => "invalid_input",
            DaemonErrorCode::NotFound => "not_found",
            DaemonErrorCode::FileMissing => "file_missing",
            DaemonErrorCode::StoreUnavailable => "store_unavailable",
            DaemonErrorCode::Internal => "internal",
            DaemonErrorCode::DaemonUnavailable => "daemon_unavailable",
            DaemonErrorCode::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Client -> Daemon requests
// ============================================================================

/// Request message from an editor plugin or the CLI
///
/// History queries take an optional `workspace_folder`; when absent the
/// workspace of the attached editor session is used, then the region for
/// files outside any workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Must be the first frame on every connection
    Handshake { client_version: u32 },
    Ping,
    /// Flush every editor session and stop the daemon
    Shutdown,

    // ---- editor session ----
    /// Bind an editor session to this connection
    Attach {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
    },
    /// Cursor moved or text typed at a position
    Activity {
        file_path: String,
        line: u32,
        column: u32,
    },
    /// Another file became the active editor
    FocusChanged {
        file_path: String,
        line: u32,
        column: u32,
    },
    /// A document changed
    DocumentEdited { file_path: String },
    /// Editor window focus changed
    WindowState { focused: bool },
    /// Symbol tree for a file, as computed by the editor, plus the buffer
    /// text when it has unsaved changes
    Symbols {
        file_path: String,
        symbols: Vec<DocumentSymbol>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Manual save of the current position
    SaveNow,
    /// End the editor session, flushing its current position
    Detach,

    // ---- history ----
    Latest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
    },
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
    },
    ClearHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
    },
    Prune {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
        max_age_days: u32,
    },
    Export {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
    },
    Import {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
        /// JSON array of contexts, as produced by `export`
        data: String,
    },
    /// Resolve the entry at `index` (0 = newest) into a jump target
    ResolveJump {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
        index: usize,
    },
    /// Resume prompt for the newest entry, if one is due
    ResumePrompt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
        /// Ignore the once-per-interval gate and the user setting
        #[serde(default)]
        force: bool,
    },

    // ---- settings ----
    GetSettings,
    UpdateSettings { patch: SettingsPatch },
    /// Re-read the settings file from disk
    ReloadSettings,
}

// ============================================================================
// Daemon -> Client responses
// ============================================================================

/// Response message from the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    Handshake { protocol_version: u32 },
    Pong,
    ShuttingDown,
    /// Editor session bound; `region` names the history scope
    Attached {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_folder: Option<String>,
        region: String,
    },
    /// Signal accepted
    Ack,
    /// Result of a snapshot trigger
    Capture { outcome: CaptureOutcome },
    Detached,
    Context {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<WorkContext>,
        /// Status bar text for `context`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    History {
        contexts: Vec<WorkContext>,
        items: Vec<HistoryItem>,
    },
    Cleared,
    Pruned { removed: usize },
    Exported { data: String },
    Imported { count: usize },
    JumpTarget { target: JumpTarget },
    ResumePrompt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<ResumePrompt>,
    },
    Settings { settings: Settings },
    Error {
        code: DaemonErrorCode,
        message: String,
    },
}

impl DaemonResponse {
    pub fn error(code: DaemonErrorCode, message: impl Into<String>) -> Self {
        DaemonResponse::Error {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Daemon -> Client push notifications (broadcast)
// ============================================================================

/// Push notification delivered to every connection between responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonNotification {
    /// A snapshot was stored; `message` is ready to show
    ContextSaved {
        context: WorkContext,
        reason: CaptureReason,
        message: String,
    },
    SettingsChanged { settings: Settings },
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    serde_json::from_slice(trimmed)
}
