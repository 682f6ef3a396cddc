//! Work context module
//!
//! Locates symbols and tagged comments around a cursor, synthesizes snapshots
//! and keeps a bounded per-workspace history of them.

pub mod capture;
pub mod git;
pub mod history;
pub mod locator;
pub mod models;
pub mod store;
pub mod symbols;
pub mod synth;

// Re-export key types
pub use capture::{CaptureService, Clock, RepoInfoSource, SymbolSource, SystemClock};
pub use history::{HistoryStore, SaveOutcome};
pub use models::{CaptureReason, CursorContext, DocumentSymbol, RepoInfo, WorkContext};
pub use store::{KeyValueStore, StateStore};
