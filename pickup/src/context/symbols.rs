//! Symbol trees and unsaved buffer text pushed by the editor
//!
//! Each entry remembers the connection that pushed it last, so a session's
//! files are dropped when it goes away.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::context::capture::{BufferSource, SymbolSource};
use crate::context::models::DocumentSymbol;

#[derive(Debug, Clone)]
struct Entry {
    owner: u64,
    symbols: Vec<DocumentSymbol>,
    text: Option<String>,
}

/// Latest editor state per file, as last reported by a plugin
#[derive(Debug, Default)]
pub struct SymbolCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tree and buffer text for `file_path`, owned by `owner`
    pub fn update(
        &self,
        owner: u64,
        file_path: impl Into<String>,
        symbols: Vec<DocumentSymbol>,
        text: Option<String>,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            file_path.into(),
            Entry {
                owner,
                symbols,
                text,
            },
        );
    }

    /// Drop every file last pushed by `owner`; returns how many were removed
    pub fn forget_owner(&self, owner: u64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.owner != owner);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SymbolSource for SymbolCache {
    fn document_symbols(&self, file_path: &str) -> anyhow::Result<Option<Vec<DocumentSymbol>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(file_path).map(|entry| entry.symbols.clone()))
    }
}

impl BufferSource for SymbolCache {
    fn buffer_text(&self, file_path: &str) -> anyhow::Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(file_path).and_then(|entry| entry.text.clone()))
    }
}
