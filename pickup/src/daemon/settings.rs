//! User settings stored as `<state_dir>/settings.json`

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::context::history::DEFAULT_MAX_HISTORY_SIZE;
use crate::context::locator::default_todo_keywords;

pub const DEFAULT_IDLE_TIMEOUT_MINUTES: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Minutes without activity before an idle snapshot
    pub idle_timeout_minutes: u64,
    /// Entries kept per workspace
    pub max_history_size: usize,
    /// `*`-glob fragments; matching paths are never tracked
    pub exclude_patterns: Vec<String>,
    pub auto_show_resume_popup: bool,
    /// Comment markers, tried in order
    pub todo_keywords: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: DEFAULT_IDLE_TIMEOUT_MINUTES,
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            exclude_patterns: Vec::new(),
            auto_show_resume_popup: true,
            todo_keywords: default_todo_keywords(),
        }
    }
}

impl Settings {
    /// Read settings from `path`, writing defaults when the file is missing
    ///
    /// Out-of-range values are repaired and written back.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut parsed: Settings = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", path.display()))?;
            if parsed.normalize() {
                parsed.save(path)?;
            }
            Ok(parsed)
        } else {
            let settings = Settings::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create settings directory {}", parent.display())
            })?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Clamp values into range; returns whether anything changed
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;

        if self.idle_timeout_minutes == 0 {
            self.idle_timeout_minutes = 1;
            changed = true;
        }
        if self.max_history_size == 0 {
            self.max_history_size = 1;
            changed = true;
        }

        let before = self.exclude_patterns.len();
        self.exclude_patterns.retain(|p| !p.trim().is_empty());
        changed |= self.exclude_patterns.len() != before;

        let keywords: Vec<String> = self
            .todo_keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            self.todo_keywords = default_todo_keywords();
            changed = true;
        } else if keywords != self.todo_keywords {
            self.todo_keywords = keywords;
            changed = true;
        }

        changed
    }
}

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_show_resume_popup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_keywords: Option<Vec<String>>,
}

impl SettingsPatch {
    /// Apply onto `settings` and normalize the result
    pub fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.idle_timeout_minutes {
            settings.idle_timeout_minutes = v;
        }
        if let Some(v) = self.max_history_size {
            settings.max_history_size = v;
        }
        if let Some(v) = self.exclude_patterns {
            settings.exclude_patterns = v;
        }
        if let Some(v) = self.auto_show_resume_popup {
            settings.auto_show_resume_popup = v;
        }
        if let Some(v) = self.todo_keywords {
            settings.todo_keywords = v;
        }
        settings.normalize();
    }
}
