//! Decides which files are tracked at all

use once_cell::sync::Lazy;
use regex::Regex;

static WINDOWS_ABSOLUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]:\\").expect("failed to compile drive letter matcher"));

/// Absolute POSIX path or drive-letter Windows path
pub fn is_absolute_path(path: &str) -> bool {
    path.starts_with('/') || WINDOWS_ABSOLUTE.is_match(path)
}

/// Compile a `*`-only glob into an unanchored regex
///
/// `*` matches any run of characters; everything else is literal.
fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&body)
}

/// Exclude list built from user patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<(String, Regex)>,
}

impl ExcludeFilter {
    pub fn new(patterns: &[String]) -> Self {
        let mut filter = Self::default();
        filter.set_patterns(patterns);
        filter
    }

    pub fn set_patterns(&mut self, patterns: &[String]) {
        self.patterns = patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .filter_map(|p| match compile_pattern(p) {
                Ok(regex) => Some((p.clone(), regex)),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring exclude pattern");
                    None
                }
            })
            .collect();
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.patterns.iter().map(|(raw, _)| raw.as_str()).collect()
    }

    /// Whether snapshots may be taken for `path`
    pub fn should_track(&self, path: &str) -> bool {
        if !is_absolute_path(path) {
            return false;
        }
        !self.patterns.iter().any(|(_, regex)| regex.is_match(path))
    }
}
