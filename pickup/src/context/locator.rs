//! Symbol and comment lookup around a cursor position.
//!
//! Symbol lookup walks a document symbol tree supplied by the editor and keeps
//! the innermost symbol containing the cursor. Comment lookup scans a window of
//! lines around the cursor for a keyword-tagged comment such as
//! `// TODO: handle retries`.

use crate::context::models::{DocumentSymbol, Position};
use regex::Regex;

/// Lines searched before and after the cursor line
pub const COMMENT_SEARCH_WINDOW: u32 = 10;

/// Lines shown above and below the cursor in a code preview
pub const PREVIEW_CONTEXT_LINES: u32 = 3;

/// Keywords recognized when no configuration overrides them
pub const DEFAULT_TODO_KEYWORDS: [&str; 6] = ["TODO", "FIXME", "HACK", "NOTE", "BUG", "XXX"];

pub fn default_todo_keywords() -> Vec<String> {
    DEFAULT_TODO_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

/// In-memory view of a document's lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    lines: Vec<String>,
}

impl TextBuffer {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }

    pub fn line(&self, index: u32) -> Option<&str> {
        self.lines.get(index as usize).map(String::as_str)
    }

    /// Render lines around `line` with 1-based numbers and a marker on `line`
    pub fn code_preview(&self, line: u32, context_lines: u32) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let last = self.line_count() - 1;
        let start = line.saturating_sub(context_lines).min(last);
        let end = line.saturating_add(context_lines).min(last);

        (start..=end)
            .filter_map(|i| {
                self.line(i).map(|text| {
                    let prefix = if i == line { "→ " } else { "  " };
                    format!("{}{}: {}", prefix, i + 1, text)
                })
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Find the most specific symbol whose range contains `position`.
///
/// Every containing symbol at a level becomes the current best match and its
/// children are searched; a deeper match always replaces a shallower one.
pub fn find_containing_symbol(
    symbols: &[DocumentSymbol],
    position: Position,
) -> Option<&DocumentSymbol> {
    let mut best_match = None;

    for symbol in symbols {
        if symbol.range.contains(position) {
            best_match = Some(symbol);

            if let Some(child_match) = find_containing_symbol(&symbol.children, position) {
                best_match = Some(child_match);
            }
        }
    }

    best_match
}

/// Format a symbol as `"<Kind>: <name>"`, adding `()` for callables
pub fn format_symbol_name(symbol: &DocumentSymbol) -> String {
    let kind = symbol.kind.label();
    if symbol.kind.is_callable() {
        format!("{}: {}()", kind, symbol.name)
    } else {
        format!("{}: {}", kind, symbol.name)
    }
}

/// Formatted name of the innermost symbol containing `position`
pub fn locate_symbol(symbols: &[DocumentSymbol], position: Position) -> Option<String> {
    find_containing_symbol(symbols, position).map(format_symbol_name)
}

/// Compiled matchers for one keyword, in comment-style priority order
#[derive(Debug, Clone)]
struct KeywordMatcher {
    keyword: String,
    styles: Vec<Regex>,
}

impl KeywordMatcher {
    fn new(keyword: &str) -> Self {
        let kw = regex::escape(keyword);
        let styles = [
            // line comment: // TODO: text
            format!(r"(?i)//\s*{kw}\s*:?\s*(.+)"),
            // block comment: /* TODO text */
            format!(r"(?i)/\*\s*{kw}\s*:?\s*(.+?)\s*\*/"),
            // shell-style comment: # TODO text
            format!(r"(?i)#\s*{kw}\s*:?\s*(.+)"),
            // html comment: <!-- TODO text -->
            format!(r"(?i)<!--\s*{kw}\s*:?\s*(.+?)\s*-->"),
        ]
        .iter()
        // the keyword is escaped, so every pattern compiles
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect();

        Self {
            keyword: keyword.to_string(),
            styles,
        }
    }

    fn extract(&self, line: &str) -> Option<String> {
        self.styles.iter().find_map(|style| {
            let captures = style.captures(line)?;
            let text = captures.get(1)?.as_str().trim();
            if text.is_empty() {
                None
            } else {
                Some(format!("{}: {}", self.keyword, text))
            }
        })
    }
}

/// Scans text for keyword-tagged comments.
///
/// Keywords are tried in configured order, so an earlier keyword wins when a
/// single line carries more than one.
#[derive(Debug, Clone)]
pub struct CommentLocator {
    matchers: Vec<KeywordMatcher>,
}

impl Default for CommentLocator {
    fn default() -> Self {
        Self::new(&default_todo_keywords())
    }
}

impl CommentLocator {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            matchers: Self::compile(keywords),
        }
    }

    fn compile(keywords: &[String]) -> Vec<KeywordMatcher> {
        keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(KeywordMatcher::new)
            .collect()
    }

    /// Replace the keyword list; takes effect for the next lookup
    pub fn set_keywords(&mut self, keywords: &[String]) {
        self.matchers = Self::compile(keywords);
    }

    pub fn keywords(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.keyword.as_str()).collect()
    }

    /// Extract `"<KEYWORD>: <text>"` from a single line, if it carries a tagged comment
    pub fn extract_from_line(&self, line: &str) -> Option<String> {
        let trimmed = line.trim();
        self.matchers.iter().find_map(|m| m.extract(trimmed))
    }

    /// Find the nearest tagged comment around `line`.
    ///
    /// Scans from `line` back to `line - 10` first, then forward from
    /// `line + 1` to `line + 10`; the first hit in that order is returned.
    pub fn locate(&self, buffer: &TextBuffer, line: u32) -> Option<String> {
        if buffer.line_count() == 0 || self.matchers.is_empty() {
            return None;
        }
        let last = buffer.line_count() - 1;
        let start = line.saturating_sub(COMMENT_SEARCH_WINDOW);
        let end = line.saturating_add(COMMENT_SEARCH_WINDOW).min(last);

        let backward = (start..=line.min(last)).rev();
        let forward = line.saturating_add(1)..=end;

        backward
            .chain(forward)
            .filter_map(|i| buffer.line(i))
            .find_map(|text| self.extract_from_line(text))
    }
}
