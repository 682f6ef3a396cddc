//! Builds a snapshot out of a cursor position and its located metadata.

use crate::context::models::{basename, CursorContext, RepoInfo, WorkContext};

/// Combine a cursor position with located metadata into a snapshot.
///
/// Pure: the caller supplies the timestamp and every lookup result.
pub fn synthesize(
    cursor: &CursorContext,
    symbol: Option<String>,
    comment: Option<String>,
    repo: Option<RepoInfo>,
    timestamp: i64,
) -> WorkContext {
    let note = generate_note(&cursor.file_path, symbol.as_deref(), comment.as_deref());
    let repo = repo.unwrap_or_default();

    WorkContext {
        file_path: cursor.file_path.clone(),
        line: cursor.line,
        column: cursor.column,
        function_name: symbol,
        todo_comment: comment,
        note: Some(note),
        git_branch: repo.branch,
        git_last_commit: repo.last_commit,
        git_uncommitted_files: repo.uncommitted_files,
        timestamp,
        workspace_folder: cursor.workspace_folder.clone(),
    }
}

/// One-line summary of what was being worked on.
///
/// A tagged comment wins over the symbol, which wins over the bare file name.
pub fn generate_note(file_path: &str, symbol: Option<&str>, comment: Option<&str>) -> String {
    match (comment, symbol) {
        (Some(comment), Some(symbol)) => format!("{} in {}", strip_keyword(comment), symbol),
        (Some(comment), None) => strip_keyword(comment).to_string(),
        (None, Some(symbol)) => format!("Working on {} in {}", symbol, basename(file_path)),
        (None, None) => format!("Editing {}", basename(file_path)),
    }
}

/// Drop the leading `KEYWORD:` from a located comment
fn strip_keyword(comment: &str) -> &str {
    match comment.split_once(':') {
        Some((keyword, rest)) if !keyword.trim().is_empty() && !keyword.contains(char::is_whitespace) => {
            rest.trim_start()
        }
        _ => comment,
    }
}
