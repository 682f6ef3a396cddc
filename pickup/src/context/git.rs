//! Repository metadata from the `git` command line

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context as _;

use crate::context::capture::RepoInfoSource;
use crate::context::models::RepoInfo;

/// Reads branch, last commit subject and uncommitted file count by running
/// `git` in the directory of the tracked file
#[derive(Debug, Clone)]
pub struct GitRepoInfo {
    git: PathBuf,
}

impl Default for GitRepoInfo {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
        }
    }
}

impl GitRepoInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable
    pub fn with_git(git: impl Into<PathBuf>) -> Self {
        Self { git: git.into() }
    }

    /// Trimmed stdout of a successful git invocation, `None` otherwise
    fn run(&self, cwd: &Path, args: &[&str]) -> anyhow::Result<Option<String>> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(cwd)
            .output()
            .with_context(|| format!("failed to run {} {}", self.git.display(), args.join(" ")))?;

        if !output.status.success() {
            return Ok(None);
        }

        Ok(String::from_utf8(output.stdout)
            .ok()
            .map(|s| s.trim_end().to_string())
            .filter(|s| !s.trim().is_empty()))
    }
}

impl RepoInfoSource for GitRepoInfo {
    fn repo_info(&self, file_path: &str) -> anyhow::Result<Option<RepoInfo>> {
        let Some(dir) = Path::new(file_path).parent().filter(|d| d.is_dir()) else {
            return Ok(None);
        };

        let inside = self.run(dir, &["rev-parse", "--is-inside-work-tree"])?;
        if inside.as_deref() != Some("true") {
            return Ok(None);
        }

        let branch = self
            .run(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .map(|b| b.trim().to_string());

        let last_commit = self
            .run(dir, &["log", "-1", "--format=%s"])?
            .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
            .filter(|s| !s.is_empty());

        let uncommitted_files = match self.run(dir, &["status", "--porcelain"])? {
            Some(status) => Some(status.lines().filter(|l| !l.trim().is_empty()).count() as u32),
            // clean tree prints nothing
            None => Some(0),
        };

        Ok(Some(RepoInfo {
            branch,
            last_commit,
            uncommitted_files,
        }))
    }
}
