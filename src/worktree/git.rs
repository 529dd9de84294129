//! Thin async wrapper around the `git` command line

use crate::worktree::WorktreeError;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs git commands inside one repository
#[derive(Debug, Clone)]
pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output, WorktreeError> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr.trim(), "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<String, WorktreeError> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool, WorktreeError> {
        let output = self
            .run(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)])
            .await?;
        Ok(output.status.success())
    }

    /// Branches checked out in any worktree, the main one included
    pub async fn checked_out_branches(&self) -> Result<Vec<String>, WorktreeError> {
        let stdout = self.run_checked(&["worktree", "list", "--porcelain"]).await?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.strip_prefix("branch "))
            .map(|r| r.trim_start_matches("refs/heads/").to_string())
            .collect())
    }

    /// Add a worktree at `path`, creating `branch` from `base` if needed
    pub async fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<(), WorktreeError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| WorktreeError::Validation("worktree path is not valid UTF-8".into()))?;

        if self.branch_exists(branch).await? {
            self.run_checked(&["worktree", "add", path_str, branch]).await?;
        } else {
            self.run_checked(&["worktree", "add", "-b", branch, path_str, base])
                .await?;
        }
        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<(), WorktreeError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| WorktreeError::Validation("worktree path is not valid UTF-8".into()))?;
        self.run_checked(&["worktree", "remove", "--force", path_str])
            .await?;
        Ok(())
    }

    /// Drop metadata of worktrees whose directories are gone
    pub async fn worktree_prune(&self) -> Result<(), WorktreeError> {
        self.run_checked(&["worktree", "prune"]).await?;
        Ok(())
    }
}
