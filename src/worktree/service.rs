//! Creating, tracking and cleaning up worktrees

use crate::persistence::{load_json, update_json, StateStore};
use crate::worktree::{GitRunner, WorktreeError, WorktreeRecord, WorktreeRegistry};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Key of the tracking file in the state store
pub const WORKTREES_KEY: &str = "worktrees.json";

/// Environment variables that mark an ephemeral CI runner
const CI_VARIABLES: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "BUILDKITE",
    "CIRCLECI",
];

const MAX_NAME_LEN: usize = 100;

/// Where worktrees live and how many to keep
#[derive(Debug, Clone)]
pub struct WorktreeConfig {
    pub root: PathBuf,
    /// Soft cap: exceeding it only warns
    pub max_active: usize,
    pub retention_days: u32,
}

impl WorktreeConfig {
    pub const DEFAULT_MAX_ACTIVE: usize = 5;
    pub const DEFAULT_RETENTION_DAYS: u32 = 7;

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_active: Self::DEFAULT_MAX_ACTIVE,
            retention_days: Self::DEFAULT_RETENTION_DAYS,
        }
    }

    /// `<parent>/.agentful-worktrees/<project name>` next to the project
    pub fn default_root(project_root: &Path) -> PathBuf {
        let name = project_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        project_root
            .parent()
            .unwrap_or(project_root)
            .join(".agentful-worktrees")
            .join(name)
    }
}

/// Result of [`WorktreeService::cleanup`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    /// Worktrees that could not be removed, with the reason
    pub failed: Vec<(String, String)>,
    pub pruned: bool,
}

/// Whether we are running on a CI runner
pub fn is_ci_environment() -> bool {
    CI_VARIABLES
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}

/// Make `branch` a safe git branch name
///
/// Ref rules apply to every `/` component: no leading `.`, no trailing `.`
/// or `.lock`, no `..`, no empty components. The name may not start with `-`.
pub fn sanitize_branch(branch: &str) -> Result<String, WorktreeError> {
    let mapped: String = branch
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut components: Vec<String> = Vec::new();
    for raw in mapped.split('/') {
        let component = sanitize_component(raw, components.is_empty());
        if !component.is_empty() {
            components.push(component);
        }
    }
    let sanitized = components.join("/");

    if sanitized.is_empty() {
        return Err(WorktreeError::Validation(format!(
            "branch name '{}' has no usable characters",
            branch
        )));
    }
    Ok(sanitized)
}

fn sanitize_component(raw: &str, first: bool) -> String {
    let mut component = raw.to_string();
    while component.contains("..") {
        component = component.replace("..", ".");
    }
    loop {
        let before = component.len();
        component = component
            .trim_start_matches(|c| c == '.' || (first && c == '-'))
            .trim_end_matches('.')
            .to_string();
        if let Some(stripped) = component.strip_suffix(".lock") {
            component = stripped.to_string();
        }
        if component.len() == before {
            break;
        }
    }
    component
}

/// Check a worktree name against the allow-list
pub fn validate_name(name: &str) -> Result<(), WorktreeError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(WorktreeError::Validation(format!(
            "worktree name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    if name.contains("..") {
        return Err(WorktreeError::Validation(format!(
            "worktree name '{}' contains '..'",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(WorktreeError::Validation(format!(
            "worktree name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}

/// Creates and tracks worktrees of one repository
pub struct WorktreeService {
    git: GitRunner,
    config: WorktreeConfig,
    store: Arc<dyn StateStore>,
    enabled: bool,
    /// Held from choosing a branch until the worktree is tracked
    create_lock: Mutex<()>,
}

impl WorktreeService {
    /// Service for the repository at `repo_root`; disabled on CI runners
    pub fn new(repo_root: impl Into<PathBuf>, config: WorktreeConfig, store: Arc<dyn StateStore>) -> Self {
        let enabled = !is_ci_environment();
        if !enabled {
            info!("CI environment detected; worktree isolation disabled");
        }
        Self {
            git: GitRunner::new(repo_root),
            config,
            store,
            enabled,
            create_lock: Mutex::new(()),
        }
    }

    /// Override CI detection
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &WorktreeConfig {
        &self.config
    }

    /// Create a worktree for `purpose` on `branch`
    ///
    /// If `branch` is already checked out somewhere, a suffixed branch is
    /// created instead. Returns `None` when the service is disabled.
    pub async fn create(&self, purpose: &str, branch: &str) -> Result<Option<WorktreeRecord>, WorktreeError> {
        if !self.enabled {
            return Ok(None);
        }

        if purpose.is_empty()
            || !purpose
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(WorktreeError::Validation(format!(
                "invalid purpose '{}'",
                purpose
            )));
        }
        let requested = sanitize_branch(branch)?;

        let _guard = self.create_lock.lock().await;
        let active = self.list()?;
        if active.len() >= self.config.max_active {
            warn!(
                active = active.len(),
                max_active = self.config.max_active,
                "Active worktree limit exceeded; consider running cleanup"
            );
        }

        let branch = self.available_branch(&requested, purpose).await?;
        if branch != requested {
            info!(requested = %requested, branch = %branch, "Branch already checked out, using a new branch");
        }

        let (name, path) = self.unique_location(purpose, &branch, &active)?;
        tokio::fs::create_dir_all(&self.config.root).await?;
        self.git.worktree_add(&path, &branch, "HEAD").await?;

        let now = Utc::now();
        let record = WorktreeRecord {
            name,
            path,
            branch,
            purpose: purpose.to_string(),
            created_at: now,
            last_activity: now,
        };
        update_json(self.store.as_ref(), WORKTREES_KEY, |registry: &mut WorktreeRegistry| {
            registry.active.retain(|r| r.name != record.name);
            registry.active.push(record.clone());
        })?;

        info!(name = %record.name, branch = %record.branch, path = %record.path.display(), "Created worktree");
        Ok(Some(record))
    }

    /// Tracked worktrees, oldest first
    pub fn list(&self) -> Result<Vec<WorktreeRecord>, WorktreeError> {
        let mut active = load_json::<WorktreeRegistry>(self.store.as_ref(), WORKTREES_KEY)?
            .unwrap_or_default()
            .active;
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    /// Refresh the activity time of a worktree
    pub fn touch(&self, name: &str) -> Result<bool, WorktreeError> {
        let mut found = false;
        update_json(self.store.as_ref(), WORKTREES_KEY, |registry: &mut WorktreeRegistry| {
            found = false;
            if let Some(record) = registry.active.iter_mut().find(|r| r.name == name) {
                record.last_activity = Utc::now();
                found = true;
            }
        })?;
        Ok(found)
    }

    /// Remove one worktree and stop tracking it
    pub async fn remove(&self, name: &str) -> Result<bool, WorktreeError> {
        let Some(record) = self.list()?.into_iter().find(|r| r.name == name) else {
            return Ok(false);
        };

        if record.path.exists() {
            self.git.worktree_remove(&record.path).await?;
        }
        self.untrack(&[record.name.clone()])?;
        info!(name = %record.name, "Removed worktree");
        Ok(true)
    }

    /// Remove worktrees idle for more than `retention_days`, then prune
    ///
    /// Removal failures are logged and skipped.
    pub async fn cleanup(&self, retention_days: u32) -> Result<CleanupReport, WorktreeError> {
        let mut report = CleanupReport::default();
        if !self.enabled {
            return Ok(report);
        }

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        for record in self.list()? {
            if record.last_activity > cutoff {
                continue;
            }

            let removal = if record.path.exists() {
                self.git.worktree_remove(&record.path).await
            } else {
                Ok(())
            };
            match removal {
                Ok(()) => {
                    info!(name = %record.name, "Cleaned up worktree");
                    report.removed.push(record.name);
                }
                Err(e) => {
                    warn!(name = %record.name, "Failed to remove worktree: {}", e);
                    report.failed.push((record.name, e.to_string()));
                }
            }
        }
        self.untrack(&report.removed)?;

        match self.git.worktree_prune().await {
            Ok(()) => report.pruned = true,
            Err(e) => warn!("Failed to prune worktree metadata: {}", e),
        }
        Ok(report)
    }

    fn untrack(&self, names: &[String]) -> Result<(), WorktreeError> {
        if names.is_empty() {
            return Ok(());
        }
        update_json(self.store.as_ref(), WORKTREES_KEY, |registry: &mut WorktreeRegistry| {
            registry.active.retain(|r| !names.contains(&r.name));
        })?;
        Ok(())
    }

    async fn available_branch(&self, requested: &str, purpose: &str) -> Result<String, WorktreeError> {
        let checked_out = self.git.checked_out_branches().await?;
        if !checked_out.iter().any(|b| b == requested) {
            return Ok(requested.to_string());
        }

        let mut n = 1;
        loop {
            let candidate = format!("{}-{}-{}", requested, purpose, n);
            if !checked_out.contains(&candidate) && !self.git.branch_exists(&candidate).await? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    fn unique_location(
        &self,
        purpose: &str,
        branch: &str,
        active: &[WorktreeRecord],
    ) -> Result<(String, PathBuf), WorktreeError> {
        let stamp = Utc::now().timestamp_millis();
        let base: String = format!("{}-{}-{}", purpose, branch.replace('/', "-"), stamp)
            .chars()
            .take(MAX_NAME_LEN - 4)
            .collect();

        let mut name = base.clone();
        let mut n = 1;
        loop {
            validate_name(&name)?;
            let path = self.config.root.join(&name);
            if !is_contained(&self.config.root, &path) {
                return Err(WorktreeError::Validation(format!(
                    "worktree path escapes {}",
                    self.config.root.display()
                )));
            }
            if !path.exists() && !active.iter().any(|r| r.name == name) {
                return Ok((name, path));
            }
            n += 1;
            name = format!("{}-{}", base, n);
        }
    }
}

fn is_contained(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root).is_ok_and(|rest| {
        rest.components().count() == 1
            && rest.components().all(|c| matches!(c, Component::Normal(_)))
    })
}
