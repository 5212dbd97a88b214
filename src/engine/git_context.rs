//! Repository context for workflow runs.
//!
//! Seeds the variable store with built-in keys derived from git and
//! answers the dispatcher's git queries (builtin input sources, the
//! auto-stage remediation). All git traffic goes through the injected
//! process runner; a workspace without a repository degrades to empty
//! values instead of failing the run.

use std::path::{Path, PathBuf};

use super::variables::VariableStore;
use crate::subprocess::{ProcessCommandBuilder, ProcessError, SubprocessManager};

#[derive(Clone)]
pub struct GitContext {
    subprocess: SubprocessManager,
    workdir: PathBuf,
}

impl GitContext {
    pub fn new(subprocess: SubprocessManager, workdir: impl Into<PathBuf>) -> Self {
        Self {
            subprocess,
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Trimmed stdout of `git <args>`, or an error for nonzero exits.
    pub async fn capture(&self, args: &[&str]) -> Result<String, ProcessError> {
        let command = ProcessCommandBuilder::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .build();

        let output = self.subprocess.runner().run(command).await?;
        if !output.status.success() {
            return Err(ProcessError::ExitCode(output.status.code().unwrap_or(-1)));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Stage all tracked modifications (`git add -u`).
    pub async fn stage_tracked(&self) -> bool {
        self.capture(&["add", "-u"]).await.is_ok()
    }

    /// Seed the built-in variables: `remote_url`, `branch`, `platform`,
    /// `push_command`, `recent_commits`.
    pub async fn seed(&self, store: &mut VariableStore) {
        let remote_url = self
            .capture(&["remote", "get-url", "origin"])
            .await
            .unwrap_or_default();
        let branch = self
            .capture(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .unwrap_or_default();
        let recent_commits = self
            .capture(&["log", "-5", "--pretty=format:%h %s"])
            .await
            .unwrap_or_default();

        if remote_url.is_empty() && branch.is_empty() {
            tracing::debug!("No repository context in {}", self.workdir.display());
        }

        let platform = detect_platform(&remote_url);
        store.set("push_command", push_command(platform, "origin", &branch));
        store.set("remote_url", remote_url);
        store.set("branch", branch);
        store.set("platform", platform);
        store.set("recent_commits", recent_commits);
    }
}

/// Hosting platform inferred from the remote URL by substring matching.
pub fn detect_platform(remote_url: &str) -> &'static str {
    if remote_url.contains("github") {
        "github"
    } else if remote_url.contains("gitlab") {
        "gitlab"
    } else if remote_url.contains("bitbucket") {
        "bitbucket"
    } else if remote_url.contains(":29418")
        || remote_url.contains("/a/")
        || remote_url.contains("gerrit")
    {
        "gerrit"
    } else {
        "unknown"
    }
}

/// Platform-appropriate push command template. Gerrit reviews go through
/// `refs/for/<branch>`; everything else pushes the branch directly.
pub fn push_command(platform: &str, remote: &str, branch: &str) -> String {
    if platform == "gerrit" {
        format!("push {remote} HEAD:refs/for/{branch}")
    } else {
        format!("push {remote} HEAD:{branch}")
    }
}
