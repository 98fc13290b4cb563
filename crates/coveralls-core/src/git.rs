//! Git integration for describing the commit a report belongs to.
//!
//! Live git is tried first. If any git invocation fails the whole head
//! section is rebuilt from `GIT_*` environment variables, which lets
//! Mercurial users and git-less containers still submit.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ci::{self, BranchSignal};
use crate::env::Environment;
use crate::error::{CoverallsError, Result};

/// Branch variable read when git cannot be queried.
const FALLBACK_BRANCH_VAR: &str = "GIT_BRANCH";

/// Head commit details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
    pub message: Option<String>,
}

impl CommitInfo {
    /// Every field is present and non-empty.
    pub fn is_complete(&self) -> bool {
        [
            &self.id,
            &self.author_name,
            &self.author_email,
            &self.committer_name,
            &self.committer_email,
            &self.message,
        ]
        .iter()
        .all(|f| f.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// A configured fetch remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub name: String,
    pub url: String,
}

/// The `git` section of the job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsContext {
    pub branch: Option<String>,
    pub head: CommitInfo,
    #[serde(default)]
    pub remotes: Vec<RemoteRef>,
}

/// Runs git subcommands in a working directory.
#[derive(Debug, Clone)]
pub struct GitRunner {
    program: PathBuf,
    work_dir: PathBuf,
}

impl GitRunner {
    /// Git from `PATH`, run in `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("git"),
            work_dir: work_dir.into(),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run `git <args>` and return trimmed stdout.
    ///
    /// Spawn failures and non-zero exits both map to
    /// [`CoverallsError::VcsUnavailable`] carrying stdout and stderr.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| CoverallsError::VcsUnavailable(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoverallsError::VcsUnavailable(format!(
                "git {} failed ({})\nSTDOUT: {}\nSTDERR: {}",
                args.join(" "),
                output.status,
                stdout.trim(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `git log -1` with a single pretty-format placeholder.
    pub fn log_field(&self, format: &str) -> Result<String> {
        let pretty = format!("--pretty=format:{format}");
        self.run(&["--no-pager", "log", "-1", &pretty])
    }

    /// Current symbolic branch name.
    pub fn current_branch(&self) -> Result<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Fetch remotes in listing order.
    pub fn remotes(&self) -> Result<Vec<RemoteRef>> {
        Ok(parse_remotes(&self.run(&["remote", "-v"])?))
    }

    /// Head commit from six single-field log queries.
    pub fn head(&self) -> Result<CommitInfo> {
        Ok(CommitInfo {
            id: Some(self.log_field("%H")?),
            author_name: Some(self.log_field("%aN")?),
            author_email: Some(self.log_field("%ae")?),
            committer_name: Some(self.log_field("%cN")?),
            committer_email: Some(self.log_field("%ce")?),
            message: Some(self.log_field("%s")?),
        })
    }
}

/// Parse `git remote -v` output, keeping `(fetch)` lines only.
pub fn parse_remotes(output: &str) -> Vec<RemoteRef> {
    output
        .lines()
        .filter(|line| line.contains("(fetch)"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(RemoteRef {
                name: parts.next()?.to_string(),
                url: parts.next()?.to_string(),
            })
        })
        .collect()
}

/// Branch via the CI cascade, then git. A failing git query yields `None`.
pub fn resolve_branch(git: &GitRunner, env: &Environment) -> Option<String> {
    match ci::env_branch(env) {
        BranchSignal::Final(branch) => branch,
        BranchSignal::Unknown => git
            .current_branch()
            .map_err(|e| debug!("Could not read branch from git: {e}"))
            .ok(),
    }
}

/// Context from live git queries. Any failing command fails the whole stage.
pub fn vcs_from_git(git: &GitRunner, env: &Environment) -> Result<VcsContext> {
    let branch = resolve_branch(git, env);
    let head = git.head()?;
    let remotes = git.remotes()?;
    Ok(VcsContext {
        branch,
        head,
        remotes,
    })
}

/// Context from the `GIT_*` fallback variables, unvalidated.
pub fn vcs_from_env(env: &Environment) -> VcsContext {
    let remotes = match (env.var("GIT_REMOTE"), env.var("GIT_URL")) {
        (Some(name), Some(url)) => vec![RemoteRef { name, url }],
        _ => Vec::new(),
    };

    VcsContext {
        branch: env.var(FALLBACK_BRANCH_VAR),
        head: CommitInfo {
            id: env.var("GIT_ID"),
            author_name: env.var("GIT_AUTHOR_NAME"),
            author_email: env.var("GIT_AUTHOR_EMAIL"),
            committer_name: env.var("GIT_COMMITTER_NAME"),
            committer_email: env.var("GIT_COMMITTER_EMAIL"),
            message: env.var("GIT_MESSAGE"),
        },
        remotes,
    }
}

/// Resolve the `git` section of the report.
///
/// Returns `None` when neither git nor the fallback variables describe a
/// complete head commit; the report then omits the section entirely.
pub fn resolve_vcs_context(git: &GitRunner, env: &Environment) -> Option<VcsContext> {
    let err = match vcs_from_git(git, env) {
        Ok(ctx) => return Some(ctx),
        Err(err) => err,
    };

    debug!("Falling back to GIT_* environment variables: {err}");
    Some(vcs_from_env(env))
        .filter(|ctx| ctx.head.is_complete())
        .or_else(|| {
            warn!(
                error = %err,
                "Failed collecting git data. Are you running coveralls inside a git repository? Is git installed?"
            );
            None
        })
}
