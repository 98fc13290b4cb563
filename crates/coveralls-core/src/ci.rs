//! CI provider detection.
//!
//! Every function here is a pure read of an [`Environment`]. Providers and
//! branch variables live in static tables consulted in order; the first
//! match wins and nothing is merged across providers.

use crate::env::Environment;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Branch variables for non-GitHub providers, in priority order.
pub const BRANCH_VARS: &[&str] = &[
    "APPVEYOR_REPO_BRANCH",
    "BUILDKITE_BRANCH",
    "CI_BRANCH",
    "CIRCLE_BRANCH",
    "GIT_BRANCH",
    "TRAVIS_BRANCH",
    "BRANCH_NAME",
];

/// Services that may submit with a job id instead of a repo token.
const TOKENLESS_SERVICES: &[&str] = &["travis-ci", "github"];

/// CI job identity, serialized at the top level of the job payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_job_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_pull_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_build_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_token: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parallel: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_name: Option<String>,
}

impl CiContext {
    /// Whether the service will accept this job without a repo token.
    pub fn has_credentials(&self) -> bool {
        if self.repo_token.is_some() {
            return true;
        }
        let tokenless = self
            .service_name
            .as_deref()
            .map(|s| TOKENLESS_SERVICES.contains(&s))
            .unwrap_or(false);
        tokenless && (self.service_job_id.is_some() || self.service_number.is_some())
    }
}

/// Explicit values that take precedence over anything detected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiOverrides {
    pub service_name: Option<String>,
    pub service_job_id: Option<String>,
    pub service_number: Option<String>,
    pub repo_token: Option<String>,
    pub parallel: Option<bool>,
    pub flag_name: Option<String>,
}

/// One row of the provider table.
struct CiProvider {
    /// Variable whose presence identifies the provider.
    detect: &'static str,
    extract: fn(&Environment) -> CiContext,
}

const PROVIDERS: &[CiProvider] = &[
    CiProvider {
        detect: "APPVEYOR",
        extract: appveyor,
    },
    CiProvider {
        detect: "BUILDKITE",
        extract: buildkite,
    },
    CiProvider {
        detect: "CIRCLECI",
        extract: circleci,
    },
    CiProvider {
        detect: "GITHUB_ACTIONS",
        extract: github,
    },
    CiProvider {
        detect: "JENKINS_HOME",
        extract: jenkins,
    },
    CiProvider {
        detect: "TRAVIS",
        extract: travis,
    },
    CiProvider {
        detect: "SEMAPHORE",
        extract: semaphore,
    },
    CiProvider {
        detect: "CI_NAME",
        extract: generic,
    },
];

/// Resolve the CI identity for this run.
pub fn resolve_ci_context(env: &Environment, overrides: &CiOverrides) -> CiContext {
    let mut ctx = detect_provider(env).unwrap_or_default();

    if let Some(name) = &ctx.service_name {
        debug!(service = %name, "Detected CI provider");
    }

    apply(&mut ctx, overrides);
    ctx
}

/// The first detected provider's context, without overrides.
pub fn detect_provider(env: &Environment) -> Option<CiContext> {
    PROVIDERS
        .iter()
        .find(|p| env.is_set(p.detect))
        .map(|p| (p.extract)(env))
}

fn apply(ctx: &mut CiContext, overrides: &CiOverrides) {
    if let Some(v) = &overrides.service_name {
        ctx.service_name = Some(v.clone());
    }
    if let Some(v) = &overrides.service_job_id {
        ctx.service_job_id = Some(v.clone());
    }
    if let Some(v) = &overrides.service_number {
        ctx.service_number = Some(v.clone());
    }
    if let Some(v) = &overrides.repo_token {
        ctx.repo_token = Some(v.clone());
    }
    if let Some(v) = overrides.parallel {
        ctx.parallel = v;
    }
    if let Some(v) = &overrides.flag_name {
        ctx.flag_name = Some(v.clone());
    }
}

/// Branch named by GitHub Actions.
///
/// `refs/heads/<b>` and `refs/tags/<t>` yield the remainder (slashes kept);
/// anything else falls back to `GITHUB_HEAD_REF`, which is set on
/// pull-request events.
pub fn github_branch(env: &Environment) -> Option<String> {
    if let Some(github_ref) = env.get("GITHUB_REF") {
        for prefix in ["refs/heads/", "refs/tags/"] {
            if let Some(rest) = github_ref.strip_prefix(prefix) {
                return Some(rest.to_string());
            }
        }
    }
    env.var("GITHUB_HEAD_REF")
}

/// Branch from the generic CI variable table.
pub fn ci_branch(env: &Environment) -> Option<String> {
    env.first_of(BRANCH_VARS)
}

/// Branch as far as CI variables can tell.
///
/// Under GitHub Actions only the GitHub variables are consulted; the
/// result is final even when it is `None`.
pub fn env_branch(env: &Environment) -> BranchSignal {
    if env.is_set("GITHUB_ACTIONS") {
        BranchSignal::Final(github_branch(env))
    } else {
        match ci_branch(env) {
            Some(branch) => BranchSignal::Final(Some(branch)),
            None => BranchSignal::Unknown,
        }
    }
}

/// Outcome of the environment half of the branch cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSignal {
    /// Environment decided the branch; do not ask git.
    Final(Option<String>),
    /// No CI signal; the caller may query git.
    Unknown,
}

fn pr_number_from_url(env: &Environment, name: &str) -> Option<String> {
    env.get(name)
        .and_then(|url| url.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn unless_false(env: &Environment, name: &str) -> Option<String> {
    env.var(name).filter(|v| v != "false")
}

fn appveyor(env: &Environment) -> CiContext {
    CiContext {
        service_name: Some("appveyor".to_string()),
        service_job_id: env.var("APPVEYOR_BUILD_ID"),
        service_pull_request: env.var("APPVEYOR_PULL_REQUEST_NUMBER"),
        ..Default::default()
    }
}

fn buildkite(env: &Environment) -> CiContext {
    CiContext {
        service_name: Some("buildkite".to_string()),
        service_job_id: env.var("BUILDKITE_JOB_ID"),
        service_number: env.var("BUILDKITE_BUILD_NUMBER"),
        service_pull_request: unless_false(env, "BUILDKITE_PULL_REQUEST"),
        service_build_url: env.var("BUILDKITE_BUILD_URL"),
        ..Default::default()
    }
}

fn circleci(env: &Environment) -> CiContext {
    CiContext {
        service_name: Some("circleci".to_string()),
        service_job_id: env.var("CIRCLE_NODE_INDEX"),
        service_number: env.first_of(&["CIRCLE_WORKFLOW_ID", "CIRCLE_BUILD_NUM"]),
        service_pull_request: pr_number_from_url(env, "CI_PULL_REQUEST"),
        service_build_url: env.var("CIRCLE_BUILD_URL"),
        ..Default::default()
    }
}

fn github(env: &Environment) -> CiContext {
    // refs/pull/<n>/merge
    let pull_request = env
        .get("GITHUB_REF")
        .and_then(|r| r.strip_prefix("refs/pull/"))
        .and_then(|r| r.split('/').next())
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let build_url = match (env.get("GITHUB_REPOSITORY"), env.get("GITHUB_RUN_ID")) {
        (Some(repo), Some(run)) => {
            let server = env.get("GITHUB_SERVER_URL").unwrap_or("https://github.com");
            Some(format!("{server}/{repo}/actions/runs/{run}"))
        }
        _ => None,
    };

    CiContext {
        service_name: Some("github".to_string()),
        service_number: env.var("GITHUB_RUN_ID"),
        service_pull_request: pull_request,
        service_build_url: build_url,
        repo_token: env.var("GITHUB_TOKEN"),
        ..Default::default()
    }
}

fn jenkins(env: &Environment) -> CiContext {
    CiContext {
        service_name: Some("jenkins".to_string()),
        service_number: env.var("BUILD_NUMBER"),
        service_pull_request: pr_number_from_url(env, "CI_PULL_REQUEST"),
        service_build_url: env.var("BUILD_URL"),
        ..Default::default()
    }
}

fn travis(env: &Environment) -> CiContext {
    CiContext {
        service_name: Some("travis-ci".to_string()),
        service_job_id: env.var("TRAVIS_JOB_ID"),
        service_pull_request: unless_false(env, "TRAVIS_PULL_REQUEST"),
        ..Default::default()
    }
}

fn semaphore(env: &Environment) -> CiContext {
    CiContext {
        service_name: Some("semaphore-ci".to_string()),
        service_job_id: env.var("SEMAPHORE_JOB_ID"),
        service_number: env.var("SEMAPHORE_WORKFLOW_ID"),
        service_pull_request: env.var("SEMAPHORE_GIT_PR_NUMBER"),
        ..Default::default()
    }
}

fn generic(env: &Environment) -> CiContext {
    CiContext {
        service_name: env.var("CI_NAME"),
        service_job_id: env.var("CI_JOB_ID"),
        service_number: env.var("CI_BUILD_NUMBER"),
        service_pull_request: env.var("CI_PULL_REQUEST"),
        service_build_url: env.var("CI_BUILD_URL"),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        Environment::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_github_heads_ref() {
        let e = env(&[("GITHUB_ACTIONS", "true"), ("GITHUB_REF", "refs/heads/main")]);
        assert_eq!(github_branch(&e), Some("main".to_string()));
    }

    #[test]
    fn test_github_tags_ref() {
        let e = env(&[("GITHUB_ACTIONS", "true"), ("GITHUB_REF", "refs/tags/v1.0")]);
        assert_eq!(github_branch(&e), Some("v1.0".to_string()));
    }

    #[test]
    fn test_github_nested_branch_keeps_slashes() {
        let e = env(&[("GITHUB_REF", "refs/heads/feature/login")]);
        assert_eq!(github_branch(&e), Some("feature/login".to_string()));
    }

    #[test]
    fn test_github_head_ref_fallback() {
        let e = env(&[("GITHUB_ACTIONS", "true"), ("GITHUB_HEAD_REF", "feature-x")]);
        assert_eq!(github_branch(&e), Some("feature-x".to_string()));
    }

    #[test]
    fn test_github_pull_ref_uses_head_ref() {
        let e = env(&[
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_REF", "refs/pull/42/merge"),
            ("GITHUB_HEAD_REF", "fix-bug"),
        ]);
        assert_eq!(github_branch(&e), Some("fix-bug".to_string()));
    }

    #[test]
    fn test_github_actions_is_final_even_without_branch() {
        let e = env(&[("GITHUB_ACTIONS", "true"), ("TRAVIS_BRANCH", "main")]);
        assert_eq!(env_branch(&e), BranchSignal::Final(None));
    }

    #[test]
    fn test_circle_beats_travis() {
        let e = env(&[("CIRCLE_BRANCH", "dev"), ("TRAVIS_BRANCH", "main")]);
        assert_eq!(ci_branch(&e), Some("dev".to_string()));
        assert_eq!(env_branch(&e), BranchSignal::Final(Some("dev".to_string())));
    }

    #[test]
    fn test_appveyor_is_highest_priority() {
        let e = env(&[("BRANCH_NAME", "z"), ("APPVEYOR_REPO_BRANCH", "a")]);
        assert_eq!(ci_branch(&e), Some("a".to_string()));
    }

    #[test]
    fn test_no_branch_signal() {
        assert_eq!(env_branch(&Environment::default()), BranchSignal::Unknown);
    }

    #[test]
    fn test_travis_context() {
        let e = env(&[
            ("TRAVIS", "true"),
            ("TRAVIS_JOB_ID", "777"),
            ("TRAVIS_PULL_REQUEST", "false"),
        ]);
        let ctx = resolve_ci_context(&e, &CiOverrides::default());
        assert_eq!(ctx.service_name.as_deref(), Some("travis-ci"));
        assert_eq!(ctx.service_job_id.as_deref(), Some("777"));
        assert_eq!(ctx.service_pull_request, None);
        assert!(ctx.has_credentials());
    }

    #[test]
    fn test_github_context() {
        let e = env(&[
            ("GITHUB_ACTIONS", "true"),
            ("GITHUB_REF", "refs/pull/42/merge"),
            ("GITHUB_RUN_ID", "9001"),
            ("GITHUB_REPOSITORY", "octo/repo"),
            ("GITHUB_TOKEN", "ghs_abc"),
        ]);
        let ctx = resolve_ci_context(&e, &CiOverrides::default());
        assert_eq!(ctx.service_name.as_deref(), Some("github"));
        assert_eq!(ctx.service_number.as_deref(), Some("9001"));
        assert_eq!(ctx.service_pull_request.as_deref(), Some("42"));
        assert_eq!(ctx.repo_token.as_deref(), Some("ghs_abc"));
        assert_eq!(
            ctx.service_build_url.as_deref(),
            Some("https://github.com/octo/repo/actions/runs/9001")
        );
    }

    #[test]
    fn test_circle_pull_request_from_url() {
        let e = env(&[
            ("CIRCLECI", "true"),
            ("CIRCLE_BUILD_NUM", "12"),
            ("CI_PULL_REQUEST", "https://github.com/o/r/pull/5"),
        ]);
        let ctx = detect_provider(&e).unwrap();
        assert_eq!(ctx.service_name.as_deref(), Some("circleci"));
        assert_eq!(ctx.service_number.as_deref(), Some("12"));
        assert_eq!(ctx.service_pull_request.as_deref(), Some("5"));
    }

    #[test]
    fn test_first_provider_wins() {
        let e = env(&[("APPVEYOR", "True"), ("TRAVIS", "true"), ("TRAVIS_JOB_ID", "1")]);
        let ctx = detect_provider(&e).unwrap();
        assert_eq!(ctx.service_name.as_deref(), Some("appveyor"));
        assert_eq!(ctx.service_job_id, None);
    }

    #[test]
    fn test_generic_provider() {
        let e = env(&[("CI_NAME", "drone"), ("CI_BUILD_NUMBER", "3")]);
        let ctx = detect_provider(&e).unwrap();
        assert_eq!(ctx.service_name.as_deref(), Some("drone"));
        assert_eq!(ctx.service_number.as_deref(), Some("3"));
    }

    #[test]
    fn test_no_provider() {
        assert_eq!(detect_provider(&Environment::default()), None);
        let ctx = resolve_ci_context(&Environment::default(), &CiOverrides::default());
        assert_eq!(ctx, CiContext::default());
        assert!(!ctx.has_credentials());
    }

    #[test]
    fn test_overrides_win() {
        let e = env(&[("TRAVIS", "true"), ("TRAVIS_JOB_ID", "1")]);
        let overrides = CiOverrides {
            service_name: Some("travis-pro".to_string()),
            repo_token: Some("tok".to_string()),
            parallel: Some(true),
            ..Default::default()
        };
        let ctx = resolve_ci_context(&e, &overrides);
        assert_eq!(ctx.service_name.as_deref(), Some("travis-pro"));
        assert_eq!(ctx.service_job_id.as_deref(), Some("1"));
        assert_eq!(ctx.repo_token.as_deref(), Some("tok"));
        assert!(ctx.parallel);
    }

    #[test]
    fn test_travis_pro_needs_token() {
        let ctx = CiContext {
            service_name: Some("travis-pro".to_string()),
            service_job_id: Some("1".to_string()),
            ..Default::default()
        };
        assert!(!ctx.has_credentials());
    }
}
