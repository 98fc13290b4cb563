//! Submission orchestration.
//!
//! One [`SubmissionMode`] is selected per invocation and run to completion
//! by a [`Submission`]. Only the Merge mode chains into another step (the
//! default upload); every other mode is terminal.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use coverage_data::CoverageSource;
use tracing::{debug, info};

use crate::api::{FinishRequest, SubmissionClient, SubmitResponse};
use crate::ci::{resolve_ci_context, CiContext};
use crate::config::Settings;
use crate::env::Environment;
use crate::error::{CoverallsError, Result};
use crate::git::{resolve_vcs_context, GitRunner};
use crate::report::{assemble, AssembleOptions, CoverageReport};

/// What this invocation does with the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Merge an external report file, then upload.
    Merge(PathBuf),
    /// Build the report and hand it back without sending.
    Debug,
    /// Write the report to a file without sending.
    WriteFile(PathBuf),
    /// Upload a previously written report file unchanged.
    SubmitFile(PathBuf),
    /// Close a parallel build.
    Finish,
    /// Build and upload.
    Default,
}

/// Raw mode flags as given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub merge: Option<PathBuf>,
    pub debug: bool,
    pub output: Option<PathBuf>,
    pub submit: Option<PathBuf>,
    pub finish: bool,
}

impl SubmissionMode {
    /// Pick one mode: merge > debug > output > submit > finish > default.
    pub fn select(flags: &ModeFlags) -> Self {
        if let Some(path) = &flags.merge {
            SubmissionMode::Merge(path.clone())
        } else if flags.debug {
            SubmissionMode::Debug
        } else if let Some(path) = &flags.output {
            SubmissionMode::WriteFile(path.clone())
        } else if let Some(path) = &flags.submit {
            SubmissionMode::SubmitFile(path.clone())
        } else if flags.finish {
            SubmissionMode::Finish
        } else {
            SubmissionMode::Default
        }
    }

    /// Modes that never reach the network can run without credentials.
    pub fn requires_token(&self) -> bool {
        !matches!(self, SubmissionMode::Debug | SubmissionMode::WriteFile(_))
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Assembling,
    Dispatched,
    Done,
    Failed,
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Debug mode: the report that would have been sent, pretty-printed.
    DryRun(String),
    /// Report written to this path.
    Written(PathBuf),
    /// Report accepted by the service.
    Submitted(SubmitResponse),
    /// Parallel build closed.
    Finished,
}

/// Everything needed to build a report, resolved lazily so that modes
/// which never assemble (submit-file, finish) never touch git or coverage.
pub struct ReportInputs<'a> {
    pub coverage: &'a dyn CoverageSource,
    pub git: GitRunner,
    pub env: Environment,
    pub settings: Settings,
    /// Pin the report timestamp; the current time when unset.
    pub run_at: Option<DateTime<Utc>>,
}

impl<'a> ReportInputs<'a> {
    pub fn ci_context(&self) -> CiContext {
        resolve_ci_context(&self.env, &self.settings.overrides)
    }

    pub fn build(&self, token_required: bool) -> Result<CoverageReport> {
        let coverage = self.coverage.load()?;
        let ci = self.ci_context();
        let vcs = resolve_vcs_context(&self.git, &self.env);
        let options = AssembleOptions {
            base_dir: self.settings.base_dir.clone(),
            src_dir: self.settings.src_dir.clone(),
            token_required,
            run_at: self.run_at,
        };
        assemble(&coverage, vcs, ci, &options)
    }
}

/// Drives one submission from `Idle` to `Done` or `Failed`.
pub struct Submission<'a, C: SubmissionClient + ?Sized> {
    inputs: ReportInputs<'a>,
    client: &'a C,
    state: RunState,
}

impl<'a, C: SubmissionClient + ?Sized> Submission<'a, C> {
    pub fn new(inputs: ReportInputs<'a>, client: &'a C) -> Self {
        Self {
            inputs,
            client,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run `mode`. A submission runs once; later calls are rejected.
    pub fn run(&mut self, mode: SubmissionMode) -> Result<Outcome> {
        if self.state != RunState::Idle {
            return Err(CoverallsError::Configuration(format!(
                "submission already ran (state {:?})",
                self.state
            )));
        }

        let result = self.dispatch(mode);
        self.transition(if result.is_ok() {
            RunState::Done
        } else {
            RunState::Failed
        });
        result
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Submission state change");
        self.state = next;
    }

    fn dispatch(&mut self, mode: SubmissionMode) -> Result<Outcome> {
        let token_required = mode.requires_token();
        match mode {
            SubmissionMode::Merge(path) => {
                let mut report = self.assemble(token_required)?;
                report.merge_file(&path)?;
                self.upload(&report)
            }
            SubmissionMode::Debug => {
                info!("Testing coveralls...");
                let report = self.assemble(token_required)?;
                Ok(Outcome::DryRun(serde_json::to_string_pretty(&report)?))
            }
            SubmissionMode::WriteFile(path) => {
                info!("Write coverage report to file...");
                let report = self.assemble(token_required)?;
                write_report(&report, &path)?;
                Ok(Outcome::Written(path))
            }
            SubmissionMode::SubmitFile(path) => {
                let payload = std::fs::read_to_string(&path)?;
                debug!("Submitting {} bytes from {:?}", payload.len(), path);
                self.send(&payload)
            }
            SubmissionMode::Finish => {
                info!("Finishing parallel jobs...");
                let request = finish_request(&self.inputs.ci_context())?;
                self.client.finish_parallel(&request)?;
                self.transition(RunState::Dispatched);
                info!("Done");
                Ok(Outcome::Finished)
            }
            SubmissionMode::Default => {
                let report = self.assemble(token_required)?;
                self.upload(&report)
            }
        }
    }

    fn assemble(&mut self, token_required: bool) -> Result<CoverageReport> {
        self.transition(RunState::Assembling);
        self.inputs.build(token_required)
    }

    fn upload(&mut self, report: &CoverageReport) -> Result<Outcome> {
        info!("Submitting coverage to coveralls...");
        let outcome = self.send(&report.to_json()?)?;
        info!("Coverage submitted!");
        if let Outcome::Submitted(reply) = &outcome {
            if let Some(message) = &reply.message {
                info!("{}", message);
            }
            if let Some(url) = &reply.url {
                info!("{}", url);
            }
        }
        Ok(outcome)
    }

    fn send(&mut self, payload: &str) -> Result<Outcome> {
        let reply = self.client.submit(payload)?;
        self.transition(RunState::Dispatched);
        debug!(?reply, "Submission reply");
        Ok(Outcome::Submitted(reply))
    }
}

/// Serialize a report exactly as it would be uploaded.
pub fn write_report(report: &CoverageReport, path: &Path) -> Result<()> {
    std::fs::write(path, report.to_json()?)?;
    Ok(())
}

fn finish_request(ci: &CiContext) -> Result<FinishRequest> {
    if !ci.has_credentials() {
        return Err(CoverallsError::Configuration(
            "finishing a parallel build needs a repo token (COVERALLS_REPO_TOKEN)".to_string(),
        ));
    }
    let build_num = ci.service_number.clone().ok_or_else(|| {
        CoverallsError::Configuration(
            "finishing a parallel build needs a CI build number (COVERALLS_SERVICE_NUMBER)"
                .to_string(),
        )
    })?;
    Ok(FinishRequest {
        repo_token: ci.repo_token.clone(),
        build_num: Some(build_num),
    })
}
