//! Coveralls Core Library
//!
//! Resolves CI and VCS identity, assembles the Coveralls job payload and
//! drives its submission.
//!
//! ## Flow
//!
//! - [`ci`] and [`git`] resolve independently from an [`Environment`]
//! - [`report::assemble`] combines them with coverage measurements
//! - [`submit::Submission`] runs the selected [`SubmissionMode`]

pub mod api;
pub mod ci;
pub mod config;
pub mod env;
pub mod error;
pub mod fakes;
pub mod git;
pub mod report;
pub mod submit;
pub mod telemetry;

pub use api::{CoverallsClient, FinishRequest, SubmissionClient, SubmitResponse};
pub use ci::{resolve_ci_context, CiContext, CiOverrides};
pub use config::{CliOptions, FileConfig, Settings, DEFAULT_HOST};
pub use env::Environment;
pub use error::{CoverallsError, Result};
pub use git::{resolve_vcs_context, CommitInfo, GitRunner, RemoteRef, VcsContext};
pub use report::{assemble, rewrite_path, AssembleOptions, CoverageReport, SourceFile};
pub use submit::{ModeFlags, Outcome, ReportInputs, RunState, Submission, SubmissionMode};
pub use telemetry::init_tracing;

pub use coverage_data::{CoverageData, CoverageSource, FileCoverage, LcovSource};

/// coveralls-rs version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
