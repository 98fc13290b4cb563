//! coveralls - publish coverage results to Coveralls
//!
//! Reads an LCOV tracefile, attaches git and CI metadata and uploads the
//! result. Every source file in the report is identified by path and MD5
//! digest only; contents are not uploaded.
//!
//! ## Usage
//!
//! - `coveralls`: build the report and submit it
//! - `coveralls debug`: print the report instead of sending it
//! - `coveralls --output FILE`: write the report to FILE
//! - `coveralls --submit FILE`: upload a previously written report
//! - `coveralls --merge FILE`: merge another report, then submit
//! - `coveralls --finish`: close a parallel build

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coveralls_core::{
    CliOptions, CoverallsClient, CoverallsError, Environment, GitRunner, LcovSource, ModeFlags,
    Outcome, ReportInputs, Settings, Submission, SubmissionMode,
};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "coveralls")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish coverage results online via coveralls.io", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Provide an alternative service name to submit
    #[arg(long, global = true)]
    service: Option<String>,

    /// Configuration file
    #[arg(long, global = true, default_value = ".coveralls.yml")]
    rcfile: PathBuf,

    /// Base directory that is removed from reported paths
    #[arg(long, global = true)]
    basedir: Option<PathBuf>,

    /// Source directory added to reported paths
    #[arg(long, global = true)]
    srcdir: Option<PathBuf>,

    /// Write report to file. Doesn't send anything
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Upload a previously generated file
    #[arg(long, global = true)]
    submit: Option<PathBuf>,

    /// Merge report from file when submitting
    #[arg(long, global = true)]
    merge: Option<PathBuf>,

    /// Finish parallel jobs
    #[arg(long, global = true)]
    finish: bool,

    /// LCOV tracefile with the coverage measurements
    #[arg(long, global = true, env = "COVERALLS_LCOV_FILE", default_value = "lcov.info")]
    lcov: PathBuf,

    /// Print extra info, always enabled when debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Output the report as JSON without sending anything
    Debug,
}

impl Cli {
    fn is_debug(&self) -> bool {
        self.command == Some(Commands::Debug)
    }

    fn mode(&self) -> SubmissionMode {
        SubmissionMode::select(&ModeFlags {
            merge: self.merge.clone(),
            debug: self.is_debug(),
            output: self.output.clone(),
            submit: self.submit.clone(),
            finish: self.finish,
        })
    }

    fn options(&self) -> CliOptions {
        CliOptions {
            service_name: self.service.clone(),
            config_file: Some(self.rcfile.clone()),
            base_dir: self.basedir.clone(),
            src_dir: self.srcdir.clone(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Debug mode always logs verbosely
    let level = if cli.verbose || cli.is_debug() {
        Level::DEBUG
    } else {
        Level::INFO
    };
    coveralls_core::init_tracing(cli.json, level);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));
    // Do not wait for a blocking upload abandoned by Ctrl-C
    runtime.shutdown_background();
    ExitCode::from(exit_status(&result))
}

/// Run the submission on a blocking thread, racing it against Ctrl-C.
async fn run(cli: Cli) -> Result<()> {
    let task = tokio::task::spawn_blocking(move || execute(&cli));

    tokio::select! {
        joined = task => joined.context("Submission task panicked")?,
        _ = tokio::signal::ctrl_c() => Err(anyhow::Error::from(CoverallsError::Cancelled)),
    }
}

/// Log the final result and map it to the process exit status.
fn exit_status(result: &Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(err) if is_cancelled(err) => {
            info!("Aborted");
            0
        }
        Err(err) => {
            error!("Error running coveralls: {err:?}");
            1
        }
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<CoverallsError>()
        .map(CoverallsError::is_cancellation)
        .unwrap_or(false)
}

fn execute(cli: &Cli) -> Result<()> {
    let env = Environment::from_process();
    let settings =
        Settings::load(&env, &cli.options()).context("Failed to load coveralls configuration")?;
    let client = CoverallsClient::new(&settings.host).context("Failed to create HTTP client")?;
    let work_dir = std::env::current_dir().context("Failed to read working directory")?;
    let coverage = LcovSource::new(&cli.lcov);

    let inputs = ReportInputs {
        coverage: &coverage,
        git: GitRunner::new(work_dir),
        env,
        settings,
        run_at: None,
    };

    let outcome = Submission::new(inputs, &client).run(cli.mode())?;

    match outcome {
        Outcome::DryRun(report) => println!("{report}"),
        Outcome::Written(path) => info!("Coverage report written to {}", path.display()),
        Outcome::Submitted(_) | Outcome::Finished => {}
    }

    Ok(())
}
