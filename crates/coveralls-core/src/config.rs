//! Runtime settings.
//!
//! Precedence, lowest to highest:
//! 1. values detected from the CI provider
//! 2. `.coveralls.yml` (or the file named by `--rcfile`)
//! 3. `COVERALLS_*` environment variables
//! 4. command-line flags
//!
//! Layers 2 to 4 are folded into a [`CiOverrides`] that the CI resolver
//! applies on top of layer 1.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ci::CiOverrides;
use crate::env::Environment;
use crate::error::Result;

/// Default Coveralls endpoint.
pub const DEFAULT_HOST: &str = "https://coveralls.io";

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".coveralls.yml";

/// Contents of `.coveralls.yml`. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub repo_token: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub parallel: Option<bool>,
    #[serde(default)]
    pub flag_name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
}

impl FileConfig {
    /// Load a config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {:?}", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Command-line level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub service_name: Option<String>,
    pub config_file: Option<PathBuf>,
    pub base_dir: Option<PathBuf>,
    pub src_dir: Option<PathBuf>,
}

/// Effective settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base URL of the Coveralls service
    pub host: String,
    pub overrides: CiOverrides,
    pub base_dir: Option<PathBuf>,
    pub src_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: DEFAULT_HOST.to_string(),
            overrides: CiOverrides::default(),
            base_dir: None,
            src_dir: None,
        }
    }
}

impl Settings {
    /// Build settings from the config file, environment and CLI options.
    pub fn load(env: &Environment, cli: &CliOptions) -> Result<Self> {
        let path = cli
            .config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let file = FileConfig::load(&path)?;
        Ok(Self::layer(file, env, cli))
    }

    /// Fold the layers without touching the filesystem.
    pub fn layer(file: FileConfig, env: &Environment, cli: &CliOptions) -> Self {
        let mut overrides = CiOverrides {
            service_name: file.service_name,
            repo_token: file.repo_token,
            parallel: file.parallel,
            flag_name: file.flag_name,
            ..Default::default()
        };
        let mut host = file.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

        if let Some(v) = env.var("COVERALLS_REPO_TOKEN") {
            overrides.repo_token = Some(v);
        }
        if let Some(v) = env.var("COVERALLS_SERVICE_NAME") {
            overrides.service_name = Some(v);
        }
        if let Some(v) = env.var("COVERALLS_SERVICE_JOB_ID") {
            overrides.service_job_id = Some(v);
        }
        if let Some(v) = env.var("COVERALLS_SERVICE_NUMBER") {
            overrides.service_number = Some(v);
        }
        if env.is_set("COVERALLS_PARALLEL") {
            overrides.parallel = Some(env.flag("COVERALLS_PARALLEL"));
        }
        if let Some(v) = env.var("COVERALLS_FLAG_NAME") {
            overrides.flag_name = Some(v);
        }
        if let Some(v) = env.var("COVERALLS_HOST") {
            host = v;
        }

        if let Some(v) = &cli.service_name {
            overrides.service_name = Some(v.clone());
        }

        Settings {
            host: host.trim_end_matches('/').to_string(),
            overrides,
            base_dir: cli.base_dir.clone(),
            src_dir: cli.src_dir.clone(),
        }
    }
}
