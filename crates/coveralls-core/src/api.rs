//! Coveralls HTTP API client
//!
//! Two calls are needed: uploading a job (`POST /api/v1/jobs`, multipart
//! with a `json_file` part) and closing a parallel build
//! (`POST /webhook?repo_token=..`).

use reqwest::blocking::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{CoverallsError, Result};

/// Reply to a successful job upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Human readable status, e.g. `Job #38.1`
    #[serde(default)]
    pub message: Option<String>,
    /// Link to the job on the service
    #[serde(default)]
    pub url: Option<String>,
}

/// Request to close a parallel build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishRequest {
    pub repo_token: Option<String>,
    /// CI build identifier shared by all shards
    pub build_num: Option<String>,
}

impl FinishRequest {
    /// Webhook body.
    pub fn payload(&self) -> Value {
        let mut payload = json!({ "status": "done" });
        if let Some(build_num) = &self.build_num {
            payload["build_num"] = json!(build_num);
        }
        json!({ "payload": payload })
    }
}

/// Transport used by the submission orchestrator.
pub trait SubmissionClient {
    /// Upload a serialized job payload as-is.
    fn submit(&self, payload: &str) -> Result<SubmitResponse>;

    /// Tell the service every shard of the build has reported.
    fn finish_parallel(&self, request: &FinishRequest) -> Result<()>;
}

/// Blocking Coveralls API client
pub struct CoverallsClient {
    host: String,
    http_client: reqwest::blocking::Client,
}

impl CoverallsClient {
    /// Create a client for `host`, e.g. `https://coveralls.io`.
    pub fn new(host: &str) -> Result<Self> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(concat!("coveralls-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(CoverallsClient {
            host: host.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl SubmissionClient for CoverallsClient {
    fn submit(&self, payload: &str) -> Result<SubmitResponse> {
        let url = format!("{}/api/v1/jobs", self.host);
        info!("Submitting coverage to {}", url);

        let part = Part::text(payload.to_string())
            .file_name("json_file")
            .mime_str("application/json")?;
        let form = Form::new().part("json_file", part);

        let response = self.http_client.post(&url).multipart(form).send()?;
        let status = response.status();
        let body = response.text()?;
        debug!(%status, "Coveralls replied: {}", body);

        if !status.is_success() {
            return Err(CoverallsError::Transport(format!(
                "could not submit coverage: {status}: {body}"
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            CoverallsError::Transport(format!("unexpected response from {url}: {e}: {body}"))
        })
    }

    fn finish_parallel(&self, request: &FinishRequest) -> Result<()> {
        let url = format!("{}/webhook", self.host);
        info!("Finishing parallel build {:?}", request.build_num);

        let mut builder = self.http_client.post(&url).json(&request.payload());
        if let Some(token) = &request.repo_token {
            builder = builder.query(&[("repo_token", token)]);
        }

        let response = builder.send()?;
        let status = response.status();
        let body = response.text()?;
        debug!(%status, "Coveralls replied: {}", body);

        if !status.is_success() {
            return Err(CoverallsError::Transport(format!(
                "parallel finish failed: {status}: {body}"
            )));
        }

        // The webhook answers 200 with {"error": ..} for unknown builds
        let reply: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
            return Err(CoverallsError::Transport(format!(
                "parallel finish failed: {error}"
            )));
        }
        if reply.get("done").and_then(Value::as_bool) == Some(false) {
            return Err(CoverallsError::Transport(format!(
                "parallel finish not acknowledged: {body}"
            )));
        }

        Ok(())
    }
}
