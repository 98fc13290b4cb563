//! In-memory fake for [`SubmissionClient`] (testing only)
//!
//! Records every payload and finish request instead of talking to the
//! network, and can be told to fail like an unreachable service.

use std::sync::Mutex;

use crate::api::{FinishRequest, SubmissionClient, SubmitResponse};
use crate::error::{CoverallsError, Result};

/// Client that remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingClient {
    submitted: Mutex<Vec<String>>,
    finished: Mutex<Vec<FinishRequest>>,
    failure: Option<String>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every call fails with a transport error.
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Payloads passed to `submit`, in call order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    /// Requests passed to `finish_parallel`, in call order.
    pub fn finished(&self) -> Vec<FinishRequest> {
        self.finished.lock().unwrap().clone()
    }
}

impl SubmissionClient for RecordingClient {
    fn submit(&self, payload: &str) -> Result<SubmitResponse> {
        if let Some(reason) = &self.failure {
            return Err(CoverallsError::Transport(reason.clone()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(payload.to_string());
        Ok(SubmitResponse {
            message: Some(format!("Job #{}", submitted.len())),
            url: Some(format!("https://coveralls.test/jobs/{}", submitted.len())),
        })
    }

    fn finish_parallel(&self, request: &FinishRequest) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(CoverallsError::Transport(reason.clone()));
        }
        self.finished.lock().unwrap().push(request.clone());
        Ok(())
    }
}
