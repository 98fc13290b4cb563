//! Error taxonomy for coveralls-rs.

use coverage_data::CoverageError;

/// Errors produced while resolving, assembling or submitting a report.
#[derive(Debug, thiserror::Error)]
pub enum CoverallsError {
    /// A git invocation failed. Recovered inside the VCS resolver.
    #[error("git unavailable: {0}")]
    VcsUnavailable(String),

    /// Missing credentials or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote service could not be reached or rejected the request.
    #[error("transport error: {0}")]
    Transport(String),

    /// A report file read for merging is malformed.
    #[error("invalid report: {0}")]
    InvalidReport(String),

    /// The run was interrupted by the user.
    #[error("aborted by user")]
    Cancelled,

    #[error("coverage data error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CoverallsError {
    fn from(err: reqwest::Error) -> Self {
        CoverallsError::Transport(err.to_string())
    }
}

impl CoverallsError {
    /// Whether this error should end the process quietly with a zero status.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoverallsError::Cancelled)
    }
}

/// Result type for coveralls-core operations.
pub type Result<T> = std::result::Result<T, CoverallsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let err = CoverallsError::Configuration("missing repo_token".to_string());
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("missing repo_token"));
    }

    #[test]
    fn test_coverage_error_converts() {
        let err: CoverallsError = CoverageError::FileNotFound("lcov.info".to_string()).into();
        assert!(err.to_string().contains("lcov.info"));
    }

    #[test]
    fn test_only_cancelled_is_cancellation() {
        assert!(CoverallsError::Cancelled.is_cancellation());
        assert!(!CoverallsError::Transport("503".to_string()).is_cancellation());
    }
}
