//! Error types for coverage-data

use thiserror::Error;

/// Errors that can occur while loading coverage measurements
#[derive(Error, Debug)]
pub enum CoverageError {
    /// Tracefile not found
    #[error("Coverage file not found: {0}")]
    FileNotFound(String),

    /// Malformed tracefile record
    #[error("Invalid LCOV record at line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    /// Record outside of an `SF:` block
    #[error("LCOV record at line {0} appears before any SF: entry")]
    MissingSourceFile(usize),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
