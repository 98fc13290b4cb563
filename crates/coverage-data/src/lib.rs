//! Coverage-Data: measurement model for coveralls-rs
//!
//! This crate is the boundary to whatever tool measured coverage. The
//! report assembler only sees [`CoverageData`], a list of per-file line and
//! branch hit counts, obtained through the [`CoverageSource`] trait.
//!
//! The bundled source reads LCOV tracefiles, which most Rust, C, JS and
//! Python coverage tools can emit.

pub mod error;
pub mod lcov;

pub use error::CoverageError;
pub use lcov::{parse_lcov, LcovSource};

use serde::{Deserialize, Serialize};

/// Result type for coverage-data operations
pub type Result<T> = std::result::Result<T, CoverageError>;

/// Highest line number accepted from a measurement.
pub const MAX_LINE_NUMBER: u32 = 1_000_000;

/// A single instrumentable line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCoverage {
    /// 1-based line number
    pub line_number: u32,
    pub hit_count: u64,
}

/// A single branch arm on a given line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCoverage {
    pub line_number: u32,
    pub block: u32,
    pub branch: u32,
    pub hit_count: u64,
}

/// Coverage data for a single source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    /// Path as recorded by the measuring tool (relative or absolute)
    pub path: String,
    pub lines: Vec<LineCoverage>,
    pub branches: Vec<BranchCoverage>,
}

impl FileCoverage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Highest instrumented line number, or 0 when nothing was recorded.
    /// Lines above [`MAX_LINE_NUMBER`] are not counted.
    pub fn last_line(&self) -> u32 {
        self.lines
            .iter()
            .map(|l| l.line_number)
            .chain(self.branches.iter().map(|b| b.line_number))
            .filter(|&n| n <= MAX_LINE_NUMBER)
            .max()
            .unwrap_or(0)
    }

    /// Per-line hit counts indexed from line 1; `None` for lines that are
    /// not instrumentable. Repeated entries for a line are summed.
    pub fn line_hits(&self) -> Vec<Option<u64>> {
        let mut hits = vec![None::<u64>; self.last_line() as usize];
        for line in &self.lines {
            if line.line_number == 0 || line.line_number > MAX_LINE_NUMBER {
                continue;
            }
            let slot = &mut hits[line.line_number as usize - 1];
            *slot = Some(slot.unwrap_or(0).saturating_add(line.hit_count));
        }
        hits
    }
}

/// The complete result of reading one coverage measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageData {
    pub files: Vec<FileCoverage>,
}

impl CoverageData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Anything that can produce coverage measurements for the report.
pub trait CoverageSource {
    /// Load the measurements. Called once per run.
    fn load(&self) -> Result<CoverageData>;
}

impl CoverageSource for CoverageData {
    fn load(&self) -> Result<CoverageData> {
        Ok(self.clone())
    }
}
