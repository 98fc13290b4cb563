//! LCOV tracefile reader
//!
//! Understands the records needed for line and branch coverage:
//! `SF:`, `DA:`, `BRDA:` and `end_of_record`. Summary and function records
//! (`LF`, `LH`, `FN`, `FNDA`, ...) are skipped.

use crate::error::CoverageError;
use crate::{
    BranchCoverage, CoverageData, CoverageSource, FileCoverage, LineCoverage, Result,
    MAX_LINE_NUMBER,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Coverage source backed by an LCOV tracefile on disk
#[derive(Debug, Clone)]
pub struct LcovSource {
    path: PathBuf,
}

impl LcovSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CoverageSource for LcovSource {
    fn load(&self) -> Result<CoverageData> {
        if !self.path.exists() {
            return Err(CoverageError::FileNotFound(
                self.path.display().to_string(),
            ));
        }

        info!("Reading LCOV tracefile {:?}", self.path);
        let content = std::fs::read_to_string(&self.path)?;
        let data = parse_lcov(&content)?;
        debug!("Loaded coverage for {} files", data.files.len());
        Ok(data)
    }
}

/// Parse LCOV text into coverage data.
///
/// A trailing block without `end_of_record` is still kept.
pub fn parse_lcov(content: &str) -> Result<CoverageData> {
    let mut data = CoverageData::new();
    let mut current: Option<FileCoverage> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line == "end_of_record" {
            if let Some(file) = current.take() {
                data.files.push(file);
            }
            continue;
        }

        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };

        match tag {
            "SF" => {
                if let Some(file) = current.take() {
                    data.files.push(file);
                }
                current = Some(FileCoverage::new(value));
            }
            "DA" => {
                let file = current
                    .as_mut()
                    .ok_or(CoverageError::MissingSourceFile(line_no))?;
                file.lines.push(parse_da(value, line_no)?);
            }
            "BRDA" => {
                let file = current
                    .as_mut()
                    .ok_or(CoverageError::MissingSourceFile(line_no))?;
                file.branches.push(parse_brda(value, line_no)?);
            }
            _ => {}
        }
    }

    if let Some(file) = current.take() {
        data.files.push(file);
    }

    Ok(data)
}

fn parse_da(value: &str, line: usize) -> Result<LineCoverage> {
    // DA:<line>,<hits>[,<checksum>]
    let mut parts = value.split(',');
    let line_number = parse_line_number(parts.next(), line)?;
    let hit_count = parse_field(parts.next(), "hit count", line)?;
    Ok(LineCoverage {
        line_number,
        hit_count,
    })
}

fn parse_brda(value: &str, line: usize) -> Result<BranchCoverage> {
    // BRDA:<line>,<block>,<branch>,<taken>; taken is "-" when never evaluated
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 4 {
        return Err(CoverageError::InvalidRecord {
            line,
            reason: format!("expected 4 BRDA fields, got {}", parts.len()),
        });
    }

    let hit_count = if parts[3] == "-" {
        0
    } else {
        parse_field(Some(parts[3]), "branch hits", line)?
    };

    Ok(BranchCoverage {
        line_number: parse_line_number(Some(parts[0]), line)?,
        block: parse_field(Some(parts[1]), "block", line)?,
        branch: parse_field(Some(parts[2]), "branch", line)?,
        hit_count,
    })
}

fn parse_line_number(field: Option<&str>, line: usize) -> Result<u32> {
    let number: u32 = parse_field(field, "line number", line)?;
    if number == 0 || number > MAX_LINE_NUMBER {
        return Err(CoverageError::InvalidRecord {
            line,
            reason: format!("line number {number} out of range 1..={MAX_LINE_NUMBER}"),
        });
    }
    Ok(number)
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str, line: usize) -> Result<T> {
    let raw = field.ok_or_else(|| CoverageError::InvalidRecord {
        line,
        reason: format!("missing {what}"),
    })?;
    raw.trim().parse().map_err(|_| CoverageError::InvalidRecord {
        line,
        reason: format!("invalid {what}: {raw:?}"),
    })
}
