//! Job payload assembly.
//!
//! Turns coverage measurements plus the resolved VCS and CI contexts into
//! the JSON document the Coveralls jobs API expects.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use coverage_data::{CoverageData, FileCoverage};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ci::CiContext;
use crate::error::{CoverallsError, Result};
use crate::git::VcsContext;

/// One entry of `source_files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,

    /// MD5 of the file contents, when the file could be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,

    /// Hits per line, index 0 is line 1; `null` for non-code lines.
    pub coverage: Vec<Option<u64>>,

    /// Flattened `[line, block, branch, hits]` quadruples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<u64>,
}

impl SourceFile {
    /// Add another measurement of the same file into this one.
    ///
    /// Line hits are summed; a line instrumented on either side stays
    /// instrumented. Branch hits are summed per `(line, block, branch)`.
    pub fn absorb(&mut self, other: SourceFile) {
        if self.coverage.len() < other.coverage.len() {
            self.coverage.resize(other.coverage.len(), None);
        }
        for (slot, hits) in self.coverage.iter_mut().zip(other.coverage) {
            *slot = match (*slot, hits) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                (a, b) => a.or(b),
            };
        }

        let mut branches: BTreeMap<(u64, u64, u64), u64> = BTreeMap::new();
        for quad in self.branches.chunks_exact(4).chain(other.branches.chunks_exact(4)) {
            let hits = branches.entry((quad[0], quad[1], quad[2])).or_insert(0);
            *hits = hits.saturating_add(quad[3]);
        }
        self.branches = branches
            .into_iter()
            .flat_map(|((line, block, branch), hits)| [line, block, branch, hits])
            .collect();

        if self.source_digest.is_none() {
            self.source_digest = other.source_digest;
        }
    }

    /// Reject branch data that is not made of whole quadruples.
    pub fn validate(&self) -> Result<()> {
        if self.branches.len() % 4 != 0 {
            return Err(CoverallsError::InvalidReport(format!(
                "{}: branches has {} values, expected a multiple of 4",
                self.name,
                self.branches.len()
            )));
        }
        Ok(())
    }
}

/// The Coveralls job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub source_files: Vec<SourceFile>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<VcsContext>,

    #[serde(flatten)]
    pub ci: CiContext,

    pub run_at: DateTime<Utc>,
}

impl CoverageReport {
    /// Compact JSON, the exact bytes that are uploaded.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Union `extra` into this report by file name.
    pub fn merge_source_files(&mut self, extra: Vec<SourceFile>) {
        for file in extra {
            match self.source_files.iter_mut().find(|f| f.name == file.name) {
                Some(existing) => existing.absorb(file),
                None => self.source_files.push(file),
            }
        }
    }

    /// Merge a report file produced elsewhere (for example by another
    /// language's coverage tool). Only `source_files` is read.
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        info!("Merging coverage from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let partial: PartialReport = serde_json::from_str(&content)?;
        for file in &partial.source_files {
            file.validate()?;
        }
        debug!("Merging {} source files", partial.source_files.len());
        self.merge_source_files(partial.source_files);
        Ok(())
    }
}

/// Minimal shape accepted as merge input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialReport {
    #[serde(default)]
    pub source_files: Vec<SourceFile>,
}

/// Options for [`assemble`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Prefix removed from reported paths.
    pub base_dir: Option<PathBuf>,
    /// Prefix added to reported paths.
    pub src_dir: Option<PathBuf>,
    pub token_required: bool,
    /// Fixed timestamp; the current time when unset.
    pub run_at: Option<DateTime<Utc>>,
}

/// Build the job payload.
pub fn assemble(
    coverage: &CoverageData,
    vcs: Option<VcsContext>,
    ci: CiContext,
    options: &AssembleOptions,
) -> Result<CoverageReport> {
    if options.token_required && !ci.has_credentials() {
        return Err(CoverallsError::Configuration(
            "Not on a supported CI service. You have to provide either repo_token in \
             .coveralls.yml or set the COVERALLS_REPO_TOKEN env var."
                .to_string(),
        ));
    }

    let mut report = CoverageReport {
        source_files: Vec::with_capacity(coverage.files.len()),
        git: vcs,
        ci,
        run_at: options.run_at.unwrap_or_else(Utc::now),
    };
    // Repeated SF blocks and paths that rewrite to one name become one entry
    report.merge_source_files(
        coverage
            .files
            .iter()
            .map(|file| source_file(file, options))
            .collect(),
    );

    Ok(report)
}

fn source_file(file: &FileCoverage, options: &AssembleOptions) -> SourceFile {
    SourceFile {
        name: rewrite_path(
            &file.path,
            options.base_dir.as_deref(),
            options.src_dir.as_deref(),
        ),
        source_digest: source_digest(Path::new(&file.path)),
        coverage: file.line_hits(),
        branches: file
            .branches
            .iter()
            .flat_map(|b| {
                [
                    u64::from(b.line_number),
                    u64::from(b.block),
                    u64::from(b.branch),
                    b.hit_count,
                ]
            })
            .collect(),
    }
}

fn source_digest(path: &Path) -> Option<String> {
    let content = std::fs::read(path).ok()?;
    Some(hex::encode(Md5::digest(&content)))
}

/// Normalize a reported path: strip `base_dir`, then prefix `src_dir`.
///
/// Paths already under `src_dir` are returned untouched, so applying the
/// rewrite twice gives the same result as applying it once.
pub fn rewrite_path(path: &str, base_dir: Option<&Path>, src_dir: Option<&Path>) -> String {
    let mut rewritten = PathBuf::from(path);

    if let Some(src) = src_dir.filter(|s| !s.as_os_str().is_empty()) {
        if rewritten.starts_with(src) {
            return to_slash(&rewritten);
        }
    }

    if let Some(base) = base_dir.filter(|b| !b.as_os_str().is_empty()) {
        if let Ok(stripped) = rewritten.strip_prefix(base) {
            rewritten = stripped.to_path_buf();
        }
    }

    if let Some(src) = src_dir.filter(|s| !s.as_os_str().is_empty()) {
        // join() would discard src for an absolute path
        let relative: PathBuf = rewritten
            .components()
            .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
            .collect();
        rewritten = src.join(relative);
    }

    to_slash(&rewritten)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::RootDir => String::new(),
            other => other.as_os_str().to_string_lossy().into_owned(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::CommitInfo;
    use coverage_data::LineCoverage;

    fn token_ci() -> CiContext {
        CiContext {
            repo_token: Some("tok".to_string()),
            ..Default::default()
        }
    }

    fn sample_data() -> CoverageData {
        let mut file = FileCoverage::new("/work/proj/pkg/a.py");
        file.lines = vec![
            LineCoverage {
                line_number: 1,
                hit_count: 1,
            },
            LineCoverage {
                line_number: 3,
                hit_count: 0,
            },
        ];
        CoverageData { files: vec![file] }
    }

    fn sf(name: &str, coverage: Vec<Option<u64>>) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            source_digest: None,
            coverage,
            branches: Vec::new(),
        }
    }

    #[test]
    fn test_rewrite_strips_base_and_adds_src() {
        let out = rewrite_path(
            "/work/proj/pkg/a.py",
            Some(Path::new("/work/proj")),
            Some(Path::new("src")),
        );
        assert_eq!(out, "src/pkg/a.py");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let cases = [
            ("/work/proj/pkg/a.py", Some("/work/proj"), Some("src")),
            ("a/x.py", Some("a"), Some("a/b")),
            ("proj/x.py", Some("proj"), Some("proj")),
            ("pkg/a.py", Some("/elsewhere"), None),
            ("/abs/a.py", None, Some("lib")),
        ];
        for (path, base, src) in cases {
            let base = base.map(Path::new);
            let src = src.map(Path::new);
            let once = rewrite_path(path, base, src);
            let twice = rewrite_path(&once, base, src);
            assert_eq!(once, twice, "rewrite of {path} not idempotent");
        }
    }

    #[test]
    fn test_rewrite_prefixes_absolute_path() {
        assert_eq!(
            rewrite_path("/abs/a.py", None, Some(Path::new("lib"))),
            "lib/abs/a.py"
        );
    }

    #[test]
    fn test_rewrite_without_options_keeps_path() {
        assert_eq!(rewrite_path("pkg/./a.py", None, None), "pkg/a.py");
        assert_eq!(rewrite_path("/abs/a.py", None, None), "/abs/a.py");
    }

    #[test]
    fn test_assemble_requires_credentials() {
        let options = AssembleOptions {
            token_required: true,
            ..Default::default()
        };
        let err = assemble(&sample_data(), None, CiContext::default(), &options).unwrap_err();
        assert!(matches!(err, CoverallsError::Configuration(_)));
    }

    #[test]
    fn test_assemble_without_token_requirement() {
        let report = assemble(
            &sample_data(),
            None,
            CiContext::default(),
            &AssembleOptions::default(),
        )
        .unwrap();
        assert_eq!(report.source_files.len(), 1);
        assert_eq!(report.source_files[0].coverage, vec![Some(1), None, Some(0)]);
    }

    #[test]
    fn test_git_key_omitted_when_absent() {
        let report =
            assemble(&sample_data(), None, token_ci(), &AssembleOptions::default()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("git"));
        assert_eq!(obj["repo_token"], "tok");
        assert!(obj.contains_key("run_at"));
        assert!(obj.contains_key("source_files"));
    }

    #[test]
    fn test_git_key_present() {
        let vcs = VcsContext {
            branch: Some("main".to_string()),
            head: CommitInfo {
                id: Some("abc".to_string()),
                ..Default::default()
            },
            remotes: Vec::new(),
        };
        let report =
            assemble(&sample_data(), Some(vcs), token_ci(), &AssembleOptions::default()).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["git"]["branch"], "main");
        assert_eq!(value["git"]["head"]["id"], "abc");
    }

    #[test]
    fn test_source_digest_for_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "print('hi')\n").unwrap();
        let data = CoverageData {
            files: vec![FileCoverage::new(path.to_string_lossy())],
        };
        let report = assemble(&data, None, token_ci(), &AssembleOptions::default()).unwrap();
        let digest = report.source_files[0].source_digest.as_deref().unwrap();
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn test_merge_disjoint_files() {
        let mut report =
            assemble(&CoverageData::new(), None, token_ci(), &AssembleOptions::default()).unwrap();
        report.source_files = vec![sf("a.py", vec![Some(1), Some(0), Some(1)])];
        report.merge_source_files(vec![sf("b.py", vec![Some(1), Some(1), Some(0)])]);

        assert_eq!(
            report.source_files,
            vec![
                sf("a.py", vec![Some(1), Some(0), Some(1)]),
                sf("b.py", vec![Some(1), Some(1), Some(0)]),
            ]
        );
    }

    #[test]
    fn test_absorb_sums_hits() {
        let mut a = sf("a.py", vec![Some(1), None]);
        a.branches = vec![2, 0, 0, 1];
        let mut b = sf("a.py", vec![Some(2), Some(0), None, Some(4)]);
        b.branches = vec![2, 0, 0, 3, 2, 0, 1, 0];

        a.absorb(b);
        assert_eq!(a.coverage, vec![Some(3), Some(0), None, Some(4)]);
        assert_eq!(a.branches, vec![2, 0, 0, 4, 2, 0, 1, 0]);
    }

    #[test]
    fn test_repeated_tracefile_blocks_fold_into_one_file() {
        let data = coverage_data::parse_lcov(
            "SF:src/a.rs\nDA:1,1\nend_of_record\nSF:src/a.rs\nDA:2,3\nend_of_record\n",
        )
        .unwrap();
        let report = assemble(&data, None, token_ci(), &AssembleOptions::default()).unwrap();

        assert_eq!(report.source_files.len(), 1);
        assert_eq!(report.source_files[0].name, "src/a.rs");
        assert_eq!(report.source_files[0].coverage, vec![Some(1), Some(3)]);
    }

    #[test]
    fn test_paths_rewritten_to_same_name_fold() {
        let data = coverage_data::parse_lcov(
            "SF:/work/a.rs\nDA:1,2\nend_of_record\nSF:a.rs\nDA:1,5\nend_of_record\n",
        )
        .unwrap();
        let options = AssembleOptions {
            base_dir: Some(PathBuf::from("/work")),
            ..Default::default()
        };
        let report = assemble(&data, None, token_ci(), &options).unwrap();

        assert_eq!(report.source_files.len(), 1);
        assert_eq!(report.source_files[0].name, "a.rs");
        assert_eq!(report.source_files[0].coverage, vec![Some(7)]);
    }

    #[test]
    fn test_absorb_saturates_hit_counts() {
        let mut a = sf("a.py", vec![Some(u64::MAX)]);
        a.branches = vec![1, 0, 0, u64::MAX];
        let mut b = sf("a.py", vec![Some(1)]);
        b.branches = vec![1, 0, 0, 1];

        a.absorb(b);
        assert_eq!(a.coverage, vec![Some(u64::MAX)]);
        assert_eq!(a.branches, vec![1, 0, 0, u64::MAX]);
    }

    #[test]
    fn test_merge_file_rejects_partial_branch_quads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.json");
        std::fs::write(
            &path,
            r#"{"source_files": [{"name": "b.py", "coverage": [1], "branches": [1, 0, 0]}]}"#,
        )
        .unwrap();

        let mut report =
            assemble(&CoverageData::new(), None, token_ci(), &AssembleOptions::default()).unwrap();
        let err = report.merge_file(&path).unwrap_err();
        assert!(matches!(err, CoverallsError::InvalidReport(_)));
        assert!(report.source_files.is_empty());
    }

    #[test]
    fn test_report_json_roundtrip_keeps_ci_fields() {
        let ci = CiContext {
            service_name: Some("travis-ci".to_string()),
            service_job_id: Some("7".to_string()),
            parallel: true,
            ..Default::default()
        };
        let report = assemble(&sample_data(), None, ci, &AssembleOptions::default()).unwrap();
        let back: CoverageReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
