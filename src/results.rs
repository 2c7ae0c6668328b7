//! Run results: counters, artifacts and the persisted failure record.
//!
//! [`ResultStore`] is shared by every worker. Aggregates sit behind one mutex; artifacts are
//! keyed by unit identity, so writing them needs no lock at all.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crossrun_core::unit::sanitize_id;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{Emitter, HarnessConfig};
use crate::discovery::TestUnit;
use crate::error::{HarnessError, HarnessResult};

/// File name of the persisted record inside the result directory.
pub const RECORD_FILE: &str = "_results.json";

/// Final classification of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pass,
    Fail,
    Skip,
    Crash,
    Timeout,
}

impl Status {
    pub fn is_failure(self) -> bool {
        matches!(self, Status::Fail | Status::Crash | Status::Timeout)
    }

    /// Label printed in front of the unit's identity.
    pub fn label(self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Skip => "skip",
            Status::Fail | Status::Crash | Status::Timeout => "FAIL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What running one unit produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: Status,
    pub raw_output: Vec<u8>,
    /// Normalized output, rewritten by the template for special units.
    pub normalized_output: Vec<u8>,
}

impl ExecutionOutcome {
    pub fn skipped(raw_output: Vec<u8>) -> Self {
        ExecutionOutcome {
            status: Status::Skip,
            normalized_output: Vec::new(),
            raw_output,
        }
    }
}

/// A unit that did not match its expected output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FailedUnit {
    pub name: String,
    pub path: String,
}

/// Aggregates of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Units that ran to a verdict (everything but skips).
    pub tests: usize,
    /// Sum of expected-output lines over those units.
    pub testcases: usize,
    pub passed: usize,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedUnit>,
}

impl RunResult {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Plain summary lines, lists sorted.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{} tests performed ({} individual testcases)", self.tests, self.testcases),
            format!("{} tests passed", self.passed),
        ];
        let mut skipped = self.skipped.clone();
        skipped.sort();
        if !skipped.is_empty() {
            lines.push(format!("{} tests skipped: {}", skipped.len(), skipped.join(" ")));
        }
        let mut failed = self.failed.clone();
        failed.sort();
        if !failed.is_empty() {
            let names: Vec<_> = failed.iter().map(|f| f.name.as_str()).collect();
            lines.push(format!("{} tests failed: {}", failed.len(), names.join(" ")));
        }
        lines
    }

    /// Recorded paths of the failed units, in summary order.
    pub fn failed_paths(&self) -> Vec<String> {
        let mut failed = self.failed.clone();
        failed.sort();
        failed.into_iter().map(|f| f.path).collect()
    }
}

// ============================================================================
// Reporting
// ============================================================================

/// Receives status lines as units finish and the summary at the end.
pub trait Reporter: Send + Sync {
    fn on_unit_complete(&self, unit: &TestUnit, status: Status);

    fn on_run_complete(&self, result: &RunResult);
}

/// Plain status lines on stdout.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn on_unit_complete(&self, unit: &TestUnit, status: Status) {
        println!("{:<5} {}", status.label(), unit.id);
    }

    fn on_run_complete(&self, result: &RunResult) {
        for line in result.summary_lines() {
            println!("{line}");
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Shared sink for outcomes.
pub struct ResultStore {
    dir: PathBuf,
    result: Mutex<RunResult>,
}

impl ResultStore {
    /// Open (creating if needed) the result directory.
    ///
    /// ## Errors
    /// - [`HarnessError::ResultDir`] when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| HarnessError::ResultDir {
            path: dir.clone(),
            source,
        })?;
        Ok(ResultStore {
            dir,
            result: Mutex::new(RunResult::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_skip(&self, unit: &TestUnit) {
        self.result.lock().skipped.push(unit.name.clone());
    }

    /// Count a unit that ran to a verdict.
    pub fn record(&self, unit: &TestUnit, status: Status, testcases: usize) {
        let mut result = self.result.lock();
        result.tests += 1;
        result.testcases += testcases;
        if status.is_failure() {
            result.failed.push(FailedUnit {
                name: unit.name.clone(),
                path: unit.display_path(),
            });
        } else {
            result.passed += 1;
        }
    }

    pub fn snapshot(&self) -> RunResult {
        self.result.lock().clone()
    }

    /// `(expected, actual)` artifact paths of a unit.
    pub fn artifact_paths(&self, unit: &TestUnit) -> (PathBuf, PathBuf) {
        let base = sanitize_id(&unit.id);
        (self.dir.join(format!("{base}.exp")), self.dir.join(format!("{base}.out")))
    }

    pub fn write_artifacts(&self, unit: &TestUnit, expected: &[u8], actual: &[u8]) {
        let (exp, out) = self.artifact_paths(unit);
        for (path, bytes) in [(&exp, expected), (&out, actual)] {
            if let Err(err) = fs::write(path, bytes) {
                tracing::warn!(path = %path.display(), error = %err, "cannot write artifact");
            }
        }
    }

    pub fn clear_artifacts(&self, unit: &TestUnit) {
        let (exp, out) = self.artifact_paths(unit);
        for path in [&exp, &out] {
            remove_if_present(path);
        }
    }

    /// Write `{args, failed_tests}` to [`RECORD_FILE`].
    ///
    /// ## Errors
    /// - [`HarnessError::Record`] when the file cannot be written.
    pub fn write_record(&self, args: RecordedArgs) -> HarnessResult<PathBuf> {
        let path = self.dir.join(RECORD_FILE);
        let record = ResultsRecord {
            args,
            failed_tests: self.snapshot().failed_paths(),
        };
        let json = serde_json::to_string_pretty(&record).map_err(|e| HarnessError::Record {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        fs::write(&path, json).map_err(|source| HarnessError::Record {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

fn remove_if_present(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "cannot remove artifact"),
    }
}

// ============================================================================
// Persisted record
// ============================================================================

/// The invocation, as recorded next to its failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedArgs {
    pub target: String,
    pub device: String,
    pub emit: Emitter,
    pub heapsize: Option<String>,
    pub via_mpy: bool,
    pub mpy_cross_flags: String,
    pub keep_path: bool,
    pub jobs: usize,
    pub timeout_secs: u64,
    pub base_dir: PathBuf,
    pub result_dir: PathBuf,
    pub test_dirs: Vec<String>,
    pub files: Vec<String>,
}

impl RecordedArgs {
    pub fn new(config: &HarnessConfig, test_dirs: &[String], files: &[PathBuf]) -> Self {
        RecordedArgs {
            target: config.target.to_string(),
            device: config.remote.device.clone(),
            emit: config.emit,
            heapsize: config.heapsize.clone(),
            via_mpy: config.via_mpy,
            mpy_cross_flags: config.mpy_cross_flags.clone(),
            keep_path: config.keep_path,
            jobs: config.effective_jobs(),
            timeout_secs: config.timeout.as_secs(),
            base_dir: config.base_dir.clone(),
            result_dir: config.result_dir.clone(),
            test_dirs: test_dirs.to_vec(),
            files: files.iter().map(|f| f.to_string_lossy().into_owned()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResultsRecord {
    args: RecordedArgs,
    failed_tests: Vec<String>,
}

/// Only the failure list matters when reading a record back.
#[derive(Debug, Deserialize)]
struct FailedTests {
    #[serde(default)]
    failed_tests: Vec<String>,
}

/// Failed paths recorded in `dir`; an absent record means none.
///
/// ## Errors
/// - [`HarnessError::Record`] when the record exists but cannot be read.
/// - [`HarnessError::RecordParse`] when it is not a valid record.
pub fn load_failed(dir: &Path) -> HarnessResult<Vec<PathBuf>> {
    let path = dir.join(RECORD_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(HarnessError::Record { path, source }),
    };
    let record: FailedTests = serde_json::from_str(&text).map_err(|source| HarnessError::RecordParse {
        path: path.clone(),
        source,
    })?;
    Ok(record.failed_tests.into_iter().map(PathBuf::from).collect())
}

// ============================================================================
// Artifact maintenance
// ============================================================================

fn artifacts_with(dir: &Path, ext: &str) -> HarnessResult<Vec<PathBuf>> {
    let pattern = format!("{}/*.{ext}", glob::Pattern::escape(&dir.to_string_lossy()));
    let paths = glob::glob(&pattern).map_err(|e| HarnessError::Discovery(format!("{pattern}: {e}")))?;
    let mut found: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
    found.sort();
    Ok(found)
}

/// `base` with `.ext` appended (`a.py` → `a.py.out`).
fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

/// Unified diff of every artifact pair in `dir`, one block per failure.
pub fn failure_report(dir: &Path) -> HarnessResult<String> {
    let mut report = String::new();
    for exp in artifacts_with(dir, "exp")? {
        let base = exp.with_extension("");
        let read = |path: &Path| {
            fs::read(path)
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default()
        };
        let (expected, actual) = (read(&exp), read(&with_suffix(&base, "out")));
        let name = base.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let diff = similar::TextDiff::from_lines(&expected, &actual);
        report.push_str(&format!("\nFAILURE {}\n", base.display()));
        report.push_str(
            &diff
                .unified_diff()
                .header(&format!("{name}.exp"), &format!("{name}.out"))
                .to_string(),
        );
    }
    Ok(report)
}

/// Delete every artifact and the record in `dir`.
pub fn clean_failures(dir: &Path) -> HarnessResult<()> {
    for ext in ["exp", "out"] {
        for path in artifacts_with(dir, ext)? {
            remove_if_present(&path);
        }
    }
    remove_if_present(&dir.join(RECORD_FILE));
    Ok(())
}
