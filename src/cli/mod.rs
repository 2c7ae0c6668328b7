//! Command-line surface of crossrun.
//!
//! One invocation selects one [`Mode`]:
//!
//! - a plain run executes the selected units and prints a summary
//! - `--print-failures` diffs every failure recorded by the previous run
//! - `--clean-failures` deletes those records
//! - `--run-failures` runs exactly the recorded failures again
//!
//! Below [`run`], problems travel as [`CliError`] values carrying the exit status; `run` is
//! the one place that ends the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use crossrun_core::filter::FilterAction;
use crossrun_core::target;

use crate::config::{DEFAULT_TIMEOUT, Emitter, HarnessConfig, RemoteParams};
use crate::error::HarnessError;
use crate::session::{RunRequest, Selection};

// ============================================================================
// Exit status
// ============================================================================

/// Status the harness process ends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    /// Every unit passed or was skipped.
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// A unit failed, or the run could not be set up.
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Text for stderr and the status to end the process with. An empty message is not printed.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Fatal harness errors are rendered as diagnostics.
impl From<HarnessError> for CliError {
    fn from(err: HarnessError) -> Self {
        CliError::failure(format!("{:?}", miette::Report::new(err)))
    }
}

pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Runs test scripts against a runtime and compares their output with a reference.
#[derive(Parser, Debug)]
#[command(name = "crossrun")]
#[command(version = VERSION)]
#[command(about = "Cross-target test harness for an embedded language runtime", long_about = None)]
pub struct Cli {
    /// Target to run on
    #[arg(long, default_value = "unix", value_name = "NAME")]
    pub target: String,

    /// Serial device or host of a remote target
    #[arg(long, default_value = "/dev/ttyACM0")]
    pub device: String,

    /// Baud rate of the serial device
    #[arg(short = 'b', long, default_value_t = 115_200)]
    pub baudrate: u32,

    /// Telnet login username
    #[arg(short = 'u', long, default_value = "micro")]
    pub user: String,

    /// Telnet login password
    #[arg(short = 'p', long, default_value = "python")]
    pub password: String,

    /// Directories to scan for units
    #[arg(short = 'd', long = "test-dirs", value_name = "DIR", num_args = 1..)]
    pub test_dirs: Vec<String>,

    /// Directory for failure artifacts and the results record [default: <BASE_DIR>/results]
    #[arg(short = 'r', long = "result-dir", value_name = "DIR")]
    pub result_dir: Option<PathBuf>,

    /// Directory holding the test tree
    #[arg(long = "base-dir", value_name = "DIR", default_value = ".")]
    pub base_dir: PathBuf,

    /// Exclude units whose identity matches the regex
    #[arg(short = 'e', long = "exclude", value_name = "REGEX")]
    pub exclude: Vec<String>,

    /// Include units whose identity matches the regex
    #[arg(short = 'i', long = "include", value_name = "REGEX")]
    pub include: Vec<String>,

    /// Code emitter
    #[arg(long, value_enum, default_value_t = Emitter::Bytecode)]
    pub emit: Emitter,

    /// Heap size passed to the runtime
    #[arg(long)]
    pub heapsize: Option<String>,

    /// Compile units ahead of time and run the compiled artifact
    #[arg(long = "via-mpy")]
    pub via_mpy: bool,

    /// Extra flags for the ahead-of-time compiler
    #[arg(long = "mpy-cross-flags", default_value = "", allow_hyphen_values = true)]
    pub mpy_cross_flags: String,

    /// Keep the inherited module search path
    #[arg(long = "keep-path")]
    pub keep_path: bool,

    /// Number of units to run in parallel [default: available parallelism]
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Per-unit timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Print the diff of every recorded failure and exit
    #[arg(long = "print-failures", conflicts_with_all = ["clean_failures", "run_failures"])]
    pub print_failures: bool,

    /// Delete recorded failures and exit
    #[arg(long = "clean-failures", conflicts_with = "run_failures")]
    pub clean_failures: bool,

    /// Rerun the units that failed last time
    #[arg(long = "run-failures")]
    pub run_failures: bool,

    /// Units to run instead of scanning directories
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

/// What one invocation does.
#[derive(Debug)]
pub enum Mode {
    PrintFailures(PathBuf),
    CleanFailures(PathBuf),
    Run(RunRequest),
}

impl Cli {
    pub fn result_dir(&self) -> PathBuf {
        self.result_dir.clone().unwrap_or_else(|| self.base_dir.join("results"))
    }

    /// Turn parsed arguments into a mode.
    ///
    /// `filters` are the include/exclude rules in command-line order, see [`ordered_filters`].
    pub fn into_mode(self, filters: Vec<(FilterAction, String)>) -> Result<Mode, HarnessError> {
        if self.print_failures {
            return Ok(Mode::PrintFailures(self.result_dir()));
        }
        if self.clean_failures {
            return Ok(Mode::CleanFailures(self.result_dir()));
        }

        let target = target::from_str(&self.target).ok_or_else(|| HarnessError::UnknownTarget {
            name: self.target.clone(),
            known: target::target_names().join(", "),
        })?;

        let selection = if self.run_failures {
            if !self.files.is_empty() || !self.test_dirs.is_empty() {
                return Err(HarnessError::Config(
                    "--run-failures cannot be combined with files or --test-dirs".to_string(),
                ));
            }
            Selection::PreviousFailures
        } else if !self.files.is_empty() {
            Selection::Files(self.files.clone())
        } else if !self.test_dirs.is_empty() {
            Selection::Dirs(self.test_dirs.clone())
        } else {
            Selection::Defaults
        };

        let result_dir = self.result_dir();
        let mut config = HarnessConfig::new(target, &self.base_dir)
            .with_emit(self.emit)
            .with_heapsize(self.heapsize)
            .with_via_mpy(self.via_mpy)
            .with_mpy_cross_flags(self.mpy_cross_flags)
            .with_keep_path(self.keep_path)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_result_dir(result_dir)
            .with_remote(RemoteParams {
                device: self.device,
                baudrate: self.baudrate,
                user: self.user,
                password: self.password,
            });
        if let Some(jobs) = self.jobs {
            config = config.with_jobs(jobs);
        }

        Ok(Mode::Run(RunRequest {
            config,
            selection,
            filters,
        }))
    }
}

/// Include and exclude rules in the order they appeared on the command line.
pub fn ordered_filters(matches: &ArgMatches) -> Vec<(FilterAction, String)> {
    let mut rules = Vec::new();
    for (id, action) in [("exclude", FilterAction::Exclude), ("include", FilterAction::Include)] {
        let (Some(indices), Some(values)) = (matches.indices_of(id), matches.get_many::<String>(id)) else {
            continue;
        };
        rules.extend(indices.zip(values).map(|(idx, value)| (idx, action, value.clone())));
    }
    rules.sort_by_key(|(idx, _, _)| *idx);
    rules.into_iter().map(|(_, action, value)| (action, value)).collect()
}

/// Parse `args` into a mode.
pub fn parse_mode<I, T>(args: I) -> CliResult<Mode>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = Cli::command()
        .try_get_matches_from(args)
        .map_err(|e| CliError::new(e.render().to_string(), ExitCode(e.exit_code())))?;
    let filters = ordered_filters(&matches);
    let cli = Cli::from_arg_matches(&matches).map_err(|e| CliError::failure(e.to_string()))?;
    Ok(cli.into_mode(filters)?)
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Parse the process arguments, execute the selected mode and exit with its status.
pub fn run() {
    let result = parse_mode(std::env::args_os()).and_then(execute);
    match result {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the selected mode and return its exit code.
pub fn execute(mode: Mode) -> CliResult<ExitCode> {
    match mode {
        Mode::PrintFailures(dir) => commands::print_failures(&dir),
        Mode::CleanFailures(dir) => commands::clean_failures(&dir),
        Mode::Run(request) => commands::run_units(request),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crossrun_core::TargetId;

    fn run_args(args: &[&str]) -> RunRequest {
        match parse_mode(args.iter().copied()).unwrap() {
            Mode::Run(run) => run,
            other => panic!("expected a run, got {other:?}"),
        }
    }

    #[test]
    fn filters_keep_command_line_order() {
        let matches = Cli::command()
            .try_get_matches_from(["crossrun", "-i", "a", "-e", "b", "-i", "c"])
            .unwrap();
        assert_eq!(
            ordered_filters(&matches),
            vec![
                (FilterAction::Include, "a".to_string()),
                (FilterAction::Exclude, "b".to_string()),
                (FilterAction::Include, "c".to_string()),
            ]
        );
    }

    #[test]
    fn defaults() {
        let run = run_args(&["crossrun"]);
        assert_eq!(run.config.target, TargetId::Unix);
        assert_eq!(run.config.result_dir, PathBuf::from("./results"));
        assert_eq!(run.config.timeout, DEFAULT_TIMEOUT);
        assert!(matches!(run.selection, Selection::Defaults));
    }

    #[test]
    fn files_take_precedence_over_dirs() {
        let run = run_args(&["crossrun", "--target", "esp32", "-j", "4", "basics/list1.py"]);
        assert_eq!(run.config.target, TargetId::Esp32);
        assert_eq!(run.config.effective_jobs(), 1);
        assert!(matches!(run.selection, Selection::Files(ref f) if f.len() == 1));
    }

    #[test]
    fn compiler_flags_may_start_with_a_dash() {
        let run = run_args(&["crossrun", "--via-mpy", "--mpy-cross-flags", "-march=armv7m"]);
        assert_eq!(run.config.mpy_cross_flags, "-march=armv7m");
        assert!(run.config.via_mpy);
    }

    #[test]
    fn rerun_conflicts_with_explicit_units() {
        let err = parse_mode(["crossrun", "--run-failures", "-d", "basics"]).unwrap_err();
        assert!(err.message.contains("contradictory"));
        let err = parse_mode(["crossrun", "--run-failures", "a.py"]).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::FAILURE);
    }

    #[test]
    fn unknown_target_lists_known_ones() {
        let err = parse_mode(["crossrun", "--target", "vax"]).unwrap_err();
        assert!(err.message.contains("vax"));
        assert!(err.message.contains("webassembly"));
    }

    #[test]
    fn terminal_modes_use_result_dir() {
        let mode = parse_mode(["crossrun", "-r", "/tmp/res", "--print-failures"]).unwrap();
        assert!(matches!(mode, Mode::PrintFailures(ref d) if d == &PathBuf::from("/tmp/res")));
        let mode = parse_mode(["crossrun", "--base-dir", "tests", "--clean-failures"]).unwrap();
        assert!(matches!(mode, Mode::CleanFailures(ref d) if d == &PathBuf::from("tests/results")));
    }
}
