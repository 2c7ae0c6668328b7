//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::path::Path;

use crate::results::{self, ConsoleReporter};
use crate::session::{self, RunRequest};

use super::{CliResult, ExitCode};

/// Run the selected units; exit non-zero iff any of them failed.
pub fn run_units(request: RunRequest) -> CliResult<ExitCode> {
    let result = session::run(request, &ConsoleReporter)?;
    Ok(if result.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Print a diff for every recorded failure.
pub fn print_failures(result_dir: &Path) -> CliResult<ExitCode> {
    print!("{}", results::failure_report(result_dir)?);
    Ok(ExitCode::SUCCESS)
}

/// Remove recorded failures and the results record.
pub fn clean_failures(result_dir: &Path) -> CliResult<ExitCode> {
    results::clean_failures(result_dir)?;
    Ok(ExitCode::SUCCESS)
}
