//! Errors that abort a whole invocation.
//!
//! Everything a unit can do wrong (crash, timeout, mismatch, a failing reference run or
//! compiler) is an outcome, not an error. Only the conditions below stop the harness.

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::target::TargetError;

/// Fatal harness errors.
#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    #[error("unknown target '{name}'")]
    #[diagnostic(code(crossrun::config::target), help("expected one of: {known}"))]
    UnknownTarget { name: String, known: String },

    #[error("contradictory configuration: {0}")]
    #[diagnostic(code(crossrun::config::conflict))]
    Config(String),

    #[error("invalid filter pattern '{pattern}'")]
    #[diagnostic(code(crossrun::config::filter))]
    Filter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("feature probe '{script}' could not run")]
    #[diagnostic(
        code(crossrun::probe),
        help("without probe results no unit can be gated safely; check the target binary path")
    )]
    Probe {
        script: String,
        #[source]
        source: TargetError,
    },

    #[error("cannot use result directory {}", path.display())]
    #[diagnostic(code(crossrun::results::dir))]
    ResultDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write results record {}", path.display())]
    #[diagnostic(code(crossrun::results::record))]
    Record {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("results record {} is malformed", path.display())]
    #[diagnostic(code(crossrun::results::parse))]
    RecordParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("test discovery failed: {0}")]
    #[diagnostic(code(crossrun::discovery))]
    Discovery(String),

    #[error(transparent)]
    #[diagnostic(code(crossrun::target))]
    Target(#[from] TargetError),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
