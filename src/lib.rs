#![forbid(unsafe_code)]
//! crossrun: a cross-target test harness for an embedded language runtime.
//!
//! Runs test scripts on a target (a local binary, a module hosted by `node`, or a device
//! behind its interactive prompt), derives the expected output from a fixture or a reference
//! interpreter, and compares the two with a matcher that tolerates nondeterministic lines.
//! Pure policy (matching, probes, skip tables, filters, the target registry) lives in
//! `crossrun_core`; this crate owns processes, files and scheduling.
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` module enforces
//!   `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Units never panic the harness**: a crashing, hanging or misbehaving unit is an outcome, recorded like any
//!   other. Only the conditions in [`error::HarnessError`] stop a run.

pub mod cli;
pub mod compile;
pub mod config;
pub mod discovery;
pub mod error;
pub mod expected;
pub mod probe;
pub mod results;
pub mod scheduler;
pub mod session;
pub mod target;

pub use config::{Emitter, HarnessConfig};
pub use error::{HarnessError, HarnessResult};
pub use results::{ResultStore, RunResult, Status};
pub use session::{RunRequest, Selection};
pub use target::{RunOutcome, TargetRunner};
