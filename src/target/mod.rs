//! Target execution.
//!
//! Every transport implements [`TargetRunner`]: run one unit, return what it printed and
//! whether it crashed. Which runner serves a run is decided once, in [`runner_for`], from the
//! target registry; nothing downstream looks at the transport again.
//!
//! ## Modules
//!
//! - `child` - scoped child processes, merged output, timeouts
//! - `pty` - line-fed interactive runs
//! - `local` - the runtime as a local process
//! - `node` - the runtime as a module inside `node`
//! - `remote` - a device behind an injected [`remote::RemoteTarget`]

pub mod child;
pub mod local;
pub mod node;
pub mod pty;
pub mod remote;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use crossrun_core::{Transport, sentinel};
use thiserror::Error;

use crate::compile::{Compiler, MpyCross};
use crate::config::{HarnessConfig, SEARCH_PATH_VAR};
use crate::error::{HarnessError, HarnessResult};
use child::Captured;

/// What a unit run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The unit ran to completion.
    Completed(Vec<u8>),
    /// The unit crashed or timed out; the output already carries its sentinel.
    Crashed(Vec<u8>),
}

impl RunOutcome {
    pub fn crashed(&self) -> bool {
        matches!(self, RunOutcome::Crashed(_))
    }

    pub fn output(&self) -> &[u8] {
        match self {
            RunOutcome::Completed(out) | RunOutcome::Crashed(out) => out,
        }
    }

    pub fn into_output(self) -> Vec<u8> {
        match self {
            RunOutcome::Completed(out) | RunOutcome::Crashed(out) => out,
        }
    }

    /// Map a finished process: non-zero exit appends `CRASH`, timeout appends `TIMEOUT`.
    pub fn from_captured(captured: Captured) -> Self {
        if captured.success() {
            return RunOutcome::Completed(captured.output);
        }
        let marker = if captured.timed_out() {
            sentinel::TIMEOUT
        } else {
            sentinel::CRASH
        };
        let mut output = captured.output;
        output.extend_from_slice(marker);
        RunOutcome::Crashed(output)
    }
}

/// The target could not be used at all, as opposed to a unit misbehaving on it.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("failed to launch {}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read unit {}", path.display())]
    ReadUnit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("remote target unavailable: {0}")]
    Unavailable(String),
}

/// One way of executing units on a target.
pub trait TargetRunner: Send + Sync {
    /// Run the unit at `unit`.
    ///
    /// `is_special` selects the command-line style run for units that test the program
    /// itself and keeps raw error payloads for template matching.
    fn run(&self, unit: &Path, is_special: bool) -> Result<RunOutcome, TargetError>;

    /// Called after the target asked for a unit to be skipped.
    fn on_target_skip(&self) {}
}

/// Environment shared by every target process of a run.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    search_path: Option<OsString>,
}

impl ProcessEnv {
    pub fn from_config(config: &HarnessConfig) -> Self {
        ProcessEnv {
            search_path: config.isolated_search_path(),
        }
    }

    pub fn apply(&self, cmd: &mut Command) {
        if let Some(path) = &self.search_path {
            cmd.env(SEARCH_PATH_VAR, path);
        }
    }
}

/// Directory a unit runs in.
pub(crate) fn unit_dir(unit: &Path) -> PathBuf {
    match unit.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Build the runner for `config.target`.
///
/// ## Errors
/// - [`HarnessError::Config`] when a remote target is asked to run native code without the
///   compiled path.
/// - [`HarnessError::Target`] when the remote device tool is missing.
pub fn runner_for(config: &HarnessConfig) -> HarnessResult<Box<dyn TargetRunner>> {
    let compiler = || -> Box<dyn Compiler> { Box::new(MpyCross::from_config(config)) };
    match config.target.transport() {
        Transport::LocalProcess => {
            let runner = local::LocalProcessRunner::from_config(config);
            Ok(Box::new(if config.via_mpy {
                runner.with_compiler(compiler())
            } else {
                runner
            }))
        }
        Transport::NodeHosted => Ok(Box::new(node::NodeHostedRunner::from_config(config))),
        Transport::RemoteSerial => {
            let mode = remote::ScriptMode::for_config(config, compiler)?;
            let device = remote::PyboardTool::connect(config)?;
            Ok(Box::new(remote::RemoteRunner::new(device, mode)))
        }
    }
}

/// Reject a native emitter on a remote target unless units are compiled first.
pub fn check_remote_emit(config: &HarnessConfig) -> HarnessResult<()> {
    if config.target.transport() == Transport::RemoteSerial && config.emit.is_native() && !config.via_mpy {
        return Err(HarnessError::Config(format!(
            "using emit={} on target {} requires --via-mpy",
            config.emit, config.target
        )));
    }
    Ok(())
}
