//! Devices reached through their interactive prompt.
//!
//! The prompt protocol is not implemented here: it belongs to a [`RemoteTarget`], injected
//! into [`RemoteRunner`]. The runner owns the translation of protocol errors into outcomes
//! and serializes access, since a device can only serve one unit at a time.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crossrun_core::sentinel;
use parking_lot::Mutex;
use thiserror::Error;

use super::child::run_captured;
use super::{RunOutcome, TargetError, TargetRunner, check_remote_emit};
use crate::compile::{self, Compiler};
use crate::config::{HarnessConfig, RemoteParams};
use crate::error::HarnessResult;

/// How long to wait for the device to come back after a target-requested skip.
pub const SOFT_RESET_WAIT: Duration = Duration::from_secs(10);

/// Errors reported by a [`RemoteTarget`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The unit raised an uncaught exception on the device.
    #[error("exception raised on target")]
    Exception { stdout: Vec<u8>, stderr: Vec<u8> },
    /// The prompt protocol itself failed (garbled reply, timeout, lost sync).
    #[error("{0}")]
    Protocol(String),
    /// The device cannot be reached at all.
    #[error("{0}")]
    Unavailable(String),
}

/// A device's interactive prompt.
pub trait RemoteTarget: Send {
    /// Put the prompt into the raw mode that accepts whole scripts.
    fn enter_raw_repl(&mut self) -> Result<(), RemoteError>;

    /// Execute `script` and return everything it printed.
    fn exec(&mut self, script: &[u8]) -> Result<Vec<u8>, RemoteError>;

    /// Read until at least `min_bytes` arrived and the data ends with `ending`.
    fn read_until(&mut self, min_bytes: usize, ending: &[u8], timeout: Duration) -> Result<Vec<u8>, RemoteError>;

    fn close(&mut self) {}
}

/// What is sent to the device for a unit.
pub enum ScriptMode {
    /// The unit's source as is.
    Plain,
    /// The compiled unit wrapped in a bootstrap script.
    Compiled(Box<dyn Compiler>),
}

enum Prepared {
    Script(Vec<u8>),
    CompilerCrash(Vec<u8>),
}

impl ScriptMode {
    /// Pick the mode for `config`, rejecting combinations the device cannot run.
    pub fn for_config(config: &HarnessConfig, compiler: impl FnOnce() -> Box<dyn Compiler>) -> HarnessResult<Self> {
        check_remote_emit(config)?;
        Ok(if config.via_mpy {
            ScriptMode::Compiled(compiler())
        } else {
            ScriptMode::Plain
        })
    }

    fn prepare(&self, unit: &Path, force_plain: bool) -> Result<Prepared, TargetError> {
        match self {
            ScriptMode::Compiled(compiler) if !force_plain => match compile::compile_to_bytes(compiler.as_ref(), unit) {
                Ok(blob) => Ok(Prepared::Script(compile::bootstrap_script(&blob))),
                Err(err) => Ok(Prepared::CompilerCrash(err.crash_output())),
            },
            _ => fs::read(unit).map(Prepared::Script).map_err(|source| TargetError::ReadUnit {
                path: unit.to_path_buf(),
                source,
            }),
        }
    }
}

/// Runs units on a device, one at a time.
pub struct RemoteRunner<T: RemoteTarget> {
    device: Mutex<T>,
    mode: ScriptMode,
}

impl<T: RemoteTarget> RemoteRunner<T> {
    pub fn new(device: T, mode: ScriptMode) -> Self {
        RemoteRunner {
            device: Mutex::new(device),
            mode,
        }
    }
}

impl<T: RemoteTarget> TargetRunner for RemoteRunner<T> {
    #[tracing::instrument(skip_all, fields(unit = %unit.display(), special = is_special))]
    fn run(&self, unit: &Path, is_special: bool) -> Result<RunOutcome, TargetError> {
        let script = match self.mode.prepare(unit, is_special)? {
            Prepared::Script(script) => script,
            Prepared::CompilerCrash(output) => return Ok(RunOutcome::Crashed(output)),
        };

        let mut device = self.device.lock();
        let result = device.enter_raw_repl().and_then(|()| device.exec(&script));
        match result {
            Ok(output) => Ok(RunOutcome::Completed(output)),
            Err(RemoteError::Exception { stdout, stderr }) => {
                let mut output = stdout;
                output.extend(stderr);
                if is_special {
                    // Kept raw: special units expect tracebacks and match them as templates.
                    Ok(RunOutcome::Completed(output))
                } else {
                    output.extend_from_slice(sentinel::CRASH);
                    Ok(RunOutcome::Crashed(output))
                }
            }
            Err(RemoteError::Protocol(message)) => {
                tracing::warn!(unit = %unit.display(), %message, "prompt protocol error");
                let mut output = message.into_bytes();
                output.push(b'\n');
                output.extend_from_slice(sentinel::CRASH);
                Ok(RunOutcome::Crashed(output))
            }
            Err(RemoteError::Unavailable(message)) => Err(TargetError::Unavailable(message)),
        }
    }

    /// A skip request ends in a soft reset of the device; let it finish so the next unit does
    /// not interrupt the start-up code.
    fn on_target_skip(&self) {
        let mut device = self.device.lock();
        if let Err(err) = device.read_until(1, sentinel::SOFT_RESET_BANNER, SOFT_RESET_WAIT) {
            tracing::warn!(error = %err, "device did not report a soft reset");
        }
    }
}

impl<T: RemoteTarget> Drop for RemoteRunner<T> {
    fn drop(&mut self) {
        self.device.get_mut().close();
    }
}

// ============================================================================
// Device tool adapter
// ============================================================================

/// [`RemoteTarget`] backed by the external device tool (`MICROPY_PYBOARD`).
///
/// Every `exec` is one tool invocation, which opens the connection, enters raw mode, runs
/// the script and resets the prompt. There is therefore nothing to drain between units and
/// [`RemoteTarget::read_until`] returns immediately.
#[derive(Debug, Clone)]
pub struct PyboardTool {
    interpreter: PathBuf,
    tool: PathBuf,
    params: RemoteParams,
    timeout: Duration,
}

impl PyboardTool {
    /// Check that the tool exists and remember the connection parameters.
    pub fn connect(config: &HarnessConfig) -> Result<Self, TargetError> {
        let tool = config.tools.pyboard.clone();
        if !tool.is_file() {
            return Err(TargetError::Unavailable(format!(
                "device tool {} not found (set MICROPY_PYBOARD)",
                tool.display()
            )));
        }
        Ok(PyboardTool {
            interpreter: config.tools.cpython3.clone(),
            tool,
            params: config.remote.clone(),
            timeout: config.timeout,
        })
    }

    pub fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.tool)
            .arg("--device")
            .arg(&self.params.device)
            .arg("--baudrate")
            .arg(self.params.baudrate.to_string())
            .arg("--user")
            .arg(&self.params.user)
            .arg("--password")
            .arg(&self.params.password)
            .arg(script);
        cmd
    }
}

impl RemoteTarget for PyboardTool {
    fn enter_raw_repl(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }

    fn exec(&mut self, script: &[u8]) -> Result<Vec<u8>, RemoteError> {
        let unavailable = |err: std::io::Error| RemoteError::Unavailable(err.to_string());
        let mut file = tempfile::Builder::new()
            .prefix("crossrun_")
            .suffix(".py")
            .tempfile()
            .map_err(unavailable)?;
        file.write_all(script).map_err(unavailable)?;
        let path = file.into_temp_path();

        let cmd = self.command(&path);
        tracing::debug!(?cmd, "running script on device");
        let captured = run_captured(cmd, self.timeout).map_err(unavailable)?;
        if captured.success() {
            Ok(captured.output)
        } else if captured.timed_out() {
            Err(RemoteError::Protocol("timeout waiting for the device".to_string()))
        } else {
            Err(RemoteError::Exception {
                stdout: captured.output,
                stderr: Vec::new(),
            })
        }
    }

    fn read_until(&mut self, _min_bytes: usize, _ending: &[u8], _timeout: Duration) -> Result<Vec<u8>, RemoteError> {
        Ok(Vec::new())
    }
}
