//! The runtime binary as a local child process.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crossrun_core::{sentinel, unit};

use super::child::run_captured;
use super::{ProcessEnv, RunOutcome, TargetError, TargetRunner, absolute, pty, unit_dir};
use crate::compile::Compiler;
use crate::config::{Emitter, HarnessConfig};

/// Marker of the first-line comment that carries extra arguments for special units.
pub const CMDLINE_MARKER: &str = "# cmdline:";

/// Runs units with the runtime binary on this machine.
pub struct LocalProcessRunner {
    program: PathBuf,
    emit: Emitter,
    heapsize: Option<String>,
    timeout: Duration,
    env: ProcessEnv,
    compiler: Option<Box<dyn Compiler>>,
}

impl LocalProcessRunner {
    pub fn from_config(config: &HarnessConfig) -> Self {
        LocalProcessRunner {
            program: absolute(&config.tools.micropython),
            emit: config.emit,
            heapsize: config.heapsize.clone(),
            timeout: config.timeout,
            env: ProcessEnv::from_config(config),
            compiler: None,
        }
    }

    /// Compile every regular unit ahead of time and run the artifact instead.
    pub fn with_compiler(mut self, compiler: Box<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-X").arg(format!("emit={}", self.emit));
        if let Some(heapsize) = &self.heapsize {
            cmd.arg("-X").arg(format!("heapsize={heapsize}"));
        }
        if cfg!(target_os = "macos") {
            cmd.arg("-X").arg("realtime");
        }
        self.env.apply(&mut cmd);
        cmd
    }

    fn launch_error(&self, source: std::io::Error) -> TargetError {
        TargetError::Launch {
            program: self.program.clone(),
            source,
        }
    }

    fn run_regular(&self, unit: &Path) -> Result<RunOutcome, TargetError> {
        let cwd = unit_dir(unit);
        let mut cmd = self.base_command();
        cmd.current_dir(&cwd);

        // The artifact must outlive the run; dropping it deletes the file.
        let artifact = match &self.compiler {
            Some(compiler) => {
                let path = tempfile::Builder::new()
                    .prefix("crossrun_")
                    .suffix(".mpy")
                    .tempfile_in(&cwd)
                    .map_err(|source| self.launch_error(source))?
                    .into_temp_path();
                if let Err(err) = compiler.compile(unit, &path) {
                    tracing::debug!(unit = %unit.display(), error = %err, "compilation failed");
                    return Ok(RunOutcome::Crashed(err.crash_output()));
                }
                let module = path.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
                cmd.arg("-m").arg(module);
                Some(path)
            }
            None => {
                cmd.arg(absolute(unit));
                None
            }
        };

        tracing::debug!(?cmd, "running unit");
        let captured = run_captured(cmd, self.timeout).map_err(|source| self.launch_error(source))?;
        drop(artifact);
        Ok(RunOutcome::from_captured(captured))
    }

    /// Units that exercise the command-line program: the bare binary, arguments from the
    /// unit's first line, and a pseudo-terminal for interactive units.
    fn run_special(&self, unit: &Path) -> Result<RunOutcome, TargetError> {
        let read_error = |source| TargetError::ReadUnit {
            path: unit.to_path_buf(),
            source,
        };
        let mut cmd = Command::new(&self.program);
        cmd.args(cmdline_args(unit).map_err(read_error)?);
        self.env.apply(&mut cmd);

        let id = unit.to_string_lossy();
        if unit::is_interactive(&id) {
            let input = fs::read(unit).map_err(read_error)?;
            tracing::debug!(?cmd, "running interactive unit");
            let output = pty::run_interactive(cmd, &input, self.timeout).map_err(|source| self.launch_error(source))?;
            return Ok(RunOutcome::Completed(output));
        }

        cmd.arg(unit);
        tracing::debug!(?cmd, "running special unit");
        let captured = run_captured(cmd, self.timeout).map_err(|source| self.launch_error(source))?;
        Ok(if captured.success() {
            RunOutcome::Completed(captured.output)
        } else if captured.timed_out() {
            RunOutcome::Crashed(sentinel::TIMEOUT.to_vec())
        } else {
            RunOutcome::Crashed(sentinel::CRASH.to_vec())
        })
    }
}

impl TargetRunner for LocalProcessRunner {
    #[tracing::instrument(skip_all, fields(unit = %unit.display(), special = is_special))]
    fn run(&self, unit: &Path, is_special: bool) -> Result<RunOutcome, TargetError> {
        if is_special {
            self.run_special(unit)
        } else {
            self.run_regular(unit)
        }
    }
}

/// Extra arguments from a leading `# cmdline:` comment.
pub fn cmdline_args(unit: &Path) -> std::io::Result<Vec<String>> {
    let mut first = Vec::new();
    BufReader::new(fs::File::open(unit)?).read_until(b'\n', &mut first)?;
    Ok(parse_cmdline(&String::from_utf8_lossy(&first)))
}

fn parse_cmdline(first_line: &str) -> Vec<String> {
    first_line
        .strip_prefix(CMDLINE_MARKER)
        .map(|rest| rest.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cmdline_comment_supplies_arguments() {
        assert_eq!(parse_cmdline("# cmdline: -v -O2\n"), vec!["-v", "-O2"]);
        assert!(parse_cmdline("# other\n").is_empty());
        assert!(parse_cmdline("").is_empty());
    }
}
