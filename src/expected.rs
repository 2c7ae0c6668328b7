//! Expected-output resolution.
//!
//! A unit's expected output is its adjacent `<unit>.exp` fixture when one exists, otherwise
//! whatever the reference interpreter prints for the same source. Either way the result is
//! normalized before it reaches the matcher.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crossrun_core::matcher::{normalize, split_lines};
use crossrun_core::sentinel;

use crate::config::HarnessConfig;
use crate::target::child::run_captured;
use crate::target::{absolute, unit_dir};

/// Where an expected output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedSource {
    Fixture,
    Reference,
}

/// Normalized expected output of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub output: Vec<u8>,
    pub source: ExpectedSource,
}

impl Expected {
    pub fn from_fixture(&self) -> bool {
        self.source == ExpectedSource::Fixture
    }

    /// Number of lines, counted as individual testcases in the summary. An unterminated last
    /// line counts too.
    pub fn line_count(&self) -> usize {
        split_lines(&self.output).len()
    }
}

/// Path of the fixture that would sit next to `unit`.
pub fn fixture_path(unit: &Path) -> PathBuf {
    let mut path = unit.as_os_str().to_owned();
    path.push(".exp");
    PathBuf::from(path)
}

/// The host interpreter that defines expected behavior when no fixture exists.
#[derive(Debug, Clone)]
pub struct ReferenceInterpreter {
    program: PathBuf,
    testlib: PathBuf,
    /// Inherited `PYTHONPATH`, appended after the test library when the path is kept.
    inherited_path: Option<OsString>,
    host_path: Option<OsString>,
    timeout: Duration,
}

impl ReferenceInterpreter {
    pub fn from_config(config: &HarnessConfig) -> Self {
        ReferenceInterpreter {
            program: config.tools.cpython3.clone(),
            testlib: absolute(&config.testlib_dir()),
            inherited_path: if config.keep_path {
                std::env::var_os("PYTHONPATH")
            } else {
                None
            },
            host_path: std::env::var_os("PATH"),
            timeout: config.timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Reduced environment: only the test library, the executable path and a UTF-8 locale.
    pub fn command(&self, unit: &Path) -> Command {
        let unit = absolute(unit);
        let mut python_path = self.testlib.clone().into_os_string();
        if let Some(inherited) = &self.inherited_path {
            python_path.push(if cfg!(windows) { ";" } else { ":" });
            python_path.push(inherited);
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-BS").arg(&unit).current_dir(unit_dir(&unit)).env_clear();
        cmd.env("PYTHONPATH", python_path);
        if let Some(path) = &self.host_path {
            cmd.env("PATH", path);
        }
        cmd.env("LANG", "en_US.UTF-8").env("PYTHONIOENCODING", "utf-8");
        cmd
    }

    /// Run `unit` and return its raw output, or `None` when the interpreter failed in any way.
    pub fn run(&self, unit: &Path) -> Option<Vec<u8>> {
        let cmd = self.command(unit);
        tracing::debug!(?cmd, "running reference interpreter");
        match run_captured(cmd, self.timeout) {
            Ok(captured) if captured.success() => Some(captured.output),
            Ok(captured) => {
                tracing::debug!(unit = %unit.display(), timed_out = captured.timed_out(), "reference interpreter failed");
                None
            }
            Err(err) => {
                tracing::warn!(program = %self.program.display(), error = %err, "cannot launch reference interpreter");
                None
            }
        }
    }

    /// Expected output of `unit`: the fixture if present, else a reference run.
    pub fn expected(&self, unit: &Path) -> Expected {
        let fixture = fixture_path(unit);
        match fs::read(&fixture) {
            Ok(bytes) => {
                return Expected {
                    output: normalize(&bytes),
                    source: ExpectedSource::Fixture,
                };
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(fixture = %fixture.display(), error = %err, "unreadable fixture; using reference run");
            }
        }
        let output = self
            .run(unit)
            .unwrap_or_else(|| sentinel::REFERENCE_CRASH.to_vec());
        Expected {
            output: normalize(&output),
            source: ExpectedSource::Reference,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crossrun_core::TargetId;

    fn interpreter(program: &str) -> ReferenceInterpreter {
        let mut config = HarnessConfig::new(TargetId::Unix, "/t");
        config.tools.cpython3 = PathBuf::from(program);
        ReferenceInterpreter::from_config(&config)
    }

    #[test]
    fn fixture_sits_next_to_unit() {
        assert_eq!(fixture_path(Path::new("a/b.py")), PathBuf::from("a/b.py.exp"));
    }

    #[test]
    fn fixture_wins_and_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("u.py");
        fs::write(&unit, "print(1)\n").unwrap();
        fs::write(fixture_path(&unit), "1\r\n").unwrap();
        let expected = interpreter("/nonexistent/python").expected(&unit);
        assert_eq!(expected.output, b"1\n");
        assert!(expected.from_fixture());
        assert_eq!(expected.line_count(), 1);
    }

    #[test]
    fn missing_interpreter_is_a_reference_crash() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("u.py");
        fs::write(&unit, "print(1)\n").unwrap();
        let expected = interpreter("/nonexistent/python").expected(&unit);
        assert_eq!(expected.output, sentinel::REFERENCE_CRASH);
        assert_eq!(expected.source, ExpectedSource::Reference);
        assert_eq!(expected.line_count(), 1);
    }

    #[test]
    fn unterminated_output_counts_its_last_line() {
        let expected = Expected {
            output: b"a\nb".to_vec(),
            source: ExpectedSource::Fixture,
        };
        assert_eq!(expected.line_count(), 2);
        let empty = Expected {
            output: Vec::new(),
            source: ExpectedSource::Reference,
        };
        assert_eq!(empty.line_count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn environment_is_reduced() {
        let cmd = interpreter("python3").command(Path::new("/t/basics/x.py"));
        let keys: Vec<_> = cmd
            .get_envs()
            .filter(|(_, v)| v.is_some())
            .map(|(k, _)| k.to_string_lossy().into_owned())
            .collect();
        assert!(keys.contains(&"PYTHONPATH".to_string()));
        assert!(keys.contains(&"PYTHONIOENCODING".to_string()));
        assert!(!keys.contains(&"MICROPYPATH".to_string()));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-BS", "/t/basics/x.py"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/t/basics")));
    }
}
