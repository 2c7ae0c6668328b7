//! Ahead-of-time compilation of units.
//!
//! The compiler itself is an external program; [`Compiler`] is the seam the runners use, and
//! [`MpyCross`] drives the real one. [`bootstrap_script`] wraps a compiled blob so that a
//! remote target can import it from RAM.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crossrun_core::sentinel;
use thiserror::Error;

use crate::config::{Emitter, HarnessConfig};
use crate::target::child::run_captured;

/// Why a unit could not be compiled.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The compiler ran and rejected the unit; carries its merged output.
    #[error("compiler rejected the unit")]
    Rejected(Vec<u8>),
    #[error("failed to launch compiler {}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read compiled artifact")]
    Artifact(#[source] io::Error),
}

impl CompileError {
    /// Output recorded for the unit: the compiler-crash marker followed by the compiler's
    /// own text.
    pub fn crash_output(&self) -> Vec<u8> {
        let mut out = sentinel::COMPILER_CRASH.to_vec();
        match self {
            CompileError::Rejected(text) => out.extend_from_slice(text),
            other => out.extend_from_slice(other.to_string().as_bytes()),
        }
        out
    }
}

/// Source file in, compiled artifact out.
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &Path, output: &Path) -> Result<(), CompileError>;
}

/// The external `mpy-cross` compiler.
#[derive(Debug, Clone)]
pub struct MpyCross {
    pub program: PathBuf,
    pub flags: Vec<String>,
    pub emit: Emitter,
    pub timeout: Duration,
}

impl MpyCross {
    pub fn from_config(config: &HarnessConfig) -> Self {
        MpyCross {
            program: config.tools.mpy_cross.clone(),
            flags: config.compiler_flags(),
            emit: config.emit,
            timeout: config.timeout,
        }
    }

    pub fn command(&self, source: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.flags)
            .arg("-o")
            .arg(output)
            .arg("-X")
            .arg(format!("emit={}", self.emit))
            .arg(source);
        cmd
    }
}

impl Compiler for MpyCross {
    fn compile(&self, source: &Path, output: &Path) -> Result<(), CompileError> {
        let cmd = self.command(source, output);
        tracing::debug!(?cmd, "compiling unit");
        let captured = run_captured(cmd, self.timeout).map_err(|source| CompileError::Launch {
            program: self.program.clone(),
            source,
        })?;
        if captured.success() {
            Ok(())
        } else {
            Err(CompileError::Rejected(captured.output))
        }
    }
}

/// Compile `source` into a scratch file and return the artifact bytes.
pub fn compile_to_bytes(compiler: &dyn Compiler, source: &Path) -> Result<Vec<u8>, CompileError> {
    let artifact = tempfile::Builder::new()
        .prefix("crossrun_")
        .suffix(".mpy")
        .tempfile()
        .map_err(CompileError::Artifact)?
        .into_temp_path();
    compiler.compile(source, &artifact)?;
    std::fs::read(&artifact).map_err(CompileError::Artifact)
}

// ============================================================================
// Bootstrap script
// ============================================================================

/// Mounts a one-file filesystem serving `__buf` as `__injected_test.mpy` and imports it.
const IMPORT_FROM_RAM: &str = "\
import sys, os, io, vfs
class __File(io.IOBase):
  def __init__(self):
    self.off = 0
  def ioctl(self, request, arg):
    return 0
  def readinto(self, buf):
    buf[:] = memoryview(__buf)[self.off:self.off + len(buf)]
    self.off += len(buf)
    return len(buf)
class __FS:
  def mount(self, readonly, mkfs):
    pass
  def umount(self):
    pass
  def chdir(self, path):
    pass
  def stat(self, path):
    if path == '__injected_test.mpy':
      return tuple(0 for _ in range(10))
    else:
      raise OSError(-2)
  def open(self, path, mode):
    return __File()
vfs.mount(__FS(), '/__vfstest')
os.chdir('/__vfstest')
__import__('__injected_test')
";

/// Build the script a remote target executes for a compiled unit.
pub fn bootstrap_script(blob: &[u8]) -> Vec<u8> {
    let mut script = b"__buf=".to_vec();
    script.extend(bytes_literal(blob).into_bytes());
    script.push(b'\n');
    script.extend_from_slice(IMPORT_FROM_RAM.as_bytes());
    script
}

/// Render `bytes` as a `b'...'` literal the target's parser accepts.
///
/// ## Examples
/// ```rust
/// use crossrun::compile::bytes_literal;
/// assert_eq!(bytes_literal(b"M\x06\x00\n'"), r#"b"M\x06\x00\n'""#);
/// assert_eq!(bytes_literal(b"a\\b"), r"b'a\\b'");
/// ```
pub fn bytes_literal(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(bytes.len() * 2 + 3);
    out.push('b');
    out.push(quote);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ if b == quote as u8 => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push(quote);
    out
}
