//! Run configuration.
//!
//! [`HarnessConfig`] is built once (by the CLI or a test) and passed by reference to every
//! component. Tool locations are resolved from the environment exactly once, in
//! [`ToolPaths::from_env`].

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossrun_core::TargetId;

/// Default wall-clock budget per unit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the module search path variable honored by the runtime.
pub const SEARCH_PATH_VAR: &str = "MICROPYPATH";

/// Code emitter the runtime compiles units with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emitter {
    #[default]
    Bytecode,
    Native,
}

impl Emitter {
    pub fn as_str(self) -> &'static str {
        match self {
            Emitter::Bytecode => "bytecode",
            Emitter::Native => "native",
        }
    }

    pub fn is_native(self) -> bool {
        self == Emitter::Native
    }
}

impl fmt::Display for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Locations of the external programs the harness drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// Runtime under test (local-process targets).
    pub micropython: PathBuf,
    /// Reference interpreter.
    pub cpython3: PathBuf,
    /// Ahead-of-time compiler.
    pub mpy_cross: PathBuf,
    /// Module build of the runtime loaded by `node`.
    pub micropython_mjs: PathBuf,
    /// Device tool used by the remote adapter.
    pub pyboard: PathBuf,
}

impl ToolPaths {
    /// Resolve tool locations from the process environment, falling back to the usual build
    /// output locations next to `base`.
    pub fn from_env(base: &Path) -> Self {
        Self::from_lookup(base, |key| env::var_os(key))
    }

    /// Resolve tool locations through `lookup` instead of the process environment.
    pub fn from_lookup(base: &Path, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let exe = if cfg!(windows) { ".exe" } else { "" };
        let unix_port = if cfg!(windows) {
            "../ports/windows/build-standard/micropython"
        } else {
            "../ports/unix/build-standard/micropython"
        };
        let default_cpython = if cfg!(windows) { "python" } else { "python3" };
        let pick = |key: &str, fallback: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(fallback);

        let micropython_mjs = match lookup("MICROPY_MICROPYTHON_MJS") {
            Some(path) => absolute(Path::new(&path)),
            None => base.join("../ports/webassembly/build-standard/micropython.mjs"),
        };

        ToolPaths {
            micropython: pick("MICROPY_MICROPYTHON", base.join(format!("{unix_port}{exe}"))),
            cpython3: pick("MICROPY_CPYTHON3", PathBuf::from(default_cpython)),
            mpy_cross: pick("MICROPY_MPYCROSS", base.join(format!("../mpy-cross/build/mpy-cross{exe}"))),
            micropython_mjs,
            pyboard: pick("MICROPY_PYBOARD", base.join("../tools/pyboard.py")),
        }
    }
}

/// Connection parameters for remote targets.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteParams {
    pub device: String,
    pub baudrate: u32,
    pub user: String,
    pub password: String,
}

impl Default for RemoteParams {
    fn default() -> Self {
        RemoteParams {
            device: "/dev/ttyACM0".to_string(),
            baudrate: 115_200,
            user: "micro".to_string(),
            password: "python".to_string(),
        }
    }
}

/// Everything one harness invocation needs to know.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub target: TargetId,
    pub emit: Emitter,
    pub heapsize: Option<String>,
    /// Compile units ahead of time and run the compiled artifact.
    pub via_mpy: bool,
    /// Extra compiler flags, whitespace separated. Filled in by architecture detection when
    /// empty.
    pub mpy_cross_flags: String,
    /// Keep the inherited module search path instead of the isolated one.
    pub keep_path: bool,
    pub jobs: usize,
    pub timeout: Duration,
    /// Directory holding the test tree (`feature_check/`, `testlib/`, test dirs).
    pub base_dir: PathBuf,
    pub result_dir: PathBuf,
    pub remote: RemoteParams,
    pub tools: ToolPaths,
}

impl HarnessConfig {
    /// Configuration with defaults for `target`, tools resolved from the environment.
    pub fn new(target: TargetId, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        HarnessConfig {
            target,
            emit: Emitter::default(),
            heapsize: None,
            via_mpy: false,
            mpy_cross_flags: String::new(),
            keep_path: false,
            jobs: default_jobs(),
            timeout: DEFAULT_TIMEOUT,
            result_dir: base_dir.join("results"),
            tools: ToolPaths::from_env(&base_dir),
            remote: RemoteParams::default(),
            base_dir,
        }
    }

    pub fn with_emit(mut self, emit: Emitter) -> Self {
        self.emit = emit;
        self
    }

    pub fn with_heapsize(mut self, heapsize: Option<String>) -> Self {
        self.heapsize = heapsize;
        self
    }

    pub fn with_via_mpy(mut self, via_mpy: bool) -> Self {
        self.via_mpy = via_mpy;
        self
    }

    pub fn with_mpy_cross_flags(mut self, flags: impl Into<String>) -> Self {
        self.mpy_cross_flags = flags.into();
        self
    }

    pub fn with_keep_path(mut self, keep_path: bool) -> Self {
        self.keep_path = keep_path;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_result_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.result_dir = dir.into();
        self
    }

    pub fn with_remote(mut self, remote: RemoteParams) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_tools(mut self, tools: ToolPaths) -> Self {
        self.tools = tools;
        self
    }

    /// Directory holding the probe scripts.
    pub fn probe_dir(&self) -> PathBuf {
        self.base_dir.join(crossrun_core::probe::PROBE_DIR)
    }

    /// Helper library shared by units and the reference interpreter.
    pub fn testlib_dir(&self) -> PathBuf {
        self.base_dir.join("testlib")
    }

    /// Worker count after the singleton rule is applied.
    pub fn effective_jobs(&self) -> usize {
        if self.target.transport().is_singleton() {
            1
        } else {
            self.jobs.max(1)
        }
    }

    /// Compiler flags split into arguments.
    pub fn compiler_flags(&self) -> Vec<String> {
        self.mpy_cross_flags.split_whitespace().map(str::to_string).collect()
    }

    /// Value of [`SEARCH_PATH_VAR`] for target processes, or `None` to inherit it.
    pub fn isolated_search_path(&self) -> Option<OsString> {
        if self.keep_path {
            return None;
        }
        let entries = [
            PathBuf::from(".frozen"),
            self.testlib_dir(),
            self.base_dir.join("../frozen/Adafruit_CircuitPython_asyncio"),
            self.base_dir.join("../frozen/Adafruit_CircuitPython_Ticks"),
        ];
        match env::join_paths(entries) {
            Ok(joined) => Some(joined),
            Err(err) => {
                tracing::warn!(error = %err, "cannot build isolated module search path; inheriting");
                None
            }
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
