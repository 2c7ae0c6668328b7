//! The runtime loaded as a module by a `node` host process.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::child::run_captured;
use super::{ProcessEnv, RunOutcome, TargetError, TargetRunner, absolute, unit_dir};
use crate::config::HarnessConfig;

/// Runs `.py` units through the module build of the runtime, and `.js`/`.mjs` units directly
/// with the module path as their argument.
pub struct NodeHostedRunner {
    node: PathBuf,
    module: PathBuf,
    heapsize: Option<String>,
    timeout: Duration,
    env: ProcessEnv,
}

impl NodeHostedRunner {
    pub fn from_config(config: &HarnessConfig) -> Self {
        NodeHostedRunner {
            node: PathBuf::from("node"),
            module: config.tools.micropython_mjs.clone(),
            heapsize: config.heapsize.clone(),
            timeout: config.timeout,
            env: ProcessEnv::from_config(config),
        }
    }

    /// Use a different host program than `node` on `PATH`.
    pub fn with_host(mut self, node: impl Into<PathBuf>) -> Self {
        self.node = node.into();
        self
    }

    pub fn command(&self, unit: &Path) -> Command {
        let unit = absolute(unit);
        let mut cmd = Command::new(&self.node);
        cmd.current_dir(unit_dir(&unit));
        if unit.extension().is_some_and(|ext| ext == "py") {
            cmd.arg(&self.module);
            if let Some(heapsize) = &self.heapsize {
                cmd.arg("-X").arg(format!("heapsize={heapsize}"));
            }
            cmd.arg(&unit);
        } else {
            cmd.arg(&unit).arg(&self.module);
        }
        self.env.apply(&mut cmd);
        cmd
    }
}

impl TargetRunner for NodeHostedRunner {
    #[tracing::instrument(skip_all, fields(unit = %unit.display()))]
    fn run(&self, unit: &Path, _is_special: bool) -> Result<RunOutcome, TargetError> {
        let cmd = self.command(unit);
        tracing::debug!(?cmd, "running unit under node");
        let captured = run_captured(cmd, self.timeout).map_err(|source| TargetError::Launch {
            program: self.node.clone(),
            source,
        })?;
        Ok(RunOutcome::from_captured(captured))
    }
}
