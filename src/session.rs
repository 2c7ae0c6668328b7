//! One harness invocation from configuration to aggregates.
//!
//! Order matters here: configuration conflicts are rejected before anything runs, the target
//! is probed before any unit, and the skip set is fixed before scheduling starts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crossrun_core::filter::{FilterAction, FilterSet};
use crossrun_core::policy::{POLICY_ENV_KEYS, PolicyContext, SKIP_RULES, SkipSet};
use crossrun_core::{CapabilityVector, Transport};

use crate::config::HarnessConfig;
use crate::discovery::{self, TestUnit};
use crate::error::{HarnessError, HarnessResult};
use crate::expected::ReferenceInterpreter;
use crate::probe::FeatureProbe;
use crate::results::{self, RecordedArgs, Reporter, ResultStore, RunResult};
use crate::scheduler::Scheduler;
use crate::target::{self, TargetRunner};

/// Which units to run.
#[derive(Debug, Clone, Default)]
pub enum Selection {
    /// The target's default directories.
    #[default]
    Defaults,
    Dirs(Vec<String>),
    Files(Vec<PathBuf>),
    /// The failures recorded by the previous run in the result directory.
    PreviousFailures,
}

/// A complete request for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub config: HarnessConfig,
    pub selection: Selection,
    /// Include/exclude rules in command-line order.
    pub filters: Vec<(FilterAction, String)>,
}

impl RunRequest {
    pub fn new(config: HarnessConfig) -> Self {
        RunRequest {
            config,
            selection: Selection::Defaults,
            filters: Vec::new(),
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_filter(mut self, action: FilterAction, pattern: impl Into<String>) -> Self {
        self.filters.push((action, pattern.into()));
        self
    }
}

/// Compile the filter rules.
///
/// ## Errors
/// - [`HarnessError::Filter`] for the first pattern that is not a valid regex.
pub fn build_filters(rules: &[(FilterAction, String)]) -> HarnessResult<FilterSet> {
    let mut filters = FilterSet::new();
    for (action, pattern) in rules {
        filters.push(*action, pattern).map_err(|source| HarnessError::Filter {
            pattern: pattern.clone(),
            source,
        })?;
    }
    Ok(filters)
}

/// Evaluate the skip table for this configuration.
pub fn skip_set(config: &HarnessConfig, capabilities: &CapabilityVector) -> SkipSet {
    let env: BTreeMap<String, String> = POLICY_ENV_KEYS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect();
    let ctx = PolicyContext {
        target: config.target,
        capabilities,
        native_emit: config.emit.is_native(),
        windows_host: cfg!(windows),
        env,
    };
    SkipSet::build(SKIP_RULES, &ctx)
}

/// Run the request on the target `runner_for` builds from its configuration.
pub fn run(request: RunRequest, reporter: &dyn Reporter) -> HarnessResult<RunResult> {
    run_with(request, reporter, target::runner_for)
}

/// Run the request with a caller-supplied runner factory.
///
/// The factory is called again when architecture detection changes the compiler flags, so
/// the runner always compiles with the final configuration.
///
/// ## Errors
/// - [`HarnessError::Config`] for contradictory options.
/// - [`HarnessError::Filter`] for an invalid filter pattern.
/// - [`HarnessError::Probe`] when the target cannot run its probes.
/// - [`HarnessError::ResultDir`] / [`HarnessError::Record`] for result directory failures.
#[tracing::instrument(skip_all, fields(target = %request.config.target))]
pub fn run_with(
    request: RunRequest,
    reporter: &dyn Reporter,
    make_runner: impl Fn(&HarnessConfig) -> HarnessResult<Box<dyn TargetRunner>>,
) -> HarnessResult<RunResult> {
    let RunRequest {
        mut config,
        selection,
        filters,
    } = request;

    target::check_remote_emit(&config)?;
    let filters = build_filters(&filters)?;
    let store = ResultStore::open(&config.result_dir)?;

    let mut runner = make_runner(&config)?;
    let mut reference = ReferenceInterpreter::from_config(&config);

    let wants_arch = config.via_mpy || config.target.transport() == Transport::RemoteSerial;
    if wants_arch && config.mpy_cross_flags.is_empty() {
        let flags = FeatureProbe::new(runner.as_ref(), &config, &reference).detect_arch_flags()?;
        if let Some(flags) = flags {
            tracing::info!(%flags, "detected target architecture");
            config.mpy_cross_flags = flags;
            drop(runner);
            runner = make_runner(&config)?;
            reference = ReferenceInterpreter::from_config(&config);
        }
    }

    let capabilities = FeatureProbe::new(runner.as_ref(), &config, &reference).capabilities()?;
    let skips = skip_set(&config, &capabilities);
    tracing::debug!(explicit = skips.explicit_len(), "skip set ready");

    let (units, dirs, files) = select_units(&config, selection)?;
    let scheduler = Scheduler {
        runner: runner.as_ref(),
        reference: &reference,
        skips: &skips,
        filters: &filters,
        store: &store,
        reporter,
        jobs: config.effective_jobs(),
    };
    scheduler.run(&units);

    let result = store.snapshot();
    reporter.on_run_complete(&result);
    store.write_record(RecordedArgs::new(&config, &dirs, &files))?;
    Ok(result)
}

/// Resolve the selection into units, returning the directories and files it named.
fn select_units(
    config: &HarnessConfig,
    selection: Selection,
) -> HarnessResult<(Vec<TestUnit>, Vec<String>, Vec<PathBuf>)> {
    match selection {
        Selection::Files(files) => Ok((discovery::from_files(config, &files), Vec::new(), files)),
        Selection::PreviousFailures => {
            let files = results::load_failed(&config.result_dir)?;
            Ok((discovery::from_files(config, &files), Vec::new(), files))
        }
        Selection::Dirs(dirs) => Ok((discovery::scan_dirs(config, &dirs)?, dirs, Vec::new())),
        Selection::Defaults => {
            let dirs: Vec<String> = config
                .target
                .default_test_dirs(&config.mpy_cross_flags)
                .into_iter()
                .map(str::to_string)
                .collect();
            Ok((discovery::scan_dirs(config, &dirs)?, dirs, Vec::new()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crossrun_core::{Capability, CapabilityValue, TargetId};

    #[test]
    fn bad_filter_names_its_pattern() {
        let err = build_filters(&[(FilterAction::Include, "(".into())]).unwrap_err();
        assert!(matches!(err, HarnessError::Filter { ref pattern, .. } if pattern == "("));
    }

    #[test]
    fn missing_capability_gates_by_trait() {
        let config = HarnessConfig::new(TargetId::Unix, "/t");
        let caps = CapabilityVector::all_supported().with(Capability::IntBig, CapabilityValue::Unsupported);
        let skips = skip_set(&config, &caps);
        assert!(skips.contains("misc/int_big_mul.py"));
        assert!(!skips.contains("basics/list1.py"));
    }
}
