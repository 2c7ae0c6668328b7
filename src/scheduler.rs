//! Unit scheduling.
//!
//! Each unit goes through the same pipeline on whichever worker picks it up:
//!
//! 1. **filter**: units rejected by the include/exclude rules produce nothing at all;
//! 2. **skip**: the skip set, decided before the run, is consulted;
//! 3. **expected output**: fixture or reference run;
//! 4. **run** on the target;
//! 5. **compare** and record, writing artifacts for mismatches.
//!
//! Nothing is ordered across units. Singleton targets get one worker; everything else runs on
//! a fixed-size `rayon` pool.

use crossrun_core::filter::FilterSet;
use crossrun_core::matcher::{MatchMode, compare, normalize};
use crossrun_core::policy::SkipSet;
use crossrun_core::sentinel;
use rayon::prelude::*;

use crate::discovery::TestUnit;
use crate::expected::ReferenceInterpreter;
use crate::results::{ExecutionOutcome, Reporter, ResultStore, Status};
use crate::target::{RunOutcome, TargetRunner};

/// Everything a worker needs, borrowed for the duration of the run.
pub struct Scheduler<'a> {
    pub runner: &'a dyn TargetRunner,
    pub reference: &'a ReferenceInterpreter,
    pub skips: &'a SkipSet,
    pub filters: &'a FilterSet,
    pub store: &'a ResultStore,
    pub reporter: &'a dyn Reporter,
    pub jobs: usize,
}

impl Scheduler<'_> {
    /// Run every unit and return the outcomes of those that passed the filters, in no
    /// particular order.
    #[tracing::instrument(skip_all, fields(units = units.len(), jobs = self.jobs))]
    pub fn run(&self, units: &[TestUnit]) -> Vec<(String, ExecutionOutcome)> {
        let work = |unit: &TestUnit| self.run_unit(unit).map(|outcome| (unit.id.clone(), outcome));
        if self.jobs <= 1 {
            return units.iter().filter_map(work).collect();
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build_scoped(rayon::ThreadBuilder::run, |pool| {
                pool.install(|| units.par_iter().filter_map(work).collect::<Vec<_>>())
            })
            .unwrap_or_else(|e| {
                tracing::warn!("failed to create thread pool ({e}), running sequentially");
                units.iter().filter_map(work).collect()
            })
    }

    /// The full pipeline for one unit; `None` when the filters reject it.
    pub fn run_unit(&self, unit: &TestUnit) -> Option<ExecutionOutcome> {
        if !self.filters.allows(&unit.id) {
            return None;
        }
        if let Some(reason) = self.skips.reason_with_traits(&unit.id, &unit.traits) {
            tracing::debug!(unit = %unit.id, ?reason, "skipped by policy");
            return Some(self.skip(unit, Vec::new()));
        }

        let expected = self.reference.expected(&unit.path);
        let outcome = match self.runner.run(&unit.path, unit.is_special) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(unit = %unit.id, error = %err, "target could not run unit");
                let mut output = err.to_string().into_bytes();
                output.push(b'\n');
                output.extend_from_slice(sentinel::CRASH);
                RunOutcome::Crashed(output)
            }
        };
        let crashed = outcome.crashed();
        let raw_output = outcome.into_output();
        let actual = normalize(&raw_output);

        if !crashed && sentinel::is_skip(&actual) {
            self.runner.on_target_skip();
            return Some(self.skip(unit, raw_output));
        }
        if unit.is_special && !crashed && sentinel::contains_embedded_skip(&actual) {
            self.runner.on_target_skip();
            return Some(self.skip(unit, raw_output));
        }

        let mode = if unit.is_special && !crashed && expected.from_fixture() {
            MatchMode::Template
        } else {
            MatchMode::Exact
        };
        let comparison = compare(&expected.output, &actual, mode);
        let status = if comparison.matched {
            Status::Pass
        } else if crashed && sentinel::is_timeout(&comparison.actual) {
            Status::Timeout
        } else if crashed {
            Status::Crash
        } else {
            Status::Fail
        };

        if status == Status::Pass {
            self.store.clear_artifacts(unit);
        } else {
            self.store.write_artifacts(unit, &expected.output, &comparison.actual);
        }
        self.store.record(unit, status, expected.line_count());
        self.reporter.on_unit_complete(unit, status);

        Some(ExecutionOutcome {
            status,
            raw_output,
            normalized_output: comparison.actual,
        })
    }

    fn skip(&self, unit: &TestUnit, raw_output: Vec<u8>) -> ExecutionOutcome {
        self.store.record_skip(unit);
        self.reporter.on_unit_complete(unit, Status::Skip);
        ExecutionOutcome::skipped(raw_output)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crossrun_core::TargetId;
    use crossrun_core::filter::FilterAction;
    use parking_lot::Mutex;

    use crate::config::HarnessConfig;
    use crate::expected::fixture_path;
    use crate::results::RunResult;
    use crate::target::TargetError;

    /// Replies from a table keyed by file name and counts skip notifications.
    struct Canned {
        replies: HashMap<String, RunOutcome>,
        skips_seen: AtomicUsize,
        ran: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(replies: &[(&str, RunOutcome)]) -> Self {
            Canned {
                replies: replies.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                skips_seen: AtomicUsize::new(0),
                ran: Mutex::new(Vec::new()),
            }
        }
    }

    impl TargetRunner for Canned {
        fn run(&self, unit: &Path, _is_special: bool) -> Result<RunOutcome, TargetError> {
            let name = unit.file_name().unwrap().to_string_lossy().into_owned();
            self.ran.lock().push(name.clone());
            self.replies
                .get(&name)
                .cloned()
                .ok_or_else(|| TargetError::Unavailable(format!("no reply for {name}")))
        }

        fn on_target_skip(&self) {
            self.skips_seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Quiet;

    impl Reporter for Quiet {
        fn on_unit_complete(&self, _unit: &TestUnit, _status: Status) {}
        fn on_run_complete(&self, _result: &RunResult) {}
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: HarnessConfig,
        store: ResultStore,
    }

    impl Fixture {
        /// A test tree where every unit has a fixture, so no reference interpreter is needed.
        fn new(units: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (id, expected) in units {
                let path = dir.path().join(id);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, "").unwrap();
                fs::write(fixture_path(&path), expected).unwrap();
            }
            let mut config = HarnessConfig::new(TargetId::Unix, dir.path());
            config.tools.cpython3 = PathBuf::from("/nonexistent/python");
            let store = ResultStore::open(dir.path().join("results")).unwrap();
            Fixture { dir, config, store }
        }

        fn unit(&self, id: &str) -> TestUnit {
            TestUnit::new(self.dir.path().join(id), self.dir.path(), false)
        }

        fn run(&self, runner: &Canned, skips: &SkipSet, filters: &FilterSet, ids: &[&str]) -> RunResult {
            let reference = ReferenceInterpreter::from_config(&self.config);
            let scheduler = Scheduler {
                runner,
                reference: &reference,
                skips,
                filters,
                store: &self.store,
                reporter: &Quiet,
                jobs: 1,
            };
            let units: Vec<_> = ids.iter().map(|id| self.unit(id)).collect();
            scheduler.run(&units);
            self.store.snapshot()
        }
    }

    #[test]
    fn pass_fail_and_crash() {
        let fx = Fixture::new(&[("basics/a.py", "1\n"), ("basics/b.py", "2\n"), ("basics/c.py", "3\n")]);
        let runner = Canned::new(&[
            ("a.py", RunOutcome::Completed(b"1\r\n".to_vec())),
            ("b.py", RunOutcome::Completed(b"x\n".to_vec())),
            ("c.py", RunOutcome::Crashed(b"3\nCRASH".to_vec())),
        ]);
        let result = fx.run(&runner, &SkipSet::default(), &FilterSet::new(), &["basics/a.py", "basics/b.py", "basics/c.py"]);
        assert_eq!(result.tests, 3);
        assert_eq!(result.testcases, 3);
        assert_eq!(result.passed, 1);
        assert_eq!(result.summary_lines()[2], "2 tests failed: b c");
        let out = fs::read(fx.store.dir().join("basics_b.py.out")).unwrap();
        assert_eq!(out, b"x\n");
        assert!(!fx.store.dir().join("basics_a.py.out").exists());
    }

    #[test]
    fn target_requested_skip_is_not_a_failure() {
        let fx = Fixture::new(&[("basics/a.py", "1\n")]);
        let runner = Canned::new(&[("a.py", RunOutcome::Completed(b"SKIP\r\n".to_vec()))]);
        let result = fx.run(&runner, &SkipSet::default(), &FilterSet::new(), &["basics/a.py"]);
        assert_eq!(result.tests, 0);
        assert_eq!(result.skipped, vec!["a"]);
        assert_eq!(runner.skips_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crash_printing_skip_is_still_a_crash() {
        let fx = Fixture::new(&[("basics/a.py", "1\n")]);
        let runner = Canned::new(&[("a.py", RunOutcome::Crashed(b"SKIP\n".to_vec()))]);
        let result = fx.run(&runner, &SkipSet::default(), &FilterSet::new(), &["basics/a.py"]);
        assert!(result.has_failures());
    }

    #[test]
    fn special_units_match_templates_and_embedded_skips() {
        let fx = Fixture::new(&[
            ("micropython/meminfo.py", "mem: \\\\d\\+\n########\nend\n"),
            ("cmdline/cmd_v.py", "anything\n"),
        ]);
        let runner = Canned::new(&[
            ("meminfo.py", RunOutcome::Completed(b"mem: 1024\nblock\nblock\nend\n".to_vec())),
            ("cmd_v.py", RunOutcome::Completed(b"banner\nSKIP\n".to_vec())),
        ]);
        let result = fx.run(
            &runner,
            &SkipSet::default(),
            &FilterSet::new(),
            &["micropython/meminfo.py", "cmdline/cmd_v.py"],
        );
        assert_eq!(result.passed, 1);
        assert_eq!(result.skipped, vec!["cmd_v"]);
    }

    #[test]
    fn timeout_is_classified() {
        let fx = Fixture::new(&[("basics/a.py", "1\n")]);
        let runner = Canned::new(&[("a.py", RunOutcome::Crashed(b"TIMEOUT".to_vec()))]);
        let reference = ReferenceInterpreter::from_config(&fx.config);
        let scheduler = Scheduler {
            runner: &runner,
            reference: &reference,
            skips: &SkipSet::default(),
            filters: &FilterSet::new(),
            store: &fx.store,
            reporter: &Quiet,
            jobs: 1,
        };
        let outcome = scheduler.run_unit(&fx.unit("basics/a.py")).unwrap();
        assert_eq!(outcome.status, Status::Timeout);
    }

    #[test]
    fn filtered_units_produce_nothing_and_skips_never_run() {
        let fx = Fixture::new(&[("basics/a.py", "1\n"), ("basics/b.py", "1\n"), ("misc/c.py", "1\n")]);
        let runner = Canned::new(&[("a.py", RunOutcome::Completed(b"1\n".to_vec()))]);
        let mut filters = FilterSet::new();
        filters.push(FilterAction::Exclude, "^misc/").unwrap();
        let mut skips = SkipSet::default();
        skips.add_explicit("basics/b.py");
        let result = fx.run(&runner, &skips, &filters, &["basics/a.py", "basics/b.py", "misc/c.py"]);
        assert_eq!(result.tests, 1);
        assert_eq!(result.skipped, vec!["b"]);
        assert_eq!(*runner.ran.lock(), vec!["a.py"]);
    }

    #[test]
    fn unusable_target_counts_as_crash() {
        let fx = Fixture::new(&[("basics/a.py", "1\n")]);
        let runner = Canned::new(&[]);
        let result = fx.run(&runner, &SkipSet::default(), &FilterSet::new(), &["basics/a.py"]);
        assert_eq!(result.failed.len(), 1);
        let out = fs::read_to_string(fx.store.dir().join("basics_a.py.out")).unwrap();
        assert!(out.ends_with("CRASH"));
    }
}
