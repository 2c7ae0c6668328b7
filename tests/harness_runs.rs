//! End-to-end runs against a fake runtime.
//!
//! The fake runtime and the fake reference interpreter both execute their last argument as a
//! shell script, so every unit here is a tiny shell script with a `.py` name. Started without
//! arguments the fake runtime acts as a prompt instead, and `-m <module>` runs `<module>.mpy`
//! from the working directory.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossrun::discovery::TestUnit;
use crossrun::results::{self, Reporter, RunResult, Status};
use crossrun::target::TargetRunner;
use crossrun::target::node::NodeHostedRunner;
use crossrun::{HarnessConfig, RunOutcome, RunRequest, Selection, session};
use crossrun_core::TargetId;
use crossrun_core::probe::{PROBE_DIR, PROBES, TARGET_INFO_PROBE};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const RUN_LAST_ARG: &str = "#!/bin/sh\nfor arg; do last=\"$arg\"; done\nexec /bin/sh \"$last\"\n";

const FAKE_RUNTIME: &str = r#"#!/bin/sh
if [ $# -eq 0 ]; then
  if [ -t 0 ]; then echo "prompt on tty"; else echo "prompt on pipe"; fi
  while IFS= read -r line; do echo "got: $line"; done
  exit 0
fi
while [ $# -gt 1 ]; do
  if [ "$1" = "-m" ]; then exec /bin/sh "$2.mpy"; fi
  shift
done
exec /bin/sh "$1"
"#;

/// Rewrites `source` to `compiled`; rejects any unit mentioning `syntax_error`.
const FAKE_COMPILER: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) src="$1"; shift ;;
  esac
done
if grep -q syntax_error "$src"; then echo "SyntaxError: invalid syntax"; exit 1; fi
sed 's/source/compiled/' "$src" > "$out"
"#;

#[derive(Default)]
struct Collect(Mutex<Vec<(String, Status)>>);

impl Collect {
    fn seen(&self) -> Vec<(String, Status)> {
        let mut seen = self.0.lock().clone();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        seen
    }

    fn status_of(&self, id: &str) -> Option<Status> {
        self.0.lock().iter().find(|(seen, _)| seen == id).map(|(_, s)| *s)
    }
}

impl Reporter for Collect {
    fn on_unit_complete(&self, unit: &TestUnit, status: Status) {
        self.0.lock().push((unit.id.clone(), status));
    }

    fn on_run_complete(&self, _result: &RunResult) {}
}

struct Tree {
    dir: tempfile::TempDir,
}

impl Tree {
    fn new() -> Self {
        let tree = Tree {
            dir: tempfile::tempdir().unwrap(),
        };
        tree.executable("bin/runtime", FAKE_RUNTIME);
        tree.executable("bin/python", RUN_LAST_ARG);
        for probe in PROBES {
            tree.write(&format!("{PROBE_DIR}/{}", probe.script), "");
        }
        tree.write(&format!("{PROBE_DIR}/{TARGET_INFO_PROBE}"), "");
        tree
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    fn executable(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.write(rel, contents);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A unit with its expected output recorded as a fixture.
    fn unit(&self, rel: &str, script: &str, expected: &str) {
        self.write(rel, script);
        self.write(&format!("{rel}.exp"), expected);
    }

    fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new(TargetId::Unix, self.root()).with_timeout(Duration::from_secs(5));
        config.tools.micropython = self.root().join("bin/runtime");
        config.tools.cpython3 = self.root().join("bin/python");
        config
    }

    fn run(&self, config: HarnessConfig, selection: Selection) -> (RunResult, Collect) {
        let reporter = Collect::default();
        let request = RunRequest::new(config).with_selection(selection);
        let result = session::run(request, &reporter).unwrap();
        (result, reporter)
    }

    fn result_file(&self, name: &str) -> PathBuf {
        self.root().join("results").join(name)
    }
}

fn dirs(names: &[&str]) -> Selection {
    Selection::Dirs(names.iter().map(|s| s.to_string()).collect())
}

#[test]
fn outcomes_are_classified_and_recorded() {
    let tree = Tree::new();
    tree.unit("t/pass1.py", "echo hi\n", "hi\n");
    tree.unit("t/fail1.py", "echo no\n", "yes\n");
    tree.unit("t/crash1.py", "echo partial\nexit 3\n", "partial\n");
    tree.unit("t/int_big1.py", "echo 1\n", "1\n");
    // No fixtures: the reference run decides. Target processes see the isolated search path.
    tree.write("t/same1.py", "echo same\n");
    tree.write("t/ref1.py", "if [ -n \"$MICROPYPATH\" ]; then echo target; else echo reference; fi\n");

    let (result, reporter) = tree.run(tree.config(), dirs(&["t"]));

    assert_eq!(
        result.summary_lines(),
        vec![
            "5 tests performed (5 individual testcases)",
            "2 tests passed",
            "1 tests skipped: int_big1",
            "3 tests failed: crash1 fail1 ref1",
        ]
    );
    assert_eq!(reporter.status_of("t/crash1.py"), Some(Status::Crash));
    assert_eq!(reporter.status_of("t/ref1.py"), Some(Status::Fail));
    assert_eq!(reporter.status_of("t/int_big1.py"), Some(Status::Skip));

    assert_eq!(fs::read_to_string(tree.result_file("t_fail1.py.out")).unwrap(), "no\n");
    assert_eq!(fs::read_to_string(tree.result_file("t_crash1.py.out")).unwrap(), "partial\nCRASH");
    assert_eq!(fs::read_to_string(tree.result_file("t_ref1.py.exp")).unwrap(), "reference\n");
    assert!(!tree.result_file("t_pass1.py.out").exists());

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(tree.result_file(results::RECORD_FILE)).unwrap()).unwrap();
    assert_eq!(record["failed_tests"].as_array().unwrap().len(), 3);
    assert_eq!(record["args"]["target"], "unix");
}

#[test]
fn hung_unit_is_reaped_and_later_units_run() {
    let tree = Tree::new();
    tree.unit("t/a_hang.py", "echo started\nexec sleep 60\n", "started\n");
    tree.unit("t/b_after.py", "echo ok\n", "ok\n");
    let config = tree.config().with_timeout(Duration::from_secs(1)).with_jobs(1);

    let start = Instant::now();
    let (result, reporter) = tree.run(config, dirs(&["t"]));

    assert!(start.elapsed() < Duration::from_secs(30));
    assert_eq!(reporter.status_of("t/a_hang.py"), Some(Status::Timeout));
    assert_eq!(reporter.status_of("t/b_after.py"), Some(Status::Pass));
    assert_eq!(result.passed, 1);
    let out = fs::read_to_string(tree.result_file("t_a_hang.py.out")).unwrap();
    assert_eq!(out, "started\nTIMEOUT");
}

#[test]
fn worker_count_does_not_change_results() {
    let tree = Tree::new();
    for i in 0..100 {
        let expected = if i % 3 == 0 { "other\n" } else { "line\n" };
        tree.unit(&format!("t/u{i:03}.py"), "echo line\n", expected);
    }

    let parallel = tree.config().with_jobs(8).with_result_dir(tree.root().join("res8"));
    let (many, _) = tree.run(parallel, dirs(&["t"]));
    let serial = tree.config().with_jobs(1).with_result_dir(tree.root().join("res1"));
    let (one, _) = tree.run(serial, dirs(&["t"]));

    assert_eq!(many.summary_lines(), one.summary_lines());
    assert_eq!(many.failed_paths(), one.failed_paths());
    assert_eq!(many.tests, 100);
    assert_eq!(many.failed.len(), 34);
}

#[test]
fn rerun_executes_exactly_the_recorded_failures() {
    let tree = Tree::new();
    tree.unit("t/a.py", "echo 1\n", "2\n");
    tree.unit("t/b.py", "exit 1\n", "\n");
    tree.unit("t/c.py", "echo 3\n", "3\n");

    let (first, _) = tree.run(tree.config(), dirs(&["t"]));
    assert_eq!(first.failed.len(), 2);

    let (_, reporter) = tree.run(tree.config(), Selection::PreviousFailures);
    let ran: Vec<_> = reporter.seen().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ran, vec!["t/a.py", "t/b.py"]);
}

#[test]
fn artifacts_follow_the_latest_verdict() {
    let tree = Tree::new();
    tree.unit("t/flaky.py", "echo before\n", "after\n");
    let (first, _) = tree.run(tree.config(), dirs(&["t"]));
    assert!(first.has_failures());
    assert!(tree.result_file("t_flaky.py.exp").exists());

    tree.write("t/flaky.py", "echo after\n");
    let (second, _) = tree.run(tree.config(), dirs(&["t"]));
    assert!(!second.has_failures());
    assert!(!tree.result_file("t_flaky.py.exp").exists());
    assert!(!tree.result_file("t_flaky.py.out").exists());

    results::clean_failures(&tree.root().join("results")).unwrap();
    assert!(!tree.result_file(results::RECORD_FILE).exists());
}

#[test]
fn special_units_use_templates() {
    let tree = Tree::new();
    tree.unit("cmdline/cmd_banner.py", "# cmdline: -v\necho spinning 1234\n", "spin\\.\\*\n");
    tree.unit("cmdline/cmd_crash.py", "echo noise\nexit 2\n", "CRASH");
    let (result, reporter) = tree.run(tree.config(), dirs(&["cmdline"]));
    assert_eq!(reporter.status_of("cmdline/cmd_banner.py"), Some(Status::Pass));
    assert_eq!(reporter.status_of("cmdline/cmd_crash.py"), Some(Status::Pass));
    assert_eq!(result.passed, 2);
}

#[test]
fn precompiled_units_run_as_modules() {
    let tree = Tree::new();
    tree.unit("t/ok.py", "echo source\n", "compiled\n");
    tree.unit("t/bad.py", "syntax_error\n", "never\n");
    let mut config = tree.config().with_via_mpy(true);
    config.tools.mpy_cross = tree.executable("bin/mpy-cross", FAKE_COMPILER);

    let (result, reporter) = tree.run(config, dirs(&["t"]));

    assert_eq!(reporter.status_of("t/ok.py"), Some(Status::Pass));
    assert_eq!(reporter.status_of("t/bad.py"), Some(Status::Crash));
    assert_eq!(result.failed.len(), 1);
    assert_eq!(
        fs::read_to_string(tree.result_file("t_bad.py.out")).unwrap(),
        "mpy-cross crash\nSyntaxError: invalid syntax\n"
    );
    let leftovers: Vec<_> = fs::read_dir(tree.root().join("t"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".mpy"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn interactive_units_are_typed_into_a_terminal() {
    let tree = Tree::new();
    tree.unit("cmdline/repl_prompt.py", "1 + 1\nprint(2)\n", "prompt on tty\n########\n");
    let (result, reporter) = tree.run(tree.config(), dirs(&["cmdline"]));
    assert_eq!(reporter.status_of("cmdline/repl_prompt.py"), Some(Status::Pass));
    assert_eq!(result.passed, 1);
}

#[test]
fn filters_drop_units_silently() {
    let tree = Tree::new();
    tree.unit("t/keep.py", "echo 1\n", "1\n");
    tree.unit("t/drop.py", "echo 1\n", "2\n");
    let request = RunRequest::new(tree.config())
        .with_selection(dirs(&["t"]))
        .with_filter(crossrun_core::filter::FilterAction::Exclude, "drop");
    let reporter = Collect::default();
    let result = session::run(request, &reporter).unwrap();
    assert_eq!(result.tests, 1);
    assert!(result.skipped.is_empty());
    assert_eq!(reporter.seen(), vec![("t/keep.py".to_string(), Status::Pass)]);
}

#[test]
fn node_host_receives_module_and_unit() {
    let tree = Tree::new();
    let host = tree.executable("bin/node", "#!/bin/sh\necho \"$@\"\n");
    let unit = tree.write("t/x.py", "");
    let mut config = tree.config();
    config.tools.micropython_mjs = PathBuf::from("/build/micropython.mjs");
    let runner = NodeHostedRunner::from_config(&config).with_host(&host);
    let outcome = runner.run(&unit, false).unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed(format!("/build/micropython.mjs {}\n", unit.display()).into_bytes())
    );
}
