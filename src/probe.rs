//! Feature probing.
//!
//! Every entry of [`PROBES`] is run on the target once, before any unit, and classified into
//! the [`CapabilityVector`] that drives the skip policy. A probe that cannot be launched at
//! all aborts the run: without the vector no unit can be gated.

use crossrun_core::matcher::normalize;
use crossrun_core::probe::{Classifier, PROBES, TARGET_INFO_PROBE, classify, march_flags};
use crossrun_core::unit::INTERACTIVE_PREFIX;
use crossrun_core::{CapabilityVector, Transport};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::expected::ReferenceInterpreter;
use crate::target::TargetRunner;

/// Runs probe scripts on one target.
pub struct FeatureProbe<'a> {
    runner: &'a dyn TargetRunner,
    config: &'a HarnessConfig,
    reference: &'a ReferenceInterpreter,
}

impl<'a> FeatureProbe<'a> {
    pub fn new(runner: &'a dyn TargetRunner, config: &'a HarnessConfig, reference: &'a ReferenceInterpreter) -> Self {
        FeatureProbe {
            runner,
            config,
            reference,
        }
    }

    /// Run every probe and classify the results.
    ///
    /// ## Errors
    /// - [`HarnessError::Probe`] when the target cannot run a probe script.
    #[tracing::instrument(skip_all, fields(target = %self.config.target))]
    pub fn capabilities(&self) -> HarnessResult<CapabilityVector> {
        let mut caps = CapabilityVector::new();
        for probe in PROBES {
            let output = self.run(probe.script)?;
            let reference = match probe.classifier {
                Classifier::MatchesReference => self
                    .reference
                    .run(&self.config.probe_dir().join(probe.script))
                    .map(|out| normalize(&out)),
                _ => None,
            };
            let value = classify(probe.classifier, &output, reference.as_deref());
            tracing::debug!(script = probe.script, ?value, "probe classified");
            caps.set(probe.capability, value);
        }
        Ok(caps)
    }

    /// Ask the target for its native architecture, as compiler flags.
    pub fn detect_arch_flags(&self) -> HarnessResult<Option<String>> {
        let output = self.run(TARGET_INFO_PROBE)?;
        Ok(march_flags(&output))
    }

    /// Normalized output of one probe script.
    fn run(&self, script: &'static str) -> HarnessResult<Vec<u8>> {
        if self.config.target.transport() == Transport::RemoteSerial && script.starts_with(INTERACTIVE_PREFIX) {
            return Ok(Vec::new());
        }
        let path = self.config.probe_dir().join(script);
        let outcome = self
            .runner
            .run(&path, true)
            .map_err(|source| HarnessError::Probe {
                script: script.to_string(),
                source,
            })?;
        Ok(normalize(outcome.output()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use crossrun_core::{Capability, CapabilityValue, TargetId};

    use crate::target::{RunOutcome, TargetError};

    /// Answers probes from a table keyed by file name.
    struct Scripted {
        answers: HashMap<&'static str, &'static [u8]>,
        fail: bool,
    }

    impl TargetRunner for Scripted {
        fn run(&self, unit: &Path, is_special: bool) -> Result<RunOutcome, TargetError> {
            assert!(is_special);
            if self.fail {
                return Err(TargetError::Unavailable("no device".into()));
            }
            let name = unit.file_name().unwrap().to_str().unwrap();
            let out = self.answers.get(name).copied().unwrap_or(&b"CRASH"[..]);
            Ok(RunOutcome::Completed(out.to_vec()))
        }
    }

    fn config(target: TargetId) -> HarnessConfig {
        let mut config = HarnessConfig::new(target, "/t");
        config.tools.cpython3 = PathBuf::from("/nonexistent/python");
        config
    }

    #[test]
    fn outputs_become_capabilities() {
        let runner = Scripted {
            answers: [
                ("native_check.py", &b"native\r\n"[..]),
                ("float.py", &b"64\n"[..]),
                ("repl_emacs_check.py", &b">>> True\n"[..]),
            ]
            .into(),
            fail: false,
        };
        let config = config(TargetId::Unix);
        let reference = ReferenceInterpreter::from_config(&config);
        let caps = FeatureProbe::new(&runner, &config, &reference).capabilities().unwrap();
        assert!(caps.supports(Capability::Native));
        assert!(caps.supports(Capability::ReplEmacs));
        assert_eq!(caps.float_precision(), 64);
        assert_eq!(caps.get(Capability::Slice), Some(CapabilityValue::Unsupported));
        // No reference run available, so byte order cannot be confirmed.
        assert!(!caps.supports(Capability::Endian));
    }

    #[test]
    fn interactive_probes_are_empty_on_remote_targets() {
        let runner = Scripted {
            answers: [("repl_emacs_check.py", &b"True\n"[..])].into(),
            fail: false,
        };
        let config = config(TargetId::Pyboard);
        let reference = ReferenceInterpreter::from_config(&config);
        let caps = FeatureProbe::new(&runner, &config, &reference).capabilities().unwrap();
        assert!(!caps.supports(Capability::ReplEmacs));
    }

    #[test]
    fn unreachable_target_is_fatal() {
        let runner = Scripted {
            answers: HashMap::new(),
            fail: true,
        };
        let config = config(TargetId::Unix);
        let reference = ReferenceInterpreter::from_config(&config);
        let err = FeatureProbe::new(&runner, &config, &reference).capabilities().unwrap_err();
        assert!(matches!(err, HarnessError::Probe { ref script, .. } if script == "native_check.py"));
    }

    #[test]
    fn architecture_becomes_compiler_flags() {
        let runner = Scripted {
            answers: [("target_info.py", &b"armv7emsp\r\n"[..])].into(),
            fail: false,
        };
        let config = config(TargetId::Unix);
        let reference = ReferenceInterpreter::from_config(&config);
        let probe = FeatureProbe::new(&runner, &config, &reference);
        assert_eq!(probe.detect_arch_flags().unwrap().as_deref(), Some("-march=armv7emsp"));
    }
}
