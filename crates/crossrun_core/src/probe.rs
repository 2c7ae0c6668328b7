//! Probe table: which script classifies which capability, and how.
//!
//! Probe scripts live in the `feature_check/` directory of the test tree. Running them is the
//! harness's job; this module only owns the table and the classification of their output.

use crate::capability::{Capability, CapabilityValue};

/// Directory (relative to the test tree) holding the probe scripts.
pub const PROBE_DIR: &str = "feature_check";

/// Probe that prints the target's native architecture for the ahead-of-time compiler.
pub const TARGET_INFO_PROBE: &str = "target_info.py";

/// How a probe's output is turned into a capability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classifier {
    /// Supported iff the output equals the literal.
    Equals(&'static [u8]),
    /// Supported unless the output equals the literal.
    NotEquals(&'static [u8]),
    /// Supported iff the output contains the text.
    Contains(&'static str),
    /// The output is an integer; unparsable output means 0.
    Integer,
    /// Supported iff the output equals the reference interpreter's output for the same script.
    MatchesReference,
}

/// One entry of the probe table.
#[derive(Debug, Clone, Copy)]
pub struct ProbeInfo {
    pub capability: Capability,
    pub script: &'static str,
    pub classifier: Classifier,
}

const fn probe(capability: Capability, script: &'static str, classifier: Classifier) -> ProbeInfo {
    ProbeInfo {
        capability,
        script,
        classifier,
    }
}

/// Every probe, in the order they run.
pub const PROBES: &[ProbeInfo] = &[
    probe(Capability::Native, "native_check.py", Classifier::Equals(b"native\n")),
    probe(
        Capability::IntBig,
        "int_big.py",
        Classifier::Equals(b"1000000000000000000000000000000000000000000000\n"),
    ),
    probe(Capability::Bytearray, "bytearray.py", Classifier::Equals(b"bytearray\n")),
    probe(Capability::SetType, "set_check.py", Classifier::Equals(b"{1}\n")),
    probe(Capability::Slice, "slice.py", Classifier::Equals(b"slice\n")),
    probe(Capability::Async, "async_check.py", Classifier::Equals(b"async\n")),
    probe(Capability::Const, "const.py", Classifier::Equals(b"1\n")),
    probe(Capability::ReverseOps, "reverse_ops.py", Classifier::NotEquals(b"TypeError\n")),
    probe(Capability::IoModule, "io_module.py", Classifier::Equals(b"io\n")),
    probe(Capability::Fstring, "fstring.py", Classifier::Equals(b"a=1\n")),
    probe(Capability::InlineAsmThumb2, "inlineasm_thumb2.py", Classifier::Equals(b"thumb2\n")),
    probe(Capability::ReplEmacs, "repl_emacs_check.py", Classifier::Contains("True")),
    probe(Capability::ReplWordsMove, "repl_words_move_check.py", Classifier::Contains("True")),
    probe(Capability::FloatPrecision, "float.py", Classifier::Integer),
    probe(Capability::Complex, "complex.py", Classifier::Equals(b"complex\n")),
    probe(Capability::Coverage, "coverage.py", Classifier::Equals(b"coverage\n")),
    probe(Capability::Endian, "byteorder.py", Classifier::MatchesReference),
];

/// Classify one probe's normalized output.
///
/// ## Parameters
/// - `classifier`: the probe's classification rule.
/// - `output`: normalized target output.
/// - `reference`: the reference interpreter's output, required by
///   [`Classifier::MatchesReference`] only.
///
/// ## Returns
/// - (`CapabilityValue`): `Numeric` for [`Classifier::Integer`], otherwise a flag. A missing
///   reference output classifies as unsupported.
pub fn classify(classifier: Classifier, output: &[u8], reference: Option<&[u8]>) -> CapabilityValue {
    match classifier {
        Classifier::Equals(expected) => CapabilityValue::from_bool(output == expected),
        Classifier::NotEquals(rejected) => CapabilityValue::from_bool(output != rejected),
        Classifier::Contains(needle) => CapabilityValue::from_bool(String::from_utf8_lossy(output).contains(needle)),
        Classifier::Integer => CapabilityValue::Numeric(parse_int(output).unwrap_or(0)),
        Classifier::MatchesReference => CapabilityValue::from_bool(reference == Some(output)),
    }
}

fn parse_int(output: &[u8]) -> Option<i64> {
    std::str::from_utf8(output).ok()?.trim().parse().ok()
}

/// Turn the output of [`TARGET_INFO_PROBE`] into compiler flags.
///
/// ## Examples
/// ```rust
/// use crossrun_core::probe::march_flags;
/// assert_eq!(march_flags(b"armv7m\n").as_deref(), Some("-march=armv7m"));
/// assert_eq!(march_flags(b"None\n"), None);
/// ```
pub fn march_flags(output: &[u8]) -> Option<String> {
    let arch = String::from_utf8_lossy(output).trim().to_string();
    if arch.is_empty() || arch == "None" {
        None
    } else {
        Some(format!("-march={arch}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_is_exact() {
        assert_eq!(classify(Classifier::Equals(b"io\n"), b"io\n", None), CapabilityValue::Supported);
        assert_eq!(classify(Classifier::Equals(b"io\n"), b"CRASH", None), CapabilityValue::Unsupported);
    }

    #[test]
    fn not_equals_rejects_only_literal() {
        let c = Classifier::NotEquals(b"TypeError\n");
        assert_eq!(classify(c, b"TypeError\n", None), CapabilityValue::Unsupported);
        assert_eq!(classify(c, b"", None), CapabilityValue::Supported);
    }

    #[test]
    fn integer_falls_back_to_zero() {
        assert_eq!(classify(Classifier::Integer, b"64\n", None), CapabilityValue::Numeric(64));
        assert_eq!(classify(Classifier::Integer, b"CRASH", None), CapabilityValue::Numeric(0));
    }

    #[test]
    fn reference_comparison() {
        let c = Classifier::MatchesReference;
        assert_eq!(classify(c, b"little\n", Some(b"little\n")), CapabilityValue::Supported);
        assert_eq!(classify(c, b"big\n", Some(b"little\n")), CapabilityValue::Unsupported);
        assert_eq!(classify(c, b"little\n", None), CapabilityValue::Unsupported);
    }
}
