//! Out-of-band output markers.
//!
//! A sentinel is not program output: it is appended to (or replaces) the captured bytes to
//! record how a run ended.

/// Appended when the target exits non-zero or raises an uncaught error.
pub const CRASH: &[u8] = b"CRASH";

/// Appended when the target exceeds its wall-clock budget.
pub const TIMEOUT: &[u8] = b"TIMEOUT";

/// Printed by a target that asks for the unit to be skipped.
pub const SKIP: &[u8] = b"SKIP\n";

/// Embedded `SKIP` in the middle of special-test output (surrounded by interpreter noise).
pub const SKIP_EMBEDDED: &[u8] = b"\nSKIP\n";

/// Expected output recorded when the reference interpreter itself fails.
pub const REFERENCE_CRASH: &[u8] = b"CPYTHON3 CRASH";

/// Prefix for expected/actual output when the ahead-of-time compiler fails.
pub const COMPILER_CRASH: &[u8] = b"mpy-cross crash\n";

/// Banner a remote device prints once its soft reset after a skip has completed.
pub const SOFT_RESET_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n";

/// Check whether `output` is exactly the target-requested skip marker.
pub fn is_skip(output: &[u8]) -> bool {
    output == SKIP
}

/// Check whether `output` ends in the timeout marker.
pub fn is_timeout(output: &[u8]) -> bool {
    output.ends_with(TIMEOUT)
}

/// Check whether a special test printed `SKIP` somewhere inside its output.
pub fn contains_embedded_skip(output: &[u8]) -> bool {
    output.windows(SKIP_EMBEDDED.len()).any(|w| w == SKIP_EMBEDDED)
}
