//! Target registry.
//!
//! A target name selects two things: the transport used to execute units and the skip-policy
//! entries keyed by that name. Nothing outside this registry and the runner factory should
//! branch on the transport.

use std::fmt;

/// Stable identifier for a supported target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetId {
    Unix,
    Webassembly,
    Pyboard,
    Wipy,
    Esp8266,
    Esp32,
    Minimal,
    Nrf,
    Qemu,
    RenesasRa,
    Rp2,
    Zephyr,
}

/// How units reach the runtime under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// The runtime binary runs as a local child process.
    LocalProcess,
    /// A host runtime (`node`) loads the runtime as a module.
    NodeHosted,
    /// A device reached over a serial (or network) prompt; a singleton.
    RemoteSerial,
}

impl Transport {
    /// Whether the target can only serve one unit at a time.
    pub fn is_singleton(self) -> bool {
        matches!(self, Transport::RemoteSerial)
    }
}

/// Metadata entry for a target.
#[derive(Debug, Clone, Copy)]
pub struct TargetInfo {
    pub id: TargetId,
    pub canonical: &'static str,
    pub transport: Transport,
    /// Test directories added to [`COMMON_TEST_DIRS`] when no directories are given.
    pub extra_test_dirs: &'static [&'static str],
}

/// Directories every target runs by default.
pub const COMMON_TEST_DIRS: &[&str] = &["basics", "circuitpython", "micropython", "misc", "extmod"];

/// Registry of supported targets.
pub const TARGETS: &[TargetInfo] = &[
    target(
        TargetId::Unix,
        "unix",
        Transport::LocalProcess,
        &["float", "import", "io", "stress", "unicode", "cmdline", "ports/unix"],
    ),
    target(TargetId::Webassembly, "webassembly", Transport::NodeHosted, &[]),
    target(
        TargetId::Pyboard,
        "pyboard",
        Transport::RemoteSerial,
        &["float", "stress", "inlineasm", "ports/stm32"],
    ),
    target(TargetId::Wipy, "wipy", Transport::RemoteSerial, &["ports/cc3200"]),
    target(TargetId::Esp8266, "esp8266", Transport::RemoteSerial, &["float"]),
    target(TargetId::Esp32, "esp32", Transport::RemoteSerial, &["float", "stress", "thread"]),
    target(TargetId::Minimal, "minimal", Transport::RemoteSerial, &["float"]),
    target(TargetId::Nrf, "nrf", Transport::RemoteSerial, &["float"]),
    target(TargetId::Qemu, "qemu", Transport::RemoteSerial, &["float", "inlineasm", "ports/qemu"]),
    target(
        TargetId::RenesasRa,
        "renesas-ra",
        Transport::RemoteSerial,
        &["float", "inlineasm", "ports/renesas-ra"],
    ),
    target(TargetId::Rp2, "rp2", Transport::RemoteSerial, &["float", "stress", "thread", "ports/rp2"]),
    target(TargetId::Zephyr, "zephyr", Transport::RemoteSerial, &[]),
];

const fn target(
    id: TargetId,
    canonical: &'static str,
    transport: Transport,
    extra_test_dirs: &'static [&'static str],
) -> TargetInfo {
    TargetInfo {
        id,
        canonical,
        transport,
        extra_test_dirs,
    }
}

/// Resolve a target name to its id.
pub fn from_str(name: &str) -> Option<TargetId> {
    TARGETS.iter().find(|t| t.canonical == name).map(|t| t.id)
}

/// Return the metadata entry for a target.
pub fn info_for(id: TargetId) -> &'static TargetInfo {
    // Every variant has an entry (see tests/registry_guardrails.rs).
    TARGETS.iter().find(|t| t.id == id).unwrap_or(&TARGETS[0])
}

impl TargetId {
    pub fn as_str(self) -> &'static str {
        info_for(self).canonical
    }

    pub fn transport(self) -> Transport {
        info_for(self).transport
    }

    /// File extensions (without dot) of discoverable units.
    pub fn unit_extensions(self) -> &'static [&'static str] {
        match self {
            TargetId::Webassembly => &["py", "js", "mjs"],
            _ => &["py"],
        }
    }

    /// Directories scanned when the caller names none.
    ///
    /// `compiler_flags` matters for rp2 only: inline assembler tests run when the compiler
    /// targets an ARM architecture.
    pub fn default_test_dirs(self, compiler_flags: &str) -> Vec<&'static str> {
        let mut dirs = COMMON_TEST_DIRS.to_vec();
        dirs.extend_from_slice(info_for(self).extra_test_dirs);
        if self == TargetId::Rp2 && compiler_flags.contains("arm") {
            dirs.push("inlineasm");
        }
        dirs
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of every target, for help text and error messages.
pub fn target_names() -> Vec<&'static str> {
    TARGETS.iter().map(|t| t.canonical).collect()
}
