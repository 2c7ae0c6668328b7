//! Capability registry and the capability vector.
//!
//! A capability is a runtime feature that may be compiled out of a given target build. The
//! vector is filled once from probe results and then only read, so it is a plain value that
//! callers pass around by reference.

use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier for a probed runtime capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Native,
    IntBig,
    Bytearray,
    SetType,
    Slice,
    Async,
    Const,
    ReverseOps,
    IoModule,
    Fstring,
    InlineAsmThumb2,
    ReplEmacs,
    ReplWordsMove,
    FloatPrecision,
    Complex,
    Coverage,
    /// Target byte order agrees with the reference interpreter's.
    Endian,
}

/// Metadata entry for a capability.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityInfo {
    pub id: Capability,
    pub canonical: &'static str,
    pub description: &'static str,
}

/// Registry of every capability the harness knows how to probe.
pub const CAPABILITIES: &[CapabilityInfo] = &[
    info(Capability::Native, "native", "Native and viper code emitters."),
    info(Capability::IntBig, "int_big", "Arbitrary-precision integers."),
    info(Capability::Bytearray, "bytearray", "The bytearray type."),
    info(Capability::SetType, "set", "The set type and set literals."),
    info(Capability::Slice, "slice", "Slice objects."),
    info(Capability::Async, "async", "async/await keywords."),
    info(Capability::Const, "const", "The const() extension."),
    info(Capability::ReverseOps, "reverse_ops", "__rOP__ special methods."),
    info(Capability::IoModule, "io_module", "The io module."),
    info(Capability::Fstring, "fstring", "f-strings."),
    info(Capability::InlineAsmThumb2, "inline_asm_thumb2", "Thumb2 instructions in inline assembler."),
    info(Capability::ReplEmacs, "repl_emacs", "Emacs key bindings at the prompt."),
    info(Capability::ReplWordsMove, "repl_words_move", "Word-wise cursor movement at the prompt."),
    info(Capability::FloatPrecision, "float_precision", "Float precision in bits (0 = no floats)."),
    info(Capability::Complex, "complex", "Complex numbers."),
    info(Capability::Coverage, "coverage", "Coverage build extras."),
    info(Capability::Endian, "endian", "Byte order matches the reference interpreter."),
];

const fn info(id: Capability, canonical: &'static str, description: &'static str) -> CapabilityInfo {
    CapabilityInfo {
        id,
        canonical,
        description,
    }
}

/// Resolve a capability name to its id.
pub fn from_str(name: &str) -> Option<Capability> {
    CAPABILITIES.iter().find(|c| c.canonical == name).map(|c| c.id)
}

/// Return the canonical spelling for a capability.
pub fn as_str(id: Capability) -> &'static str {
    CAPABILITIES
        .iter()
        .find(|c| c.id == id)
        .map(|c| c.canonical)
        .unwrap_or("unknown")
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(as_str(*self))
    }
}

/// Tri-state probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityValue {
    Supported,
    Unsupported,
    Numeric(i64),
}

impl CapabilityValue {
    pub fn from_bool(supported: bool) -> Self {
        if supported {
            CapabilityValue::Supported
        } else {
            CapabilityValue::Unsupported
        }
    }
}

/// Float precision assumed when the float probe was not run.
pub const DEFAULT_FLOAT_PRECISION: i64 = 32;

/// Probe results for one target and configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityVector {
    values: BTreeMap<Capability, CapabilityValue>,
}

impl CapabilityVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A vector in which every capability is supported and floats are double precision.
    pub fn all_supported() -> Self {
        let mut vector = Self::new();
        for cap in CAPABILITIES {
            let value = match cap.id {
                Capability::FloatPrecision => CapabilityValue::Numeric(64),
                _ => CapabilityValue::Supported,
            };
            vector.set(cap.id, value);
        }
        vector
    }

    pub fn set(&mut self, cap: Capability, value: CapabilityValue) {
        self.values.insert(cap, value);
    }

    /// Builder-style [`CapabilityVector::set`].
    pub fn with(mut self, cap: Capability, value: CapabilityValue) -> Self {
        self.set(cap, value);
        self
    }

    pub fn get(&self, cap: Capability) -> Option<CapabilityValue> {
        self.values.get(&cap).copied()
    }

    /// Whether `cap` is available. Capabilities that were never probed count as available,
    /// numeric capabilities count as available when non-zero.
    pub fn supports(&self, cap: Capability) -> bool {
        match self.values.get(&cap) {
            None | Some(CapabilityValue::Supported) => true,
            Some(CapabilityValue::Unsupported) => false,
            Some(CapabilityValue::Numeric(n)) => *n != 0,
        }
    }

    /// Float precision in bits; 0 means the target has no floats.
    pub fn float_precision(&self) -> i64 {
        match self.values.get(&Capability::FloatPrecision) {
            Some(CapabilityValue::Numeric(n)) => *n,
            Some(CapabilityValue::Unsupported) => 0,
            _ => DEFAULT_FLOAT_PRECISION,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, CapabilityValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }
}
