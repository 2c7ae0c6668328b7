//! Test-unit identity and the traits derived from a unit's file name.
//!
//! Identity is the normalized path as the unit was discovered (`basics/int_big1.py`), which
//! is also the key used by explicit skip entries and the persisted failure record.

/// Units whose expected output is a template rather than literal text.
pub const SPECIAL_UNITS: &[&str] = &[
    "micropython/meminfo.py",
    "basics/bytes_compare3.py",
    "basics/builtin_help.py",
    "thread/thread_exc2.py",
    "esp32/partition_ota.py",
    "circuitpython/traceback_test.py",
    "circuitpython/traceback_test_chained.py",
];

/// Top-level directories of the test tree whose units exercise the command-line program
/// itself; every unit directly inside them is special.
pub const SPECIAL_DIRS: &[&str] = &["cmdline", "feature_check"];

/// Prefix of units that drive the interactive prompt through a pseudo-terminal.
pub const INTERACTIVE_PREFIX: &str = "repl_";

/// Units that only use slicing incidentally, so slice support gates them too.
pub const MISC_SLICE_UNITS: &[&str] = &[
    "builtin_range",
    "bytearray1",
    "class_super",
    "containment",
    "errno1",
    "fun_str",
    "generator1",
    "globals_del",
    "memoryview1",
    "memoryview_gc",
    "object1",
    "python34",
    "string_format_modulo",
    "struct_endian",
];

/// Normalize a discovered path into a unit identity.
///
/// ## Examples
/// ```rust
/// use crossrun_core::unit::normalize_id;
/// assert_eq!(normalize_id(r".\basics\list1.py"), "basics/list1.py");
/// ```
pub fn normalize_id(path: &str) -> String {
    let id = path.replace('\\', "/");
    match id.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => id,
    }
}

/// Flatten an identity into a file name for result artifacts.
///
/// ## Examples
/// ```rust
/// use crossrun_core::unit::sanitize_id;
/// assert_eq!(sanitize_id("../ports/unix/ffi.py"), "__ports_unix_ffi.py");
/// ```
pub fn sanitize_id(id: &str) -> String {
    id.replace("..", "_").replace("./", "").replace('/', "_")
}

/// File stem of an identity (`basics/int_big1.py` → `int_big1`).
pub fn unit_name(id: &str) -> &str {
    let file = id.rsplit('/').next().unwrap_or(id);
    match file.rfind('.') {
        Some(dot) if dot > 0 => &file[..dot],
        _ => file,
    }
}

/// Whether a unit's output must be matched as a template.
pub fn is_special(id: &str) -> bool {
    let parent = id.rsplit_once('/').map(|(dir, _)| dir);
    SPECIAL_UNITS.contains(&id) || SPECIAL_DIRS.iter().any(|dir| parent == Some(*dir))
}

/// Whether a unit feeds its source line by line into the interactive prompt.
pub fn is_interactive(id: &str) -> bool {
    let file = id.rsplit('/').next().unwrap_or(id);
    file.starts_with(INTERACTIVE_PREFIX)
}

// ============================================================================
// Traits
// ============================================================================

/// A feature a unit depends on, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitTrait {
    Native,
    Endian,
    IntBig,
    Bytearray,
    SetType,
    Slice,
    Async,
    Const,
    ReverseOp,
    IoModule,
    Fstring,
}

/// Every trait, in declaration order.
pub const ALL_TRAITS: &[UnitTrait] = &[
    UnitTrait::Native,
    UnitTrait::Endian,
    UnitTrait::IntBig,
    UnitTrait::Bytearray,
    UnitTrait::SetType,
    UnitTrait::Slice,
    UnitTrait::Async,
    UnitTrait::Const,
    UnitTrait::ReverseOp,
    UnitTrait::IoModule,
    UnitTrait::Fstring,
];

impl UnitTrait {
    /// Decide whether a unit named `name` has this trait.
    ///
    /// `native_emit` is set when the whole run uses the native emitter, which makes every unit
    /// native.
    pub fn applies(self, name: &str, native_emit: bool) -> bool {
        match self {
            UnitTrait::Native => native_emit || name.starts_with("native_") || name.starts_with("viper_"),
            UnitTrait::Endian => name.ends_with("_endian"),
            UnitTrait::IntBig => name.starts_with("int_big") || name.ends_with("_intbig"),
            UnitTrait::Bytearray => name.starts_with("bytearray") || name.ends_with("_bytearray"),
            UnitTrait::SetType => name.starts_with("set_") || name.starts_with("frozenset") || name.ends_with("_set"),
            UnitTrait::Slice => name.contains("slice") || MISC_SLICE_UNITS.contains(&name),
            UnitTrait::Async => name.starts_with("async_") || name.starts_with("asyncio_"),
            UnitTrait::Const => name.starts_with("const"),
            UnitTrait::ReverseOp => name.contains("reverse_op"),
            UnitTrait::IoModule => name.starts_with("io_"),
            UnitTrait::Fstring => name.starts_with("string_fstring"),
        }
    }
}

/// Derive every trait of a unit named `name`, in declaration order.
pub fn derive_traits(name: &str, native_emit: bool) -> Vec<UnitTrait> {
    ALL_TRAITS
        .iter()
        .copied()
        .filter(|t| t.applies(name, native_emit))
        .collect()
}
