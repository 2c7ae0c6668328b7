//! Skip policy: a declarative table from conditions to skipped units.
//!
//! Every entry pairs a [`Condition`] with what it skips: explicit unit identities, an identity
//! prefix, or a [`UnitTrait`] predicate. [`SkipSet::build`] evaluates the table once against a
//! [`PolicyContext`] before scheduling; the result is then only queried.
//!
//! Many target-keyed entries record hardware limits or long-standing workarounds whose reason
//! cannot be recovered from behavior alone. They are kept verbatim as data, with the short note
//! that came with them.

use std::collections::{BTreeMap, BTreeSet};

use crate::capability::{Capability, CapabilityVector};
use crate::target::TargetId;
use crate::unit::{UnitTrait, derive_traits, unit_name};

/// Environment variables consulted by [`Condition::EnvEquals`].
pub const POLICY_ENV_KEYS: &[&str] = &["GITHUB_ACTIONS", "RUNNER_OS", "CI_BUILD_CONFIGURATION"];

/// When a skip entry applies.
#[derive(Debug, Clone, Copy)]
pub enum Condition {
    /// The capability probed as unavailable.
    Missing(Capability),
    /// Float precision (in bits) is strictly below the value.
    FloatPrecisionBelow(i64),
    TargetIn(&'static [TargetId]),
    TargetNotIn(&'static [TargetId]),
    /// The run uses the native emitter.
    NativeEmit,
    /// The host is Windows without a mingw toolchain.
    WindowsHost,
    EnvEquals(&'static str, &'static str),
    All(&'static [Condition]),
}

/// What a skip entry removes from the run.
#[derive(Debug, Clone, Copy)]
pub enum SkipEntry {
    Paths(&'static [&'static str]),
    Prefix(&'static str),
    Trait(UnitTrait),
}

/// One row of the skip table.
#[derive(Debug, Clone, Copy)]
pub struct SkipRule {
    pub when: Condition,
    pub skip: SkipEntry,
    pub note: &'static str,
}

/// Inputs the table is evaluated against.
#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    pub target: TargetId,
    pub capabilities: &'a CapabilityVector,
    pub native_emit: bool,
    pub windows_host: bool,
    /// Values of [`POLICY_ENV_KEYS`] that are set.
    pub env: BTreeMap<String, String>,
}

impl Condition {
    pub fn holds(&self, ctx: &PolicyContext<'_>) -> bool {
        match self {
            Condition::Missing(cap) => !ctx.capabilities.supports(*cap),
            Condition::FloatPrecisionBelow(bits) => ctx.capabilities.float_precision() < *bits,
            Condition::TargetIn(targets) => targets.contains(&ctx.target),
            Condition::TargetNotIn(targets) => !targets.contains(&ctx.target),
            Condition::NativeEmit => ctx.native_emit,
            Condition::WindowsHost => ctx.windows_host,
            Condition::EnvEquals(key, value) => ctx.env.get(*key).is_some_and(|v| v == value),
            Condition::All(conditions) => conditions.iter().all(|c| c.holds(ctx)),
        }
    }
}

/// Why a unit is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Explicit,
    Prefix(&'static str),
    Trait(UnitTrait),
}

/// Units removed from a run, decided before any unit executes.
#[derive(Debug, Clone, Default)]
pub struct SkipSet {
    explicit: BTreeSet<String>,
    prefixes: Vec<&'static str>,
    traits: BTreeSet<UnitTrait>,
    native_emit: bool,
}

impl SkipSet {
    /// Evaluate `rules` against `ctx`.
    pub fn build(rules: &[SkipRule], ctx: &PolicyContext<'_>) -> Self {
        let mut set = SkipSet {
            native_emit: ctx.native_emit,
            ..SkipSet::default()
        };
        for rule in rules.iter().filter(|r| r.when.holds(ctx)) {
            match rule.skip {
                SkipEntry::Paths(paths) => set.explicit.extend(paths.iter().map(|p| p.to_string())),
                SkipEntry::Prefix(prefix) => set.prefixes.push(prefix),
                SkipEntry::Trait(t) => {
                    set.traits.insert(t);
                }
            }
        }
        set
    }

    pub fn add_explicit(&mut self, id: impl Into<String>) {
        self.explicit.insert(id.into());
    }

    /// Why `id` is skipped, or `None` when it runs. Traits are derived from the unit's name.
    pub fn reason(&self, id: &str) -> Option<SkipReason> {
        self.reason_with_traits(id, &derive_traits(unit_name(id), self.native_emit))
    }

    /// Why the unit `id` with `traits` is skipped.
    ///
    /// Explicit entries are checked first, then prefixes, then traits.
    pub fn reason_with_traits(&self, id: &str, traits: &[UnitTrait]) -> Option<SkipReason> {
        if self.explicit.contains(id) {
            return Some(SkipReason::Explicit);
        }
        if let Some(prefix) = self.prefixes.iter().find(|p| id.starts_with(**p)) {
            return Some(SkipReason::Prefix(*prefix));
        }
        traits
            .iter()
            .find(|t| self.traits.contains(t))
            .map(|t| SkipReason::Trait(*t))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.reason(id).is_some()
    }

    pub fn explicit_len(&self) -> usize {
        self.explicit.len()
    }
}

// ============================================================================
// The table
// ============================================================================

const fn rule(when: Condition, skip: SkipEntry, note: &'static str) -> SkipRule {
    SkipRule { when, skip, note }
}

const fn gate(cap: Capability, t: UnitTrait) -> SkipRule {
    rule(Condition::Missing(cap), SkipEntry::Trait(t), "capability gate")
}

const ALL_FLOAT_EXTMOD: &[&str] = &[
    "extmod/uctypes_le_float.py",
    "extmod/uctypes_native_float.py",
    "extmod/uctypes_sizeof_float.py",
    "extmod/json_dumps_float.py",
    "extmod/json_loads_float.py",
    "extmod/random_extra_float.py",
    "misc/rge_sm.py",
];

const WEBASSEMBLY_SKIPS: &[&str] = &[
    "basics/string_format_modulo.py",
    "basics/string_strip.py",
    "extmod/asyncio_basic2.py",
    "extmod/asyncio_cancel_self.py",
    "extmod/asyncio_current_task.py",
    "extmod/asyncio_exception.py",
    "extmod/asyncio_gather_finished_early.py",
    "extmod/asyncio_get_event_loop.py",
    "extmod/asyncio_heaplock.py",
    "extmod/asyncio_loop_stop.py",
    "extmod/asyncio_new_event_loop.py",
    "extmod/asyncio_threadsafeflag.py",
    "extmod/asyncio_wait_for_fwd.py",
    "extmod/binascii_a2b_base64.py",
    "extmod/re_stack_overflow.py",
    "extmod/time_res.py",
    "extmod/vfs_posix.py",
    "extmod/vfs_posix_enoent.py",
    "extmod/vfs_posix_paths.py",
    "extmod/vfs_userfs.py",
    "micropython/emg_exc.py",
    "micropython/extreme_exc.py",
    "micropython/heapalloc_exc_compressed_emg_exc.py",
];

const NATIVE_EMIT_SKIPS: &[&str] = &[
    "basics/gen_yield_from_close.py",
    "basics/async_with.py",
    "basics/async_with2.py",
    "basics/async_with_break.py",
    "basics/async_with_return.py",
    "basics/try_reraise.py",
    "basics/try_reraise2.py",
    "basics/annotate_var.py",
    "basics/del_deref.py",
    "basics/del_local.py",
    "basics/exception_chain.py",
    "basics/scope_implicit.py",
    "basics/sys_tracebacklimit.py",
    "basics/try_finally_return2.py",
    "basics/unboundlocal.py",
    "basics/chained_exception.py",
    "circuitpython/traceback_test.py",
    "circuitpython/traceback_test_chained.py",
    "extmod/asyncio_event.py",
    "extmod/asyncio_lock.py",
    "extmod/asyncio_micropython.py",
    "extmod/asyncio_wait_for.py",
    "misc/features.py",
    "misc/print_exception.py",
    "misc/sys_exc_info.py",
    "misc/sys_settrace_features.py",
    "misc/sys_settrace_generator.py",
    "misc/sys_settrace_loop.py",
    "micropython/emg_exc.py",
    "micropython/heapalloc_traceback.py",
    "micropython/opt_level_lineno.py",
    "micropython/schedule.py",
    "stress/bytecode_limit.py",
];

/// The skip table used for every run.
pub const SKIP_RULES: &[SkipRule] = &[
    gate(Capability::Native, UnitTrait::Native),
    gate(Capability::Endian, UnitTrait::Endian),
    gate(Capability::IntBig, UnitTrait::IntBig),
    gate(Capability::Bytearray, UnitTrait::Bytearray),
    gate(Capability::SetType, UnitTrait::SetType),
    gate(Capability::Slice, UnitTrait::Slice),
    gate(Capability::Async, UnitTrait::Async),
    gate(Capability::Const, UnitTrait::Const),
    gate(Capability::ReverseOps, UnitTrait::ReverseOp),
    gate(Capability::IoModule, UnitTrait::IoModule),
    gate(Capability::Fstring, UnitTrait::Fstring),
    rule(
        Condition::Missing(Capability::InlineAsmThumb2),
        SkipEntry::Paths(&[
            "inlineasm/asmbcc.py",
            "inlineasm/asmbitops.py",
            "inlineasm/asmconst.py",
            "inlineasm/asmdiv.py",
            "inlineasm/asmfpaddsub.py",
            "inlineasm/asmfpcmp.py",
            "inlineasm/asmfpldrstr.py",
            "inlineasm/asmfpmuldiv.py",
            "inlineasm/asmfpsqrt.py",
            "inlineasm/asmit.py",
            "inlineasm/asmspecialregs.py",
        ]),
        "needs Thumb2 inline assembler",
    ),
    rule(
        Condition::Missing(Capability::ReplEmacs),
        SkipEntry::Paths(&["cmdline/repl_emacs_keys.py"]),
        "needs emacs key bindings",
    ),
    rule(
        Condition::Missing(Capability::ReplWordsMove),
        SkipEntry::Paths(&["cmdline/repl_words_move.py"]),
        "needs word movement at the prompt",
    ),
    rule(
        Condition::EnvEquals("GITHUB_ACTIONS", "true"),
        SkipEntry::Paths(&["thread/stress_schedule.py"]),
        "unreliable on hosted CI",
    ),
    rule(
        Condition::All(&[
            Condition::EnvEquals("GITHUB_ACTIONS", "true"),
            Condition::EnvEquals("RUNNER_OS", "Windows"),
            Condition::EnvEquals("CI_BUILD_CONFIGURATION", "Debug"),
        ]),
        SkipEntry::Paths(&["misc/sys_settrace_features.py"]),
        "stack overflow on Windows debug builds",
    ),
    rule(
        Condition::FloatPrecisionBelow(1),
        SkipEntry::Paths(ALL_FLOAT_EXTMOD),
        "needs floats",
    ),
    rule(
        Condition::FloatPrecisionBelow(32),
        SkipEntry::Paths(&[
            "float/float2int_intbig.py",
            "float/string_format.py",
            "float/bytes_construct.py",
            "float/bytearray_construct.py",
            "float/float_format_ints_power10.py",
        ]),
        "needs fp32",
    ),
    rule(
        Condition::FloatPrecisionBelow(64),
        SkipEntry::Paths(&[
            "float/float_divmod.py",
            "float/float2int_doubleprec_intbig.py",
            "float/float_format_ints_doubleprec.py",
            "float/float_parse_doubleprec.py",
        ]),
        "needs double precision",
    ),
    rule(
        Condition::Missing(Capability::Complex),
        SkipEntry::Paths(&[
            "float/complex1.py",
            "float/complex1_intbig.py",
            "float/complex_reverse_op.py",
            "float/complex_special_methods.py",
            "float/int_big_float.py",
            "float/true_value.py",
            "float/types.py",
            "float/complex_dunder.py",
        ]),
        "needs complex numbers",
    ),
    rule(
        Condition::Missing(Capability::Coverage),
        SkipEntry::Paths(&[
            "cmdline/cmd_parsetree.py",
            "cmdline/repl_sys_ps1_ps2.py",
            "extmod/ssl_poll.py",
        ]),
        "needs a coverage build",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Rp2, TargetId::Unix]),
        SkipEntry::Prefix("thread/mutate_"),
        "no GIL",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Rp2]),
        SkipEntry::Paths(&[
            "thread/stress_heap.py",
            "thread/thread_lock2.py",
            "thread/thread_lock3.py",
            "thread/thread_shared2.py",
        ]),
        "needs many threads",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Zephyr]),
        SkipEntry::Paths(&["thread/stress_heap.py", "thread/thread_lock3.py"]),
        "needs many threads",
    ),
    rule(
        Condition::TargetNotIn(&[TargetId::Unix]),
        SkipEntry::Paths(&["basics/exception_chain.py", "micropython/meminfo.py"]),
        "output differs from the unix port",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Wipy]),
        SkipEntry::Paths(&[
            "misc/print_exception.py",
            "extmod/uctypes_bytearray.py",
            "extmod/uctypes_le.py",
            "extmod/uctypes_native_le.py",
            "extmod/uctypes_ptr_le.py",
            "extmod/uctypes_ptr_native_le.py",
            "extmod/uctypes_sizeof.py",
            "extmod/uctypes_sizeof_native.py",
            "extmod/uctypes_array_assign_le.py",
            "extmod/uctypes_array_assign_native_le.py",
            "extmod/heapq1.py",
            "extmod/random_basic.py",
            "extmod/random_extra.py",
        ]),
        "module not available",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Esp8266]),
        SkipEntry::Paths(&[
            "micropython/viper_args.py",
            "micropython/viper_binop_arith.py",
            "misc/rge_sm.py",
        ]),
        "too large",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Minimal]),
        SkipEntry::Paths(&[
            "basics/class_inplace_op.py",
            "basics/subclass_native_init.py",
            "misc/rge_sm.py",
            "micropython/opt_level.py",
        ]),
        "minimal build",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Nrf]),
        SkipEntry::Paths(&[
            "basics/memoryview1.py",
            "extmod/random_basic.py",
            "micropython/opt_level.py",
            "misc/non_compliant.py",
        ]),
        "feature not implemented",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Nrf]),
        SkipEntry::Prefix("basics/io_"),
        "no io module",
    ),
    rule(
        Condition::TargetIn(&[TargetId::RenesasRa]),
        SkipEntry::Paths(&["extmod/time_time_ns.py"]),
        "rtc has no nanoseconds",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Qemu]),
        SkipEntry::Paths(&[
            "inlineasm/asmfpaddsub.py",
            "inlineasm/asmfpcmp.py",
            "inlineasm/asmfpldrstr.py",
            "inlineasm/asmfpmuldiv.py",
            "inlineasm/asmfpsqrt.py",
        ]),
        "needs Cortex-M4",
    ),
    rule(
        Condition::TargetIn(&[TargetId::Webassembly]),
        SkipEntry::Paths(WEBASSEMBLY_SKIPS),
        "host runtime limitation",
    ),
    rule(
        Condition::WindowsHost,
        SkipEntry::Paths(&["import/import_file.py"]),
        "path separator differs",
    ),
    rule(
        Condition::NativeEmit,
        SkipEntry::Paths(NATIVE_EMIT_SKIPS),
        "not supported by the native emitter",
    ),
];
