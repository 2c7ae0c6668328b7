//! Pure policy for the crossrun test harness.
//!
//! Everything the harness decides without touching a process or a file lives here: output
//! normalization and template matching, the capability and probe tables, the skip-policy table,
//! unit traits, include/exclude filters and the target registry.
//!
//! ## Notes
//!
//! - **No IO**, no global state. Tables are `const` data so they can be audited per target.
//! - The `crossrun` crate owns process execution and scheduling and calls into this one.

#![forbid(unsafe_code)]

pub mod capability;
pub mod filter;
pub mod matcher;
pub mod policy;
pub mod probe;
pub mod sentinel;
pub mod target;
pub mod unit;

pub use capability::{Capability, CapabilityValue, CapabilityVector};
pub use matcher::{Comparison, MatchMode};
pub use target::{TargetId, Transport};
pub use unit::UnitTrait;
