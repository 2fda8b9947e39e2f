//! Owns executable memory and the optional symbolization sidecars (spec.md
//! C8).

pub mod executable;
pub mod perf;

pub use executable::{Executable, EntryFn};
