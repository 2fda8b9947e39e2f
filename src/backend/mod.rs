//! Machine-dependent pieces: ABI constants, instruction encoding, and the
//! single-pass assembler that turns an assigned, translated instruction
//! stream into executable bytes (spec.md §5, C7-C8).

pub mod abi;
pub mod assembler;
pub mod encode;

pub use assembler::{AssembledCode, Assembler, SourceMapEntry};
pub use encode::{CodeSink, PatchSite};
