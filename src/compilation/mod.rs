//! The compile-time pipeline: liveness analysis, linear-scan allocation,
//! spill-aware register assignment, peephole translation, and the
//! orchestrating `Compiler` (spec.md C4-C7, "Orchestration").

pub mod allocator;
pub mod assigner;
pub mod compiler;
pub mod liveness;
pub mod translator;

pub use allocator::{Location, RegisterSchedule, LinearScanRegisterAllocator};
pub use assigner::RegisterAssigner;
pub use compiler::{Compiler, CompilerOptions};
pub use liveness::{LiveInterval, LivenessAnalyzer};
pub use translator::Translator;
