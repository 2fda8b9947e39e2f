//! Flounder: an x86-64 JIT code generator for a compiling query engine.
//!
//! A client builds a [`ir::Program`] out of virtual registers, labels, and a
//! closed set of IR instructions (`ir`), optionally using the scoped
//! builders in `control` for structured If/While/ForRange/FunctionCall
//! shapes. The `Program` is then handed to a [`compilation::Compiler`],
//! which runs liveness analysis (`compilation::liveness`), linear-scan
//! register allocation (`compilation::allocator`), spill-aware register
//! assignment (`compilation::assigner`), peephole translation
//! (`compilation::translator`), and x86-64 encoding (`backend`) to produce a
//! [`runtime::executable::Executable`] owning a callable native function
//! pointer.
//!
//! ```no_run
//! use flounder::compilation::{Compiler, CompilerOptions};
//! use flounder::ir::{Arena, Program, RegisterWidth, SignType};
//!
//! let arena = Arena::new();
//! let mut program = Program::new(&arena);
//! let x = program.new_argument_vreg(RegisterWidth::R64, SignType::Signed);
//! program.get_argument(0, x);
//! program.set_return(x);
//! program.clear_vreg(x);
//! program.ret();
//!
//! let executable = Compiler::new(CompilerOptions::default()).compile(&program).unwrap();
//! let entry = executable.entry_point();
//! let result = unsafe { entry(42, 0, 0, 0, 0, 0) };
//! assert_eq!(result, 42);
//! ```

pub mod backend;
pub mod compilation;
pub mod control;
pub mod debug;
pub mod error;
pub mod ir;
pub mod runtime;

pub use error::{CompileError, CompileResult};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
