//! Executable code pages (spec.md §4.10, C8): copied into a fresh
//! read-write-execute mapping, then flipped read-execute on finalize. A
//! writable-and-executable mapping is never exposed to callers.

use region::{Allocation, Protection};

use crate::backend::assembler::{AssembledCode, SourceMapEntry};
use crate::compilation::compiler::CompilerOptions;
use crate::error::{CompileError, CompileResult};
use crate::runtime::perf;

/// Every Flounder function is invoked as `void fn(arg0, ..., arg5)` with up
/// to six pointer-sized arguments and one pointer-sized return value
/// (spec.md §6). Floating-point is not supported.
pub type EntryFn = unsafe extern "C" fn(i64, i64, i64, i64, i64, i64) -> i64;

/// One compiled program's machine code, alive for as long as any caller may
/// still invoke its entry point. Dropping it unmaps the code pages.
pub struct Executable {
    region: Allocation,
    code_len: usize,
    source_map: Vec<SourceMapEntry>,
    assembly_text: Option<Vec<String>>,
}

impl Executable {
    pub(crate) fn finalize(
        assembled: AssembledCode,
        assembly_lines: Option<Vec<String>>,
        options: &CompilerOptions,
    ) -> CompileResult<Executable> {
        let AssembledCode { bytes, source_map } = assembled;
        if bytes.is_empty() {
            return Err(CompileError::Compilation("translator produced zero bytes of code".into()));
        }

        let mut mapping = region::alloc(bytes.len(), Protection::READ_WRITE_EXECUTE)
            .map_err(|e| CompileError::Compilation(format!("could not map executable memory: {e}")))?;

        // SAFETY: `mapping` is a fresh mapping at least `bytes.len()` bytes
        // long, exclusively owned here until `finalize` returns it.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapping.as_mut_ptr::<u8>(), bytes.len());
        }

        // SAFETY: no other reference to `mapping` exists; this is the one
        // and only RWX -> RX transition this region ever makes.
        unsafe {
            region::protect(mapping.as_ptr::<u8>(), mapping.len(), Protection::READ_EXECUTE)
                .map_err(|e| CompileError::Compilation(format!("could not finalize executable memory: {e}")))?;
        }

        let executable = Executable {
            region: mapping,
            code_len: bytes.len(),
            source_map,
            assembly_text: assembly_lines,
        };

        if options.perf_map {
            perf::write_jit_map(executable.entry_point_addr(), executable.code_len);
        }
        if options.vtune {
            perf::notify_vtune(executable.entry_point_addr(), executable.code_len);
        }

        log::debug!(
            "flounder: finalized {} bytes of executable code at {:#x}",
            executable.code_len,
            executable.entry_point_addr()
        );
        Ok(executable)
    }

    /// The callable entry point. Every compiled Flounder program starts at
    /// byte 0 of its code region.
    pub fn entry_point(&self) -> EntryFn {
        // SAFETY: the region is mapped read-execute and holds a byte stream
        // the translator emitted for a 6-argument, single pointer-sized-
        // return function per spec.md §6's entry-point convention. The
        // caller is responsible for actually supplying that many arguments.
        unsafe { std::mem::transmute::<*const u8, EntryFn>(self.region.as_ptr::<u8>()) }
    }

    fn entry_point_addr(&self) -> usize {
        self.region.as_ptr::<u8>() as usize
    }

    pub fn code_len(&self) -> usize {
        self.code_len
    }

    pub fn source_map(&self) -> &[SourceMapEntry] {
        &self.source_map
    }

    /// The textual compilate, present only when
    /// `CompilerOptions::generate_assembly_text` was set: one line per
    /// translated instruction, in emission order.
    pub fn assembly_text(&self) -> Option<&[String]> {
        self.assembly_text.as_deref()
    }
}
