//! Single-pass label resolution and code emission (spec.md C7, "label
//! resolution via name-to-offset map").
//!
//! Every `Jump` is encoded as a fixed-size rel32 operand, so an
//! instruction's length never depends on an unresolved label: one linear
//! pass can emit every byte (with zeroed rel32 placeholders at jump sites)
//! while recording each `Section`'s offset, then a final backpatch sweep
//! fills in every recorded jump site. This sidesteps the classic
//! iterative jump-shrinking fixed point real assemblers need for
//! variable-length branch encodings.

use std::collections::HashMap;

use crate::backend::encode::{encode_op, PatchSite};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Instruction, Op};

/// One encoded instruction's source offset, kept only when
/// `Assembler::with_source_map` is used (spec.md §4.11 "optional
/// assembly-text/source-offset tables").
#[derive(Debug, Clone, Copy)]
pub struct SourceMapEntry {
    pub code_offset: u32,
    pub instruction_index: usize,
}

/// The result of assembling one instruction stream: raw bytes plus the
/// optional per-instruction offset table.
pub struct AssembledCode {
    pub bytes: Vec<u8>,
    pub source_map: Vec<SourceMapEntry>,
}

pub struct Assembler {
    record_source_map: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Assembler {
            record_source_map: false,
        }
    }

    pub fn with_source_map(mut self, enabled: bool) -> Self {
        self.record_source_map = enabled;
        self
    }

    /// Encodes `instructions` into one contiguous byte buffer, resolving
    /// every jump target against the `Section` labels found in the same
    /// stream.
    pub fn assemble(&self, instructions: &[Instruction<'_>]) -> CompileResult<AssembledCode> {
        let mut bytes = Vec::new();
        let mut labels: HashMap<&str, u32> = HashMap::new();
        let mut patches: Vec<PatchSite> = Vec::new();
        let mut source_map = Vec::new();

        for (index, instruction) in instructions.iter().enumerate() {
            if let Op::Section { label } = &instruction.op {
                labels.insert(label.name(), bytes.len() as u32);
            }

            if self.record_source_map {
                source_map.push(SourceMapEntry {
                    code_offset: bytes.len() as u32,
                    instruction_index: index,
                });
            }

            if let Some(site) = encode_op(&instruction.op, &mut bytes)? {
                patches.push(site);
            }
        }

        for site in patches {
            let target = *labels
                .get(site.label.as_str())
                .ok_or_else(|| CompileError::Compilation(format!("undefined label '{}'", site.label)))?;
            // rel32 is relative to the address of the byte *after* the
            // 4-byte field itself.
            let next_instruction = site.rel32_offset + 4;
            let rel = target as i64 - next_instruction as i64;
            let rel = i32::try_from(rel)
                .map_err(|_| CompileError::Compilation(format!("jump to '{}' out of rel32 range", site.label)))?;
            let patch_at = site.rel32_offset as usize;
            bytes[patch_at..patch_at + 4].copy_from_slice(&rel.to_le_bytes());
        }

        Ok(AssembledCode { bytes, source_map })
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Assembler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, JumpKind, Program};

    #[test]
    fn forward_jump_patches_to_the_following_label() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let done = program.new_label();
        program.jmp(done);
        program.nop();
        program.section(done);
        program.ret();

        let assembled = Assembler::new().assemble(program.body().as_slice()).unwrap();
        // jmp rel32 (5 bytes) + nop (1 byte) + ret (1 byte) = 7 bytes total;
        // the jump target is right after the nop, i.e. offset 6.
        assert_eq!(assembled.bytes.len(), 7);
        assert_eq!(assembled.bytes[0], 0xe9);
        let rel = i32::from_le_bytes(assembled.bytes[1..5].try_into().unwrap());
        assert_eq!(rel, 1); // one byte (the nop) between the end of the jmp and the label
    }

    #[test]
    fn undefined_label_is_an_error() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let missing = program.new_label();
        program.jump(JumpKind::Jmp, missing);
        assert!(Assembler::new().assemble(program.body().as_slice()).is_err());
    }
}
