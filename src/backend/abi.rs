//! System V AMD64 calling-convention constants (spec.md §5).

use crate::ir::instruction::Op;

/// Stack pointer machine register id (`rsp`).
pub const STACK_POINTER_MREG_ID: u8 = 4;

/// Frame pointer machine register id (`rbp`).
pub const FRAME_POINTER_MREG_ID: u8 = 5;

/// Ids reserved as the spill-register cache, in preference order
/// (`rcx`, `rax`, `rdx`). These never participate in linear-scan
/// allocation; the assigner borrows them transiently to materialize
/// spilled operands.
pub const SPILL_MREG_IDS: [u8; 3] = [1, 0, 2];

/// Ids the linear-scan allocator may hand out: `rbx`, `rsi`, `rdi`,
/// `r8`-`r15`. Excludes `rsp` (stack pointer), `rbp` (reserved as the fixed
/// frame pointer spill slots are addressed against, see
/// `crate::compilation::assigner`), and the three spill ids.
pub const AVAILABLE_MREG_IDS: [u8; 11] = [3, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

/// Argument-register ids in System V order: `rdi`, `rsi`, `rdx`, `rcx`,
/// `r8`, `r9`.
pub const CALL_ARGUMENT_REGISTER_IDS: [u8; 6] = [7, 6, 2, 1, 8, 9];

/// The single return-value register id, `rax`.
pub const CALL_RETURN_REGISTER_ID: u8 = 0;

/// Callee-saved ids that a prologue/epilogue must preserve across a call:
/// `rbx`, `rbp`, `r12`-`r15`.
pub const CALLEE_SAVED_MREG_IDS: [u8; 6] = [3, 5, 12, 13, 14, 15];

/// Caller-saved (volatile across calls) ids.
pub const CALLER_SAVED_MREG_IDS: [u8; 9] = [0, 1, 2, 6, 7, 8, 9, 10, 11];

pub fn is_scratch_mreg(id: u8) -> bool {
    CALLER_SAVED_MREG_IDS.contains(&id)
}

pub fn is_preserved_mreg(id: u8) -> bool {
    CALLEE_SAVED_MREG_IDS.contains(&id)
}

/// `shl`/`shr` implicitly read `cl`; `idiv` implicitly reads/writes
/// `rax`/`rdx`. The assigner must keep these mregs free of unrelated
/// spill-cache occupants while lowering such an instruction.
pub fn has_mreg_dependency(op: &Op) -> bool {
    matches!(op, Op::Shl { .. } | Op::Shr { .. } | Op::Idiv { .. })
}

/// The machine register ids an instruction implicitly depends on beyond its
/// explicit operands.
pub fn mreg_dependencies(op: &Op) -> &'static [u8] {
    match op {
        Op::Shl { .. } | Op::Shr { .. } => &[1], // cl (low byte of rcx)
        Op::Idiv { .. } => &[0, 2],              // rax, rdx
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_and_spill_ids_are_disjoint() {
        for id in AVAILABLE_MREG_IDS {
            assert!(!SPILL_MREG_IDS.contains(&id));
            assert_ne!(id, STACK_POINTER_MREG_ID);
            assert_ne!(id, FRAME_POINTER_MREG_ID);
        }
    }

    #[test]
    fn idiv_depends_on_rax_and_rdx() {
        let op = Op::Idiv {
            op: crate::ir::operand::Operand::Constant(crate::ir::constant::Constant::I8(1)),
        };
        assert!(has_mreg_dependency(&op));
        assert_eq!(mreg_dependencies(&op), &[0, 2]);
    }
}
