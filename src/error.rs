//! Compilation errors.
//!
//! Manually implementing `Error`/`Display` instead of pulling in `thiserror`,
//! matching the convention this crate's lowering is grounded on (see
//! `cranelift-codegen`'s `isa::LookupError`) to keep the dependency surface
//! minimal.

use std::fmt;

use crate::ir::{Operand, Register};

/// Every way compilation of a [`crate::ir::Program`] can fail.
#[derive(Debug)]
pub enum CompileError {
    /// The translator has no encoding for an opcode/operand combination.
    NotImplemented(String),
    /// `RequestVreg` was issued for a name whose interval is still open.
    VirtualRegisterAlreadyInUse(String),
    /// An operand referenced a vreg the allocator never scheduled.
    CanNotFindVirtualRegister(String),
    /// Call lowering needed a saved copy of a register it had overwritten.
    CanNotFindSpilledValue(String),
    /// A physical register id fell outside `0..=15` for its width.
    UnknownRegister { id: u8, width_bits: u16 },
    /// All three spill registers were reserved simultaneously by one instruction.
    NotEnoughTemporaryRegisters,
    /// The translator could not encode a specific operand.
    CanNotTranslateOperand(String),
    /// The translator fell through every encoding case for an instruction.
    CanNotTranslateInstruction(String),
    /// The backend produced a byte sequence it could not finalize as code.
    Compilation(String),
}

impl CompileError {
    pub(crate) fn vreg_already_in_use(reg: Register<'_>) -> Self {
        CompileError::VirtualRegisterAlreadyInUse(reg.to_string())
    }

    pub(crate) fn can_not_find_vreg(reg: Register<'_>) -> Self {
        CompileError::CanNotFindVirtualRegister(reg.to_string())
    }

    pub(crate) fn can_not_find_spilled(reg: Register<'_>) -> Self {
        CompileError::CanNotFindSpilledValue(reg.to_string())
    }

    pub(crate) fn can_not_translate_operand(operand: Operand<'_>) -> Self {
        CompileError::CanNotTranslateOperand(operand.to_string())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::NotImplemented(what) => write!(f, "'{what}' is not implemented"),
            CompileError::VirtualRegisterAlreadyInUse(reg) => {
                write!(f, "the vreg '{reg}' is already in use")
            }
            CompileError::CanNotFindVirtualRegister(reg) => {
                write!(f, "could not find register for vreg '{reg}'")
            }
            CompileError::CanNotFindSpilledValue(reg) => {
                write!(f, "could not find spilled value for vreg '{reg}'")
            }
            CompileError::UnknownRegister { id, width_bits } => {
                write!(f, "unknown machine register (id: {id}, width: {width_bits})")
            }
            CompileError::NotEnoughTemporaryRegisters => {
                write!(f, "not enough temporary registers for spilling")
            }
            CompileError::CanNotTranslateOperand(operand) => {
                write!(f, "can not translate operand: {operand}")
            }
            CompileError::CanNotTranslateInstruction(instr) => {
                write!(f, "can not translate instruction: {instr}")
            }
            CompileError::Compilation(message) => {
                write!(f, "could not translate flounder into asm: {message}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Convenience alias used throughout the compilation pipeline.
pub type CompileResult<T> = Result<T, CompileError>;
