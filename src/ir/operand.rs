//! The operand sum type: a register, a memory address, or a constant.

use std::fmt;

use crate::ir::constant::Constant;
use crate::ir::memory::MemoryAddress;
use crate::ir::register::Register;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<'p> {
    Register(Register<'p>),
    Memory(MemoryAddress<'p>),
    Constant(Constant),
}

impl<'p> Operand<'p> {
    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Register(_))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::Constant(_))
    }

    pub fn as_register(&self) -> Option<Register<'p>> {
        match self {
            Operand::Register(reg) => Some(*reg),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<MemoryAddress<'p>> {
        match self {
            Operand::Memory(mem) => Some(*mem),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<Constant> {
        match self {
            Operand::Constant(c) => Some(*c),
            _ => None,
        }
    }

    /// True if the operand references a virtual register, either directly
    /// or as part of a memory address (base/index).
    pub fn references_virtual(&self) -> bool {
        match self {
            Operand::Register(reg) => reg.is_virtual(),
            Operand::Memory(mem) => {
                matches!(mem.base(), crate::ir::memory::MemoryBase::Register(r) if r.is_virtual())
                    || mem.index().map(|r| r.is_virtual()).unwrap_or(false)
            }
            Operand::Constant(c) => c.needs_materialization(),
        }
    }
}

impl<'p> From<Register<'p>> for Operand<'p> {
    fn from(reg: Register<'p>) -> Self {
        Operand::Register(reg)
    }
}

impl<'p> From<MemoryAddress<'p>> for Operand<'p> {
    fn from(mem: MemoryAddress<'p>) -> Self {
        Operand::Memory(mem)
    }
}

impl From<Constant> for Operand<'_> {
    fn from(c: Constant) -> Self {
        Operand::Constant(c)
    }
}

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::Memory(mem) => write!(f, "{mem}"),
            Operand::Constant(c) => write!(f, "{c}"),
        }
    }
}
