//! Peephole translation over an already-assigned (physical-register-only)
//! instruction stream (spec.md C7, "Imul-by-constant peephole").
//!
//! Runs after [`crate::compilation::assigner::RegisterAssigner`] and before
//! [`crate::backend::assembler::Assembler`]: it only rewrites instruction
//! shapes, never touches register assignment, so it operates purely on
//! `Op` values.

use crate::ir::{Instruction, InstructionSet, MemoryAddress, Op, Operand, Register};

pub struct Translator;

impl Translator {
    /// Rewrites `dst = dst * constant` into the cheapest equivalent shape,
    /// when the constant's value has one. Everything else passes through
    /// unchanged.
    pub fn translate<'p>(instructions: InstructionSet<'p>) -> InstructionSet<'p> {
        let mut out = InstructionSet::with_name("body");
        for instr in instructions {
            match Self::peephole_imul(&instr) {
                Some(replacement) => {
                    for op in replacement {
                        out.push(op);
                    }
                }
                None => {
                    out.push(instr);
                }
            }
        }
        out
    }

    /// Returns `Some(ops)` to replace `instr` with, or `None` to keep it
    /// unchanged. A `None`-length replacement (empty `Vec`) drops the
    /// instruction entirely (the `imul dst, 1` case).
    fn peephole_imul<'p>(instr: &Instruction<'p>) -> Option<Vec<Op<'p>>> {
        let Op::Imul { dst, src } = &instr.op else {
            return None;
        };
        let Operand::Register(dst_reg) = *dst else {
            return None;
        };
        let Operand::Constant(c) = *src else {
            return None;
        };
        let value = c.as_i64();

        match value {
            0 => Some(vec![Op::Xor {
                dst: Operand::Register(dst_reg),
                src: Operand::Register(dst_reg),
            }]),
            1 => Some(vec![]),
            2 => Some(vec![Op::Add {
                dst: Operand::Register(dst_reg),
                src: Operand::Register(dst_reg),
            }]),
            3 => Some(vec![Op::Lea {
                dst: dst_reg,
                src: scaled_self(dst_reg, 2),
            }]),
            5 => Some(vec![Op::Lea {
                dst: dst_reg,
                src: scaled_self(dst_reg, 4),
            }]),
            9 => Some(vec![Op::Lea {
                dst: dst_reg,
                src: scaled_self(dst_reg, 8),
            }]),
            v if v > 0 && (v as u64).is_power_of_two() => Some(vec![Op::Shl {
                dst: Operand::Register(dst_reg),
                src: Operand::Constant(crate::ir::Constant::from_i64((v as u64).trailing_zeros() as i64)),
            }]),
            _ => None,
        }
    }
}

fn scaled_self<'p>(reg: Register<'p>, scale: u8) -> MemoryAddress<'p> {
    MemoryAddress::new(crate::ir::MemoryBase::Register(reg), Some(reg), scale, 0, reg.width())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, RegisterWidth, SignType};

    fn reg() -> Register<'static> {
        Register::physical(3, RegisterWidth::R64, SignType::Signed)
    }

    #[test]
    fn imul_by_zero_becomes_xor() {
        let mut set = InstructionSet::new();
        set.push(Op::Imul {
            dst: Operand::Register(reg()),
            src: Operand::Constant(Constant::from_i64(0)),
        });
        let translated = Translator::translate(set);
        assert_eq!(translated.len(), 1);
        assert!(matches!(translated.as_slice()[0].op, Op::Xor { .. }));
    }

    #[test]
    fn imul_by_one_is_dropped() {
        let mut set = InstructionSet::new();
        set.push(Op::Imul {
            dst: Operand::Register(reg()),
            src: Operand::Constant(Constant::from_i64(1)),
        });
        let translated = Translator::translate(set);
        assert_eq!(translated.len(), 0);
    }

    #[test]
    fn imul_by_power_of_two_becomes_shl() {
        let mut set = InstructionSet::new();
        set.push(Op::Imul {
            dst: Operand::Register(reg()),
            src: Operand::Constant(Constant::from_i64(8)),
        });
        let translated = Translator::translate(set);
        assert!(matches!(translated.as_slice()[0].op, Op::Shl { .. }));
    }

    #[test]
    fn imul_by_three_becomes_lea() {
        let mut set = InstructionSet::new();
        set.push(Op::Imul {
            dst: Operand::Register(reg()),
            src: Operand::Constant(Constant::from_i64(3)),
        });
        let translated = Translator::translate(set);
        assert!(matches!(translated.as_slice()[0].op, Op::Lea { .. }));
    }

    #[test]
    fn imul_by_unoptimized_constant_passes_through() {
        let mut set = InstructionSet::new();
        set.push(Op::Imul {
            dst: Operand::Register(reg()),
            src: Operand::Constant(Constant::from_i64(7)),
        });
        let translated = Translator::translate(set);
        assert!(matches!(translated.as_slice()[0].op, Op::Imul { .. }));
    }
}
