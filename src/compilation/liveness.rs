//! Liveness analysis over a flattened instruction stream (spec.md C4).
//!
//! Walks the instructions once, recording for every virtual register the
//! index of its `RequestVreg` and the index of its last reference. A
//! `ClearVreg` closes the interval early; any vreg still open at the end of
//! the stream is treated as live through it.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Instruction, Register};

/// The instruction-index span a virtual register is live across, inclusive
/// on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval<'p> {
    pub vreg: Register<'p>,
    pub start: usize,
    pub end: usize,
    pub accessed_frequently: bool,
}

impl LiveInterval<'_> {
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

struct OpenInterval<'p> {
    vreg: Register<'p>,
    start: usize,
    last_use: usize,
}

pub struct LivenessAnalyzer;

impl LivenessAnalyzer {
    /// Computes one interval per `RequestVreg`/`ClearVreg` pair found in
    /// `instructions`. Errors if a vreg name is requested twice while still
    /// open, or referenced before being requested.
    pub fn analyze<'p>(instructions: &[Instruction<'p>]) -> CompileResult<Vec<LiveInterval<'p>>> {
        let mut open: HashMap<&'p str, OpenInterval<'p>> = HashMap::new();
        let mut closed = Vec::new();

        for (idx, instruction) in instructions.iter().enumerate() {
            if let crate::ir::Op::RequestVreg { vreg, .. } = &instruction.op {
                let name = vreg.virtual_name().expect("RequestVreg always binds a vreg");
                if open.contains_key(name) {
                    return Err(CompileError::vreg_already_in_use(*vreg));
                }
                open.insert(
                    name,
                    OpenInterval {
                        vreg: *vreg,
                        start: idx,
                        last_use: idx,
                    },
                );
                continue;
            }

            for reg in instruction.op.virtual_registers() {
                let name = reg.virtual_name().expect("virtual_registers() only yields vregs");
                match open.get_mut(name) {
                    Some(interval) => interval.last_use = idx,
                    None => return Err(CompileError::can_not_find_vreg(reg)),
                }
            }

            if let crate::ir::Op::ClearVreg { vreg } = &instruction.op {
                let name = vreg.virtual_name().expect("ClearVreg always names a vreg");
                let interval = open
                    .remove(name)
                    .ok_or_else(|| CompileError::can_not_find_vreg(*vreg))?;
                closed.push(LiveInterval {
                    vreg: interval.vreg,
                    start: interval.start,
                    end: idx,
                    accessed_frequently: interval.vreg.accessed_frequently(),
                });
            }
        }

        let last_idx = instructions.len().saturating_sub(1);
        for (_, interval) in open {
            closed.push(LiveInterval {
                vreg: interval.vreg,
                start: interval.start,
                end: interval.last_use.max(last_idx),
                accessed_frequently: interval.vreg.accessed_frequently(),
            });
        }

        closed.sort_by_key(|interval| interval.start);
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, Program, RegisterWidth, SignType};

    #[test]
    fn disjoint_vregs_get_disjoint_intervals() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let a = program.new_vreg(RegisterWidth::R64, SignType::Signed);
        program.clear_vreg(a);
        let b = program.new_vreg(RegisterWidth::R64, SignType::Signed);
        program.mov(b, crate::ir::Constant::from_i64(1));
        program.clear_vreg(b);

        let intervals = LivenessAnalyzer::analyze(program.body().as_slice()).unwrap();
        assert_eq!(intervals.len(), 2);
        assert!(!intervals[0].overlaps(&intervals[1]));
    }

    #[test]
    fn redeclaring_an_open_vreg_is_an_error() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let x = program.vreg("x");
        program.body_mut().push(crate::ir::Op::RequestVreg {
            vreg: x,
            width: RegisterWidth::R64,
            sign: SignType::Signed,
        });
        program.body_mut().push(crate::ir::Op::RequestVreg {
            vreg: x,
            width: RegisterWidth::R64,
            sign: SignType::Signed,
        });
        assert!(LivenessAnalyzer::analyze(program.body().as_slice()).is_err());
    }

    #[test]
    fn referencing_an_unrequested_vreg_is_an_error() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let x = program.vreg("x");
        program.mov(x, crate::ir::Constant::from_i64(1));
        assert!(LivenessAnalyzer::analyze(program.body().as_slice()).is_err());
    }
}
