//! Orchestration entry point (spec.md "Data flow" in §2, client protocol in
//! §6): runs liveness → linear-scan allocation → spill-aware assignment →
//! prologue/epilogue insertion → peephole translation → assembly, and hands
//! the resulting bytes to the runtime.

use crate::backend::abi::{CALLEE_SAVED_MREG_IDS, FRAME_POINTER_MREG_ID, STACK_POINTER_MREG_ID};
use crate::backend::assembler::Assembler;
use crate::compilation::allocator::LinearScanRegisterAllocator;
use crate::compilation::assigner::RegisterAssigner;
use crate::compilation::liveness::LivenessAnalyzer;
use crate::compilation::translator::Translator;
use crate::error::CompileResult;
use crate::ir::{Instruction, InstructionSet, Op, Operand, Program, Register, RegisterWidth, SignType};
use crate::runtime::executable::Executable;

/// Knobs a client sets before compiling; all default off so the common case
/// (machine code only) pays nothing for the observability hooks (spec.md
/// §4.11).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerOptions {
    /// Keep the assembled byte stream's per-instruction source offsets and a
    /// textual rendering of the compiled program (spec.md §4.10's "optional
    /// textual compilate").
    pub generate_assembly_text: bool,
    /// Write a `perf_jit_map` sidecar entry for the compiled region on
    /// finalize.
    pub perf_map: bool,
    /// Notify a VTune listener of the compiled region on finalize.
    pub vtune: bool,
}

pub struct Compiler {
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Compiler { options }
    }

    /// Runs the full pipeline and returns an `Executable` owning the
    /// finalized, callable machine code. No partial `Executable` is ever
    /// returned on an `Err` path (spec.md §7).
    pub fn compile<'p>(&self, program: &Program<'p>) -> CompileResult<Executable> {
        let flat = Self::flatten(program);
        log::debug!("flounder: compiling {} instructions", flat.len());

        let intervals = LivenessAnalyzer::analyze(&flat)?;
        log::debug!("flounder: liveness produced {} intervals", intervals.len());

        let schedule = LinearScanRegisterAllocator::allocate(&intervals)?;
        log::debug!("flounder: allocator reserved {} spill bytes", schedule.frame_size_bytes());

        let assigned = RegisterAssigner::assign(&flat, &schedule)?;
        let framed = Self::insert_prologue_epilogue(assigned, schedule.frame_size_bytes());
        log::debug!("flounder: assigner touched {} instructions", framed.len());

        let translated = Translator::translate(framed);

        let assembly_lines = self
            .options
            .generate_assembly_text
            .then(|| translated.iter().map(Instruction::to_string).collect());

        let assembler = Assembler::new().with_source_map(self.options.generate_assembly_text);
        let assembled = assembler.assemble(translated.as_slice())?;
        log::debug!("flounder: assembler emitted {} bytes", assembled.bytes.len());

        Executable::finalize(assembled, assembly_lines, &self.options)
    }

    /// Scans `arguments`, `header`, `body` in order (spec.md §4.3) into one
    /// flat instruction stream; this is the unit liveness/allocation/
    /// assignment all operate over.
    fn flatten<'p>(program: &Program<'p>) -> Vec<Instruction<'p>> {
        let mut flat = Vec::with_capacity(
            program.arguments().len() + program.header().len() + program.body().len(),
        );
        flat.extend(program.arguments().as_slice().iter().cloned());
        flat.extend(program.header().as_slice().iter().cloned());
        flat.extend(program.body().as_slice().iter().cloned());
        flat
    }

    /// Prepends a prologue and inserts a matching epilogue before every
    /// `Ret` (spec.md §4.5). `rbp` is unconditionally saved and re-based to
    /// `rsp` whenever the frame reserves any spill slots, since the assigner
    /// addresses every spill through it; any other callee-saved register is
    /// only saved if the assigned stream actually references it.
    fn insert_prologue_epilogue<'p>(assigned: InstructionSet<'p>, spill_bytes: u32) -> InstructionSet<'p> {
        let needs_frame_pointer = spill_bytes > 0;
        let mut touched = Self::touched_callee_saved(&assigned);
        if needs_frame_pointer && !touched.contains(&FRAME_POINTER_MREG_ID) {
            touched.push(FRAME_POINTER_MREG_ID);
            touched.sort_unstable();
        }

        let frame_bytes = if needs_frame_pointer {
            round_frame_bytes(spill_bytes, touched.len())
        } else {
            0
        };

        let mut out = InstructionSet::with_name("body");
        for &id in &touched {
            out.push(Op::Push { reg: callee_saved_reg(id) });
        }
        if needs_frame_pointer {
            out.push(Op::Mov {
                dst: Operand::Register(frame_pointer()),
                src: Operand::Register(stack_pointer()),
            });
        }
        if frame_bytes > 0 {
            out.push(Op::Sub {
                dst: Operand::Register(stack_pointer()),
                src: Operand::Constant(crate::ir::Constant::from_i64(frame_bytes as i64)),
            });
        }

        for instr in assigned {
            if matches!(instr.op, Op::Ret) {
                if frame_bytes > 0 {
                    out.push(Op::Add {
                        dst: Operand::Register(stack_pointer()),
                        src: Operand::Constant(crate::ir::Constant::from_i64(frame_bytes as i64)),
                    });
                }
                for &id in touched.iter().rev() {
                    out.push(Op::Pop { reg: callee_saved_reg(id) });
                }
            }
            out.push(instr);
        }
        out
    }

    /// Every callee-saved machine-register id referenced anywhere in
    /// `instructions`, in ABI order. Memory operands count their base/index
    /// registers too (a spilled value's address is always `rbp`-relative).
    fn touched_callee_saved(instructions: &InstructionSet<'_>) -> Vec<u8> {
        let mut touched = Vec::new();
        for instr in instructions.iter() {
            for operand in instr.op.operands() {
                Self::collect_physical_ids(operand, &mut touched);
            }
        }
        touched.sort_unstable();
        touched.dedup();
        touched.retain(|id| CALLEE_SAVED_MREG_IDS.contains(id));
        touched
    }

    fn collect_physical_ids(operand: Operand<'_>, out: &mut Vec<u8>) {
        match operand {
            Operand::Register(r) => {
                if let Some(id) = r.machine_id() {
                    out.push(id);
                }
            }
            Operand::Memory(mem) => {
                if let crate::ir::MemoryBase::Register(base) = mem.base() {
                    if let Some(id) = base.machine_id() {
                        out.push(id);
                    }
                }
                if let Some(index) = mem.index() {
                    if let Some(id) = index.machine_id() {
                        out.push(id);
                    }
                }
            }
            Operand::Constant(_) => {}
        }
    }
}

fn stack_pointer<'p>() -> Register<'p> {
    Register::physical(STACK_POINTER_MREG_ID, RegisterWidth::R64, SignType::Signed)
}

fn frame_pointer<'p>() -> Register<'p> {
    Register::physical(FRAME_POINTER_MREG_ID, RegisterWidth::R64, SignType::Signed)
}

fn callee_saved_reg<'p>(id: u8) -> Register<'p> {
    Register::physical(id, RegisterWidth::R64, SignType::Signed)
}

/// Rounds a raw spill-frame byte count up to the smallest 16-byte-aligned
/// value that holds it, keeping `rsp` 16-byte aligned at call sites. `call`
/// leaves `rsp` at `8 mod 16`; each prologue push subtracts another 8, so
/// after an even number of pushes the frame itself must land on `8 mod 16`,
/// and after an odd number of pushes (e.g. only `rbp`) it must land on a
/// plain multiple of 16.
fn round_frame_bytes(raw: u32, pushes: usize) -> u32 {
    let target = if pushes % 2 == 0 { 8u32 } else { 0u32 };
    let mut n = target;
    while n < raw {
        n += 16;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, Constant, RegisterWidth, SignType};

    #[test]
    fn round_frame_bytes_respects_push_parity() {
        // Even push count (e.g. rbp + one more callee-saved reg): 16k + 8.
        assert_eq!(round_frame_bytes(0, 2), 8);
        assert_eq!(round_frame_bytes(8, 2), 8);
        assert_eq!(round_frame_bytes(9, 2), 24);
        assert_eq!(round_frame_bytes(24, 2), 24);
        assert_eq!(round_frame_bytes(25, 2), 40);
        // Odd push count (e.g. only rbp): plain multiples of 16.
        assert_eq!(round_frame_bytes(0, 1), 0);
        assert_eq!(round_frame_bytes(1, 1), 16);
        assert_eq!(round_frame_bytes(16, 1), 16);
        assert_eq!(round_frame_bytes(17, 1), 32);
    }

    #[test]
    fn identity_program_compiles_with_a_trivial_frame() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let x = program.new_argument_vreg(RegisterWidth::R64, SignType::Signed);
        program.get_argument(0, x);
        program.set_return(x);
        program.clear_vreg(x);
        program.ret();

        let compiler = Compiler::new(CompilerOptions::default());
        let executable = compiler.compile(&program).unwrap();
        assert!(executable.code_len() > 0);
    }

    #[test]
    fn pressure_program_forces_spills_and_still_compiles() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let mut vregs = Vec::new();
        for i in 0..32i64 {
            let v = program.new_vreg(RegisterWidth::R64, SignType::Signed);
            program.mov(v, Constant::from_i64(i));
            vregs.push(v);
        }
        let acc = vregs[0];
        for &v in &vregs[1..] {
            program.add(acc, v);
        }
        program.set_return(acc);
        for v in vregs {
            program.clear_vreg(v);
        }
        program.ret();

        let compiler = Compiler::new(CompilerOptions::default());
        let executable = compiler.compile(&program).unwrap();
        assert!(executable.code_len() > 0);
    }
}
