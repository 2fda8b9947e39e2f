//! Spill-aware register assignment (spec.md C6): rewrites every virtual
//! register reference into a physical register or a frame-relative memory
//! operand, lowers `Fcall`/`Fdiv`/`Fmod` into their ABI-compliant expansions,
//! and emits the prologue/epilogue that reserves the spill-slot frame.

use std::collections::HashMap;

use crate::backend::abi::{
    CALLER_SAVED_MREG_IDS, CALL_ARGUMENT_REGISTER_IDS, CALL_RETURN_REGISTER_ID,
    FRAME_POINTER_MREG_ID, SPILL_MREG_IDS, STACK_POINTER_MREG_ID,
};
use crate::compilation::allocator::{Location, RegisterSchedule};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    Constant, Instruction, InstructionSet, MemoryAddress, MemoryBase, Op, Operand, Register,
    RegisterWidth, SignType,
};

/// Virtual registers carry no width/sign of their own; this is recovered by
/// scanning every `RequestVreg` once up front.
fn collect_vreg_types<'p>(
    instructions: &[Instruction<'p>],
) -> HashMap<&'p str, (RegisterWidth, SignType)> {
    let mut types = HashMap::new();
    for instr in instructions {
        if let Op::RequestVreg { vreg, width, sign } = &instr.op {
            types.insert(vreg.virtual_name().unwrap(), (*width, *sign));
        }
    }
    types
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CacheKey<'p> {
    Vreg(&'p str),
    Const(i64),
    /// A one-off staging register for a mem-mem operand collision; each use
    /// gets a fresh sequence number so it never aliases an earlier staging
    /// within the same flush window.
    Scratch(u64),
}

/// The three transient machine registers (`rcx`, `rax`, `rdx`) the assigner
/// may use to materialize a spilled vreg or a 64-bit constant into a real
/// register. Entries are forgotten (not written back) at every flush point,
/// since the assigner never uses a cache slot as a write's lasting home.
#[derive(Default)]
struct SpillCache<'p> {
    slots: [Option<CacheKey<'p>>; 3],
}

impl<'p> SpillCache<'p> {
    fn find(&self, key: CacheKey<'p>) -> Option<u8> {
        self.slots
            .iter()
            .position(|slot| *slot == Some(key))
            .map(|idx| SPILL_MREG_IDS[idx])
    }

    /// Materializes `key` into a scratch register, emitting `load` if it
    /// wasn't already cached. Errors with `NotEnoughTemporaryRegisters` if
    /// all three slots are already holding a *different* value than `key`
    /// needs and none can be safely evicted by the caller's protocol (the
    /// caller is expected to stage out anything it still needs before
    /// requesting a fourth concurrent value — see `lower_fcall`).
    fn claim(
        &mut self,
        key: CacheKey<'p>,
        width: RegisterWidth,
        sign: SignType,
        out: &mut InstructionSet<'p>,
        load: impl FnOnce(Register<'p>, &mut InstructionSet<'p>),
    ) -> CompileResult<Register<'p>> {
        if let Some(id) = self.find(key) {
            return Ok(Register::physical(id, width, sign));
        }
        let idx = match self.slots.iter().position(|slot| slot.is_none()) {
            Some(idx) => idx,
            None => {
                // No free slot: evict the oldest entry. Callers that need
                // more than three live values concurrently (e.g. `Fcall`
                // staging several spilled arguments) must flush each claim
                // out to a stable location before claiming the next one.
                0
            }
        };
        let mreg_id = SPILL_MREG_IDS[idx];
        let reg = Register::physical(mreg_id, width, sign);
        load(reg, out);
        self.slots[idx] = Some(key);
        Ok(reg)
    }

    /// Forgets every cached association. Called at control-flow boundaries
    /// (`Op::flush_requirement`) and before any instruction that implicitly
    /// reads/writes one of the spill ids (`idiv`, `shl`, `shr`).
    fn clear(&mut self) {
        self.slots = [None, None, None];
    }
}

pub struct RegisterAssigner;

impl RegisterAssigner {
    pub fn assign<'p>(
        instructions: &[Instruction<'p>],
        schedule: &RegisterSchedule<'p>,
    ) -> CompileResult<InstructionSet<'p>> {
        let types = collect_vreg_types(instructions);
        let mut ctx = AssignContext {
            schedule,
            types: &types,
            cache: SpillCache::default(),
            scratch_seq: 0,
        };
        let mut out = InstructionSet::with_name("body");
        for instr in instructions {
            ctx.lower(instr, &mut out)?;
        }
        Ok(out)
    }
}

struct AssignContext<'ctx, 'p> {
    schedule: &'ctx RegisterSchedule<'p>,
    types: &'ctx HashMap<&'p str, (RegisterWidth, SignType)>,
    cache: SpillCache<'p>,
    scratch_seq: u64,
}

impl<'ctx, 'p> AssignContext<'ctx, 'p> {
    fn next_scratch_key(&mut self) -> CacheKey<'p> {
        self.scratch_seq += 1;
        CacheKey::Scratch(self.scratch_seq)
    }

    fn frame_pointer(&self) -> Register<'p> {
        Register::physical(FRAME_POINTER_MREG_ID, RegisterWidth::R64, SignType::Signed)
    }

    fn spill_address(&self, slot: u32, width: RegisterWidth) -> MemoryAddress<'p> {
        let displacement = -(((slot as i64) + 1) * 8) as i32;
        MemoryAddress::based_with_width(self.frame_pointer(), displacement, width)
    }

    fn vreg_type(&self, vreg: Register<'p>) -> CompileResult<(RegisterWidth, SignType)> {
        self.types
            .get(vreg.virtual_name().unwrap())
            .copied()
            .ok_or_else(|| CompileError::can_not_find_vreg(vreg))
    }

    /// Resolves a read of `operand`: physical operands pass through,
    /// vregs become either a physical register or a frame-relative memory
    /// operand, and 64-bit constants are materialized through the cache
    /// since most opcodes can't take a 64-bit immediate directly.
    fn resolve_read(
        &mut self,
        operand: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<Operand<'p>> {
        match operand {
            Operand::Register(reg) if reg.is_physical() => Ok(operand),
            Operand::Register(reg) => {
                let (width, sign) = self.vreg_type(reg)?;
                match self.schedule.location_for(reg) {
                    Some(Location::MachineRegister(id)) => Ok(Operand::Register(Register::physical(id, width, sign))),
                    Some(Location::Spill(slot)) => Ok(Operand::Memory(self.spill_address(slot, width))),
                    None => Err(CompileError::can_not_find_spilled(reg)),
                }
            }
            Operand::Memory(mem) => Ok(Operand::Memory(self.resolve_memory(mem, out)?)),
            Operand::Constant(c) => {
                if !c.needs_materialization() {
                    return Ok(operand);
                }
                let key = CacheKey::Const(c.as_i64());
                let reg = self.cache.claim(key, RegisterWidth::R64, SignType::Signed, out, |dst, out| {
                    out.push(Op::Mov {
                        dst: Operand::Register(dst),
                        src: Operand::Constant(c),
                    });
                })?;
                Ok(Operand::Register(reg))
            }
        }
    }

    /// Like `resolve_read`, but never routes a 64-bit constant through the
    /// spill cache — used by lowerings that already own `rax`/`rdx`/`rcx`
    /// for the instruction's own implicit operands, where claiming a cache
    /// slot could collide with them.
    fn resolve_read_no_cache(
        &mut self,
        operand: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<Operand<'p>> {
        match operand {
            Operand::Memory(mem) => Ok(Operand::Memory(self.resolve_memory(mem, out)?)),
            Operand::Register(reg) if reg.is_virtual() => {
                let (width, sign) = self.vreg_type(reg)?;
                match self.schedule.location_for(reg) {
                    Some(Location::MachineRegister(id)) => Ok(Operand::Register(Register::physical(id, width, sign))),
                    Some(Location::Spill(slot)) => Ok(Operand::Memory(self.spill_address(slot, width))),
                    None => Err(CompileError::can_not_find_spilled(reg)),
                }
            }
            _ => Ok(operand),
        }
    }

    /// Memory base/index must themselves be real registers; a spilled base
    /// or index is loaded into a cache scratch register first.
    fn resolve_memory(
        &mut self,
        mem: MemoryAddress<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<MemoryAddress<'p>> {
        let mut mem = mem;
        if let MemoryBase::Register(base) = mem.base() {
            if base.is_virtual() {
                let resolved_base = self.materialize_register(base, out)?;
                mem.set_base(MemoryBase::Register(resolved_base));
            }
        }
        if let Some(index) = mem.index() {
            if index.is_virtual() {
                let resolved_index = self.materialize_register(index, out)?;
                mem.set_index(Some(resolved_index));
            }
        }
        Ok(mem)
    }

    /// Resolves a vreg to a real register, loading it through the cache if
    /// it was spilled (since an address component can't itself be memory).
    fn materialize_register(
        &mut self,
        vreg: Register<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<Register<'p>> {
        let (width, sign) = self.vreg_type(vreg)?;
        match self.schedule.location_for(vreg) {
            Some(Location::MachineRegister(id)) => Ok(Register::physical(id, width, sign)),
            Some(Location::Spill(slot)) => {
                let key = CacheKey::Vreg(vreg.virtual_name().unwrap());
                let addr = self.spill_address(slot, width);
                self.cache.claim(key, width, sign, out, |dst, out| {
                    out.push(Op::Mov {
                        dst: Operand::Register(dst),
                        src: Operand::Memory(addr),
                    });
                })
            }
            None => Err(CompileError::can_not_find_spilled(vreg)),
        }
    }

    /// Writes to `operand` behave like reads except a physical destination
    /// register is never routed through the cache; a spilled destination
    /// is just a plain memory operand on the instruction's write side.
    fn resolve_write(
        &mut self,
        operand: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<Operand<'p>> {
        match operand {
            Operand::Register(reg) if reg.is_virtual() => {
                let (width, sign) = self.vreg_type(reg)?;
                match self.schedule.location_for(reg) {
                    Some(Location::MachineRegister(id)) => Ok(Operand::Register(Register::physical(id, width, sign))),
                    Some(Location::Spill(slot)) => Ok(Operand::Memory(self.spill_address(slot, width))),
                    None => Err(CompileError::can_not_find_spilled(reg)),
                }
            }
            Operand::Memory(mem) => Ok(Operand::Memory(self.resolve_memory(mem, out)?)),
            _ => Ok(operand),
        }
    }

    fn lower(&mut self, instr: &Instruction<'p>, out: &mut InstructionSet<'p>) -> CompileResult<()> {
        if let Some(requirement) = instr.op.flush_requirement() {
            let _ = requirement;
            self.flush_before(out);
        }
        if crate::backend::abi::has_mreg_dependency(&instr.op) {
            self.flush_before(out);
        }

        match &instr.op {
            Op::RequestVreg { .. } | Op::ClearVreg { .. } => Ok(()),
            Op::GetArgument { index, vreg } => self.lower_get_argument(*index, *vreg, out),
            Op::SetReturn { value } => self.lower_set_return(*value, out),
            Op::Fcall {
                function_pointer,
                return_vreg,
                arguments,
            } => self.lower_fcall(*function_pointer, *return_vreg, arguments, out),
            Op::Fdiv {
                quotient,
                dividend,
                divisor,
            } => self.lower_fdiv_fmod(*quotient, *dividend, *divisor, out, CALL_RETURN_REGISTER_ID),
            Op::Fmod {
                remainder,
                dividend,
                divisor,
            } => self.lower_fdiv_fmod(*remainder, *dividend, *divisor, out, SPILL_MREG_IDS[2]),
            Op::Mov { dst, src } => self.lower_binary(|dst, src| Op::Mov { dst, src }, *dst, *src, out),
            Op::Cmovle { dst, src } => {
                self.lower_register_dest(|dst, src| Op::Cmovle { dst, src }, *dst, *src, out)
            }
            Op::Cmovge { dst, src } => {
                self.lower_register_dest(|dst, src| Op::Cmovge { dst, src }, *dst, *src, out)
            }
            Op::Imul { dst, src } => self.lower_register_dest(|dst, src| Op::Imul { dst, src }, *dst, *src, out),
            Op::Crc32 { dst, src } => {
                self.lower_register_dest(|dst, src| Op::Crc32 { dst, src }, *dst, *src, out)
            }
            _ => self.lower_generic(instr, out),
        }
    }

    fn flush_before(&mut self, out: &mut InstructionSet<'p>) {
        let _ = out;
        self.cache.clear();
    }

    fn lower_get_argument(
        &mut self,
        index: u8,
        vreg: Register<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<()> {
        let (width, sign) = self.vreg_type(vreg)?;
        let arg_id = CALL_ARGUMENT_REGISTER_IDS
            .get(index as usize)
            .copied()
            .ok_or_else(|| CompileError::Compilation(format!("no ABI argument register for index {index}")))?;
        let src = Operand::Register(Register::physical(arg_id, width, sign));
        let dst = self.resolve_write(Operand::Register(vreg), out)?;
        out.push(Op::Mov { dst, src });
        Ok(())
    }

    fn lower_set_return(&mut self, value: Operand<'p>, out: &mut InstructionSet<'p>) -> CompileResult<()> {
        let src = self.resolve_read(value, out)?;
        let dst = Operand::Register(Register::physical(CALL_RETURN_REGISTER_ID, RegisterWidth::R64, SignType::Signed));
        out.push(Op::Mov { dst, src });
        Ok(())
    }

    fn lower_binary(
        &mut self,
        ctor: impl Fn(Operand<'p>, Operand<'p>) -> Op<'p>,
        dst: Operand<'p>,
        src: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<()> {
        let src = self.resolve_read(src, out)?;
        let dst = self.resolve_write(dst, out)?;
        if dst.is_memory() && src.is_memory() {
            // Neither x86 form allows two memory operands: stage the
            // source through a scratch register first.
            let key = self.next_scratch_key();
            let width = src.as_memory().and_then(|m| m.width()).unwrap_or(RegisterWidth::R64);
            let scratch = self.cache.claim(key, width, SignType::Signed, out, |reg, out| {
                out.push(Op::Mov {
                    dst: Operand::Register(reg),
                    src,
                });
            })?;
            out.push(ctor(dst, Operand::Register(scratch)));
        } else {
            out.push(ctor(dst, src));
        }
        Ok(())
    }

    /// `cmovle`/`cmovge`/`imul`/`crc32`: all four read-modify-write their
    /// destination and none of their x86 encodings accept a memory
    /// destination operand, unlike `add`/`sub`/`and`/`or`/`xor`/`shl`/`shr`.
    /// A spilled destination vreg is loaded into a claimed scratch register
    /// first (the same materialization `push`/`pop`/`lea` already use for
    /// address components), the op runs against that register, and the
    /// result is stored back to the spill slot afterwards.
    fn lower_register_dest(
        &mut self,
        ctor: impl Fn(Operand<'p>, Operand<'p>) -> Op<'p>,
        dst: Operand<'p>,
        src: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<()> {
        let src = self.resolve_read(src, out)?;
        match dst {
            Operand::Register(reg) if reg.is_virtual() => {
                let physical = self.materialize_register(reg, out)?;
                out.push(ctor(Operand::Register(physical), src));
                if let Some(Location::Spill(slot)) = self.schedule.location_for(reg) {
                    let (width, _) = self.vreg_type(reg)?;
                    out.push(Op::Mov {
                        dst: Operand::Memory(self.spill_address(slot, width)),
                        src: Operand::Register(physical),
                    });
                }
            }
            _ => {
                let dst = self.resolve_write(dst, out)?;
                out.push(ctor(dst, src));
            }
        }
        Ok(())
    }

    /// Everything other than the pseudo-ops and the specially-lowered
    /// opcodes handled above: resolve every operand the instruction names
    /// and re-emit the same shape.
    fn lower_generic(&mut self, instr: &Instruction<'p>, out: &mut InstructionSet<'p>) -> CompileResult<()> {
        let op = self.rewrite_operands(&instr.op, out)?;
        out.push(Instruction {
            op,
            comment: instr.comment.clone(),
        });
        Ok(())
    }

    fn rewrite_operands(&mut self, op: &Op<'p>, out: &mut InstructionSet<'p>) -> CompileResult<Op<'p>> {
        Ok(match op {
            Op::Comment { text } => Op::Comment { text: text.clone() },
            Op::ContextBegin { name } => Op::ContextBegin { name: name.clone() },
            Op::ContextEnd => Op::ContextEnd,
            Op::BranchBegin { likely } => Op::BranchBegin { likely: *likely },
            Op::BranchEnd => Op::BranchEnd,
            Op::Ret => Op::Ret,
            Op::Nop => Op::Nop,
            Op::Cqo => Op::Cqo,
            Op::Push { reg } => Op::Push { reg: self.materialize_register(*reg, out)? },
            Op::Pop { reg } => Op::Pop { reg: self.materialize_register(*reg, out)? },
            Op::Inc { op } => Op::Inc { op: self.resolve_write(*op, out)? },
            Op::Dec { op } => Op::Dec { op: self.resolve_write(*op, out)? },
            Op::Sete { op } => Op::Sete { op: self.resolve_write(*op, out)? },
            Op::Setne { op } => Op::Setne { op: self.resolve_write(*op, out)? },
            Op::Prefetch { mem } => Op::Prefetch { mem: self.resolve_memory(*mem, out)? },
            Op::Idiv { op } => Op::Idiv { op: self.resolve_read(*op, out)? },
            Op::Jump { kind, label } => Op::Jump { kind: *kind, label: *label },
            Op::Section { label } => Op::Section { label: *label },
            Op::Lea { dst, src } => Op::Lea {
                dst: self.materialize_register(*dst, out)?,
                src: self.resolve_memory(*src, out)?,
            },
            Op::Add { dst, src } => self.rewrite_binary(|dst, src| Op::Add { dst, src }, *dst, *src, out)?,
            Op::Xadd { dst, src, lock } => {
                let dst = self.resolve_write(*dst, out)?;
                let src = self.resolve_read(*src, out)?;
                Op::Xadd { dst, src, lock: *lock }
            }
            Op::Sub { dst, src } => self.rewrite_binary(|dst, src| Op::Sub { dst, src }, *dst, *src, out)?,
            Op::And { dst, src } => self.rewrite_binary(|dst, src| Op::And { dst, src }, *dst, *src, out)?,
            Op::Or { dst, src } => self.rewrite_binary(|dst, src| Op::Or { dst, src }, *dst, *src, out)?,
            Op::Xor { dst, src } => self.rewrite_binary(|dst, src| Op::Xor { dst, src }, *dst, *src, out)?,
            Op::Shl { dst, src } => self.rewrite_binary(|dst, src| Op::Shl { dst, src }, *dst, *src, out)?,
            Op::Shr { dst, src } => self.rewrite_binary(|dst, src| Op::Shr { dst, src }, *dst, *src, out)?,
            Op::Cmp {
                left,
                right,
                likely,
                unroll_hint,
            } => {
                let (left, right) = self.resolve_comparison_operands(*left, *right, out)?;
                Op::Cmp {
                    left,
                    right,
                    likely: *likely,
                    unroll_hint: *unroll_hint,
                }
            }
            Op::Test { left, right } => {
                let (left, right) = self.resolve_comparison_operands(*left, *right, out)?;
                Op::Test { left, right }
            }
            Op::Call { function_pointer } => Op::Call {
                function_pointer: *function_pointer,
            },
            Op::Align { bytes } => Op::Align { bytes: *bytes },
            Op::Mov { .. }
            | Op::Cmovle { .. }
            | Op::Cmovge { .. }
            | Op::Imul { .. }
            | Op::Crc32 { .. }
            | Op::RequestVreg { .. }
            | Op::ClearVreg { .. }
            | Op::GetArgument { .. }
            | Op::SetReturn { .. }
            | Op::Fcall { .. }
            | Op::Fdiv { .. }
            | Op::Fmod { .. } => {
                unreachable!("handled directly in AssignContext::lower")
            }
        })
    }

    fn rewrite_binary(
        &mut self,
        ctor: impl Fn(Operand<'p>, Operand<'p>) -> Op<'p>,
        dst: Operand<'p>,
        src: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<Op<'p>> {
        let src = self.resolve_read(src, out)?;
        let dst = self.resolve_write(dst, out)?;
        if dst.is_memory() && src.is_memory() {
            let width = src.as_memory().and_then(|m| m.width()).unwrap_or(RegisterWidth::R64);
            let scratch_key = self.next_scratch_key();
            let scratch = self.cache.claim(scratch_key, width, SignType::Signed, out, |reg, out| {
                out.push(Op::Mov {
                    dst: Operand::Register(reg),
                    src,
                });
            })?;
            Ok(ctor(dst, Operand::Register(scratch)))
        } else {
            Ok(ctor(dst, src))
        }
    }

    /// Like `rewrite_binary`'s mem-mem staging, but for the read-only
    /// comparison opcodes (`Cmp`/`Test`), which never write either operand
    /// back. Both operands are spilled whenever an `If`/`While`/`ForRange`
    /// guard runs under enough register pressure, and no x86 form of
    /// `cmp`/`test` accepts two memory operands.
    fn resolve_comparison_operands(
        &mut self,
        left: Operand<'p>,
        right: Operand<'p>,
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<(Operand<'p>, Operand<'p>)> {
        let left = self.resolve_read(left, out)?;
        let right = self.resolve_read(right, out)?;
        if left.is_memory() && right.is_memory() {
            let width = right.as_memory().and_then(|m| m.width()).unwrap_or(RegisterWidth::R64);
            let key = self.next_scratch_key();
            let scratch = self.cache.claim(key, width, SignType::Signed, out, |reg, out| {
                out.push(Op::Mov {
                    dst: Operand::Register(reg),
                    src: right,
                });
            })?;
            Ok((left, Operand::Register(scratch)))
        } else {
            Ok((left, right))
        }
    }

    /// `fcall`: caller-saved registers that are live across the call spill
    /// to a save region below `rsp`, arguments are materialized into their
    /// ABI registers (redirecting through the save region if an earlier
    /// argument move already clobbered a later argument's source register),
    /// narrower-than-64-bit arguments are zero-extended, and the return
    /// value (if any) is copied out of `rax`.
    fn lower_fcall(
        &mut self,
        function_pointer: usize,
        return_vreg: Option<Register<'p>>,
        arguments: &[Operand<'p>],
        out: &mut InstructionSet<'p>,
    ) -> CompileResult<()> {
        self.flush_before(out);

        let save_base = Register::physical(STACK_POINTER_MREG_ID, RegisterWidth::R64, SignType::Signed);
        for (i, &id) in CALLER_SAVED_MREG_IDS.iter().enumerate() {
            let slot = MemoryAddress::based(save_base, -8 * (i as i32 + 1));
            out.push(Op::Mov {
                dst: Operand::Memory(slot),
                src: Operand::Register(Register::physical(id, RegisterWidth::R64, SignType::Signed)),
            });
        }
        let save_region_bytes = 8 * CALLER_SAVED_MREG_IDS.len() as i32;

        // Resolve every argument and immediately stage any register-valued
        // result into its own save-region slot, before resolving the next
        // one. This must happen in the same pass as resolution: a later
        // argument's resolve_read can evict an earlier argument's cache
        // entry (only 3 cache slots exist), so an earlier result can't be
        // left sitting in the cache across later resolutions. Memory and
        // small-constant operands are already stable (frame- or
        // instruction-relative) and pass through unstaged.
        let mut staged = Vec::with_capacity(arguments.len());
        for (i, &arg) in arguments.iter().enumerate() {
            let resolved = self.resolve_read(arg, out)?;
            let value = match resolved {
                Operand::Register(r) if r.is_physical() => {
                    let slot = MemoryAddress::based(save_base, save_region_bytes + 8 * (i as i32 + 1));
                    out.push(Op::Mov { dst: Operand::Memory(slot), src: resolved });
                    Operand::Memory(slot)
                }
                other => other,
            };
            staged.push(value);
        }

        for (i, value) in staged.into_iter().enumerate() {
            let Some(&target_id) = CALL_ARGUMENT_REGISTER_IDS.get(i) else {
                return Err(CompileError::Compilation(format!(
                    "fcall with more than {} arguments is not supported",
                    CALL_ARGUMENT_REGISTER_IDS.len()
                )));
            };
            let sign = match value {
                Operand::Register(r) => r.sign().unwrap_or(SignType::Signed),
                _ => SignType::Signed,
            };
            let dst_reg = Register::physical(target_id, RegisterWidth::R64, sign);
            out.push(Op::Mov {
                dst: Operand::Register(dst_reg),
                src: value,
            });
        }

        // Everything above addressed the save region and the staged
        // arguments as negative offsets from the `rsp` that was live on
        // entry to this lowering. Reserve that space now, right before the
        // call: `call`'s own return-address push must land below it, or it
        // would clobber save slot 0. Rounded to 16 bytes so the callee is
        // entered with the same alignment an ordinary call site would give
        // it.
        let raw_reserved = save_region_bytes + 8 * arguments.len() as i32;
        let reserved_bytes = ((raw_reserved + 15) / 16) * 16;
        if reserved_bytes > 0 {
            out.push(Op::Sub {
                dst: Operand::Register(save_base),
                src: Operand::Constant(Constant::from_i64(reserved_bytes as i64)),
            });
        }

        out.push(Op::Call { function_pointer });

        if reserved_bytes > 0 {
            out.push(Op::Add {
                dst: Operand::Register(save_base),
                src: Operand::Constant(Constant::from_i64(reserved_bytes as i64)),
            });
        }

        // Restore every saved register except the one the callee's return
        // value lives in: that one stays untouched here and is copied out to
        // its destination afterwards, once every other register (which the
        // destination itself might be) is already back to its pre-call
        // value. Restoring it now and copying out after would let whichever
        // of these Movs runs last stomp the other.
        for (i, &id) in CALLER_SAVED_MREG_IDS.iter().enumerate() {
            if return_vreg.is_some() && id == CALL_RETURN_REGISTER_ID {
                continue;
            }
            let slot = MemoryAddress::based(save_base, -8 * (i as i32 + 1));
            out.push(Op::Mov {
                dst: Operand::Register(Register::physical(id, RegisterWidth::R64, SignType::Signed)),
                src: Operand::Memory(slot),
            });
        }

        if let Some(vreg) = return_vreg {
            let (width, sign) = self.vreg_type(vreg)?;
            let dst = self.resolve_write(Operand::Register(vreg), out)?;
            out.push(Op::Mov {
                dst,
                src: Operand::Register(Register::physical(CALL_RETURN_REGISTER_ID, width, sign)),
            });
        }
        Ok(())
    }

    /// `fdiv`/`fmod` share the same lowering: save `rax`/`rdx`, move the
    /// dividend into `rax`, sign-extend with `cqo`, `idiv` by the divisor,
    /// copy the quotient (`rax`) or remainder (`rdx`) out, then restore.
    fn lower_fdiv_fmod(
        &mut self,
        result: Operand<'p>,
        dividend: Operand<'p>,
        divisor: Operand<'p>,
        out: &mut InstructionSet<'p>,
        result_source_id: u8,
    ) -> CompileResult<()> {
        self.flush_before(out);

        let rax = Register::physical(0, RegisterWidth::R64, SignType::Signed);
        let rdx = Register::physical(2, RegisterWidth::R64, SignType::Signed);
        let save_base = Register::physical(STACK_POINTER_MREG_ID, RegisterWidth::R64, SignType::Signed);
        let rax_slot = MemoryAddress::based(save_base, -8);
        let rdx_slot = MemoryAddress::based(save_base, -16);
        out.push(Op::Mov { dst: Operand::Memory(rax_slot), src: Operand::Register(rax) });
        out.push(Op::Mov { dst: Operand::Memory(rdx_slot), src: Operand::Register(rdx) });

        // Resolved without the shared spill cache: this lowering already
        // owns rax/rdx for its own implicit operands, and a cache claim
        // landing in one of them would be silently clobbered by the moves
        // below before it's ever read.
        let dividend = self.resolve_read_no_cache(dividend, out)?;
        let divisor = self.resolve_read_no_cache(divisor, out)?;
        out.push(Op::Mov { dst: Operand::Register(rax), src: dividend });
        out.push(Op::Cqo);

        // idiv can't take an immediate operand; materialize a constant
        // divisor into rcx, which this lowering doesn't otherwise use.
        let divisor = match divisor {
            Operand::Constant(_) => {
                let rcx = Register::physical(1, RegisterWidth::R64, SignType::Signed);
                out.push(Op::Mov { dst: Operand::Register(rcx), src: divisor });
                Operand::Register(rcx)
            }
            other => other,
        };
        out.push(Op::Idiv { op: divisor });

        let dst = self.resolve_write(result, out)?;
        let (width, sign) = match result {
            Operand::Register(r) if r.is_virtual() => self.vreg_type(r)?,
            _ => (RegisterWidth::R64, SignType::Signed),
        };
        out.push(Op::Mov {
            dst,
            src: Operand::Register(Register::physical(result_source_id, width, sign)),
        });

        out.push(Op::Mov { dst: Operand::Register(rax), src: Operand::Memory(rax_slot) });
        out.push(Op::Mov { dst: Operand::Register(rdx), src: Operand::Memory(rdx_slot) });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::liveness::LivenessAnalyzer;
    use crate::ir::{Arena, Constant, Program, RegisterWidth, SignType};

    #[test]
    fn identity_program_assigns_without_error() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let x = program.new_vreg(RegisterWidth::R64, SignType::Signed);
        program.get_argument(0, x);
        program.set_return(x);
        program.clear_vreg(x);

        let intervals = LivenessAnalyzer::analyze(program.body().as_slice()).unwrap();
        let schedule = crate::compilation::allocator::LinearScanRegisterAllocator::allocate(&intervals).unwrap();
        let assigned = RegisterAssigner::assign(program.body().as_slice(), &schedule).unwrap();
        assert!(!assigned.is_empty());
    }

    #[test]
    fn sixty_four_bit_constant_is_materialized_through_cache() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let x = program.new_vreg(RegisterWidth::R64, SignType::Signed);
        program.mov(x, Constant::from_i64(1i64 << 40));
        program.clear_vreg(x);

        let intervals = LivenessAnalyzer::analyze(program.body().as_slice()).unwrap();
        let schedule = crate::compilation::allocator::LinearScanRegisterAllocator::allocate(&intervals).unwrap();
        let assigned = RegisterAssigner::assign(program.body().as_slice(), &schedule).unwrap();
        assert!(assigned.iter().any(|i| matches!(i.op, Op::Mov { .. })));
    }
}
