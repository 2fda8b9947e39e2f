//! Raw x86-64 instruction encoding (spec.md C7): REX/ModRM/SIB byte
//! construction for the opcode subset the assigner ever emits. Grounded on
//! the teacher's own hand-rolled encoder at
//! `cranelift/assembler-x64/src/rex.rs` (`encode_modrm`/`encode_sib`/
//! `RexFlags`), adapted from that crate's per-instruction builder types to a
//! single enum-driven `encode_instruction` entry point matching this crate's
//! closed `Op` set.

use crate::error::{CompileError, CompileResult};
use crate::ir::{Constant, JumpKind, MemoryAddress, MemoryBase, Op, Operand, Register, RegisterWidth, SignType};

/// Destination for encoded bytes. A thin analogue of the teacher's
/// `api::CodeSink`, minus the trap-table bookkeeping this crate has no use
/// for.
pub trait CodeSink {
    fn put1(&mut self, byte: u8);
    fn put4(&mut self, value: u32);
    fn put8(&mut self, value: u64);
    fn current_offset(&self) -> u32;
}

impl CodeSink for Vec<u8> {
    fn put1(&mut self, byte: u8) {
        self.push(byte);
    }

    fn put4(&mut self, value: u32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put8(&mut self, value: u64) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn current_offset(&self) -> u32 {
        self.len() as u32
    }
}

/// Encode the ModR/M byte.
fn encode_modrm(m0d: u8, enc_reg_g: u8, rm_e: u8) -> u8 {
    ((m0d & 3) << 6) | ((enc_reg_g & 7) << 3) | (rm_e & 7)
}

/// Encode the SIB byte (scale-index-base).
fn encode_sib(scale_log2: u8, enc_index: u8, enc_base: u8) -> u8 {
    ((scale_log2 & 3) << 6) | ((enc_index & 7) << 3) | (enc_base & 7)
}

fn scale_log2(scale: u8) -> u8 {
    match scale {
        0 | 1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 0,
    }
}

/// REX prefix bits: `W` selects 64-bit operand size, `R`/`X`/`B` extend the
/// reg/index/rm fields into r8-r15.
struct Rex {
    w: bool,
    always_emit: bool,
}

impl Rex {
    fn for_width(width: RegisterWidth) -> Self {
        Rex {
            w: width == RegisterWidth::R64,
            always_emit: width == RegisterWidth::R8,
        }
    }

    fn emit_rr(&self, sink: &mut impl CodeSink, enc_g: u8, enc_e: u8) {
        let w = u8::from(self.w);
        let r = (enc_g >> 3) & 1;
        let b = (enc_e >> 3) & 1;
        let rex = 0x40 | (w << 3) | (r << 2) | b;
        if rex != 0x40 || self.always_emit || enc_g >= 8 || enc_e >= 8 {
            sink.put1(rex);
        }
    }

    fn emit_rm(&self, sink: &mut impl CodeSink, enc_g: u8, enc_index: u8, enc_base: u8) {
        let w = u8::from(self.w);
        let r = (enc_g >> 3) & 1;
        let x = (enc_index >> 3) & 1;
        let b = (enc_base >> 3) & 1;
        let rex = 0x40 | (w << 3) | (r << 2) | (x << 1) | b;
        if rex != 0x40 || self.always_emit {
            sink.put1(rex);
        }
    }

    fn emit_o(&self, sink: &mut impl CodeSink, enc_e: u8) {
        let w = u8::from(self.w);
        let b = (enc_e >> 3) & 1;
        let rex = 0x40 | (w << 3) | b;
        if rex != 0x40 || self.always_emit {
            sink.put1(rex);
        }
    }
}

fn reg_id(reg: Register<'_>) -> CompileResult<(u8, RegisterWidth)> {
    let id = reg
        .machine_id()
        .ok_or_else(|| CompileError::Compilation(format!("encoder received an unresolved register {reg}")))?;
    if id > 15 {
        return Err(CompileError::UnknownRegister {
            id,
            width_bits: reg.width().unwrap_or(RegisterWidth::R64).bits(),
        });
    }
    Ok((id, reg.width().unwrap_or(RegisterWidth::R64)))
}

/// Emits the ModRM/SIB/displacement sequence for `mem` with `enc_g` as the
/// reg field (an opcode-extension digit for unary forms), after the caller
/// has already emitted the REX prefix via `rex_for_memory`.
fn emit_memory_operand(mem: MemoryAddress<'_>, enc_g: u8, out: &mut Vec<u8>) -> CompileResult<()> {
    let base_id = match mem.base() {
        MemoryBase::Register(reg) => reg_id(reg)?.0,
        MemoryBase::Constant(_) => {
            return Err(CompileError::Compilation(
                "absolute memory base must be materialized into a register before encoding".into(),
            ))
        }
    };
    let disp = mem.displacement();
    let m0d = if disp == 0 && (base_id & 7) != 5 {
        0b00
    } else if i8::try_from(disp).is_ok() {
        0b01
    } else {
        0b10
    };

    if let Some(index) = mem.index() {
        let index_id = reg_id(index)?.0;
        out.put1(encode_modrm(m0d, enc_g, 0b100));
        out.put1(encode_sib(scale_log2(mem.scale()), index_id, base_id));
    } else if (base_id & 7) == 4 {
        // rsp/r12 as a base needs an explicit SIB byte with no index.
        out.put1(encode_modrm(m0d, enc_g, 0b100));
        out.put1(encode_sib(0, 0b100, base_id));
    } else {
        out.put1(encode_modrm(m0d, enc_g, base_id));
    }

    match m0d {
        0b01 => out.put1(disp as u8),
        0b10 => out.put4(disp as u32),
        _ => {}
    }
    Ok(())
}

fn rex_for_memory(width: RegisterWidth, enc_g: u8, mem: MemoryAddress<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    let base_id = match mem.base() {
        MemoryBase::Register(reg) => reg_id(reg)?.0,
        MemoryBase::Constant(_) => 0,
    };
    let index_id = mem.index().map(|i| reg_id(i)).transpose()?.map(|(id, _)| id).unwrap_or(0);
    Rex::for_width(width).emit_rm(out, enc_g, index_id, base_id);
    Ok(())
}

/// `rm` operand: either a register or a memory location.
enum RegOrMem<'p> {
    Reg(u8),
    Mem(MemoryAddress<'p>),
}

fn as_reg_or_mem<'p>(operand: Operand<'p>) -> CompileResult<RegOrMem<'p>> {
    match operand {
        Operand::Register(r) => Ok(RegOrMem::Reg(reg_id(r)?.0)),
        Operand::Memory(m) => Ok(RegOrMem::Mem(m)),
        Operand::Constant(_) => Err(CompileError::Compilation("constant used where reg/mem expected".into())),
    }
}

/// Emits a standard `op reg, rm` or `op rm, reg` two-operand form: opcode
/// byte(s), then REX, then ModRM/SIB/disp.
fn emit_reg_rm(opcode: &[u8], width: RegisterWidth, enc_g: u8, rm: RegOrMem<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    match rm {
        RegOrMem::Reg(enc_e) => {
            Rex::for_width(width).emit_rr(out, enc_g, enc_e);
            out.extend_from_slice(opcode);
            out.put1(encode_modrm(0b11, enc_g, enc_e));
        }
        RegOrMem::Mem(mem) => {
            rex_for_memory(width, enc_g, mem, out)?;
            out.extend_from_slice(opcode);
            emit_memory_operand(mem, enc_g, out)?;
        }
    }
    Ok(())
}

/// Arithmetic-group opcode digit (for the `81 /digit`, `83 /digit`, `01
/// /digit` families): add=0 or=1 adc=2 sbb=3 and=4 sub=5 xor=6 cmp=7.
fn arith_digit_for(op: &Op<'_>) -> Option<u8> {
    match op {
        Op::Add { .. } => Some(0),
        Op::Or { .. } => Some(1),
        Op::And { .. } => Some(4),
        Op::Sub { .. } => Some(5),
        Op::Xor { .. } => Some(6),
        Op::Cmp { .. } => Some(7),
        _ => None,
    }
}

/// Emits one already-assigned, physical-only [`Op`] into `out`. Called by
/// `backend::assembler` once per instruction in the final, translated
/// stream; jump/call targets needing a later patch are reported back via the
/// returned [`PatchSite`].
pub fn encode_op(op: &Op<'_>, out: &mut Vec<u8>) -> CompileResult<Option<PatchSite>> {
    match op {
        Op::Nop => out.put1(0x90),
        Op::Ret => out.put1(0xc3),
        Op::Cqo => {
            out.put1(0x48);
            out.put1(0x99);
        }
        Op::Push { reg } => {
            let (id, _) = reg_id(*reg)?;
            Rex::for_width(RegisterWidth::R64).emit_o(out, id);
            out.put1(0x50 + (id & 7));
        }
        Op::Pop { reg } => {
            let (id, _) = reg_id(*reg)?;
            Rex::for_width(RegisterWidth::R64).emit_o(out, id);
            out.put1(0x58 + (id & 7));
        }
        Op::Inc { op } => emit_unary_group(0xff, 0, op, out)?,
        Op::Dec { op } => emit_unary_group(0xff, 1, op, out)?,
        Op::Idiv { op } => emit_unary_group(0xf7, 7, op, out)?,
        Op::Sete { op } => emit_setcc(0x94, op, out)?,
        Op::Setne { op } => emit_setcc(0x95, op, out)?,
        Op::Prefetch { mem } => {
            rex_for_memory(RegisterWidth::R64, 1, *mem, out)?;
            out.put1(0x0f);
            out.put1(0x18);
            emit_memory_operand(*mem, 1, out)?;
        }
        Op::Mov { dst, src } => return encode_mov(*dst, *src, out).map(|()| None),
        Op::Lea { dst, src } => {
            let (enc_g, width) = reg_id(*dst)?;
            rex_for_memory(width, enc_g, *src, out)?;
            out.put1(0x8d);
            emit_memory_operand(*src, enc_g, out)?;
        }
        Op::Cmovle { dst, src } => emit_cmov(0x4e, *dst, *src, out)?,
        Op::Cmovge { dst, src } => emit_cmov(0x4d, *dst, *src, out)?,
        Op::Add { dst, src }
        | Op::Sub { dst, src }
        | Op::And { dst, src }
        | Op::Or { dst, src }
        | Op::Xor { dst, src }
        | Op::Cmp { left: dst, right: src, .. } => {
            let digit = arith_digit_for(op).expect("matched arm is an arithmetic-group opcode");
            emit_arith(digit, *dst, *src, out)?;
        }
        Op::Test { left, right } => emit_test(*left, *right, out)?,
        Op::Xadd { dst, src, lock } => {
            if *lock {
                out.put1(0xf0);
            }
            let (enc_g, width) = reg_id(src.as_register().ok_or_else(|| {
                CompileError::Compilation("xadd source must be a register".into())
            })?)?;
            let rm = as_reg_or_mem(*dst)?;
            match rm {
                RegOrMem::Reg(enc_e) => {
                    Rex::for_width(width).emit_rr(out, enc_g, enc_e);
                    out.put1(0x0f);
                    out.put1(0xc1);
                    out.put1(encode_modrm(0b11, enc_g, enc_e));
                }
                RegOrMem::Mem(mem) => {
                    rex_for_memory(width, enc_g, mem, out)?;
                    out.put1(0x0f);
                    out.put1(0xc1);
                    emit_memory_operand(mem, enc_g, out)?;
                }
            }
        }
        Op::Imul { dst, src } => {
            let (enc_g, width) = reg_id(dst.as_register().ok_or_else(|| {
                CompileError::Compilation("imul destination must be a register".into())
            })?)?;
            let rm = as_reg_or_mem(*src)?;
            Rex::for_width(width).emit_rr(out, enc_g, match rm {
                RegOrMem::Reg(e) => e,
                RegOrMem::Mem(_) => 0,
            });
            out.put1(0x0f);
            out.put1(0xaf);
            match rm {
                RegOrMem::Reg(enc_e) => out.put1(encode_modrm(0b11, enc_g, enc_e)),
                RegOrMem::Mem(mem) => emit_memory_operand(mem, enc_g, out)?,
            }
        }
        Op::Shl { dst, src } => emit_shift(4, *dst, *src, out)?,
        Op::Shr { dst, src } => emit_shift(5, *dst, *src, out)?,
        Op::Crc32 { dst, src } => {
            let (enc_g, _) = reg_id(dst.as_register().ok_or_else(|| {
                CompileError::Compilation("crc32 destination must be a register".into())
            })?)?;
            let rm = as_reg_or_mem(*src)?;
            out.put1(0xf2);
            let width = src.as_register().and_then(|r| r.width()).unwrap_or(RegisterWidth::R32);
            Rex::for_width(width).emit_rr(out, enc_g, match rm {
                RegOrMem::Reg(e) => e,
                RegOrMem::Mem(_) => 0,
            });
            out.put1(0x0f);
            out.put1(0x38);
            out.put1(0xf1);
            match rm {
                RegOrMem::Reg(enc_e) => out.put1(encode_modrm(0b11, enc_g, enc_e)),
                RegOrMem::Mem(mem) => emit_memory_operand(mem, enc_g, out)?,
            }
        }
        Op::Jump { kind, label } => {
            let mut site = encode_jump(*kind, out);
            site.label = label.name().to_string();
            return Ok(Some(site));
        }
        Op::Call { function_pointer } => {
            // `function_pointer` is an absolute address, not a relative
            // target: materialize it into a scratch register (r11, which
            // the assigner never hands out) and call through it.
            let r11 = 11u8;
            out.put1(0x49);
            out.put1(0xbb);
            out.put8(*function_pointer as u64);
            out.put1(0x41);
            out.put1(0xff);
            out.put1(encode_modrm(0b11, 2, r11 & 7));
        }
        Op::Align { bytes } => {
            let bytes = (*bytes).max(1) as u32;
            while out.len() as u32 % bytes != 0 {
                out.put1(0x90);
            }
        }
        Op::Section { .. }
        | Op::Comment { .. }
        | Op::ContextBegin { .. }
        | Op::ContextEnd
        | Op::BranchBegin { .. }
        | Op::BranchEnd
        | Op::RequestVreg { .. }
        | Op::ClearVreg { .. }
        | Op::GetArgument { .. }
        | Op::SetReturn { .. }
        | Op::Fcall { .. }
        | Op::Fdiv { .. }
        | Op::Fmod { .. } => {
            // Pseudo-ops or lowered-away shapes: nothing to emit here.
        }
    }
    Ok(None)
}

/// Where a not-yet-resolvable jump target landed, so `backend::assembler`
/// can patch the rel32 field once every label's offset is known.
pub struct PatchSite {
    pub rel32_offset: u32,
    pub label: String,
}

fn encode_jump(kind: JumpKind, out: &mut Vec<u8>) -> PatchSite {
    use JumpKind::*;
    match kind {
        Jmp => out.put1(0xe9),
        Je | Jz => {
            out.put1(0x0f);
            out.put1(0x84);
        }
        Jne | Jnz => {
            out.put1(0x0f);
            out.put1(0x85);
        }
        Jl => {
            out.put1(0x0f);
            out.put1(0x8c);
        }
        Jle => {
            out.put1(0x0f);
            out.put1(0x8e);
        }
        Jg => {
            out.put1(0x0f);
            out.put1(0x8f);
        }
        Jge => {
            out.put1(0x0f);
            out.put1(0x8d);
        }
        Jb => {
            out.put1(0x0f);
            out.put1(0x82);
        }
        Jbe => {
            out.put1(0x0f);
            out.put1(0x86);
        }
        Ja => {
            out.put1(0x0f);
            out.put1(0x87);
        }
        Jae => {
            out.put1(0x0f);
            out.put1(0x83);
        }
    };
    let rel32_offset = out.current_offset();
    out.put4(0); // patched once the target label's offset is known
    PatchSite {
        rel32_offset,
        label: String::new(), // filled in by the caller, which knows the label name
    }
}

fn emit_unary_group(opcode: u8, digit: u8, op: &Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    let width = op.as_register().and_then(|r| r.width()).unwrap_or(RegisterWidth::R64);
    let rm = as_reg_or_mem(*op)?;
    match rm {
        RegOrMem::Reg(enc_e) => {
            Rex::for_width(width).emit_rr(out, digit, enc_e);
            out.put1(opcode);
            out.put1(encode_modrm(0b11, digit, enc_e));
        }
        RegOrMem::Mem(mem) => {
            rex_for_memory(width, digit, mem, out)?;
            out.put1(opcode);
            emit_memory_operand(mem, digit, out)?;
        }
    }
    Ok(())
}

fn emit_setcc(cc: u8, op: &Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    let rm = as_reg_or_mem(*op)?;
    match rm {
        RegOrMem::Reg(enc_e) => {
            Rex::for_width(RegisterWidth::R8).emit_rr(out, 0, enc_e);
            out.put1(0x0f);
            out.put1(cc);
            out.put1(encode_modrm(0b11, 0, enc_e));
        }
        RegOrMem::Mem(mem) => {
            rex_for_memory(RegisterWidth::R8, 0, mem, out)?;
            out.put1(0x0f);
            out.put1(cc);
            emit_memory_operand(mem, 0, out)?;
        }
    }
    Ok(())
}

fn emit_cmov(cc: u8, dst: Operand<'_>, src: Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    let (enc_g, width) = reg_id(dst.as_register().ok_or_else(|| {
        CompileError::Compilation("cmov destination must be a register".into())
    })?)?;
    let rm = as_reg_or_mem(src)?;
    Rex::for_width(width).emit_rr(out, enc_g, match rm {
        RegOrMem::Reg(e) => e,
        RegOrMem::Mem(_) => 0,
    });
    out.put1(0x0f);
    out.put1(cc);
    match rm {
        RegOrMem::Reg(enc_e) => out.put1(encode_modrm(0b11, enc_g, enc_e)),
        RegOrMem::Mem(mem) => emit_memory_operand(mem, enc_g, out)?,
    }
    Ok(())
}

fn emit_arith(digit: u8, dst: Operand<'_>, src: Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    match (dst, src) {
        // Immediate source always lands in the opcode-extension digit form,
        // regardless of whether dst is a register or memory.
        (_, Operand::Constant(c)) => emit_imm_to_rm(digit, dst, c, out),
        // RM form (e.g. `03 /r` for add): reg field = dst, rm field = src.
        // `dst := dst OP src`, dst must end up in the reg field here.
        (Operand::Register(d), _) => {
            let (enc_g, width) = reg_id(d)?;
            emit_reg_rm(&[0x03 | (digit << 3)], width, enc_g, as_reg_or_mem(src)?, out)
        }
        // MR form (e.g. `01 /r` for add): reg field = src, rm field = dst.
        // Only reachable when dst is memory, so src must be a register.
        (Operand::Memory(_), Operand::Register(s)) => {
            let (enc_g, width) = reg_id(s)?;
            emit_reg_rm(&[0x01 | (digit << 3)], width, enc_g, as_reg_or_mem(dst)?, out)
        }
        _ => Err(CompileError::Compilation("arithmetic op needs at least one register operand".into())),
    }
}

fn emit_test(left: Operand<'_>, right: Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    match (left, right) {
        (Operand::Register(r), Operand::Constant(c)) | (Operand::Constant(c), Operand::Register(r)) => {
            let (enc_e, width) = reg_id(r)?;
            Rex::for_width(width).emit_rr(out, 0, enc_e);
            out.put1(0xf7);
            out.put1(encode_modrm(0b11, 0, enc_e));
            out.put4(c.as_i64() as u32);
        }
        (Operand::Register(g), rm) | (rm, Operand::Register(g)) => {
            let (enc_g, width) = reg_id(g)?;
            emit_reg_rm(&[0x85], width, enc_g, as_reg_or_mem(rm)?, out)
        }
        _ => Err(CompileError::Compilation("test needs a register operand".into())),
    }
}

fn emit_imm_to_rm(digit: u8, dst: Operand<'_>, c: Constant, out: &mut Vec<u8>) -> CompileResult<()> {
    let width = dst.as_register().and_then(|r| r.width()).or_else(|| dst.as_memory().and_then(|m| m.width())).unwrap_or(RegisterWidth::R64);
    let rm = as_reg_or_mem(dst)?;
    let value = c.as_i64();
    let use_imm8 = i8::try_from(value).is_ok();
    let opcode = if use_imm8 { 0x83 } else { 0x81 };
    match rm {
        RegOrMem::Reg(enc_e) => {
            Rex::for_width(width).emit_rr(out, digit, enc_e);
            out.put1(opcode);
            out.put1(encode_modrm(0b11, digit, enc_e));
        }
        RegOrMem::Mem(mem) => {
            rex_for_memory(width, digit, mem, out)?;
            out.put1(opcode);
            emit_memory_operand(mem, digit, out)?;
        }
    }
    if use_imm8 {
        out.put1(value as u8);
    } else {
        out.put4(value as u32);
    }
    Ok(())
}

fn emit_shift(digit: u8, dst: Operand<'_>, src: Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    let width = dst.as_register().and_then(|r| r.width()).unwrap_or(RegisterWidth::R64);
    let rm = as_reg_or_mem(dst)?;
    match src {
        Operand::Constant(c) => {
            let opcode = 0xc1;
            match rm {
                RegOrMem::Reg(enc_e) => {
                    Rex::for_width(width).emit_rr(out, digit, enc_e);
                    out.put1(opcode);
                    out.put1(encode_modrm(0b11, digit, enc_e));
                }
                RegOrMem::Mem(mem) => {
                    rex_for_memory(width, digit, mem, out)?;
                    out.put1(opcode);
                    emit_memory_operand(mem, digit, out)?;
                }
            }
            out.put1(c.as_i64() as u8);
            Ok(())
        }
        Operand::Register(r) if r.machine_id() == Some(1) => {
            // shift count already in cl (the assigner flushed rcx for us)
            let opcode = 0xd3;
            match rm {
                RegOrMem::Reg(enc_e) => {
                    Rex::for_width(width).emit_rr(out, digit, enc_e);
                    out.put1(opcode);
                    out.put1(encode_modrm(0b11, digit, enc_e));
                }
                RegOrMem::Mem(mem) => {
                    rex_for_memory(width, digit, mem, out)?;
                    out.put1(opcode);
                    emit_memory_operand(mem, digit, out)?;
                }
            }
            Ok(())
        }
        _ => Err(CompileError::Compilation("shift count must be in cl or an immediate".into())),
    }
}

/// Width-discipline `mov` (spec.md §4.9): equal widths are a plain `mov`;
/// widening a signed source uses `movsx`/`movsxd`, an unsigned source uses
/// `movzx` (or the free zero-extension of a plain 32-bit `mov` into a
/// 64-bit destination); a 64-bit immediate into a register uses `movabs`.
fn encode_mov(dst: Operand<'_>, src: Operand<'_>, out: &mut Vec<u8>) -> CompileResult<()> {
    match (dst, src) {
        (Operand::Register(d), Operand::Constant(c)) => {
            let (enc_e, width) = reg_id(d)?;
            if width == RegisterWidth::R64 && c.needs_materialization() {
                Rex::for_width(RegisterWidth::R64).emit_o(out, enc_e);
                out.put1(0xb8 + (enc_e & 7));
                out.put8(c.as_u64());
            } else {
                Rex::for_width(width).emit_o(out, enc_e);
                out.put1(if width == RegisterWidth::R8 { 0xb0 + (enc_e & 7) } else { 0xb8 + (enc_e & 7) });
                match width {
                    RegisterWidth::R8 => out.put1(c.as_i64() as u8),
                    RegisterWidth::R16 => out.extend_from_slice(&(c.as_i64() as u16).to_le_bytes()),
                    _ => out.put4(c.as_i64() as u32),
                }
            }
            Ok(())
        }
        (Operand::Memory(mem), Operand::Constant(c)) => {
            let width = mem.width().unwrap_or(RegisterWidth::R64);
            if width == RegisterWidth::R16 {
                out.put1(0x66);
            }
            rex_for_memory(width, 0, mem, out)?;
            out.put1(if width == RegisterWidth::R8 { 0xc6 } else { 0xc7 });
            emit_memory_operand(mem, 0, out)?;
            match width {
                RegisterWidth::R8 => out.put1(c.as_i64() as u8),
                RegisterWidth::R16 => out.extend_from_slice(&(c.as_i64() as u16).to_le_bytes()),
                _ => out.put4(c.as_i64() as u32),
            }
            Ok(())
        }
        (Operand::Register(d), Operand::Register(s)) => {
            let (enc_g, dst_width) = reg_id(d)?;
            let (enc_e, src_width) = reg_id(s)?;
            if dst_width == src_width {
                // RM form (`8b /r`): reg field = dst, rm field = src.
                emit_reg_rm(&[0x8b], dst_width, enc_g, RegOrMem::Reg(enc_e), out)
            } else if dst_width > src_width {
                emit_widening_mov(d.sign().unwrap_or(SignType::Signed), dst_width, src_width, enc_g, RegOrMem::Reg(enc_e), out)
            } else {
                // narrowing: register-view truncation at dst's (narrower)
                // width, still an RM form with reg field = dst.
                emit_reg_rm(&[0x8b], dst_width, enc_g, RegOrMem::Reg(enc_e), out)
            }
        }
        (Operand::Register(d), Operand::Memory(mem)) => {
            let (enc_g, dst_width) = reg_id(d)?;
            let mem_width = mem.width().unwrap_or(dst_width);
            if dst_width == mem_width {
                emit_reg_rm(&[0x8b], dst_width, enc_g, RegOrMem::Mem(mem), out)
            } else {
                emit_widening_mov(d.sign().unwrap_or(SignType::Signed), dst_width, mem_width, enc_g, RegOrMem::Mem(mem), out)
            }
        }
        (Operand::Memory(mem), Operand::Register(s)) => {
            let (enc_g, width) = reg_id(s)?;
            emit_reg_rm(&[0x89], mem.width().unwrap_or(width), enc_g, RegOrMem::Mem(mem), out)
        }
        _ => Err(CompileError::Compilation("unsupported mov operand shape".into())),
    }
}

fn emit_widening_mov(
    sign: SignType,
    dst_width: RegisterWidth,
    src_width: RegisterWidth,
    enc_g: u8,
    rm: RegOrMem<'_>,
    out: &mut Vec<u8>,
) -> CompileResult<()> {
    let opcode: &[u8] = match (sign, src_width) {
        (SignType::Unsigned, RegisterWidth::R8) => &[0x0f, 0xb6],
        (SignType::Unsigned, RegisterWidth::R16) => &[0x0f, 0xb7],
        (SignType::Unsigned, RegisterWidth::R32) if dst_width == RegisterWidth::R64 => {
            // zero-extension is free on x86-64: a plain 32-bit mov (RM form,
            // reg field = dst) clears the upper 32 bits of the destination.
            return emit_reg_rm(&[0x8b], RegisterWidth::R32, enc_g, rm, out);
        }
        (SignType::Signed, RegisterWidth::R8) => &[0x0f, 0xbe],
        (SignType::Signed, RegisterWidth::R16) => &[0x0f, 0xbf],
        (SignType::Signed, RegisterWidth::R32) => &[0x63], // movsxd
        _ => return Err(CompileError::Compilation("unsupported widening mov".into())),
    };
    emit_reg_rm(opcode, dst_width, enc_g, rm, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Register, RegisterWidth, SignType};

    #[test]
    fn ret_and_nop_are_single_bytes() {
        let mut out = Vec::new();
        encode_op(&Op::Ret, &mut out).unwrap();
        encode_op(&Op::Nop, &mut out).unwrap();
        assert_eq!(out, vec![0xc3, 0x90]);
    }

    #[test]
    fn mov_reg_reg_emits_rex_and_opcode() {
        let mut out = Vec::new();
        let dst = Register::physical(0, RegisterWidth::R64, SignType::Signed);
        let src = Register::physical(8, RegisterWidth::R64, SignType::Signed);
        encode_op(&Op::Mov { dst: Operand::Register(dst), src: Operand::Register(src) }, &mut out).unwrap();
        assert_eq!(out[0], 0x4c); // REX.W + REX.R (src = r8, extended reg field)
        assert_eq!(out[1], 0x89);
    }

    #[test]
    fn call_materializes_absolute_pointer() {
        let mut out = Vec::new();
        encode_op(&Op::Call { function_pointer: 0x1000 }, &mut out).unwrap();
        assert_eq!(out[0], 0x49);
        assert_eq!(out[1], 0xbb);
    }
}
