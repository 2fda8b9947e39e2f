//! The closed IR opcode set (spec.md §4.1).

use std::fmt;

use smallvec::SmallVec;

use crate::ir::label::Label;
use crate::ir::operand::Operand;
use crate::ir::register::{Register, RegisterWidth, SignType};

/// Conditional/unconditional jump flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Jmp,
    Je,
    Jne,
    Jz,
    Jnz,
    Jl,
    Jle,
    Jg,
    Jge,
    Jb,
    Jbe,
    Ja,
    Jae,
}

impl JumpKind {
    /// The inverse condition, used by structured control to jump *over* a
    /// branch/loop body when the original comparator holds.
    pub fn inverted(self) -> JumpKind {
        use JumpKind::*;
        match self {
            Jmp => Jmp,
            Je => Jne,
            Jne => Je,
            Jz => Jnz,
            Jnz => Jz,
            Jl => Jge,
            Jle => Jg,
            Jg => Jle,
            Jge => Jl,
            Jb => Jae,
            Jbe => Ja,
            Ja => Jbe,
            Jae => Jb,
        }
    }
}

impl fmt::Display for JumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JumpKind::Jmp => "jmp",
            JumpKind::Je => "je",
            JumpKind::Jne => "jne",
            JumpKind::Jz => "jz",
            JumpKind::Jnz => "jnz",
            JumpKind::Jl => "jl",
            JumpKind::Jle => "jle",
            JumpKind::Jg => "jg",
            JumpKind::Jge => "jge",
            JumpKind::Jb => "jb",
            JumpKind::Jbe => "jbe",
            JumpKind::Ja => "ja",
            JumpKind::Jae => "jae",
        };
        write!(f, "{s}")
    }
}

/// A call argument list; most calls pass at most the six ABI argument
/// registers worth of operands.
pub type CallArguments<'p> = SmallVec<[Operand<'p>; 6]>;

/// The closed IR opcode set. Each variant names the operands it reads and
/// writes in its doc comment; `Op::is_operand_written` gives the assigner a
/// uniform way to query that.
#[derive(Debug, Clone, PartialEq)]
pub enum Op<'p> {
    // --- Pseudo instructions, consumed before emission -------------------
    /// Declares a virtual register's logical type; fails if redeclared
    /// within the same live scope.
    RequestVreg {
        vreg: Register<'p>,
        width: RegisterWidth,
        sign: SignType,
    },
    /// Ends a virtual register's live interval.
    ClearVreg { vreg: Register<'p> },
    /// Copies the i-th call-argument register into a vreg.
    GetArgument { index: u8, vreg: Register<'p> },
    /// Moves an operand into the call-return register.
    SetReturn { value: Operand<'p> },
    Comment { text: String },
    ContextBegin { name: String },
    ContextEnd,
    /// Likeliness/loop-hint annotations; preserved but have no emission
    /// effect (spec.md §9 Open Questions).
    BranchBegin { likely: bool },
    BranchEnd,

    // --- Nullary -----------------------------------------------------------
    Ret,
    Nop,
    /// Sign-extends `rax` into `rdx:rax`.
    Cqo,

    // --- Unary ---------------------------------------------------------
    Push { reg: Register<'p> },
    Pop { reg: Register<'p> },
    Inc { op: Operand<'p> },
    Dec { op: Operand<'p> },
    Sete { op: Operand<'p> },
    Setne { op: Operand<'p> },
    Prefetch { mem: crate::ir::memory::MemoryAddress<'p> },
    Idiv { op: Operand<'p> },
    Jump { kind: JumpKind, label: Label<'p> },
    Section { label: Label<'p> },

    // --- Binary ----------------------------------------------------------
    Mov { dst: Operand<'p>, src: Operand<'p> },
    Cmovle { dst: Operand<'p>, src: Operand<'p> },
    Cmovge { dst: Operand<'p>, src: Operand<'p> },
    Lea { dst: Register<'p>, src: crate::ir::memory::MemoryAddress<'p> },
    Add { dst: Operand<'p>, src: Operand<'p> },
    Xadd { dst: Operand<'p>, src: Operand<'p>, lock: bool },
    Sub { dst: Operand<'p>, src: Operand<'p> },
    Imul { dst: Operand<'p>, src: Operand<'p> },
    And { dst: Operand<'p>, src: Operand<'p> },
    Or { dst: Operand<'p>, src: Operand<'p> },
    Xor { dst: Operand<'p>, src: Operand<'p> },
    Shl { dst: Operand<'p>, src: Operand<'p> },
    Shr { dst: Operand<'p>, src: Operand<'p> },
    Crc32 { dst: Operand<'p>, src: Operand<'p> },
    Cmp {
        left: Operand<'p>,
        right: Operand<'p>,
        likely: bool,
        unroll_hint: Option<u32>,
    },
    Test { left: Operand<'p>, right: Operand<'p> },

    // --- Ternary -----------------------------------------------------------
    Fdiv {
        quotient: Operand<'p>,
        dividend: Operand<'p>,
        divisor: Operand<'p>,
    },
    Fmod {
        remainder: Operand<'p>,
        dividend: Operand<'p>,
        divisor: Operand<'p>,
    },

    // --- Call --------------------------------------------------------------
    Fcall {
        function_pointer: usize,
        return_vreg: Option<Register<'p>>,
        arguments: CallArguments<'p>,
    },
    /// Raw call, no argument/return save/restore machinery.
    Call { function_pointer: usize },

    // --- Misc ------------------------------------------------------------
    Align { bytes: u32 },
}

impl<'p> Op<'p> {
    pub fn opcode_name(&self) -> &'static str {
        match self {
            Op::RequestVreg { .. } => "request_vreg",
            Op::ClearVreg { .. } => "clear_vreg",
            Op::GetArgument { .. } => "get_argument",
            Op::SetReturn { .. } => "set_return",
            Op::Comment { .. } => "comment",
            Op::ContextBegin { .. } => "context_begin",
            Op::ContextEnd => "context_end",
            Op::BranchBegin { .. } => "branch_begin",
            Op::BranchEnd => "branch_end",
            Op::Ret => "ret",
            Op::Nop => "nop",
            Op::Cqo => "cqo",
            Op::Push { .. } => "push",
            Op::Pop { .. } => "pop",
            Op::Inc { .. } => "inc",
            Op::Dec { .. } => "dec",
            Op::Sete { .. } => "sete",
            Op::Setne { .. } => "setne",
            Op::Prefetch { .. } => "prefetch",
            Op::Idiv { .. } => "idiv",
            Op::Jump { .. } => "jump",
            Op::Section { .. } => "section",
            Op::Mov { .. } => "mov",
            Op::Cmovle { .. } => "cmovle",
            Op::Cmovge { .. } => "cmovge",
            Op::Lea { .. } => "lea",
            Op::Add { .. } => "add",
            Op::Xadd { .. } => "xadd",
            Op::Sub { .. } => "sub",
            Op::Imul { .. } => "imul",
            Op::And { .. } => "and",
            Op::Or { .. } => "or",
            Op::Xor { .. } => "xor",
            Op::Shl { .. } => "shl",
            Op::Shr { .. } => "shr",
            Op::Crc32 { .. } => "crc32",
            Op::Cmp { .. } => "cmp",
            Op::Test { .. } => "test",
            Op::Fdiv { .. } => "fdiv",
            Op::Fmod { .. } => "fmod",
            Op::Fcall { .. } => "fcall",
            Op::Call { .. } => "call",
            Op::Align { .. } => "align",
        }
    }

    /// True if this opcode begins a new control-flow region and must force
    /// a flush of dirty spill-register cache entries (spec.md §4.6 "Flush
    /// rule"). The second element says whether the cache should also be
    /// cleared (vs. kept for fall-through).
    pub fn flush_requirement(&self) -> Option<FlushKind> {
        match self {
            Op::Section { .. } => Some(FlushKind::FlushAndClear),
            Op::Jump { .. } | Op::Cmp { .. } | Op::Test { .. } => Some(FlushKind::FlushOnly),
            Op::Fcall { .. } | Op::Fdiv { .. } | Op::Fmod { .. } => Some(FlushKind::FlushAndClear),
            _ => None,
        }
    }

    /// Every operand this instruction reads or writes, in no particular
    /// order. Used by liveness analysis to extend an interval's last-use
    /// point and by the assigner to find operands needing rewriting.
    pub fn operands(&self) -> SmallVec<[Operand<'p>; 4]> {
        let mut out = SmallVec::new();
        let mem_operand = |mem: &crate::ir::memory::MemoryAddress<'p>| -> SmallVec<[Operand<'p>; 2]> {
            let mut regs = SmallVec::new();
            if let crate::ir::memory::MemoryBase::Register(r) = mem.base() {
                regs.push(Operand::Register(r));
            }
            if let Some(index) = mem.index() {
                regs.push(Operand::Register(index));
            }
            regs
        };
        match self {
            Op::RequestVreg { vreg, .. } | Op::ClearVreg { vreg } => out.push(Operand::Register(*vreg)),
            Op::GetArgument { vreg, .. } => out.push(Operand::Register(*vreg)),
            Op::SetReturn { value } => out.push(*value),
            Op::Push { reg } | Op::Pop { reg } => out.push(Operand::Register(*reg)),
            Op::Inc { op } | Op::Dec { op } | Op::Sete { op } | Op::Setne { op } | Op::Idiv { op } => {
                out.push(*op)
            }
            Op::Prefetch { mem } => out.extend(mem_operand(mem)),
            Op::Mov { dst, src }
            | Op::Cmovle { dst, src }
            | Op::Cmovge { dst, src }
            | Op::Add { dst, src }
            | Op::Sub { dst, src }
            | Op::Imul { dst, src }
            | Op::And { dst, src }
            | Op::Or { dst, src }
            | Op::Xor { dst, src }
            | Op::Shl { dst, src }
            | Op::Shr { dst, src }
            | Op::Crc32 { dst, src } => {
                out.push(*dst);
                out.push(*src);
            }
            Op::Xadd { dst, src, .. } => {
                out.push(*dst);
                out.push(*src);
            }
            Op::Lea { dst, src } => {
                out.push(Operand::Register(*dst));
                out.extend(mem_operand(src));
            }
            Op::Cmp { left, right, .. } | Op::Test { left, right } => {
                out.push(*left);
                out.push(*right);
            }
            Op::Fdiv {
                quotient,
                dividend,
                divisor,
            } => {
                out.push(*quotient);
                out.push(*dividend);
                out.push(*divisor);
            }
            Op::Fmod {
                remainder,
                dividend,
                divisor,
            } => {
                out.push(*remainder);
                out.push(*dividend);
                out.push(*divisor);
            }
            Op::Fcall {
                return_vreg,
                arguments,
                ..
            } => {
                if let Some(reg) = return_vreg {
                    out.push(Operand::Register(*reg));
                }
                out.extend(arguments.iter().copied());
            }
            Op::Comment { .. }
            | Op::ContextBegin { .. }
            | Op::ContextEnd
            | Op::BranchBegin { .. }
            | Op::BranchEnd
            | Op::Ret
            | Op::Nop
            | Op::Cqo
            | Op::Jump { .. }
            | Op::Section { .. }
            | Op::Call { .. }
            | Op::Align { .. } => {}
        }
        out
    }

    /// The subset of [`Op::operands`] that virtual-register-bearing
    /// liveness and assignment care about. Flattens memory operands'
    /// base/index registers too, since those can themselves be vregs even
    /// for opcodes whose `operands()` reports the memory as a single item.
    pub fn virtual_registers(&self) -> SmallVec<[Register<'p>; 4]> {
        let mut out = SmallVec::new();
        for operand in self.operands() {
            match operand {
                Operand::Register(r) if r.is_virtual() => out.push(r),
                Operand::Memory(mem) => {
                    if let crate::ir::memory::MemoryBase::Register(r) = mem.base() {
                        if r.is_virtual() {
                            out.push(r);
                        }
                    }
                    if let Some(index) = mem.index() {
                        if index.is_virtual() {
                            out.push(index);
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Whether the operand at `index` in [`Op::operands`]'s order is
    /// written (a destination) rather than only read. The assigner uses
    /// this to decide whether a spilled operand needs a pre-load versus
    /// only a post-store (spec.md §4.6's "Overwriting operand rule").
    ///
    /// `index` follows the same order `operands()` pushes in; an index
    /// past the operand count returns `false`.
    pub fn is_operand_written(&self, index: usize) -> bool {
        match self {
            Op::RequestVreg { .. } => index == 0,
            Op::ClearVreg { .. } => false,
            Op::GetArgument { .. } => index == 0,
            Op::SetReturn { .. } => false,
            Op::Push { .. } => false,
            Op::Pop { .. } => index == 0,
            Op::Inc { .. } | Op::Dec { .. } => index == 0,
            Op::Sete { .. } | Op::Setne { .. } => index == 0,
            Op::Idiv { .. } => false,
            Op::Prefetch { .. } => false,
            Op::Mov { .. }
            | Op::Cmovle { .. }
            | Op::Cmovge { .. }
            | Op::Add { .. }
            | Op::Sub { .. }
            | Op::Imul { .. }
            | Op::And { .. }
            | Op::Or { .. }
            | Op::Xor { .. }
            | Op::Shl { .. }
            | Op::Shr { .. }
            | Op::Crc32 { .. } => index == 0,
            // `xadd dst, src` swaps both: `src` ends up holding the old
            // `dst`, and `dst` the sum.
            Op::Xadd { .. } => index == 0 || index == 1,
            // operands() pushes `dst` first, then `src`'s address
            // registers (read-only, never written).
            Op::Lea { .. } => index == 0,
            Op::Cmp { .. } | Op::Test { .. } => false,
            Op::Fdiv { .. } | Op::Fmod { .. } => index == 0,
            // `return_vreg`, when present, is pushed before the arguments.
            Op::Fcall { return_vreg, .. } => return_vreg.is_some() && index == 0,
            Op::Comment { .. }
            | Op::ContextBegin { .. }
            | Op::ContextEnd
            | Op::BranchBegin { .. }
            | Op::BranchEnd
            | Op::Ret
            | Op::Nop
            | Op::Cqo
            | Op::Jump { .. }
            | Op::Section { .. }
            | Op::Call { .. }
            | Op::Align { .. } => false,
        }
    }
}

/// Whether a basic-block boundary flushes the spill-register cache only, or
/// flushes and clears it (spec.md §4.6 "Flush rule").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    FlushOnly,
    FlushAndClear,
}

/// An [`Op`] plus its optional inline comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction<'p> {
    pub op: Op<'p>,
    pub comment: Option<String>,
}

impl<'p> Instruction<'p> {
    pub fn new(op: Op<'p>) -> Self {
        Instruction { op, comment: None }
    }

    pub fn with_comment(op: Op<'p>, comment: impl Into<String>) -> Self {
        Instruction {
            op,
            comment: Some(comment.into()),
        }
    }
}

impl<'p> From<Op<'p>> for Instruction<'p> {
    fn from(op: Op<'p>) -> Self {
        Instruction::new(op)
    }
}

impl fmt::Display for Instruction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.opcode_name())?;
        if let Some(comment) = &self.comment {
            write!(f, " ; {comment}")?;
        }
        Ok(())
    }
}
