//! The program builder (spec.md C2): owns the name arena that virtual
//! registers and labels borrow from, three named instruction sets
//! (arguments/header/body), and factory methods for every operand and
//! instruction shape.

use std::cell::{Cell, RefCell};

use crate::ir::condition::Comparator;
use crate::ir::constant::Constant;
use crate::ir::instruction::{CallArguments, JumpKind, Op};
use crate::ir::instruction_set::InstructionSet;
use crate::ir::label::Label;
use crate::ir::memory::MemoryAddress;
use crate::ir::operand::Operand;
use crate::ir::register::{Register, RegisterWidth, SignType};

/// Backing storage for interned vreg/label names. Strings are appended to a
/// `Vec<String>` behind a `RefCell`; since a `String`'s heap buffer doesn't
/// move when the `Vec` reallocates, a `&str` borrowed from an entry stays
/// valid for the arena's lifetime. Kept separate from `Program` so that
/// `Program<'p>` can borrow from it without being self-referential.
#[derive(Default)]
pub struct Arena {
    strings: RefCell<Vec<String>>,
}

impl Arena {
    pub fn new() -> Self {
        Arena::default()
    }

    fn intern(&self, s: String) -> &str {
        let mut strings = self.strings.borrow_mut();
        strings.push(s);
        let interned: &str = strings.last().unwrap();
        // SAFETY: entries are never removed or mutated after insertion, and
        // moving the `String` header on reallocation does not move its
        // heap-allocated buffer, so this reference remains valid for as
        // long as `self` (and thus the backing `Vec`) is alive.
        unsafe { std::mem::transmute::<&str, &str>(interned) }
    }
}

/// A program under construction: one `arguments` set that copies incoming
/// call-argument registers into vregs, a `header` set for prologue-ish
/// bookkeeping emitted by the compiler, and the `body` that user code
/// builds up via the methods below.
pub struct Program<'p> {
    arena: &'p Arena,
    next_id: Cell<u64>,
    pub(crate) arguments: InstructionSet<'p>,
    pub(crate) header: InstructionSet<'p>,
    pub(crate) body: InstructionSet<'p>,
}

impl<'p> Program<'p> {
    pub fn new(arena: &'p Arena) -> Self {
        Program {
            arena,
            next_id: Cell::new(0),
            arguments: InstructionSet::with_name("arguments"),
            header: InstructionSet::with_name("header"),
            body: InstructionSet::with_name("body"),
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub fn arguments(&self) -> &InstructionSet<'p> {
        &self.arguments
    }

    pub fn header(&self) -> &InstructionSet<'p> {
        &self.header
    }

    pub fn body(&self) -> &InstructionSet<'p> {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut InstructionSet<'p> {
        &mut self.body
    }

    // --- Name interning ---------------------------------------------------

    /// Interns an explicit name and returns a vreg bound to it.
    pub fn vreg(&self, name: &str) -> Register<'p> {
        Register::virtual_reg(self.arena.intern(name.to_string()))
    }

    /// Allocates a fresh, compiler-chosen vreg name (`t0`, `t1`, ...) and
    /// immediately emits the `RequestVreg` instruction binding its width and
    /// sign, matching the source's single-call vreg-creation convenience.
    pub fn new_vreg(&mut self, width: RegisterWidth, sign: SignType) -> Register<'p> {
        let name = format!("t{}", self.next_id());
        let vreg = Register::virtual_reg(self.arena.intern(name));
        self.body.push(Op::RequestVreg { vreg, width, sign });
        vreg
    }

    /// Same as `new_vreg`, but opens the interval in `arguments` instead of
    /// `body`. Liveness scans `arguments` first (spec.md §4.3), so a vreg
    /// that `get_argument` will bind must be requested here rather than via
    /// `new_vreg`, or its `RequestVreg` would follow its use.
    pub fn new_argument_vreg(&mut self, width: RegisterWidth, sign: SignType) -> Register<'p> {
        let name = format!("t{}", self.next_id());
        let vreg = Register::virtual_reg(self.arena.intern(name));
        self.arguments.push(Op::RequestVreg { vreg, width, sign });
        vreg
    }

    pub fn clear_vreg(&mut self, vreg: Register<'p>) {
        self.body.push(Op::ClearVreg { vreg });
    }

    /// Interns an explicit label name.
    pub fn label(&self, name: &str) -> Label<'p> {
        Label::new(self.arena.intern(name.to_string()))
    }

    /// Allocates a fresh, compiler-chosen label name (`L0`, `L1`, ...).
    pub fn new_label(&mut self) -> Label<'p> {
        let name = format!("L{}", self.next_id());
        Label::new(self.arena.intern(name))
    }

    // --- Pseudo instructions -----------------------------------------------

    pub fn get_argument(&mut self, index: u8, vreg: Register<'p>) {
        self.arguments.push(Op::GetArgument { index, vreg });
    }

    pub fn set_return(&mut self, value: impl Into<Operand<'p>>) {
        self.body.push(Op::SetReturn { value: value.into() });
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.body.push(Op::Comment { text: text.into() });
    }

    pub fn context_begin(&mut self, name: impl Into<String>) {
        self.body.push(Op::ContextBegin { name: name.into() });
    }

    pub fn context_end(&mut self) {
        self.body.push(Op::ContextEnd);
    }

    pub fn branch_begin(&mut self, likely: bool) {
        self.body.push(Op::BranchBegin { likely });
    }

    pub fn branch_end(&mut self) {
        self.body.push(Op::BranchEnd);
    }

    // --- Nullary -------------------------------------------------------------

    pub fn ret(&mut self) {
        self.body.push(Op::Ret);
    }

    pub fn nop(&mut self) {
        self.body.push(Op::Nop);
    }

    pub fn cqo(&mut self) {
        self.body.push(Op::Cqo);
    }

    // --- Unary -----------------------------------------------------------

    pub fn push_reg(&mut self, reg: Register<'p>) {
        self.body.push(Op::Push { reg });
    }

    pub fn pop_reg(&mut self, reg: Register<'p>) {
        self.body.push(Op::Pop { reg });
    }

    pub fn inc(&mut self, op: impl Into<Operand<'p>>) {
        self.body.push(Op::Inc { op: op.into() });
    }

    pub fn dec(&mut self, op: impl Into<Operand<'p>>) {
        self.body.push(Op::Dec { op: op.into() });
    }

    pub fn sete(&mut self, op: impl Into<Operand<'p>>) {
        self.body.push(Op::Sete { op: op.into() });
    }

    pub fn setne(&mut self, op: impl Into<Operand<'p>>) {
        self.body.push(Op::Setne { op: op.into() });
    }

    pub fn prefetch(&mut self, mem: MemoryAddress<'p>) {
        self.body.push(Op::Prefetch { mem });
    }

    pub fn idiv(&mut self, op: impl Into<Operand<'p>>) {
        self.body.push(Op::Idiv { op: op.into() });
    }

    pub fn jump(&mut self, kind: JumpKind, label: Label<'p>) {
        self.body.push(Op::Jump { kind, label });
    }

    pub fn jmp(&mut self, label: Label<'p>) {
        self.jump(JumpKind::Jmp, label);
    }

    pub fn section(&mut self, label: Label<'p>) {
        self.body.push(Op::Section { label });
    }

    // --- Binary ------------------------------------------------------------

    pub fn mov(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Mov {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn cmovle(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Cmovle {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn cmovge(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Cmovge {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn lea(&mut self, dst: Register<'p>, src: MemoryAddress<'p>) {
        self.body.push(Op::Lea { dst, src });
    }

    pub fn add(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Add {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn xadd(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>, lock: bool) {
        self.body.push(Op::Xadd {
            dst: dst.into(),
            src: src.into(),
            lock,
        });
    }

    pub fn sub(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Sub {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn imul(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Imul {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn and(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::And {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn or(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Or {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn xor(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Xor {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn shl(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Shl {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn shr(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Shr {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn crc32(&mut self, dst: impl Into<Operand<'p>>, src: impl Into<Operand<'p>>) {
        self.body.push(Op::Crc32 {
            dst: dst.into(),
            src: src.into(),
        });
    }

    pub fn cmp(&mut self, left: impl Into<Operand<'p>>, right: impl Into<Operand<'p>>, likely: bool) {
        self.body.push(Op::Cmp {
            left: left.into(),
            right: right.into(),
            likely,
            unroll_hint: None,
        });
    }

    pub fn cmp_with_unroll_hint(
        &mut self,
        left: impl Into<Operand<'p>>,
        right: impl Into<Operand<'p>>,
        likely: bool,
        unroll_hint: u32,
    ) {
        self.body.push(Op::Cmp {
            left: left.into(),
            right: right.into(),
            likely,
            unroll_hint: Some(unroll_hint),
        });
    }

    pub fn test(&mut self, left: impl Into<Operand<'p>>, right: impl Into<Operand<'p>>) {
        self.body.push(Op::Test {
            left: left.into(),
            right: right.into(),
        });
    }

    /// Emits the comparator's `cmp` + conditional jump pair.
    pub fn branch_if(&mut self, comparator: Comparator<'p>, jump_destination: Label<'p>, likely: bool) {
        comparator.emit(self, jump_destination, likely);
    }

    // --- Ternary -------------------------------------------------------

    pub fn fdiv(
        &mut self,
        quotient: impl Into<Operand<'p>>,
        dividend: impl Into<Operand<'p>>,
        divisor: impl Into<Operand<'p>>,
    ) {
        self.body.push(Op::Fdiv {
            quotient: quotient.into(),
            dividend: dividend.into(),
            divisor: divisor.into(),
        });
    }

    pub fn fmod(
        &mut self,
        remainder: impl Into<Operand<'p>>,
        dividend: impl Into<Operand<'p>>,
        divisor: impl Into<Operand<'p>>,
    ) {
        self.body.push(Op::Fmod {
            remainder: remainder.into(),
            dividend: dividend.into(),
            divisor: divisor.into(),
        });
    }

    // --- Call ----------------------------------------------------------

    pub fn fcall(
        &mut self,
        function_pointer: usize,
        return_vreg: Option<Register<'p>>,
        arguments: CallArguments<'p>,
    ) {
        self.body.push(Op::Fcall {
            function_pointer,
            return_vreg,
            arguments,
        });
    }

    pub fn call(&mut self, function_pointer: usize) {
        self.body.push(Op::Call { function_pointer });
    }

    // --- Misc ------------------------------------------------------------

    pub fn align(&mut self, bytes: u32) {
        self.body.push(Op::Align { bytes });
    }

    pub fn constant(&self, value: i64) -> Constant {
        Constant::from_i64(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vreg_names_stay_valid_across_growth() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let mut names = Vec::new();
        for _ in 0..64 {
            let vreg = program.new_vreg(RegisterWidth::R64, SignType::Signed);
            names.push(vreg.virtual_name().unwrap());
        }
        for (i, name) in names.iter().enumerate() {
            assert_eq!(*name, format!("t{i}"));
        }
    }

    #[test]
    fn label_and_jump_builders_append_to_body() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let done = program.new_label();
        program.jmp(done);
        program.section(done);
        assert_eq!(program.body().len(), 2);
    }
}
