//! Structured control-flow builders (spec.md C3).
//!
//! Each builder borrows the [`Program`] for the duration of a scope and
//! relies on `Drop` to emit the label/jump that closes the scope, mirroring
//! the constructor/destructor pairing the source statement builders use.
//! Dereferencing a builder gives direct access to the underlying `Program`
//! so body instructions can be pushed without re-borrowing explicitly.

use std::ops::{Deref, DerefMut};

use crate::ir::{Comparator, Instruction, JumpKind, Label, Operand, Program};

/// `if (comparator) { ... }`. Jumps past the body when the (inverted)
/// comparator holds and labels the fall-through point on drop.
pub struct If<'p, 'a> {
    program: &'a mut Program<'p>,
    end: Label<'p>,
}

impl<'p, 'a> If<'p, 'a> {
    pub fn new(program: &'a mut Program<'p>, comparator: Comparator<'p>, likely: bool) -> Self {
        let end = program.new_label();
        program.branch_if(comparator.invert(), end, likely);
        If { program, end }
    }
}

impl<'p, 'a> Deref for If<'p, 'a> {
    type Target = Program<'p>;
    fn deref(&self) -> &Program<'p> {
        self.program
    }
}

impl<'p, 'a> DerefMut for If<'p, 'a> {
    fn deref_mut(&mut self) -> &mut Program<'p> {
        self.program
    }
}

impl Drop for If<'_, '_> {
    fn drop(&mut self) {
        self.program.section(self.end);
    }
}

/// `while (comparator) { ... }`. The condition is re-checked at the top of
/// each iteration; the body jumps back on drop.
pub struct While<'p, 'a> {
    program: &'a mut Program<'p>,
    start: Label<'p>,
    end: Label<'p>,
}

impl<'p, 'a> While<'p, 'a> {
    pub fn new(program: &'a mut Program<'p>, comparator: Comparator<'p>, likely: bool) -> Self {
        let start = program.new_label();
        let end = program.new_label();
        program.section(start);
        program.branch_if(comparator.invert(), end, likely);
        While { program, start, end }
    }
}

impl<'p, 'a> Deref for While<'p, 'a> {
    type Target = Program<'p>;
    fn deref(&self) -> &Program<'p> {
        self.program
    }
}

impl<'p, 'a> DerefMut for While<'p, 'a> {
    fn deref_mut(&mut self) -> &mut Program<'p> {
        self.program
    }
}

impl Drop for While<'_, '_> {
    fn drop(&mut self) {
        self.program.jmp(self.start);
        self.program.section(self.end);
    }
}

/// `do { ... } while (comparator)`. The condition is checked at the bottom;
/// the loop jumps back to the top while it holds.
pub struct DoWhile<'p, 'a> {
    program: &'a mut Program<'p>,
    start: Label<'p>,
    comparator: Comparator<'p>,
    likely: bool,
}

impl<'p, 'a> DoWhile<'p, 'a> {
    pub fn new(program: &'a mut Program<'p>, comparator: Comparator<'p>, likely: bool) -> Self {
        let start = program.new_label();
        program.section(start);
        DoWhile {
            program,
            start,
            comparator,
            likely,
        }
    }
}

impl<'p, 'a> Deref for DoWhile<'p, 'a> {
    type Target = Program<'p>;
    fn deref(&self) -> &Program<'p> {
        self.program
    }
}

impl<'p, 'a> DerefMut for DoWhile<'p, 'a> {
    fn deref_mut(&mut self) -> &mut Program<'p> {
        self.program
    }
}

impl Drop for DoWhile<'_, '_> {
    fn drop(&mut self) {
        self.program.branch_if(self.comparator, self.start, self.likely);
    }
}

/// `for (reg = start; reg < end; reg += step) { ... }` over a vreg the
/// caller already requested. Condition check at the top, increment emitted
/// just before the backward jump on drop.
pub struct ForRange<'p, 'a> {
    program: &'a mut Program<'p>,
    induction: Operand<'p>,
    step: Operand<'p>,
    start: Label<'p>,
    end: Label<'p>,
}

impl<'p, 'a> ForRange<'p, 'a> {
    pub fn new(
        program: &'a mut Program<'p>,
        induction: impl Into<Operand<'p>>,
        bound: impl Into<Operand<'p>>,
        step: impl Into<Operand<'p>>,
        likely: bool,
    ) -> Self {
        let induction = induction.into();
        let bound = bound.into();
        let step = step.into();
        let start = program.new_label();
        let end = program.new_label();
        program.section(start);
        program.branch_if(Comparator::IsLower(induction, bound).invert(), end, likely);
        ForRange {
            program,
            induction,
            step,
            start,
            end,
        }
    }
}

impl<'p, 'a> Deref for ForRange<'p, 'a> {
    type Target = Program<'p>;
    fn deref(&self) -> &Program<'p> {
        self.program
    }
}

impl<'p, 'a> DerefMut for ForRange<'p, 'a> {
    fn deref_mut(&mut self) -> &mut Program<'p> {
        self.program
    }
}

impl Drop for ForRange<'_, '_> {
    fn drop(&mut self) {
        self.program.add(self.induction, self.step);
        self.program.jmp(self.start);
        self.program.section(self.end);
    }
}

/// `foreach` over a null-terminated-by-count array of fixed-width elements:
/// sugar over [`ForRange`] that also derives the element address each
/// iteration via `base + index * element_width`.
pub struct ForEach<'p, 'a> {
    inner: ForRange<'p, 'a>,
}

impl<'p, 'a> ForEach<'p, 'a> {
    pub fn new(
        program: &'a mut Program<'p>,
        index: impl Into<Operand<'p>>,
        count: impl Into<Operand<'p>>,
        likely: bool,
    ) -> Self {
        let step = crate::ir::Constant::from_i64(1);
        ForEach {
            inner: ForRange::new(program, index, count, step, likely),
        }
    }
}

impl<'p, 'a> Deref for ForEach<'p, 'a> {
    type Target = Program<'p>;
    fn deref(&self) -> &Program<'p> {
        &self.inner
    }
}

impl<'p, 'a> DerefMut for ForEach<'p, 'a> {
    fn deref_mut(&mut self) -> &mut Program<'p> {
        &mut self.inner
    }
}

/// Fluent builder for `Op::Fcall`, accumulating ABI argument operands before
/// emitting the call in one shot.
pub struct FunctionCall<'p> {
    function_pointer: usize,
    arguments: crate::ir::CallArguments<'p>,
}

impl<'p> FunctionCall<'p> {
    pub fn new(function_pointer: usize) -> Self {
        FunctionCall {
            function_pointer,
            arguments: Default::default(),
        }
    }

    pub fn argument(mut self, value: impl Into<Operand<'p>>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn call(self, program: &mut Program<'p>) {
        program.fcall(self.function_pointer, None, self.arguments);
    }

    pub fn call_returning(self, program: &mut Program<'p>, into: crate::ir::Register<'p>) {
        program.fcall(self.function_pointer, Some(into), self.arguments);
    }
}

/// Helper retained for callers that want to log a scoped region without
/// pulling in the full builder machinery: pushes `ContextBegin`/`ContextEnd`
/// around instructions emitted through the returned guard.
pub struct Context<'p, 'a> {
    program: &'a mut Program<'p>,
}

impl<'p, 'a> Context<'p, 'a> {
    pub fn new(program: &'a mut Program<'p>, name: impl Into<String>) -> Self {
        program.context_begin(name);
        Context { program }
    }
}

impl<'p, 'a> Deref for Context<'p, 'a> {
    type Target = Program<'p>;
    fn deref(&self) -> &Program<'p> {
        self.program
    }
}

impl<'p, 'a> DerefMut for Context<'p, 'a> {
    fn deref_mut(&mut self) -> &mut Program<'p> {
        self.program
    }
}

impl Drop for Context<'_, '_> {
    fn drop(&mut self) {
        self.program.context_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, RegisterWidth, SignType};

    #[test]
    fn if_scope_emits_inverted_branch_and_closing_label() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let x = program.new_vreg(RegisterWidth::R64, SignType::Signed);
        let before = program.body().len();
        {
            let mut scope = If::new(&mut program, Comparator::IsEquals(x.into(), x.into()), true);
            scope.nop();
        }
        // branch_if (cmp+jump) + nop + closing section = 4 new instructions
        assert_eq!(program.body().len(), before + 4);
    }

    #[test]
    fn for_range_emits_increment_and_backward_jump_on_drop() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        let i = program.new_vreg(RegisterWidth::R64, SignType::Signed);
        let bound = program.constant(10);
        let step = program.constant(1);
        {
            let mut scope = ForRange::new(&mut program, i, bound, step, true);
            scope.nop();
        }
        let ops: Vec<_> = program.body().iter().map(Instruction::to_string).collect();
        assert!(ops.iter().any(|s| s.starts_with("add")));
        assert!(matches!(
            program
                .body()
                .iter()
                .rev()
                .nth(1)
                .map(|i| &i.op),
            Some(crate::ir::Op::Jump {
                kind: JumpKind::Jmp,
                ..
            })
        ));
    }
}
