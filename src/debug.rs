//! Assembly/context logging (spec.md §4.1 "`ContextBegin/End` (scope
//! markers for the assembly logger)", §9 "the context logger... may be
//! compiled out in release builds without affecting correctness").
//!
//! `ContextBegin`/`ContextEnd` carry no runtime effect on the generated
//! code (spec.md's open question on `BranchBegin`/`BranchEnd` notes the
//! same for those); they only annotate the textual compilate with nested
//! scope names, mirroring how a client's per-operator code generator would
//! bracket its own emitted region for later inspection.

use crate::ir::{InstructionSet, Op};

/// Renders `instructions` as one line per instruction, with the contents of
/// a `ContextBegin`/`ContextEnd` scope indented under the scope's name.
/// Used by clients building an "explain assembly" view of a compiled
/// program; has no effect on compilation itself.
pub fn render_with_context(instructions: &InstructionSet<'_>) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    for instr in instructions.iter() {
        match &instr.op {
            Op::ContextBegin { name } => {
                push_line(&mut out, depth, &format!("; -- {name} --"));
                depth += 1;
            }
            Op::ContextEnd => {
                depth = depth.saturating_sub(1);
            }
            _ => push_line(&mut out, depth, &instr.to_string()),
        }
    }
    out
}

fn push_line(out: &mut String, depth: usize, line: &str) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(line);
    out.push('\n');
    log::trace!("{}", line.trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arena, Program};

    #[test]
    fn context_scopes_indent_their_contents() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        program.context_begin("scan");
        program.nop();
        program.context_end();

        let rendered = render_with_context(program.body());
        assert!(rendered.contains("-- scan --"));
        assert!(rendered.lines().any(|l| l.starts_with("  nop")));
    }

    #[test]
    fn scopes_close_even_if_nested() {
        let arena = Arena::new();
        let mut program = Program::new(&arena);
        program.context_begin("outer");
        program.context_begin("inner");
        program.nop();
        program.context_end();
        program.ret();
        program.context_end();

        let rendered = render_with_context(program.body());
        let ret_line = rendered.lines().find(|l| l.trim() == "ret").unwrap();
        assert!(ret_line.starts_with("  ") && !ret_line.starts_with("    "));
    }
}
