use super::helper::{self, CHECK_FRAME, ENTER_FRAME, EXIT_FRAME, RESTORE_FRAME};
use super::rewrite::MethodPatch;
use super::{ClassPass, PassContext};
use crate::errors::TransformError;
use avm_types::{ClassFile, Instruction, MethodDecl};
use std::collections::BTreeSet;

/// Bounds sandboxed call depth with an explicit counter.
///
/// Method entry increments the depth and saves it in a fresh local; returns
/// decrement it; loop back-edges re-check it; handler entries restore the
/// saved value, since a caught exception may have unwound several frames
/// without running their exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallStackBounding;

impl ClassPass for CallStackBounding {
    fn name(&self) -> &'static str {
        "stack-bounding"
    }

    fn transform(&self, mut class: ClassFile, _ctx: &PassContext<'_>) -> Result<ClassFile, TransformError> {
        for method in class.methods.iter_mut().filter(|m| m.has_body()) {
            instrument(method);
        }
        Ok(class)
    }
}

fn instrument(method: &mut MethodDecl) {
    if method.code.iter().any(|i| helper::is_call(i, ENTER_FRAME)) {
        return;
    }
    let depth_slot = method.max_locals;
    method.max_locals += 1;

    let mut patch = MethodPatch::new();
    patch.prologue([helper::call(ENTER_FRAME), Instruction::IStore(depth_slot)]);
    for (i, instruction) in method.code.iter().enumerate() {
        if instruction.is_return() {
            patch.insert_before(i, [helper::call(EXIT_FRAME)]);
        }
        if instruction.branch_target().is_some_and(|t| t as usize <= i) {
            patch.insert_before(i, [helper::call(CHECK_FRAME)]);
        }
    }
    let handler_entries: BTreeSet<usize> = method.handlers.iter().map(|h| h.handler as usize).collect();
    for entry in handler_entries {
        patch.insert_before(entry, [Instruction::ILoad(depth_slot), helper::call(RESTORE_FRAME)]);
    }
    patch.apply(method);
}

#[cfg(test)]
mod tests {
    use super::*;
    use avm_types::{Condition, ExceptionHandler};

    #[test]
    fn test_entry_exit_and_back_edges() {
        let mut method = MethodDecl::new("loop", "(I)V")
            .with_static()
            .with_max_locals(1)
            .with_code(
                vec![
                    Instruction::ILoad(0),
                    Instruction::IfZero(Condition::Le, 4),
                    Instruction::IInc(0, -1),
                    Instruction::Goto(0),
                    Instruction::Return,
                ],
                vec![],
            );
        instrument(&mut method);
        assert_eq!(method.max_locals, 2);
        assert_eq!(method.code[0], helper::call(ENTER_FRAME));
        assert_eq!(method.code[1], Instruction::IStore(1));
        // Back-edge jumps past the prologue.
        assert_eq!(method.code[5], helper::call(CHECK_FRAME));
        assert_eq!(method.code[6], Instruction::Goto(2));
        assert_eq!(method.code[7], helper::call(EXIT_FRAME));
        assert_eq!(method.code[3], Instruction::IfZero(Condition::Le, 7));

        let snapshot = method.clone();
        instrument(&mut method);
        assert_eq!(method, snapshot);
    }

    #[test]
    fn test_handler_restores_depth() {
        let mut method = MethodDecl::new("guarded", "()V").with_code(
            vec![Instruction::AConstNull, Instruction::AThrow, Instruction::Pop, Instruction::Return],
            vec![ExceptionHandler {
                start: 0,
                end: 2,
                handler: 2,
                catch_type: None,
            }],
        );
        instrument(&mut method);
        let h = method.handlers[0].handler as usize;
        assert_eq!(method.code[h], Instruction::ILoad(0));
        assert_eq!(method.code[h + 1], helper::call(RESTORE_FRAME));
        assert_eq!(method.handlers[0].end as usize, h);
    }
}
