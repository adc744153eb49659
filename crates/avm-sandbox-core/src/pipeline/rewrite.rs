//! Shared method-body rewriting utilities.

use super::helper;
use avm_types::{Instruction, MethodDecl};
use std::collections::BTreeMap;

/// Pending insertions into one method body.
///
/// Insertions before instruction `i` become the new target of every jump
/// and handler that pointed at `i`. The prologue is placed ahead of
/// everything and is never a jump target.
#[derive(Debug, Default)]
pub(crate) struct MethodPatch {
    prologue: Vec<Instruction>,
    before: BTreeMap<usize, Vec<Instruction>>,
}

impl MethodPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prologue(&mut self, instructions: impl IntoIterator<Item = Instruction>) {
        self.prologue.extend(instructions);
    }

    pub fn insert_before(&mut self, index: usize, instructions: impl IntoIterator<Item = Instruction>) {
        self.before.entry(index).or_default().extend(instructions);
    }

    pub fn is_empty(&self) -> bool {
        self.prologue.is_empty() && self.before.is_empty()
    }

    pub fn apply(mut self, method: &mut MethodDecl) {
        if self.is_empty() {
            return;
        }
        let old = std::mem::take(&mut method.code);
        let len = old.len();
        let inserted: usize = self.prologue.len() + self.before.values().map(Vec::len).sum::<usize>();

        let mut code = Vec::with_capacity(len + inserted);
        let mut new_start = vec![0u32; len + 1];
        let mut moved = Vec::with_capacity(len);

        code.append(&mut self.prologue);
        for (i, instruction) in old.into_iter().enumerate() {
            new_start[i] = code.len() as u32;
            if let Some(prefix) = self.before.remove(&i) {
                debug_assert!(prefix.iter().all(|p| p.branch_target().is_none()));
                code.extend(prefix);
            }
            moved.push(code.len());
            code.push(instruction);
        }
        new_start[len] = code.len() as u32;

        let remap = |target: u32| new_start.get(target as usize).copied().unwrap_or(target);
        for &at in &moved {
            if let Some(target) = code[at].branch_target_mut() {
                *target = remap(*target);
            }
        }
        for handler in &mut method.handlers {
            handler.start = remap(handler.start);
            handler.end = remap(handler.end);
            handler.handler = remap(handler.handler);
        }
        method.code = code;
    }
}

/// Marks instructions that were inserted by instrumentation.
///
/// Helper calls are instrumentation, and so are the operand instructions
/// that feed or consume them: the constant before `chargeEnergy`, the store
/// after `enterFrame` and the load before `restoreFrame`.
pub(crate) fn instrumentation_mask(code: &[Instruction]) -> Vec<bool> {
    let mut mask: Vec<bool> = code.iter().map(helper::is_helper_call).collect();
    for i in 0..code.len() {
        let next = code.get(i + 1);
        let prev = i.checked_sub(1).and_then(|p| code.get(p));
        mask[i] |= match &code[i] {
            Instruction::LConst(_) => next.is_some_and(|n| helper::is_call(n, helper::CHARGE_ENERGY)),
            Instruction::ILoad(_) => next.is_some_and(|n| helper::is_call(n, helper::RESTORE_FRAME)),
            Instruction::IStore(_) => prev.is_some_and(|p| helper::is_call(p, helper::ENTER_FRAME)),
            _ => false,
        };
    }
    mask
}

/// Apply `class_map` to every class name and `descriptor_map` to every
/// descriptor an instruction carries.
pub(crate) fn map_instruction_types(
    instruction: &mut Instruction,
    class_map: &dyn Fn(&str) -> String,
    descriptor_map: &dyn Fn(&str) -> String,
) {
    match instruction {
        Instruction::New(name)
        | Instruction::ANewArray(name)
        | Instruction::CheckCast(name)
        | Instruction::InstanceOf(name) => *name = class_map(name),
        Instruction::MultiANewArray(descriptor, _) => *descriptor = descriptor_map(descriptor),
        Instruction::GetField(m)
        | Instruction::PutField(m)
        | Instruction::GetStatic(m)
        | Instruction::PutStatic(m)
        | Instruction::Invoke(_, m) => {
            m.owner = class_map(&m.owner);
            m.descriptor = descriptor_map(&m.descriptor);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avm_types::{Condition, ExceptionHandler};

    fn method(code: Vec<Instruction>, handlers: Vec<ExceptionHandler>) -> MethodDecl {
        MethodDecl::new("m", "()V").with_code(code, handlers)
    }

    #[test]
    fn test_jumps_land_on_inserted_prefix() {
        let mut m = method(
            vec![
                Instruction::Nop,
                Instruction::IConst(0),
                Instruction::IfZero(Condition::Eq, 0),
                Instruction::Return,
            ],
            vec![],
        );
        let mut patch = MethodPatch::new();
        patch.insert_before(0, [Instruction::Pop]);
        patch.insert_before(3, [Instruction::Dup, Instruction::Pop]);
        patch.apply(&mut m);

        assert_eq!(m.code.len(), 7);
        assert_eq!(m.code[0], Instruction::Pop);
        assert_eq!(m.code[3], Instruction::IfZero(Condition::Eq, 0));
        assert_eq!(m.code[6], Instruction::Return);
    }

    #[test]
    fn test_prologue_is_not_a_jump_target() {
        let mut m = method(vec![Instruction::Nop, Instruction::Goto(0)], vec![]);
        let mut patch = MethodPatch::new();
        patch.prologue([Instruction::IConst(1), Instruction::Pop]);
        patch.apply(&mut m);
        assert_eq!(m.code[3], Instruction::Goto(2));
    }

    #[test]
    fn test_handler_ranges_remapped() {
        let mut m = method(
            vec![Instruction::Nop, Instruction::AThrow, Instruction::Pop, Instruction::Return],
            vec![ExceptionHandler {
                start: 0,
                end: 2,
                handler: 2,
                catch_type: None,
            }],
        );
        let mut patch = MethodPatch::new();
        patch.insert_before(1, [Instruction::Nop]);
        patch.insert_before(2, [Instruction::Nop]);
        patch.apply(&mut m);
        let h = &m.handlers[0];
        assert_eq!((h.start, h.end, h.handler), (0, 3, 3));
    }

    #[test]
    fn test_instrumentation_mask() {
        let code = vec![
            Instruction::LConst(5),
            helper::call(helper::CHARGE_ENERGY),
            Instruction::LConst(5),
            Instruction::LReturn,
        ];
        assert_eq!(instrumentation_mask(&code), vec![true, true, false, false]);
    }
}
