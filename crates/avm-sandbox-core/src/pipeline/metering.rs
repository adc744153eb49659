use super::helper::{self, CHARGE_ENERGY};
use super::rewrite::{instrumentation_mask, MethodPatch};
use super::{pass_error, ClassPass, PassContext};
use crate::arraywrap::{WrapperDescriptor, FACTORY_METHOD};
use crate::errors::TransformError;
use avm_types::{ClassFile, Instruction, InvokeKind, MethodDecl};
use std::collections::BTreeSet;

/// Charges each basic block's cost before the block runs.
///
/// Block cost is the sum of the costs of the block's own instructions;
/// instrumentation inserted by earlier passes is free. A block that already
/// starts with a charge has its constant recomputed instead of getting a
/// second one.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyMetering;

impl ClassPass for EnergyMetering {
    fn name(&self) -> &'static str {
        "energy-metering"
    }

    fn transform(&self, mut class: ClassFile, ctx: &PassContext<'_>) -> Result<ClassFile, TransformError> {
        let name = class.name.clone();
        let mut charges = 0usize;
        for method in class.methods.iter_mut().filter(|m| m.has_body()) {
            charges += instrument(method, ctx).map_err(|reason| {
                pass_error("energy-metering", &name, format!("{}: {reason}", method.name))
            })?;
        }
        tracing::trace!(class = %class.name, charges, "metering inserted");
        Ok(class)
    }
}

/// Instrument one method; returns the number of charged blocks.
fn instrument(method: &mut MethodDecl, ctx: &PassContext<'_>) -> Result<usize, String> {
    if method.code.is_empty() {
        return Ok(0);
    }
    let mask = instrumentation_mask(&method.code);
    let leaders = block_leaders(method);
    let mut patch = MethodPatch::new();
    let mut charged = 0;

    let bounds: Vec<usize> = leaders.iter().copied().chain([method.code.len()]).collect();
    for window in bounds.windows(2) {
        let (start, end) = (window[0], window[1]);
        let cost: u64 = (start..end)
            .filter(|&i| !mask[i])
            .map(|i| instruction_cost(&method.code[i], ctx))
            .sum::<Result<u64, String>>()?;
        let cost = i64::try_from(cost).unwrap_or(i64::MAX);

        let existing = matches!(method.code[start], Instruction::LConst(_))
            && method
                .code
                .get(start + 1)
                .is_some_and(|i| helper::is_call(i, CHARGE_ENERGY));
        if existing {
            method.code[start] = Instruction::LConst(cost);
            charged += 1;
        } else if cost > 0 {
            patch.insert_before(start, [Instruction::LConst(cost), helper::call(CHARGE_ENERGY)]);
            charged += 1;
        }
    }
    patch.apply(method);
    Ok(charged)
}

/// First instruction of every basic block.
fn block_leaders(method: &MethodDecl) -> BTreeSet<usize> {
    let len = method.code.len();
    let mut leaders = BTreeSet::from([0]);
    for (i, instruction) in method.code.iter().enumerate() {
        if let Some(target) = instruction.branch_target() {
            leaders.insert(target as usize);
        }
        if instruction.ends_block() && i + 1 < len {
            leaders.insert(i + 1);
        }
    }
    leaders.extend(method.handlers.iter().map(|h| h.handler as usize));
    leaders.retain(|&l| l < len);
    leaders
}

fn instruction_cost(instruction: &Instruction, ctx: &PassContext<'_>) -> Result<u64, String> {
    let energy = ctx.energy;
    let extra = match instruction {
        Instruction::Invoke(kind, m) => {
            let allocation = *kind == InvokeKind::Static
                && m.name == FACTORY_METHOD
                && WrapperDescriptor::from_class_name(&m.owner).is_some();
            energy.invoke_cost + if allocation { energy.allocation_cost } else { 0 }
        }
        Instruction::New(class) => {
            let size = ctx
                .heap_costs
                .instance_size(class)
                .ok_or_else(|| format!("no heap size for allocated class {class}"))?;
            let size = u64::from(size);
            energy.allocation_cost + size.saturating_mul(energy.heap_byte_cost)
        }
        Instruction::GetField(_)
        | Instruction::PutField(_)
        | Instruction::GetStatic(_)
        | Instruction::PutStatic(_) => energy.field_access_cost,
        _ => 0,
    };
    Ok(energy.instruction_cost.saturating_add(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyConfig;
    use crate::heap_cost::HeapCostTable;
    use avm_types::Condition;

    fn ctx_parts() -> (HeapCostTable, EnergyConfig) {
        (HeapCostTable::default(), EnergyConfig::default())
    }

    #[test]
    fn test_straight_line_single_charge() {
        let (heap_costs, energy) = ctx_parts();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        let mut method = MethodDecl::new("f", "()I").with_code(
            vec![Instruction::IConst(1), Instruction::IConst(2), Instruction::IAdd, Instruction::IReturn],
            vec![],
        );
        assert_eq!(instrument(&mut method, &ctx), Ok(1));
        assert_eq!(method.code[0], Instruction::LConst(4));
        assert_eq!(method.code[1], helper::call(CHARGE_ENERGY));
        assert_eq!(method.code.len(), 6);
    }

    #[test]
    fn test_loop_blocks_and_idempotence() {
        let (heap_costs, energy) = ctx_parts();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        let mut method = MethodDecl::new("count", "(I)V").with_max_locals(1).with_code(
            vec![
                Instruction::ILoad(0),
                Instruction::IfZero(Condition::Le, 4),
                Instruction::IInc(0, -1),
                Instruction::Goto(0),
                Instruction::Return,
            ],
            vec![],
        );
        assert_eq!(instrument(&mut method, &ctx), Ok(3));
        // Loop head keeps its charge on every iteration.
        assert_eq!(method.code[0], Instruction::LConst(2));
        let back_edge = method.code.iter().find_map(|i| match i {
            Instruction::Goto(t) => Some(*t),
            _ => None,
        });
        assert_eq!(back_edge, Some(0));

        let snapshot = method.clone();
        instrument(&mut method, &ctx).unwrap();
        assert_eq!(method, snapshot);
    }

    #[test]
    fn test_allocation_uses_heap_size() {
        let mut sizes = std::collections::BTreeMap::new();
        sizes.insert("com/Point".to_string(), 24u32);
        let hierarchy = crate::hierarchy::ClassHierarchy::default();
        let heap_costs = HeapCostTable::build(&hierarchy, &sizes).unwrap();
        let energy = EnergyConfig::default();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        let cost = instruction_cost(&Instruction::New("com/Point".into()), &ctx).unwrap();
        assert_eq!(cost, energy.instruction_cost + energy.allocation_cost + 24 * energy.heap_byte_cost);
    }

    #[test]
    fn test_free_energy_inserts_nothing() {
        let heap_costs = HeapCostTable::default();
        let energy = EnergyConfig::free();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        let mut method = MethodDecl::new("f", "()V").with_code(vec![Instruction::Return], vec![]);
        assert_eq!(instrument(&mut method, &ctx), Ok(0));
        assert_eq!(method.code, vec![Instruction::Return]);
    }

    #[test]
    fn test_allocation_of_unsized_class_is_refused() {
        let heap_costs = HeapCostTable::default();
        let energy = EnergyConfig::default();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        let class = ClassFile::new("com/App", Some("s/java/lang/Object")).with_method(
            MethodDecl::new("make", "()V").with_max_locals(1).with_code(
                vec![Instruction::New("com/Ghost".into()), Instruction::Pop, Instruction::Return],
                vec![],
            ),
        );
        let err = EnergyMetering.transform(class, &ctx).unwrap_err();
        assert!(
            matches!(&err, TransformError::Pass { pass: "energy-metering", class, reason }
                if class == "com/App" && reason.contains("com/Ghost")),
            "{err:?}"
        );
    }
}
