use super::rewrite::map_instruction_types;
use super::{ClassPass, PassContext};
use crate::errors::TransformError;
use crate::naming::{shadow_class_name, shadow_descriptor};
use avm_types::ClassFile;

/// Redirects every reference to the host standard library into the shadow
/// namespace, so user code can only reach sandbox-controlled classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceShadowing;

impl ClassPass for NamespaceShadowing {
    fn name(&self) -> &'static str {
        "shadowing"
    }

    fn transform(&self, mut class: ClassFile, _ctx: &PassContext<'_>) -> Result<ClassFile, TransformError> {
        class.name = shadow_class_name(&class.name);
        class.super_name = class.super_name.as_deref().map(shadow_class_name);
        for interface in &mut class.interfaces {
            *interface = shadow_class_name(interface);
        }
        for field in &mut class.fields {
            field.descriptor = shadow_descriptor(&field.descriptor);
        }
        for method in &mut class.methods {
            method.descriptor = shadow_descriptor(&method.descriptor);
            for instruction in &mut method.code {
                map_instruction_types(instruction, &shadow_class_name, &shadow_descriptor);
            }
            for handler in &mut method.handlers {
                if let Some(catch_type) = &mut handler.catch_type {
                    *catch_type = shadow_class_name(catch_type);
                }
            }
        }
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyConfig;
    use crate::heap_cost::HeapCostTable;
    use avm_types::{ExceptionHandler, Instruction, InvokeKind, MethodDecl};

    #[test]
    fn test_shadows_all_references() {
        let class = ClassFile::new("com/Main", Some("java/lang/Object"))
            .with_interfaces(["java/lang/Comparable"])
            .with_field("cause", "Ljava/lang/Throwable;", false)
            .with_method(
                MethodDecl::new("run", "(Ljava/lang/Object;)[Ljava/lang/Object;").with_code(
                    vec![
                        Instruction::New("java/lang/RuntimeException".into()),
                        Instruction::invoke(
                            InvokeKind::Special,
                            "java/lang/RuntimeException",
                            "<init>",
                            "()V",
                        ),
                        Instruction::ANewArray("java/lang/Object".into()),
                        Instruction::CheckCast("[Ljava/lang/Object;".into()),
                        Instruction::AReturn,
                    ],
                    vec![ExceptionHandler {
                        start: 0,
                        end: 1,
                        handler: 4,
                        catch_type: Some("java/lang/Exception".into()),
                    }],
                ),
            );
        let heap_costs = HeapCostTable::default();
        let energy = EnergyConfig::default();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        let out = NamespaceShadowing.transform(class, &ctx).unwrap();
        assert_eq!(out.super_name.as_deref(), Some("s/java/lang/Object"));
        assert_eq!(out.interfaces, vec!["s/java/lang/Comparable"]);
        assert_eq!(out.fields[0].descriptor, "Ls/java/lang/Throwable;");
        let m = &out.methods[0];
        assert_eq!(m.descriptor, "(Ls/java/lang/Object;)[Ls/java/lang/Object;");
        assert_eq!(m.code[0], Instruction::New("s/java/lang/RuntimeException".into()));
        assert_eq!(m.code[2], Instruction::ANewArray("s/java/lang/Object".into()));
        assert_eq!(m.code[3], Instruction::CheckCast("[Ls/java/lang/Object;".into()));
        assert_eq!(m.handlers[0].catch_type.as_deref(), Some("s/java/lang/Exception"));

        let again = NamespaceShadowing.transform(out.clone(), &ctx).unwrap();
        assert_eq!(again, out);
    }
}
