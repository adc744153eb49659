use super::rewrite::map_instruction_types;
use super::{pass_error, ClassPass, PassContext};
use crate::arraywrap::{
    accessor_descriptors, base_class_for, factory_descriptor, WrapperDescriptor, ARRAY_BASE,
    CLONE_METHOD, FACTORY_METHOD,
};
use crate::errors::TransformError;
use avm_types::{
    ClassFile, DescriptorError, ElementType, Instruction, InvokeKind, MemberRef, PrimitiveType,
};
use std::collections::BTreeSet;

/// Replaces array types and array instructions with generated wrapper
/// classes and calls into them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayWrapping;

impl ClassPass for ArrayWrapping {
    fn name(&self) -> &'static str {
        "array-wrapping"
    }

    fn transform(&self, mut class: ClassFile, _ctx: &PassContext<'_>) -> Result<ClassFile, TransformError> {
        for field in &mut class.fields {
            field.descriptor = wrap_descriptor(&field.descriptor)?;
        }
        for method in &mut class.methods {
            method.descriptor = wrap_descriptor(&method.descriptor)?;
            for instruction in &mut method.code {
                rewrite_instruction(instruction)
                    .map_err(|e| pass_error(self.name(), &class.name, e.to_string()))?;
            }
        }
        Ok(class)
    }
}

fn rewrite_instruction(instruction: &mut Instruction) -> Result<(), DescriptorError> {
    let replacement = match instruction {
        Instruction::NewArray(p) => Some(factory_call(&WrapperDescriptor::new(
            ElementType::Primitive(*p),
            1,
        ), 1)),
        Instruction::ANewArray(component) => {
            let array = if component.starts_with('[') {
                format!("[{}", component)
            } else {
                format!("[L{};", component)
            };
            Some(factory_call(&WrapperDescriptor::from_array_descriptor(&array)?, 1))
        }
        Instruction::MultiANewArray(descriptor, dims) => Some(factory_call(
            &WrapperDescriptor::from_array_descriptor(descriptor)?,
            *dims,
        )),
        Instruction::ArrayLength => Some(Instruction::invoke(
            InvokeKind::Virtual,
            ARRAY_BASE,
            "length",
            "()I",
        )),
        Instruction::ArrayLoad(kind) => Some(Instruction::invoke(
            InvokeKind::Virtual,
            base_class_for(*kind),
            "get",
            accessor_descriptors(*kind).0,
        )),
        Instruction::ArrayStore(kind) => Some(Instruction::invoke(
            InvokeKind::Virtual,
            base_class_for(*kind),
            "set",
            accessor_descriptors(*kind).1,
        )),
        _ => None,
    };
    if let Some(replacement) = replacement {
        *instruction = replacement;
        return Ok(());
    }

    if let Instruction::Invoke(_, m) = instruction {
        if m.owner.starts_with('[') && m.name == "clone" {
            m.name = CLONE_METHOD.to_string();
        }
    }
    // Descriptor errors are surfaced by validation before the pipeline runs,
    // so these mappings fall back to the input on malformed text.
    map_instruction_types(
        instruction,
        &|name: &str| wrap_type_operand(name).unwrap_or_else(|_| name.to_string()),
        &|descriptor: &str| wrap_descriptor(descriptor).unwrap_or_else(|_| descriptor.to_string()),
    );
    Ok(())
}

fn factory_call(descriptor: &WrapperDescriptor, params: u8) -> Instruction {
    Instruction::Invoke(
        InvokeKind::Static,
        MemberRef::new(
            descriptor.class_name(),
            FACTORY_METHOD,
            factory_descriptor(descriptor, params),
        ),
    )
}

fn wrap_type_operand(name: &str) -> Result<String, DescriptorError> {
    if name.starts_with('[') {
        Ok(WrapperDescriptor::from_array_descriptor(name)?.class_name())
    } else {
        Ok(name.to_string())
    }
}

/// Replace every array type in a field or method descriptor with its
/// wrapper class type.
pub fn wrap_descriptor(descriptor: &str) -> Result<String, DescriptorError> {
    let mut out = String::with_capacity(descriptor.len());
    let bytes = descriptor.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => {
                let start = pos;
                while pos < bytes.len() && bytes[pos] == b'[' {
                    pos += 1;
                }
                pos = element_end(descriptor, pos)?;
                let wrapper = WrapperDescriptor::from_array_descriptor(&descriptor[start..pos])?;
                out.push('L');
                out.push_str(&wrapper.class_name());
                out.push(';');
            }
            b'L' => {
                let end = element_end(descriptor, pos)?;
                out.push_str(&descriptor[pos..end]);
                pos = end;
            }
            _ => {
                let c = descriptor[pos..].chars().next().unwrap_or_default();
                out.push(c);
                pos += c.len_utf8().max(1);
            }
        }
    }
    Ok(out)
}

fn element_end(descriptor: &str, pos: usize) -> Result<usize, DescriptorError> {
    match descriptor.as_bytes().get(pos) {
        Some(b'L') => descriptor[pos..]
            .find(';')
            .map(|i| pos + i + 1)
            .ok_or_else(|| DescriptorError::Unterminated(descriptor.to_string())),
        Some(&c) if PrimitiveType::from_char(c as char).is_some() => Ok(pos + 1),
        Some(&c) => Err(DescriptorError::Unsupported {
            descriptor: descriptor.to_string(),
            found: c as char,
        }),
        None => Err(DescriptorError::Unterminated(descriptor.to_string())),
    }
}

/// Names of every array wrapper class or interface `class` refers to.
pub fn referenced_wrappers(class: &ClassFile) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut note = |name: &str| {
        let is_wrapper = WrapperDescriptor::from_class_name(name).is_some()
            || WrapperDescriptor::from_interface_name(name).is_some();
        if is_wrapper {
            names.insert(name.to_string());
        }
    };
    for field in &class.fields {
        class_names_in(&field.descriptor).into_iter().for_each(&mut note);
    }
    for method in &class.methods {
        class_names_in(&method.descriptor).into_iter().for_each(&mut note);
        for instruction in &method.code {
            match instruction {
                Instruction::New(n) | Instruction::CheckCast(n) | Instruction::InstanceOf(n) => note(n),
                Instruction::GetField(m)
                | Instruction::PutField(m)
                | Instruction::GetStatic(m)
                | Instruction::PutStatic(m)
                | Instruction::Invoke(_, m) => {
                    note(&m.owner);
                    class_names_in(&m.descriptor).into_iter().for_each(&mut note);
                }
                _ => {}
            }
        }
    }
    names
}

fn class_names_in(descriptor: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        let Some(len) = rest[start..].find(';') else {
            break;
        };
        names.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyConfig;
    use crate::heap_cost::HeapCostTable;
    use avm_types::{ArrayKind, MethodDecl};

    fn run(class: ClassFile) -> ClassFile {
        let heap_costs = HeapCostTable::default();
        let energy = EnergyConfig::default();
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &energy,
        };
        ArrayWrapping.transform(class, &ctx).unwrap()
    }

    #[test]
    fn test_wrap_descriptor() {
        assert_eq!(
            wrap_descriptor("([ILcom/Foo;[[Ls/java/lang/Object;)[B").unwrap(),
            "(Lavm/arraywrapper/$I;Lcom/Foo;Lavm/arraywrapper/$$Ls/java/lang/Object;)Lavm/arraywrapper/$B;"
        );
        assert_eq!(wrap_descriptor("J").unwrap(), "J");
        assert!(wrap_descriptor("([D)V").is_err());
    }

    #[test]
    fn test_array_instructions_rewritten() {
        let class = ClassFile::new("com/Main", Some("s/java/lang/Object"))
            .with_field("grid", "[[I", true)
            .with_method(MethodDecl::new("main", "()I").with_static().with_code(
                vec![
                    Instruction::IConst(2),
                    Instruction::IConst(3),
                    Instruction::MultiANewArray("[[I".into(), 2),
                    Instruction::IConst(0),
                    Instruction::ArrayLoad(ArrayKind::Reference),
                    Instruction::ArrayLength,
                    Instruction::IReturn,
                ],
                vec![],
            ));
        let out = run(class);
        assert_eq!(out.fields[0].descriptor, "Lavm/arraywrapper/$$I;");
        let code = &out.methods[0].code;
        assert_eq!(
            code[2],
            Instruction::invoke_static("avm/arraywrapper/$$I", "initArray", "(II)Lavm/arraywrapper/$$I;")
        );
        assert_eq!(
            code[4],
            Instruction::invoke(
                InvokeKind::Virtual,
                "avm/arraywrapper/ObjectArray",
                "get",
                "(I)Ls/java/lang/Object;"
            )
        );
        assert_eq!(
            code[5],
            Instruction::invoke(InvokeKind::Virtual, "avm/arraywrapper/Array", "length", "()I")
        );

        let wrappers = referenced_wrappers(&out);
        assert!(wrappers.contains("avm/arraywrapper/$$I"));
        assert_eq!(run(out.clone()), out);
    }

    #[test]
    fn test_clone_and_casts() {
        let class = ClassFile::new("com/Main", Some("s/java/lang/Object")).with_method(
            MethodDecl::new("copy", "([J)[J").with_static().with_code(
                vec![
                    Instruction::ALoad(0),
                    Instruction::invoke(InvokeKind::Virtual, "[J", "clone", "()Ls/java/lang/Object;"),
                    Instruction::CheckCast("[J".into()),
                    Instruction::AReturn,
                ],
                vec![],
            ),
        );
        let out = run(class);
        let code = &out.methods[0].code;
        assert_eq!(
            code[1],
            Instruction::invoke(
                InvokeKind::Virtual,
                "avm/arraywrapper/$J",
                "avm_clone",
                "()Ls/java/lang/Object;"
            )
        );
        assert_eq!(code[2], Instruction::CheckCast("avm/arraywrapper/$J".into()));
        assert_eq!(out.methods[0].descriptor, "(Lavm/arraywrapper/$J;)Lavm/arraywrapper/$J;");
    }

    #[test]
    fn test_new_array_kinds() {
        let mut ins = Instruction::NewArray(PrimitiveType::Boolean);
        rewrite_instruction(&mut ins).unwrap();
        assert_eq!(
            ins,
            Instruction::invoke_static("avm/arraywrapper/$Z", "initArray", "(I)Lavm/arraywrapper/$Z;")
        );
        let mut ins = Instruction::ANewArray("[I".into());
        rewrite_instruction(&mut ins).unwrap();
        assert_eq!(
            ins,
            Instruction::invoke_static("avm/arraywrapper/$$I", "initArray", "(I)Lavm/arraywrapper/$$I;")
        );
    }
}
