//! Wrapper class and interface synthesis.

use super::descriptor::WrapperDescriptor;
use super::{
    element_energy, ARRAY_BASE, BACKING_CLASS, CHARGE_METHOD, DESERIALIZER_INTERFACE, OBJECT_ARRAY,
};
use crate::errors::WrapperError;
use avm_types::{
    ClassFile, CodeBuilder, Condition, ElementType, Instruction, InvokeKind, MethodDecl,
    SHADOW_OBJECT,
};

/// Static factory every wrapper exposes.
pub const FACTORY_METHOD: &str = "initArray";

/// Name the array `clone()` call is redirected to.
pub const CLONE_METHOD: &str = "avm_clone";

/// What generation needs to know about a reference element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementShape {
    pub is_interface: bool,
    /// `None` only for the root object class.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
}

/// Looks up element types by class name.
pub trait TypeResolver {
    fn element_shape(&self, class_name: &str) -> Option<ElementShape>;
}

/// `(I...I)L<wrapper>;` with `params` int parameters.
pub fn factory_descriptor(descriptor: &WrapperDescriptor, params: u8) -> String {
    format!(
        "({})L{};",
        "I".repeat(params as usize),
        descriptor.class_name()
    )
}

/// Generate the wrapper class for `descriptor`.
///
/// `shape` must describe the element type when it is a reference type.
pub fn generate_class(
    descriptor: &WrapperDescriptor,
    shape: Option<&ElementShape>,
) -> Result<ClassFile, WrapperError> {
    let name = descriptor.class_name();
    let (super_name, interfaces) = match &descriptor.element {
        ElementType::Primitive(_) => (descriptor.storage_base().to_string(), Vec::new()),
        ElementType::Object(element) => {
            let shape = shape.ok_or_else(|| WrapperError::UnresolvableElement(element.clone()))?;
            let mut interfaces: Vec<String> = shape
                .interfaces
                .iter()
                .map(|i| descriptor.with_element_class(i).interface_name())
                .collect();
            let super_name = if shape.is_interface {
                interfaces.push(descriptor.interface_name());
                OBJECT_ARRAY.to_string()
            } else {
                match &shape.super_name {
                    Some(parent) => descriptor.with_element_class(parent).class_name(),
                    None => OBJECT_ARRAY.to_string(),
                }
            };
            (super_name, interfaces)
        }
    };

    let mut class = ClassFile::new(&name, Some(super_name.as_str())).with_interfaces(interfaces);

    class.methods.push(single_factory(descriptor)?);
    for params in 2..=descriptor.dimensions {
        class.methods.push(nested_factory(descriptor, params)?);
    }
    class.methods.extend(constructors(&super_name));
    class.methods.push(clone_method(&name));

    tracing::trace!(wrapper = %name, super_name = %super_name, "array wrapper generated");
    Ok(class)
}

/// Generate the interface wrapper for a reference element `descriptor`.
pub fn generate_interface(
    descriptor: &WrapperDescriptor,
    shape: Option<&ElementShape>,
) -> Result<ClassFile, WrapperError> {
    let element = match &descriptor.element {
        ElementType::Object(name) => name,
        ElementType::Primitive(_) => {
            return Err(WrapperError::NotAWrapper(descriptor.interface_name()))
        }
    };
    let shape = shape.ok_or_else(|| WrapperError::UnresolvableElement(element.clone()))?;
    let interfaces = shape
        .interfaces
        .iter()
        .map(|i| descriptor.with_element_class(i).interface_name());
    Ok(ClassFile::new(descriptor.interface_name(), Some(SHADOW_OBJECT))
        .with_interface_flag()
        .with_interfaces(interfaces))
}

// =============================================================================
// Method bodies
// =============================================================================

fn charge_for_length(length_local: u16, per_element: i64) -> [Instruction; 5] {
    [
        Instruction::ILoad(length_local),
        Instruction::I2L,
        Instruction::LConst(per_element),
        Instruction::LMul,
        Instruction::invoke_static(ARRAY_BASE, CHARGE_METHOD, "(J)V"),
    ]
}

fn allocate(class_name: &str, length_local: u16) -> [Instruction; 4] {
    [
        Instruction::New(class_name.to_string()),
        Instruction::Dup,
        Instruction::ILoad(length_local),
        Instruction::invoke(InvokeKind::Special, class_name, "<init>", "(I)V"),
    ]
}

/// `initArray(I)`: allocate one level; nested slots stay null.
fn single_factory(descriptor: &WrapperDescriptor) -> Result<MethodDecl, WrapperError> {
    let name = descriptor.class_name();
    let mut b = CodeBuilder::new();
    b.emit_all(allocate(&name, 0));
    b.emit_all(charge_for_length(0, element_energy(descriptor.leaf_primitive())));
    b.emit(Instruction::AReturn);
    let (code, handlers) = b.finish()?;
    Ok(MethodDecl::new(FACTORY_METHOD, factory_descriptor(descriptor, 1))
        .with_static()
        .with_max_locals(1)
        .with_code(code, handlers))
}

/// `initArray(I^params)`: allocate this level, then fill every slot from the
/// child wrapper's `(params - 1)` factory.
fn nested_factory(descriptor: &WrapperDescriptor, params: u8) -> Result<MethodDecl, WrapperError> {
    let name = descriptor.class_name();
    let child = descriptor
        .child()
        .ok_or_else(|| WrapperError::NotAWrapper(name.clone()))?;
    let array_local = params as u16;
    let index_local = array_local + 1;

    let mut b = CodeBuilder::new();
    let head = b.new_label();
    let exit = b.new_label();

    b.emit_all(allocate(&name, 0));
    b.emit_all(charge_for_length(0, element_energy(None)));
    b.emit(Instruction::AStore(array_local));
    b.emit(Instruction::IConst(0)).emit(Instruction::IStore(index_local));

    b.bind(head);
    b.emit(Instruction::ILoad(index_local)).emit(Instruction::ILoad(0));
    b.branch(|t| Instruction::IfICmp(Condition::Ge, t), exit);
    b.emit(Instruction::ALoad(array_local))
        .emit(Instruction::ILoad(index_local));
    for dim in 1..params as u16 {
        b.emit(Instruction::ILoad(dim));
    }
    b.emit(Instruction::invoke_static(
        &child.class_name(),
        FACTORY_METHOD,
        &factory_descriptor(&child, params - 1),
    ));
    b.emit(Instruction::invoke(
        InvokeKind::Virtual,
        &name,
        "set",
        "(ILs/java/lang/Object;)V",
    ));
    b.emit(Instruction::IInc(index_local, 1));
    b.goto(head);

    b.bind(exit);
    b.emit(Instruction::ALoad(array_local)).emit(Instruction::AReturn);

    let (code, handlers) = b.finish()?;
    Ok(MethodDecl::new(FACTORY_METHOD, factory_descriptor(descriptor, params))
        .with_static()
        .with_max_locals(index_local + 1)
        .with_code(code, handlers))
}

fn constructors(super_name: &str) -> Vec<MethodDecl> {
    let backing = format!("(L{};)V", BACKING_CLASS);
    let deserializing = format!("(L{};J)V", DESERIALIZER_INTERFACE);
    let forward = |descriptor: &str, loads: Vec<Instruction>| {
        let max_locals = loads.len() as u16 + 1;
        let mut code = vec![Instruction::ALoad(0)];
        code.extend(loads);
        code.push(Instruction::invoke(InvokeKind::Special, super_name, "<init>", descriptor));
        code.push(Instruction::Return);
        MethodDecl::new("<init>", descriptor)
            .with_max_locals(max_locals)
            .with_code(code, Vec::new())
    };
    vec![
        forward("(I)V", vec![Instruction::ILoad(1)]),
        forward(&backing, vec![Instruction::ALoad(1)]),
        forward("()V", vec![]),
        forward(
            &deserializing,
            vec![Instruction::ALoad(1), Instruction::LLoad(2)],
        ),
    ]
}

fn clone_method(class_name: &str) -> MethodDecl {
    let code = vec![
        Instruction::New(class_name.to_string()),
        Instruction::Dup,
        Instruction::ALoad(0),
        Instruction::invoke(
            InvokeKind::Virtual,
            ARRAY_BASE,
            "copyBacking",
            &format!("()L{};", BACKING_CLASS),
        ),
        Instruction::invoke(
            InvokeKind::Special,
            class_name,
            "<init>",
            &format!("(L{};)V", BACKING_CLASS),
        ),
        Instruction::AReturn,
    ];
    MethodDecl::new(CLONE_METHOD, "()Ls/java/lang/Object;")
        .with_max_locals(1)
        .with_code(code, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(s: &str) -> WrapperDescriptor {
        WrapperDescriptor::from_array_descriptor(s).unwrap()
    }

    #[test]
    fn test_primitive_leaf_extends_storage_class() {
        let class = generate_class(&desc("[I"), None).unwrap();
        assert_eq!(class.name, "avm/arraywrapper/$I");
        assert_eq!(class.super_name.as_deref(), Some("avm/arraywrapper/IntArray"));
        assert!(class.method("initArray", "(I)Lavm/arraywrapper/$I;").is_some());
        assert!(class.method("<init>", "(Lavm/internal/IDeserializer;J)V").is_some());
        assert!(class.method("avm_clone", "()Ls/java/lang/Object;").is_some());

        let boolean = generate_class(&desc("[Z"), None).unwrap();
        assert_eq!(boolean.super_name.as_deref(), Some("avm/arraywrapper/ByteArray"));
    }

    #[test]
    fn test_multi_dimensional_factories() {
        let class = generate_class(&desc("[[[I"), None).unwrap();
        assert_eq!(class.super_name.as_deref(), Some("avm/arraywrapper/ObjectArray"));
        for d in ["(I)", "(II)", "(III)"] {
            let descriptor = format!("{}Lavm/arraywrapper/$$$I;", d);
            assert!(class.method("initArray", &descriptor).is_some(), "{}", descriptor);
        }
        let full = class.method("initArray", "(III)Lavm/arraywrapper/$$$I;").unwrap();
        assert!(full.code.contains(&Instruction::invoke_static(
            "avm/arraywrapper/$$I",
            "initArray",
            "(II)Lavm/arraywrapper/$$I;"
        )));
    }

    #[test]
    fn test_class_element_mirrors_hierarchy() {
        let shape = ElementShape {
            is_interface: false,
            super_name: Some("com/Base".into()),
            interfaces: vec!["com/Shape".into()],
        };
        let class = generate_class(&desc("[Lcom/Circle;"), Some(&shape)).unwrap();
        assert_eq!(class.super_name.as_deref(), Some("avm/arraywrapper/$Lcom/Base"));
        assert_eq!(class.interfaces, vec!["avm/arraywrapper/interface/_Lcom/Shape"]);

        let root = ElementShape {
            is_interface: false,
            super_name: None,
            interfaces: vec![],
        };
        let object = generate_class(&desc("[[Ls/java/lang/Object;"), Some(&root)).unwrap();
        assert_eq!(object.super_name.as_deref(), Some("avm/arraywrapper/ObjectArray"));
    }

    #[test]
    fn test_interface_element() {
        let shape = ElementShape {
            is_interface: true,
            super_name: Some(SHADOW_OBJECT.into()),
            interfaces: vec!["com/Named".into()],
        };
        let class = generate_class(&desc("[Lcom/Shape;"), Some(&shape)).unwrap();
        assert_eq!(class.super_name.as_deref(), Some(OBJECT_ARRAY));
        assert_eq!(
            class.interfaces,
            vec![
                "avm/arraywrapper/interface/_Lcom/Named",
                "avm/arraywrapper/interface/_Lcom/Shape"
            ]
        );

        let iface = generate_interface(&desc("[Lcom/Shape;"), Some(&shape)).unwrap();
        assert!(iface.is_interface());
        assert_eq!(iface.interfaces, vec!["avm/arraywrapper/interface/_Lcom/Named"]);
        assert!(iface.methods.is_empty());
    }

    #[test]
    fn test_missing_shape_is_unresolvable() {
        assert_eq!(
            generate_class(&desc("[Lcom/Ghost;"), None),
            Err(WrapperError::UnresolvableElement("com/Ghost".into()))
        );
    }

    #[test]
    fn test_generation_is_byte_identical() {
        let a = generate_class(&desc("[[J"), None).unwrap().encode().unwrap();
        let b = generate_class(&desc("[[J"), None).unwrap().encode().unwrap();
        assert_eq!(a, b);
    }
}
