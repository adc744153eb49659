//! The class library sandboxed code links against.
//!
//! Shadow standard-library classes (`s/java/...`), array storage bases,
//! runtime helpers and the contract API. Bodies are either tiny bytecode
//! sequences or native, and none of them is instrumented.

use crate::arraywrap::{
    accessor_descriptors, ARRAY_BASE, BACKING_CLASS, BYTE_ARRAY, CHAR_ARRAY, DESERIALIZER_INTERFACE,
    INT_ARRAY, LONG_ARRAY, OBJECT_ARRAY, SHORT_ARRAY,
};
use crate::errors::DeploymentError;
use crate::heap_cost::{HeapCostTable, OBJECT_HEADER_SIZE};
use crate::hierarchy::{ClassHierarchy, ExternalClasses};
use crate::pipeline::helper;
use avm_types::{
    ArrayKind, ClassFile, Instruction, InvokeKind, MethodDecl, HELPER_CLASS, SHADOW_OBJECT,
    SHADOW_THROWABLE,
};
use std::collections::BTreeMap;

/// Contract-facing API class.
pub const BLOCKCHAIN_CLASS: &str = "avm/api/Blockchain";

/// Wrapper class of `byte[]`, the API's byte-string type.
pub const BYTE_ARRAY_WRAPPER: &str = "avm/arraywrapper/$B";

pub const ARITHMETIC_EXCEPTION: &str = "s/java/lang/ArithmeticException";
pub const NULL_POINTER_EXCEPTION: &str = "s/java/lang/NullPointerException";
pub const ARRAY_INDEX_EXCEPTION: &str = "s/java/lang/ArrayIndexOutOfBoundsException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "s/java/lang/NegativeArraySizeException";
pub const CLASS_CAST_EXCEPTION: &str = "s/java/lang/ClassCastException";

/// Type of the runtime's class objects, which are stored by name.
pub const CLASS_OBJECT: &str = "s/java/lang/Class";

/// Throwable classes and their parents.
const THROWABLES: [(&str, &str); 12] = [
    (SHADOW_THROWABLE, SHADOW_OBJECT),
    ("s/java/lang/Exception", SHADOW_THROWABLE),
    ("s/java/lang/Error", SHADOW_THROWABLE),
    ("s/java/lang/RuntimeException", "s/java/lang/Exception"),
    (ARITHMETIC_EXCEPTION, "s/java/lang/RuntimeException"),
    (NULL_POINTER_EXCEPTION, "s/java/lang/RuntimeException"),
    (CLASS_CAST_EXCEPTION, "s/java/lang/RuntimeException"),
    (NEGATIVE_ARRAY_SIZE_EXCEPTION, "s/java/lang/RuntimeException"),
    ("s/java/lang/IllegalArgumentException", "s/java/lang/RuntimeException"),
    ("s/java/lang/IllegalStateException", "s/java/lang/RuntimeException"),
    ("s/java/lang/IndexOutOfBoundsException", "s/java/lang/RuntimeException"),
    (ARRAY_INDEX_EXCEPTION, "s/java/lang/IndexOutOfBoundsException"),
];

const STORAGE_CLASSES: [(&str, ArrayKind); 6] = [
    (OBJECT_ARRAY, ArrayKind::Reference),
    (INT_ARRAY, ArrayKind::Int),
    (LONG_ARRAY, ArrayKind::Long),
    (BYTE_ARRAY, ArrayKind::Byte),
    (CHAR_ARRAY, ArrayKind::Char),
    (SHORT_ARRAY, ArrayKind::Short),
];

/// Storage kind implemented natively by the base class `name`.
pub fn storage_kind(name: &str) -> Option<ArrayKind> {
    STORAGE_CLASSES
        .iter()
        .find(|(class, _)| *class == name)
        .map(|(_, kind)| *kind)
}

#[derive(Debug, Clone)]
pub struct ShadowLibrary {
    classes: BTreeMap<String, ClassFile>,
    heap_costs: HeapCostTable,
}

impl ShadowLibrary {
    pub fn new() -> Result<Self, DeploymentError> {
        let mut classes = BTreeMap::new();
        for class in object_classes()
            .into_iter()
            .chain(throwable_classes())
            .chain(array_classes())
            .chain(runtime_classes())
        {
            classes.insert(class.name.clone(), class);
        }

        let hierarchy = ClassHierarchy::build(&classes, &BTreeMap::new())?;
        let seed = BTreeMap::from([(SHADOW_OBJECT.to_string(), OBJECT_HEADER_SIZE)]);
        let heap_costs = HeapCostTable::build(&hierarchy, &seed)?;
        tracing::debug!(classes = classes.len(), "shadow library built");
        Ok(Self {
            classes,
            heap_costs,
        })
    }

    pub fn class(&self, name: &str) -> Option<&ClassFile> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> &BTreeMap<String, ClassFile> {
        &self.classes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn heap_costs(&self) -> &HeapCostTable {
        &self.heap_costs
    }

    /// Instance sizes of every library class, the seed for user heap costs.
    pub fn base_sizes(&self) -> BTreeMap<String, u32> {
        self.heap_costs
            .iter()
            .map(|(name, size)| (name.to_string(), size))
            .collect()
    }
}

impl ExternalClasses for ShadowLibrary {
    fn external_class(&self, name: &str) -> Option<&ClassFile> {
        self.classes.get(name)
    }
}

// =============================================================================
// Class definitions
// =============================================================================

fn native(name: &str, descriptor: &str) -> MethodDecl {
    MethodDecl::new(name, descriptor).with_native()
}

fn static_native(name: &str, descriptor: &str) -> MethodDecl {
    native(name, descriptor).with_static()
}

/// `<init>()V` that only calls the parent constructor.
fn chained_constructor(parent: &str) -> MethodDecl {
    MethodDecl::new("<init>", "()V").with_max_locals(1).with_code(
        vec![
            Instruction::ALoad(0),
            Instruction::invoke(InvokeKind::Special, parent, "<init>", "()V"),
            Instruction::Return,
        ],
        Vec::new(),
    )
}

fn object_classes() -> Vec<ClassFile> {
    vec![
        ClassFile::new(SHADOW_OBJECT, None)
            .with_method(
                MethodDecl::new("<init>", "()V")
                    .with_max_locals(1)
                    .with_code(vec![Instruction::Return], Vec::new()),
            )
            .with_method(native("hashCode", "()I"))
            .with_method(native("equals", "(Ls/java/lang/Object;)Z")),
        ClassFile::new(CLASS_OBJECT, Some(SHADOW_OBJECT)),
    ]
}

fn throwable_classes() -> Vec<ClassFile> {
    THROWABLES
        .iter()
        .map(|(name, parent)| {
            ClassFile::new(*name, Some(*parent)).with_method(chained_constructor(parent))
        })
        .collect()
}

fn array_classes() -> Vec<ClassFile> {
    let backing = format!("(L{};)V", BACKING_CLASS);
    let deserializing = format!("(L{};J)V", DESERIALIZER_INTERFACE);

    let mut classes = vec![
        ClassFile::new(ARRAY_BASE, Some(SHADOW_OBJECT))
            .with_abstract()
            .with_method(native("length", "()I"))
            .with_method(native("copyBacking", &format!("()L{};", BACKING_CLASS)))
            .with_method(static_native("chargeEnergy", "(J)V")),
        ClassFile::new(BACKING_CLASS, Some(SHADOW_OBJECT)),
        ClassFile::new(DESERIALIZER_INTERFACE, Some(SHADOW_OBJECT)).with_interface_flag(),
    ];
    for (name, kind) in STORAGE_CLASSES {
        let (get, set) = accessor_descriptors(kind);
        classes.push(
            ClassFile::new(name, Some(ARRAY_BASE))
                .with_method(native("<init>", "(I)V"))
                .with_method(native("<init>", &backing))
                .with_method(native("<init>", "()V"))
                .with_method(native("<init>", &deserializing))
                .with_method(native("get", get))
                .with_method(native("set", set)),
        );
    }
    classes
}

fn runtime_classes() -> Vec<ClassFile> {
    let helper_class = helper::ALL
        .iter()
        .fold(ClassFile::new(HELPER_CLASS, Some(SHADOW_OBJECT)), |class, (name, descriptor)| {
            class.with_method(static_native(name, descriptor))
        });
    let bytes = format!("()L{};", BYTE_ARRAY_WRAPPER);
    let blockchain = ClassFile::new(BLOCKCHAIN_CLASS, Some(SHADOW_OBJECT))
        .with_method(static_native("getData", &bytes))
        .with_method(static_native("getSender", &bytes))
        .with_method(static_native("getAddress", &bytes))
        .with_method(static_native("getRemainingEnergy", "()J"))
        .with_method(static_native("revert", "()V"));
    vec![helper_class, blockchain]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_shape() {
        let library = ShadowLibrary::new().unwrap();
        let object = library.class(SHADOW_OBJECT).unwrap();
        assert!(object.super_name.is_none());
        assert!(object.method("hashCode", "()I").unwrap().flags.is_native);

        assert_eq!(
            library.class(CLASS_OBJECT).unwrap().super_name.as_deref(),
            Some(SHADOW_OBJECT)
        );

        let aioobe = library.class(ARRAY_INDEX_EXCEPTION).unwrap();
        assert_eq!(
            aioobe.super_name.as_deref(),
            Some("s/java/lang/IndexOutOfBoundsException")
        );
        assert!(library
            .class(INT_ARRAY)
            .unwrap()
            .method("set", "(II)V")
            .is_some());
        assert!(library
            .class(HELPER_CLASS)
            .unwrap()
            .method("enterFrame", "()I")
            .unwrap()
            .flags
            .is_static);
    }

    #[test]
    fn test_library_sizes() {
        let library = ShadowLibrary::new().unwrap();
        assert_eq!(library.heap_costs().instance_size(SHADOW_OBJECT), Some(8));
        assert_eq!(library.heap_costs().instance_size(INT_ARRAY), Some(8));
        assert_eq!(
            library.heap_costs().instance_size("s/java/lang/RuntimeException"),
            Some(8)
        );
        assert!(library.base_sizes().contains_key(BLOCKCHAIN_CLASS));
    }

    #[test]
    fn test_storage_kind() {
        assert_eq!(storage_kind(BYTE_ARRAY), Some(ArrayKind::Byte));
        assert_eq!(storage_kind(ARRAY_BASE), None);
    }
}
