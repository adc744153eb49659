//! Objects, arrays and operand values.

use super::loader::LoadedClass;
use crate::persistence::SerializedRepresentation;
use avm_types::{ArrayKind, FieldType, PrimitiveType};
use std::collections::HashMap;
use std::sync::Arc;

/// Handle to a heap object; valid for the lifetime of its [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u32);

impl ObjectRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One local-variable or operand-stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Ref(Option<ObjectRef>),
}

impl Value {
    pub const NULL: Value = Value::Ref(None);

    /// Zero value of a field of type `ty`.
    pub fn default_for(ty: &FieldType) -> Self {
        match ty {
            FieldType::Primitive(PrimitiveType::Long) => Self::Long(0),
            FieldType::Primitive(_) => Self::Int(0),
            FieldType::Object(_) | FieldType::Array { .. } => Self::NULL,
        }
    }

    /// Truncate an int to the range of a narrower field type.
    pub fn narrow(self, ty: &FieldType) -> Self {
        match (self, ty) {
            (Self::Int(v), FieldType::Primitive(p)) => Self::Int(narrow_int(v, *p)),
            (other, _) => other,
        }
    }
}

pub(crate) fn narrow_int(v: i32, p: PrimitiveType) -> i32 {
    match p {
        PrimitiveType::Byte => v as i8 as i32,
        PrimitiveType::Boolean => v & 1,
        PrimitiveType::Char => v as u16 as i32,
        PrimitiveType::Short => v as i16 as i32,
        PrimitiveType::Int | PrimitiveType::Long => v,
    }
}

/// Why an element access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayAccess {
    OutOfBounds,
    TypeMismatch,
}

/// Element storage of one array level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayStorage {
    Int(Vec<i32>),
    Long(Vec<i64>),
    /// Also holds booleans.
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Reference(Vec<Option<ObjectRef>>),
}

impl ArrayStorage {
    pub fn new(kind: ArrayKind, len: usize) -> Self {
        match kind {
            ArrayKind::Int => Self::Int(vec![0; len]),
            ArrayKind::Long => Self::Long(vec![0; len]),
            ArrayKind::Byte => Self::Byte(vec![0; len]),
            ArrayKind::Char => Self::Char(vec![0; len]),
            ArrayKind::Short => Self::Short(vec![0; len]),
            ArrayKind::Reference => Self::Reference(vec![None; len]),
        }
    }

    pub fn kind(&self) -> ArrayKind {
        match self {
            Self::Int(_) => ArrayKind::Int,
            Self::Long(_) => ArrayKind::Long,
            Self::Byte(_) => ArrayKind::Byte,
            Self::Char(_) => ArrayKind::Char,
            Self::Short(_) => ArrayKind::Short,
            Self::Reference(_) => ArrayKind::Reference,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Byte(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Reference(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        Some(match self {
            Self::Int(v) => Value::Int(*v.get(index)?),
            Self::Long(v) => Value::Long(*v.get(index)?),
            Self::Byte(v) => Value::Int(i32::from(*v.get(index)?)),
            Self::Char(v) => Value::Int(i32::from(*v.get(index)?)),
            Self::Short(v) => Value::Int(i32::from(*v.get(index)?)),
            Self::Reference(v) => Value::Ref(*v.get(index)?),
        })
    }

    /// Store `value`, truncating ints to the element width.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), ArrayAccess> {
        if index >= self.len() {
            return Err(ArrayAccess::OutOfBounds);
        }
        match (self, value) {
            (Self::Int(v), Value::Int(x)) => v[index] = x,
            (Self::Long(v), Value::Long(x)) => v[index] = x,
            (Self::Byte(v), Value::Int(x)) => v[index] = x as i8,
            (Self::Char(v), Value::Int(x)) => v[index] = x as u16,
            (Self::Short(v), Value::Int(x)) => v[index] = x as i16,
            (Self::Reference(v), Value::Ref(x)) => v[index] = x,
            _ => return Err(ArrayAccess::TypeMismatch),
        }
        Ok(())
    }

    /// Every reference element, in order.
    pub fn references(&self) -> &[Option<ObjectRef>] {
        match self {
            Self::Reference(v) => v,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectBody {
    /// Instance fields in layout order.
    Fields(Vec<Value>),
    Array(ArrayStorage),
    /// Detached array storage handed between clone and constructor.
    Backing(ArrayStorage),
    /// Stored object whose contents have not been read yet.
    Unloaded,
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub class: Arc<LoadedClass>,
    pub identity_hash: i32,
    pub body: ObjectBody,
    /// Persistent id, once the object is (or is about to be) stored.
    pub instance_id: Option<u64>,
    /// Representation last read from or written to storage.
    pub original: Option<SerializedRepresentation>,
}

impl HeapObject {
    pub fn new(class: Arc<LoadedClass>, identity_hash: i32, body: ObjectBody) -> Self {
        Self {
            class,
            identity_hash,
            body,
            instance_id: None,
            original: None,
        }
    }

    /// Lazy placeholder for a stored instance.
    pub fn unloaded(class: Arc<LoadedClass>, identity_hash: i32, instance_id: u64) -> Self {
        Self {
            class,
            identity_hash,
            body: ObjectBody::Unloaded,
            instance_id: Some(instance_id),
            original: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.body, ObjectBody::Unloaded)
    }
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
    by_instance: HashMap<u64, ObjectRef>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, object: HeapObject) -> ObjectRef {
        let handle = ObjectRef(self.objects.len() as u32);
        if let Some(id) = object.instance_id {
            self.by_instance.insert(id, handle);
        }
        self.objects.push(object);
        handle
    }

    pub fn get(&self, handle: ObjectRef) -> &HeapObject {
        &self.objects[handle.index()]
    }

    pub fn get_mut(&mut self, handle: ObjectRef) -> &mut HeapObject {
        &mut self.objects[handle.index()]
    }

    /// The live object standing for stored instance `id`, if any.
    pub fn by_instance(&self, id: u64) -> Option<ObjectRef> {
        self.by_instance.get(&id).copied()
    }

    pub fn assign_instance(&mut self, handle: ObjectRef, id: u64) {
        self.objects[handle.index()].instance_id = Some(id);
        self.by_instance.insert(id, handle);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_storage_truncates() {
        let mut bytes = ArrayStorage::new(ArrayKind::Byte, 2);
        bytes.set(0, Value::Int(0x1ff)).unwrap();
        assert_eq!(bytes.get(0), Some(Value::Int(-1)));
        assert_eq!(bytes.set(2, Value::Int(0)), Err(ArrayAccess::OutOfBounds));
        assert_eq!(bytes.set(1, Value::Long(0)), Err(ArrayAccess::TypeMismatch));

        let mut chars = ArrayStorage::new(ArrayKind::Char, 1);
        chars.set(0, Value::Int(-1)).unwrap();
        assert_eq!(chars.get(0), Some(Value::Int(0xffff)));
        assert!(chars.get(1).is_none());
    }

    #[test]
    fn test_defaults_and_narrowing() {
        assert_eq!(
            Value::default_for(&FieldType::Primitive(PrimitiveType::Long)),
            Value::Long(0)
        );
        assert_eq!(Value::default_for(&FieldType::Object("a/B".into())), Value::NULL);
        let short = FieldType::Primitive(PrimitiveType::Short);
        assert_eq!(Value::Int(0x12345).narrow(&short), Value::Int(0x2345));
        let boolean = FieldType::Primitive(PrimitiveType::Boolean);
        assert_eq!(Value::Int(3).narrow(&boolean), Value::Int(1));
    }

    #[test]
    fn test_reference_storage() {
        let mut refs = ArrayStorage::new(ArrayKind::Reference, 3);
        refs.set(1, Value::Ref(Some(ObjectRef(7)))).unwrap();
        assert_eq!(refs.references(), &[None, Some(ObjectRef(7)), None]);
        assert_eq!(refs.kind(), ArrayKind::Reference);
        assert!(ArrayStorage::new(ArrayKind::Int, 0).is_empty());
    }
}
