//! Moving contract state between the heap and the object graph.
//!
//! Object encoding: primitives big-endian at their field width, references
//! in the representation's reference list. Arrays store a 4-byte length
//! first. The root holds the statics of every contract class, classes
//! sorted by name and fields in declaration order. Constant and class
//! objects are written as their node, never as instances.

use super::heap::{narrow_int, ArrayStorage, HeapObject, ObjectBody, ObjectRef, Value};
use super::interpreter::Interpreter;
use super::shadow::CLASS_OBJECT;
use super::{invariant, Unwind};
use crate::errors::PersistenceError;
use crate::persistence::{NodeRef, SerializedRepresentation};
use avm_types::{ArrayKind, FieldType, PrimitiveType, SHADOW_OBJECT};
use std::collections::{HashSet, VecDeque};

fn persistence_failure(e: PersistenceError) -> Unwind {
    tracing::error!(error = %e, "persistent state unusable");
    invariant(e.to_string())
}

// =============================================================================
// Encoding
// =============================================================================

fn write_primitive(data: &mut Vec<u8>, ty: PrimitiveType, value: Value) -> Result<(), Unwind> {
    match (ty, value) {
        (PrimitiveType::Long, Value::Long(v)) => data.extend_from_slice(&v.to_be_bytes()),
        (PrimitiveType::Int, Value::Int(v)) => data.extend_from_slice(&v.to_be_bytes()),
        (PrimitiveType::Byte | PrimitiveType::Boolean, Value::Int(v)) => data.push(v as u8),
        (PrimitiveType::Char | PrimitiveType::Short, Value::Int(v)) => {
            data.extend_from_slice(&(v as u16).to_be_bytes())
        }
        (ty, value) => return Err(invariant(format!("cannot store {value:?} as {ty:?}"))),
    }
    Ok(())
}

/// Primitive payload plus the still-unresolved references of one node.
#[derive(Debug, Default)]
struct Encoded {
    data: Vec<u8>,
    references: Vec<Option<ObjectRef>>,
}

impl Encoded {
    fn field(&mut self, ty: &FieldType, value: Value) -> Result<(), Unwind> {
        match (ty, value) {
            (FieldType::Primitive(p), value) => write_primitive(&mut self.data, *p, value),
            (_, Value::Ref(r)) => {
                self.references.push(r);
                Ok(())
            }
            (ty, value) => Err(invariant(format!("cannot store {value:?} as {ty}"))),
        }
    }

    fn array(&mut self, storage: &ArrayStorage) -> Result<(), Unwind> {
        let len = u32::try_from(storage.len()).map_err(|_| invariant("array too long to store"))?;
        self.data.extend_from_slice(&len.to_be_bytes());
        match storage {
            ArrayStorage::Int(v) => v.iter().for_each(|x| self.data.extend_from_slice(&x.to_be_bytes())),
            ArrayStorage::Long(v) => v.iter().for_each(|x| self.data.extend_from_slice(&x.to_be_bytes())),
            ArrayStorage::Byte(v) => self.data.extend(v.iter().map(|x| *x as u8)),
            ArrayStorage::Char(v) => v.iter().for_each(|x| self.data.extend_from_slice(&x.to_be_bytes())),
            ArrayStorage::Short(v) => v.iter().for_each(|x| self.data.extend_from_slice(&x.to_be_bytes())),
            ArrayStorage::Reference(v) => self.references.extend(v.iter().copied()),
        }
        Ok(())
    }
}

struct Reader<'r> {
    data: &'r [u8],
    pos: usize,
    references: std::slice::Iter<'r, Option<NodeRef>>,
}

impl<'r> Reader<'r> {
    fn new(rep: &'r SerializedRepresentation) -> Self {
        Self {
            data: &rep.data,
            pos: 0,
            references: rep.references.iter(),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], Unwind> {
        let bytes = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or_else(|| invariant("stored object truncated"))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn primitive(&mut self, ty: PrimitiveType) -> Result<Value, Unwind> {
        Ok(match ty {
            PrimitiveType::Long => Value::Long(i64::from_be_bytes(self.take()?)),
            PrimitiveType::Int => Value::Int(i32::from_be_bytes(self.take()?)),
            PrimitiveType::Byte | PrimitiveType::Boolean => {
                let [b] = self.take::<1>()?;
                Value::Int(narrow_int(i32::from(b as i8), ty))
            }
            PrimitiveType::Char | PrimitiveType::Short => {
                let raw = u16::from_be_bytes(self.take()?);
                Value::Int(narrow_int(i32::from(raw), ty))
            }
        })
    }

    fn reference(&mut self) -> Result<Option<NodeRef>, Unwind> {
        self.references
            .next()
            .cloned()
            .ok_or_else(|| invariant("stored object is missing references"))
    }

    fn finish(self) -> Result<(), Unwind> {
        if self.pos != self.data.len() || self.references.len() != 0 {
            return Err(invariant("stored object has trailing data"));
        }
        Ok(())
    }
}

/// Decoded contents whose references still need materializing.
enum Decoded {
    Fields(Vec<Result<Value, NodeRef>>),
    Array(ArrayKind, Vec<Value>, Vec<Option<NodeRef>>),
}

impl Interpreter<'_> {
    // =========================================================================
    // Loading
    // =========================================================================

    /// Restore statics and the identity-hash counter of an existing contract.
    pub fn restore_state(&mut self) -> Result<(), Unwind> {
        if let Some(meta) = self.graph.metadata() {
            let bytes = <[u8; 4]>::try_from(meta.as_slice())
                .map_err(|_| invariant("corrupt contract metadata"))?;
            self.next_hash = i32::from_be_bytes(bytes);
        }
        let root = self.graph.get_root().map_err(persistence_failure)?;
        self.energy.charge_bytes(
            root.stored_size() as u64,
            self.config.energy.storage_read_byte_cost,
        )?;

        let mut reader = Reader::new(&root);
        for class_name in self.user_classes.clone() {
            let class = self.classes.load(&class_name)?;
            let mut values = Vec::with_capacity(class.static_fields.len());
            for field in &class.static_fields {
                let value = match &field.ty {
                    FieldType::Primitive(p) => reader.primitive(*p)?,
                    _ => {
                        let node = reader.reference()?;
                        Value::Ref(self.materialize(node)?)
                    }
                };
                values.push(value);
            }
            self.statics.insert(class_name, values);
        }
        reader.finish()?;
        tracing::debug!(classes = self.user_classes.len(), "statics restored");
        self.loaded_root = Some(root);
        Ok(())
    }

    /// Live handle for a stored reference, creating a lazy stub if needed.
    fn materialize(&mut self, node: Option<NodeRef>) -> Result<Option<ObjectRef>, Unwind> {
        match node {
            None => Ok(None),
            Some(NodeRef::Instance {
                type_name,
                identity_hash,
                instance_id,
            }) => {
                if let Some(existing) = self.heap.by_instance(instance_id) {
                    return Ok(Some(existing));
                }
                let class = self.classes.load(&type_name)?;
                self.graph.existing_node(identity_hash, &type_name, instance_id);
                Ok(Some(self.heap.allocate(HeapObject::unloaded(
                    class,
                    identity_hash,
                    instance_id,
                ))))
            }
            Some(NodeRef::Constant { hash }) => {
                let node = self.graph.constant_node(hash).map_err(persistence_failure)?;
                self.shared_object(node, SHADOW_OBJECT).map(Some)
            }
            Some(NodeRef::Class { name }) => {
                // The named class must still be loadable.
                self.classes.load(&name)?;
                let node = self.graph.class_node(&name);
                self.shared_object(node, CLASS_OBJECT).map(Some)
            }
        }
    }

    /// The single heap object standing for a constant or class node.
    fn shared_object(&mut self, node: NodeRef, type_name: &str) -> Result<ObjectRef, Unwind> {
        if let Some(existing) = self.shared.get(&node) {
            return Ok(*existing);
        }
        let class = self.classes.load(type_name)?;
        let object = self.heap.allocate(HeapObject::new(
            class,
            node.identity_hash(),
            ObjectBody::Fields(Vec::new()),
        ));
        tracing::trace!(?node, "shared object materialized");
        self.shared.insert(node.clone(), object);
        self.shared_nodes.insert(object, node);
        Ok(object)
    }

    /// Fill in a lazily loaded object from storage.
    pub(super) fn ensure_loaded(&mut self, object: ObjectRef) -> Result<(), Unwind> {
        let target = self.heap.get(object);
        if target.is_loaded() {
            return Ok(());
        }
        let class = std::sync::Arc::clone(&target.class);
        let id = target
            .instance_id
            .ok_or_else(|| invariant("unloaded object without an instance id"))?;
        let rep = self.graph.load_node(id).map_err(persistence_failure)?;
        self.energy.charge_bytes(
            rep.stored_size() as u64,
            self.config.energy.storage_read_byte_cost,
        )?;

        let decoded = {
            let mut reader = Reader::new(&rep);
            let decoded = match class.array_kind {
                Some(kind) => {
                    let len = u32::from_be_bytes(reader.take()?) as usize;
                    let mut values = Vec::new();
                    let mut nodes = Vec::new();
                    for _ in 0..len {
                        match primitive_of(kind) {
                            Some(p) => values.push(reader.primitive(p)?),
                            None => nodes.push(reader.reference()?),
                        }
                    }
                    Decoded::Array(kind, values, nodes)
                }
                None => Decoded::Fields(
                    class
                        .instance_fields
                        .iter()
                        .map(|f| match &f.ty {
                            FieldType::Primitive(p) => reader.primitive(*p).map(Ok),
                            _ => reader.reference().map(|node| match node {
                                Some(node) => Err(node),
                                None => Ok(Value::NULL),
                            }),
                        })
                        .collect::<Result<Vec<_>, Unwind>>()?,
                ),
            };
            reader.finish()?;
            decoded
        };

        let body = match decoded {
            Decoded::Fields(slots) => {
                let mut values = Vec::with_capacity(slots.len());
                for slot in slots {
                    values.push(match slot {
                        Ok(value) => value,
                        Err(node) => Value::Ref(self.materialize(Some(node))?),
                    });
                }
                ObjectBody::Fields(values)
            }
            Decoded::Array(ArrayKind::Reference, _, nodes) => {
                let mut refs = Vec::with_capacity(nodes.len());
                for node in nodes {
                    refs.push(self.materialize(node)?);
                }
                ObjectBody::Array(ArrayStorage::Reference(refs))
            }
            Decoded::Array(kind, values, _) => {
                let mut storage = ArrayStorage::new(kind, values.len());
                for (i, value) in values.into_iter().enumerate() {
                    storage
                        .set(i, value)
                        .map_err(|_| invariant("stored array element has the wrong type"))?;
                }
                ObjectBody::Array(storage)
            }
        };

        let target = self.heap.get_mut(object);
        target.body = body;
        target.original = Some(rep);
        self.stats.objects_loaded += 1;
        tracing::trace!(instance_id = id, class = %class.name, "object loaded");
        Ok(())
    }

    // =========================================================================
    // Committing
    // =========================================================================

    /// Write every reachable changed object and the root, then flush the
    /// graph. Returns the namespace's consensus digest.
    pub fn commit(&mut self) -> Result<[u8; 32], Unwind> {
        let mut queue = VecDeque::new();

        let mut root = Encoded::default();
        for class_name in self.user_classes.clone() {
            let class = self.classes.load(&class_name)?;
            let values = self.statics_of(&class).clone();
            for (field, value) in class.static_fields.iter().zip(values) {
                root.field(&field.ty, value)?;
            }
        }
        let root = self.resolve(root, &mut queue)?;

        let mut visited = HashSet::new();
        while let Some(object) = queue.pop_front() {
            if !visited.insert(object) {
                continue;
            }
            let Some(encoded) = self.encode_object(object)? else {
                continue;
            };
            let rep = self.resolve(encoded, &mut queue)?;
            let current = self.heap.get(object);
            if current.original.as_ref() == Some(&rep) {
                continue;
            }
            let id = current
                .instance_id
                .ok_or_else(|| invariant("reachable object without an instance id"))?;
            self.energy.charge_bytes(
                rep.stored_size() as u64,
                self.config.energy.storage_write_byte_cost,
            )?;
            self.graph
                .store_instance(id, current.original.as_ref(), &rep)
                .map_err(persistence_failure)?;
            self.heap.get_mut(object).original = Some(rep);
            self.stats.objects_stored += 1;
        }

        if self.loaded_root.as_ref() != Some(&root) {
            self.energy.charge_bytes(
                root.stored_size() as u64,
                self.config.energy.storage_write_byte_cost,
            )?;
            self.graph.set_root(&root).map_err(persistence_failure)?;
            self.loaded_root = Some(root);
        }
        self.graph.set_metadata(self.next_hash.to_be_bytes().to_vec());
        self.graph.flush();
        tracing::debug!(stored = self.stats.objects_stored, "state committed");
        Ok(self.graph.consensus_digest())
    }

    /// Contents of a loaded object; `None` for untouched stubs.
    fn encode_object(&self, object: ObjectRef) -> Result<Option<Encoded>, Unwind> {
        let target = self.heap.get(object);
        let mut encoded = Encoded::default();
        match &target.body {
            ObjectBody::Unloaded => return Ok(None),
            ObjectBody::Fields(values) => {
                for (field, value) in target.class.instance_fields.iter().zip(values) {
                    encoded.field(&field.ty, *value)?;
                }
            }
            ObjectBody::Array(storage) => encoded.array(storage)?,
            ObjectBody::Backing(_) => {
                return Err(invariant("array backing reachable from persistent state"))
            }
        }
        Ok(Some(encoded))
    }

    /// Turn heap references into node references, giving new objects an
    /// instance id and queueing every referenced object for a visit.
    fn resolve(
        &mut self,
        encoded: Encoded,
        queue: &mut VecDeque<ObjectRef>,
    ) -> Result<SerializedRepresentation, Unwind> {
        let mut references = Vec::with_capacity(encoded.references.len());
        for reference in encoded.references {
            let Some(object) = reference else {
                references.push(None);
                continue;
            };
            if let Some(node) = self.shared_nodes.get(&object) {
                references.push(Some(node.clone()));
                continue;
            }
            let target = self.heap.get(object);
            let (identity_hash, type_name) = (target.identity_hash, target.class.name.clone());
            let instance_id = match target.instance_id {
                Some(id) => id,
                None => {
                    let id = self
                        .graph
                        .new_node(identity_hash, &type_name)
                        .map_err(persistence_failure)?;
                    self.heap.assign_instance(object, id);
                    id
                }
            };
            queue.push_back(object);
            references.push(Some(NodeRef::Instance {
                type_name,
                identity_hash,
                instance_id,
            }));
        }
        Ok(SerializedRepresentation::new(encoded.data, references))
    }
}

/// Element type stored by `kind`; `None` for references.
pub(super) fn primitive_of(kind: ArrayKind) -> Option<PrimitiveType> {
    match kind {
        ArrayKind::Int => Some(PrimitiveType::Int),
        ArrayKind::Long => Some(PrimitiveType::Long),
        ArrayKind::Byte => Some(PrimitiveType::Byte),
        ArrayKind::Char => Some(PrimitiveType::Char),
        ArrayKind::Short => Some(PrimitiveType::Short),
        ArrayKind::Reference => None,
    }
}
