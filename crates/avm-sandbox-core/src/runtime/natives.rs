//! Runtime implementations of native library methods.

use super::heap::{ArrayAccess, ArrayStorage, HeapObject, ObjectBody, ObjectRef, Value};
use super::interpreter::Interpreter;
use super::loader::LoadedClass;
use super::persist::primitive_of;
use super::shadow::{
    storage_kind, ARRAY_INDEX_EXCEPTION, BLOCKCHAIN_CLASS, BYTE_ARRAY_WRAPPER,
    NEGATIVE_ARRAY_SIZE_EXCEPTION, NULL_POINTER_EXCEPTION,
};
use super::{invariant, Abort, Unwind};
use crate::arraywrap::{element_energy, ARRAY_BASE, BACKING_CLASS};
use crate::pipeline::{exception_wrapper_name, UNDERLYING_FIELD};
use avm_types::{ArrayKind, HELPER_CLASS, SHADOW_OBJECT, SHADOW_THROWABLE};
use std::sync::Arc;

type NativeResult = Result<Option<Value>, Unwind>;

fn arg_ref(args: &[Value], index: usize) -> Result<Option<ObjectRef>, Unwind> {
    match args.get(index) {
        Some(Value::Ref(r)) => Ok(*r),
        other => Err(invariant(format!("native argument {index}: expected reference, found {other:?}"))),
    }
}

fn arg_int(args: &[Value], index: usize) -> Result<i32, Unwind> {
    match args.get(index) {
        Some(Value::Int(v)) => Ok(*v),
        other => Err(invariant(format!("native argument {index}: expected int, found {other:?}"))),
    }
}

fn arg_long(args: &[Value], index: usize) -> Result<i64, Unwind> {
    match args.get(index) {
        Some(Value::Long(v)) => Ok(*v),
        other => Err(invariant(format!("native argument {index}: expected long, found {other:?}"))),
    }
}

/// Bytes one element of `kind` occupies.
fn element_width(kind: ArrayKind) -> u64 {
    element_energy(primitive_of(kind)).unsigned_abs()
}

impl Interpreter<'_> {
    pub(super) fn call_native(
        &mut self,
        class: &Arc<LoadedClass>,
        index: usize,
        args: Vec<Value>,
    ) -> NativeResult {
        let method = &class.file.methods[index];
        let (name, descriptor) = (method.name.as_str(), method.descriptor.as_str());
        match class.name.as_str() {
            HELPER_CLASS => self.helper_native(name, &args),
            SHADOW_OBJECT => self.object_native(name, &args),
            ARRAY_BASE => self.array_native(name, &args),
            BLOCKCHAIN_CLASS => self.blockchain_native(name, &args),
            owner => match storage_kind(owner) {
                Some(kind) => self.storage_native(kind, name, descriptor, &args),
                None => Err(invariant(format!(
                    "no native implementation of {owner}.{name}{descriptor}"
                ))),
            },
        }
    }

    // =========================================================================
    // Instrumentation helpers
    // =========================================================================

    fn helper_native(&mut self, name: &str, args: &[Value]) -> NativeResult {
        match name {
            "chargeEnergy" => {
                let amount = arg_long(args, 0)?;
                let amount = u64::try_from(amount)
                    .map_err(|_| invariant(format!("negative block charge {amount}")))?;
                self.stats.block_charges += 1;
                self.energy.charge(amount)?;
                Ok(None)
            }
            "enterFrame" => {
                self.depth += 1;
                self.stats.max_depth = self.stats.max_depth.max(self.depth);
                if self.depth > self.config.max_stack_depth {
                    tracing::debug!(depth = self.depth, "call depth limit exceeded");
                    return Err(Abort::OutOfStack.into());
                }
                Ok(Some(Value::Int(self.depth as i32)))
            }
            "exitFrame" => {
                self.depth = self.depth.saturating_sub(1);
                Ok(None)
            }
            "checkFrame" => {
                if self.depth > self.config.max_stack_depth {
                    return Err(Abort::OutOfStack.into());
                }
                Ok(None)
            }
            "restoreFrame" => {
                let saved = arg_int(args, 0)?;
                self.depth = u32::try_from(saved)
                    .map_err(|_| invariant(format!("negative saved depth {saved}")))?;
                Ok(None)
            }
            "wrapAsThrowable" => match arg_ref(args, 0)? {
                // A null throw reaches athrow as null and raises there.
                None => Ok(Some(Value::NULL)),
                Some(exception) => Ok(Some(Value::Ref(Some(self.wrap_throwable(exception)?)))),
            },
            "unwrapThrowable" => match arg_ref(args, 0)? {
                None => Ok(Some(Value::NULL)),
                Some(wrapper) => {
                    let object = self.heap.get(wrapper);
                    let slot = object
                        .class
                        .field_slot(&exception_wrapper_name(SHADOW_THROWABLE), UNDERLYING_FIELD)
                        .ok_or_else(|| {
                            invariant(format!("{} is not an exception wrapper", object.class.name))
                        })?;
                    match &object.body {
                        ObjectBody::Fields(values) => Ok(values.get(slot).copied()),
                        _ => Err(invariant("exception wrapper without fields")),
                    }
                }
            },
            other => Err(invariant(format!("unknown helper {other}"))),
        }
    }

    // =========================================================================
    // Object
    // =========================================================================

    fn object_native(&mut self, name: &str, args: &[Value]) -> NativeResult {
        let receiver = arg_ref(args, 0)?.ok_or_else(|| invariant("native call without receiver"))?;
        match name {
            "hashCode" => Ok(Some(Value::Int(self.heap.get(receiver).identity_hash))),
            "equals" => {
                let other = arg_ref(args, 1)?;
                Ok(Some(Value::Int(i32::from(other == Some(receiver)))))
            }
            other => Err(invariant(format!("unknown object native {other}"))),
        }
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    fn storage(&mut self, array: ObjectRef) -> Result<&mut ArrayStorage, Unwind> {
        self.ensure_loaded(array)?;
        match &mut self.heap.get_mut(array).body {
            ObjectBody::Array(storage) => Ok(storage),
            _ => Err(invariant("array operation on a non-array object")),
        }
    }

    fn array_native(&mut self, name: &str, args: &[Value]) -> NativeResult {
        match name {
            "chargeEnergy" => {
                let amount = arg_long(args, 0)?;
                let amount = u64::try_from(amount)
                    .map_err(|_| invariant(format!("negative array charge {amount}")))?;
                self.stats.array_charges += 1;
                self.energy.charge(amount)?;
                Ok(None)
            }
            "length" => {
                let array = arg_ref(args, 0)?.ok_or_else(|| invariant("length without receiver"))?;
                let len = self.storage(array)?.len();
                Ok(Some(Value::Int(len as i32)))
            }
            "copyBacking" => {
                let array = arg_ref(args, 0)?.ok_or_else(|| invariant("copy without receiver"))?;
                let copy = self.storage(array)?.clone();
                let class = self.classes.load(BACKING_CLASS)?;
                let hash = self.next_identity_hash();
                let backing = self
                    .heap
                    .allocate(HeapObject::new(class, hash, ObjectBody::Backing(copy)));
                Ok(Some(Value::Ref(Some(backing))))
            }
            other => Err(invariant(format!("unknown array native {other}"))),
        }
    }

    fn storage_native(
        &mut self,
        kind: ArrayKind,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> NativeResult {
        let array = arg_ref(args, 0)?.ok_or_else(|| invariant("array native without receiver"))?;
        match (name, descriptor) {
            ("<init>", "(I)V") => {
                let length = arg_int(args, 1)?;
                let Ok(length) = usize::try_from(length) else {
                    return Err(self.host_exception(NEGATIVE_ARRAY_SIZE_EXCEPTION));
                };
                // The factory charges for the elements right after this
                // returns; refuse allocations that charge cannot cover.
                self.energy
                    .ensure_available((length as u64).saturating_mul(element_width(kind)))?;
                self.heap.get_mut(array).body = ObjectBody::Array(ArrayStorage::new(kind, length));
                Ok(None)
            }
            ("<init>", "()V") => {
                self.heap.get_mut(array).body = ObjectBody::Array(ArrayStorage::new(kind, 0));
                Ok(None)
            }
            ("<init>", _) if descriptor.contains(BACKING_CLASS) => {
                let source = arg_ref(args, 1)?;
                let source = source.ok_or_else(|| self.host_exception(NULL_POINTER_EXCEPTION))?;
                let storage = match &self.heap.get(source).body {
                    ObjectBody::Backing(storage) if storage.kind() == kind => storage.clone(),
                    _ => return Err(invariant("array constructed from a foreign backing")),
                };
                self.heap.get_mut(array).body = ObjectBody::Array(storage);
                Ok(None)
            }
            ("<init>", _) => {
                // Deserializing constructor: the object stands for stored
                // instance `id` and is filled in on first access.
                let id = arg_long(args, 2)?;
                let id = u64::try_from(id).map_err(|_| invariant(format!("bad instance id {id}")))?;
                self.heap.get_mut(array).body = ObjectBody::Unloaded;
                self.heap.assign_instance(array, id);
                Ok(None)
            }
            ("get", _) => {
                let index = arg_int(args, 1)?;
                let storage = self.storage(array)?;
                match usize::try_from(index).ok().and_then(|i| storage.get(i)) {
                    Some(value) => Ok(Some(value)),
                    None => Err(self.host_exception(ARRAY_INDEX_EXCEPTION)),
                }
            }
            ("set", _) => {
                let index = arg_int(args, 1)?;
                let value = *args.get(2).ok_or_else(|| invariant("set without value"))?;
                let Ok(index) = usize::try_from(index) else {
                    return Err(self.host_exception(ARRAY_INDEX_EXCEPTION));
                };
                match self.storage(array)?.set(index, value) {
                    Ok(()) => Ok(None),
                    Err(ArrayAccess::OutOfBounds) => Err(self.host_exception(ARRAY_INDEX_EXCEPTION)),
                    Err(ArrayAccess::TypeMismatch) => {
                        Err(invariant(format!("array store of {value:?} into {kind:?} storage")))
                    }
                }
            }
            _ => Err(invariant(format!("unknown storage native {name}{descriptor}"))),
        }
    }

    // =========================================================================
    // Contract API
    // =========================================================================

    fn byte_array(&mut self, bytes: &[u8]) -> Result<ObjectRef, Unwind> {
        self.energy
            .charge_bytes(bytes.len() as u64, self.config.energy.heap_byte_cost)?;
        let class = self.classes.load(BYTE_ARRAY_WRAPPER)?;
        let storage = ArrayStorage::Byte(bytes.iter().map(|b| *b as i8).collect());
        let hash = self.next_identity_hash();
        self.stats.objects_created += 1;
        Ok(self
            .heap
            .allocate(HeapObject::new(class, hash, ObjectBody::Array(storage))))
    }

    fn blockchain_native(&mut self, name: &str, _args: &[Value]) -> NativeResult {
        match name {
            "getData" => {
                let data = self.context.data.clone();
                Ok(Some(Value::Ref(Some(self.byte_array(&data)?))))
            }
            "getSender" => {
                let sender = self.context.sender;
                Ok(Some(Value::Ref(Some(self.byte_array(sender.as_bytes())?))))
            }
            "getAddress" => {
                let address = self.graph.address();
                Ok(Some(Value::Ref(Some(self.byte_array(address.as_bytes())?))))
            }
            "getRemainingEnergy" => Ok(Some(Value::Long(
                i64::try_from(self.energy.remaining()).unwrap_or(i64::MAX),
            ))),
            "revert" => {
                tracing::debug!("contract requested revert");
                Err(Abort::Revert.into())
            }
            other => Err(invariant(format!("unknown blockchain native {other}"))),
        }
    }
}
