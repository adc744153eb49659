//! Interpreter over an explicit frame stack.
//!
//! Calls push a [`Frame`] and return to the dispatch loop instead of
//! recursing on the host stack, so sandboxed call depth is bounded only by
//! the instrumented frame counter and the energy limit.
//!
//! ```text
//! invoke      -> push frame, caller pc unchanged until the callee returns
//! return      -> pop frame, push value to caller, caller pc + 1
//! <clinit>    -> pushed in front of the triggering instruction, which is
//!                re-executed once the initializer returns
//! throw       -> search handlers frame by frame, popping as it goes
//! ```

use super::energy::EnergyMeter;
use super::heap::{Heap, HeapObject, ObjectBody, ObjectRef, Value};
use super::loader::{ClassTable, LoadedClass};
use super::shadow::{
    ARITHMETIC_EXCEPTION, CLASS_CAST_EXCEPTION, NULL_POINTER_EXCEPTION,
};
use super::{invariant, Abort, ExecutionStats, Unwind};
use crate::config::SandboxConfig;
use crate::persistence::{NodeRef, ObjectGraph, SerializedRepresentation, MAX_CONSTANT_HASH};
use crate::pipeline::{exception_wrapper_name, UNDERLYING_FIELD};
use avm_types::{
    Instruction, InvokeKind, Label, MemberRef, MethodDescriptor, TransactionContext,
    SHADOW_THROWABLE,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Host frames allowed per instrumented frame, to cover uninstrumented
/// library and wrapper code running between instrumented calls.
const HOST_FRAMES_PER_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Class initializers run on first use; statics start at zero.
    Deploy,
    /// Statics are restored from storage; initializers never run.
    Call,
}

/// Fixed inputs of one invocation.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub config: &'a SandboxConfig,
    pub context: &'a TransactionContext,
    pub mode: ExecutionMode,
    /// Contract class names, sorted; the order statics are persisted in.
    pub user_classes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Call,
    /// A class initializer pushed ahead of the instruction that needed it.
    Initializer,
}

#[derive(Debug)]
struct Frame {
    class: Arc<LoadedClass>,
    method: usize,
    pc: usize,
    locals: Vec<Value>,
    stack: Vec<Value>,
    kind: FrameKind,
}

enum Flow {
    Next,
    Jump(Label),
    /// A frame was pushed; leave the pc alone.
    Stay,
    Return(Option<Value>),
}

pub struct Interpreter<'a> {
    pub(super) classes: ClassTable<'a>,
    pub(super) heap: Heap,
    pub(super) energy: EnergyMeter,
    pub(super) graph: ObjectGraph<'a>,
    pub(super) config: &'a SandboxConfig,
    pub(super) context: &'a TransactionContext,
    pub(super) mode: ExecutionMode,
    pub(super) user_classes: Vec<String>,
    pub(super) statics: BTreeMap<String, Vec<Value>>,
    pub(super) depth: u32,
    pub(super) next_hash: i32,
    pub(super) stats: ExecutionStats,
    pub(super) loaded_root: Option<SerializedRepresentation>,
    /// Constant and class objects, which are stored by node rather than
    /// as instances. One heap object per node.
    pub(super) shared: HashMap<NodeRef, ObjectRef>,
    pub(super) shared_nodes: HashMap<ObjectRef, NodeRef>,
    initialized: HashSet<String>,
    frames: Vec<Frame>,
}

impl std::fmt::Debug for Interpreter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("mode", &self.mode)
            .field("frames", &self.frames.len())
            .field("depth", &self.depth)
            .field("heap", &self.heap.len())
            .field("energy", &self.energy)
            .finish()
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(
        invocation: Invocation<'a>,
        classes: ClassTable<'a>,
        graph: ObjectGraph<'a>,
        energy: EnergyMeter,
    ) -> Self {
        Self {
            classes,
            heap: Heap::new(),
            energy,
            graph,
            config: invocation.config,
            context: invocation.context,
            mode: invocation.mode,
            user_classes: invocation.user_classes,
            statics: BTreeMap::new(),
            depth: 0,
            next_hash: MAX_CONSTANT_HASH + 1,
            stats: ExecutionStats::default(),
            loaded_root: None,
            shared: HashMap::new(),
            shared_nodes: HashMap::new(),
            initialized: HashSet::new(),
            frames: Vec::new(),
        }
    }

    pub fn energy(&self) -> &EnergyMeter {
        &self.energy
    }

    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            classes_loaded: self.classes.loaded_count(),
            ..self.stats.clone()
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Run the initializers of `class_name` and its superclasses.
    pub fn initialize(&mut self, class_name: &str) -> Result<(), Unwind> {
        let class = self.classes.load(class_name)?;
        let base = self.frames.len();
        while self.ensure_initialized(&class)? {
            self.run_until(base)?;
        }
        Ok(())
    }

    /// Invoke static method `name` + `descriptor` declared by `class_name`.
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Unwind> {
        let class = self.classes.load(class_name)?;
        let index = class
            .file
            .method_index(name, descriptor)
            .filter(|&i| class.file.methods[i].flags.is_static)
            .ok_or_else(|| invariant(format!("no static {name}{descriptor} in {class_name}")))?;
        let base = self.frames.len();
        self.push_frame(class, index, args, FrameKind::Call)?;
        self.run_until(base)
    }

    /// Encode an entry-method result as return data.
    pub fn return_bytes(&mut self, value: Option<Value>) -> Result<Vec<u8>, Unwind> {
        match value {
            None | Some(Value::Ref(None)) => Ok(Vec::new()),
            Some(Value::Int(v)) => Ok(v.to_be_bytes().to_vec()),
            Some(Value::Long(v)) => Ok(v.to_be_bytes().to_vec()),
            Some(Value::Ref(Some(r))) => {
                self.ensure_loaded(r)?;
                match &self.heap.get(r).body {
                    ObjectBody::Array(super::heap::ArrayStorage::Byte(bytes)) => {
                        Ok(bytes.iter().map(|b| *b as u8).collect())
                    }
                    _ => Err(invariant(format!(
                        "cannot return an instance of {}",
                        self.heap.get(r).class.name
                    ))),
                }
            }
        }
    }

    /// Class name of an object, for diagnostics.
    pub fn class_of(&self, handle: ObjectRef) -> &str {
        &self.heap.get(handle).class.name
    }

    /// The shadow exception inside a thrown wrapper.
    pub fn unwrap_exception(&self, wrapper: ObjectRef) -> Option<ObjectRef> {
        let object = self.heap.get(wrapper);
        let slot = object
            .class
            .field_slot(&exception_wrapper_name(SHADOW_THROWABLE), UNDERLYING_FIELD)?;
        match &object.body {
            ObjectBody::Fields(values) => match values.get(slot) {
                Some(Value::Ref(r)) => *r,
                _ => None,
            },
            _ => None,
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    fn frame_limit(&self) -> usize {
        (self.config.max_stack_depth as usize + 1) * HOST_FRAMES_PER_DEPTH
    }

    fn push_frame(
        &mut self,
        class: Arc<LoadedClass>,
        method: usize,
        mut locals: Vec<Value>,
        kind: FrameKind,
    ) -> Result<(), Unwind> {
        let decl = class
            .method(method)
            .ok_or_else(|| invariant(format!("method index {method} out of range in {}", class.name)))?;
        if !decl.has_body() {
            return Err(invariant(format!(
                "{}.{}{} has no body",
                class.name, decl.name, decl.descriptor
            )));
        }
        if self.frames.len() >= self.frame_limit() {
            return Err(Abort::OutOfStack.into());
        }
        let max_locals = usize::from(decl.max_locals).max(locals.len());
        locals.resize(max_locals, Value::Int(0));
        self.frames.push(Frame {
            class,
            method,
            pc: 0,
            locals,
            stack: Vec::new(),
            kind,
        });
        Ok(())
    }

    fn current(&mut self) -> Result<&mut Frame, Unwind> {
        self.frames
            .last_mut()
            .ok_or_else(|| invariant("empty frame stack"))
    }

    fn run_until(&mut self, base: usize) -> Result<Option<Value>, Unwind> {
        loop {
            let (class, method, pc) = {
                let frame = self.current()?;
                (Arc::clone(&frame.class), frame.method, frame.pc)
            };
            let instruction = class.file.methods[method].code.get(pc).ok_or_else(|| {
                invariant(format!(
                    "fell off the end of {}.{}",
                    class.name, class.file.methods[method].name
                ))
            })?;
            self.stats.instructions += 1;

            match self.step(instruction) {
                Ok(Flow::Next) => self.current()?.pc += 1,
                Ok(Flow::Jump(target)) => self.current()?.pc = target as usize,
                Ok(Flow::Stay) => {}
                Ok(Flow::Return(value)) => {
                    let finished = self
                        .frames
                        .pop()
                        .ok_or_else(|| invariant("return without a frame"))?;
                    if self.frames.len() <= base {
                        return Ok(value);
                    }
                    if finished.kind == FrameKind::Call {
                        let caller = self.current()?;
                        if let Some(value) = value {
                            caller.stack.push(value);
                        }
                        caller.pc += 1;
                    }
                }
                Err(Unwind::Throw(exception)) => self.dispatch_exception(exception, base)?,
                Err(Unwind::Abort(abort)) => {
                    self.frames.truncate(base);
                    return Err(abort.into());
                }
            }
        }
    }

    /// Transfer control to the nearest matching handler, or unwind past
    /// `base` and rethrow.
    fn dispatch_exception(&mut self, exception: ObjectRef, base: usize) -> Result<(), Unwind> {
        let thrown = Arc::clone(&self.heap.get(exception).class);
        while self.frames.len() > base {
            let frame = self.current()?;
            let pc = frame.pc as Label;
            let handler = frame.class.file.methods[frame.method]
                .handlers
                .iter()
                .find(|h| {
                    h.start <= pc
                        && pc < h.end
                        && h.catch_type
                            .as_deref()
                            .map_or(true, |t| thrown.is_subtype_of(t))
                })
                .map(|h| h.handler);
            if let Some(target) = handler {
                frame.stack.clear();
                frame.stack.push(Value::Ref(Some(exception)));
                frame.pc = target as usize;
                tracing::trace!(exception = %thrown.name, target, "exception caught");
                return Ok(());
            }
            self.frames.pop();
        }
        Err(Unwind::Throw(exception))
    }

    // =========================================================================
    // Operand stack
    // =========================================================================

    pub(super) fn push(&mut self, value: Value) -> Result<(), Unwind> {
        self.current()?.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Unwind> {
        self.current()?
            .stack
            .pop()
            .ok_or_else(|| invariant("operand stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i32, Unwind> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(invariant(format!("expected int, found {other:?}"))),
        }
    }

    fn pop_long(&mut self) -> Result<i64, Unwind> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            other => Err(invariant(format!("expected long, found {other:?}"))),
        }
    }

    fn pop_ref(&mut self) -> Result<Option<ObjectRef>, Unwind> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            other => Err(invariant(format!("expected reference, found {other:?}"))),
        }
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Unwind> {
        let frame = self.current()?;
        let split = frame
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| invariant("operand stack underflow"))?;
        Ok(frame.stack.split_off(split))
    }

    fn peek(&mut self, depth: usize) -> Result<Value, Unwind> {
        let frame = self.current()?;
        let len = frame.stack.len();
        len.checked_sub(depth + 1)
            .and_then(|i| frame.stack.get(i).copied())
            .ok_or_else(|| invariant("operand stack underflow"))
    }

    fn local(&mut self, index: u16) -> Result<Value, Unwind> {
        self.current()?
            .locals
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| invariant(format!("local {index} out of range")))
    }

    fn set_local(&mut self, index: u16, value: Value) -> Result<(), Unwind> {
        let slot = self
            .current()?
            .locals
            .get_mut(usize::from(index))
            .ok_or_else(|| invariant(format!("local {index} out of range")))?;
        *slot = value;
        Ok(())
    }

    // =========================================================================
    // Objects
    // =========================================================================

    pub(super) fn next_identity_hash(&mut self) -> i32 {
        let hash = self.next_hash;
        self.next_hash = match self.next_hash.checked_add(1) {
            Some(next) => next,
            None => MAX_CONSTANT_HASH + 1,
        };
        hash
    }

    /// Allocate an instance of `class` with zeroed fields; no constructor runs.
    pub(super) fn allocate_instance(&mut self, class: Arc<LoadedClass>) -> Result<ObjectRef, Unwind> {
        if !class.is_instantiable() {
            return Err(invariant(format!("cannot instantiate {}", class.name)));
        }
        let fields = class
            .instance_fields
            .iter()
            .map(|f| Value::default_for(&f.ty))
            .collect();
        let hash = self.next_identity_hash();
        self.stats.objects_created += 1;
        Ok(self
            .heap
            .allocate(HeapObject::new(class, hash, ObjectBody::Fields(fields))))
    }

    /// Allocate a shadow exception of `class_name` and return the wrapper to
    /// throw. Host-detected faults surface to contract code this way.
    pub(super) fn host_exception(&mut self, class_name: &str) -> Unwind {
        let thrown = self
            .classes
            .load(class_name)
            .and_then(|class| self.allocate_instance(class))
            .and_then(|exception| self.wrap_throwable(exception));
        match thrown {
            Ok(wrapper) => {
                tracing::trace!(exception = class_name, "host exception raised");
                Unwind::Throw(wrapper)
            }
            Err(e) => e,
        }
    }

    pub(super) fn wrap_throwable(&mut self, exception: ObjectRef) -> Result<ObjectRef, Unwind> {
        let wrapped = self.heap.get(exception).class.name.clone();
        let class = self.classes.load(&exception_wrapper_name(&wrapped))?;
        let slot = class
            .field_slot(&exception_wrapper_name(SHADOW_THROWABLE), UNDERLYING_FIELD)
            .ok_or_else(|| invariant(format!("{wrapped} is not throwable")))?;
        let wrapper = self.allocate_instance(class)?;
        if let ObjectBody::Fields(values) = &mut self.heap.get_mut(wrapper).body {
            values[slot] = Value::Ref(Some(exception));
        }
        Ok(wrapper)
    }

    fn null_check(&mut self, value: Option<ObjectRef>) -> Result<ObjectRef, Unwind> {
        value.ok_or_else(|| self.host_exception(NULL_POINTER_EXCEPTION))
    }

    fn field_slot(&self, object: ObjectRef, field: &MemberRef) -> Result<usize, Unwind> {
        let class = &self.heap.get(object).class;
        class
            .field_slot(&field.owner, &field.name)
            .ok_or_else(|| invariant(format!("no field {} in {}", field, class.name)))
    }

    /// Find the class declaring static `field`, searching superclasses.
    fn static_owner(&mut self, field: &MemberRef) -> Result<(Arc<LoadedClass>, usize), Unwind> {
        let mut cursor = self.classes.load(&field.owner)?;
        loop {
            if let Some(index) = cursor.static_index(&field.name) {
                return Ok((cursor, index));
            }
            cursor = match &cursor.file.super_name {
                Some(parent) => self.classes.load(parent)?,
                None => return Err(invariant(format!("no static field {field}"))),
            };
        }
    }

    pub(super) fn statics_of(&mut self, class: &LoadedClass) -> &mut Vec<Value> {
        self.statics.entry(class.name.clone()).or_insert_with(|| {
            class
                .static_fields
                .iter()
                .map(|f| Value::default_for(&f.ty))
                .collect()
        })
    }

    /// Ensure `class` (and its superclasses) are initialized. Returns true
    /// when an initializer frame was pushed and the caller must yield.
    fn ensure_initialized(&mut self, class: &Arc<LoadedClass>) -> Result<bool, Unwind> {
        if self.mode != ExecutionMode::Deploy || !class.user || self.initialized.contains(&class.name) {
            return Ok(false);
        }
        if let Some(parent) = &class.file.super_name {
            let parent = self.classes.load(parent)?;
            if self.ensure_initialized(&parent)? {
                return Ok(true);
            }
        }
        self.initialized.insert(class.name.clone());
        self.statics_of(class);
        match class.file.method_index("<clinit>", "()V") {
            Some(index) => {
                tracing::trace!(class = %class.name, "running class initializer");
                self.push_frame(Arc::clone(class), index, Vec::new(), FrameKind::Initializer)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn step(&mut self, instruction: &Instruction) -> Result<Flow, Unwind> {
        use Instruction as I;
        match instruction {
            I::Nop => {}
            I::IConst(v) => self.push(Value::Int(*v))?,
            I::LConst(v) => self.push(Value::Long(*v))?,
            I::AConstNull => self.push(Value::NULL)?,
            I::ILoad(n) | I::LLoad(n) | I::ALoad(n) => {
                let value = self.local(*n)?;
                self.push(value)?;
            }
            I::IStore(n) | I::LStore(n) | I::AStore(n) => {
                let value = self.pop()?;
                self.set_local(*n, value)?;
            }
            I::IInc(n, delta) => match self.local(*n)? {
                Value::Int(v) => self.set_local(*n, Value::Int(v.wrapping_add(*delta)))?,
                other => return Err(invariant(format!("iinc on {other:?}"))),
            },
            I::Pop => {
                self.pop()?;
            }
            I::Dup => {
                let top = self.peek(0)?;
                self.push(top)?;
            }
            I::Swap => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }
            I::IAdd | I::ISub | I::IMul | I::IDiv | I::IRem => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                let result = match instruction {
                    I::IAdd => a.wrapping_add(b),
                    I::ISub => a.wrapping_sub(b),
                    I::IMul => a.wrapping_mul(b),
                    _ if b == 0 => return Err(self.host_exception(ARITHMETIC_EXCEPTION)),
                    I::IDiv => a.wrapping_div(b),
                    _ => a.wrapping_rem(b),
                };
                self.push(Value::Int(result))?;
            }
            I::INeg => {
                let v = self.pop_int()?;
                self.push(Value::Int(v.wrapping_neg()))?;
            }
            I::LAdd | I::LSub | I::LMul | I::LDiv | I::LRem => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                let result = match instruction {
                    I::LAdd => a.wrapping_add(b),
                    I::LSub => a.wrapping_sub(b),
                    I::LMul => a.wrapping_mul(b),
                    _ if b == 0 => return Err(self.host_exception(ARITHMETIC_EXCEPTION)),
                    I::LDiv => a.wrapping_div(b),
                    _ => a.wrapping_rem(b),
                };
                self.push(Value::Long(result))?;
            }
            I::I2L => {
                let v = self.pop_int()?;
                self.push(Value::Long(i64::from(v)))?;
            }
            I::L2I => {
                let v = self.pop_long()?;
                self.push(Value::Int(v as i32))?;
            }
            I::LCmp => {
                let b = self.pop_long()?;
                let a = self.pop_long()?;
                self.push(Value::Int(a.cmp(&b) as i32))?;
            }
            I::IfZero(cond, target) => {
                let v = self.pop_int()?;
                if cond.test(v.cmp(&0)) {
                    return Ok(Flow::Jump(*target));
                }
            }
            I::IfICmp(cond, target) => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                if cond.test(a.cmp(&b)) {
                    return Ok(Flow::Jump(*target));
                }
            }
            I::IfNull(target) => {
                if self.pop_ref()?.is_none() {
                    return Ok(Flow::Jump(*target));
                }
            }
            I::IfNonNull(target) => {
                if self.pop_ref()?.is_some() {
                    return Ok(Flow::Jump(*target));
                }
            }
            I::Goto(target) => return Ok(Flow::Jump(*target)),
            I::New(class_name) => {
                let class = self.classes.load(class_name)?;
                if self.ensure_initialized(&class)? {
                    return Ok(Flow::Stay);
                }
                let object = self.allocate_instance(class)?;
                self.push(Value::Ref(Some(object)))?;
            }
            I::NewArray(_)
            | I::ANewArray(_)
            | I::MultiANewArray(..)
            | I::ArrayLength
            | I::ArrayLoad(_)
            | I::ArrayStore(_) => {
                return Err(invariant(format!("untransformed array instruction {instruction:?}")))
            }
            I::GetField(field) => {
                let popped = self.pop_ref()?;
                let object = self.null_check(popped)?;
                self.ensure_loaded(object)?;
                let slot = self.field_slot(object, field)?;
                let value = match &self.heap.get(object).body {
                    ObjectBody::Fields(values) => values.get(slot).copied(),
                    _ => None,
                }
                .ok_or_else(|| invariant(format!("getfield {field} on non-instance")))?;
                self.push(value)?;
            }
            I::PutField(field) => {
                let value = self.pop()?;
                let popped = self.pop_ref()?;
                let object = self.null_check(popped)?;
                self.ensure_loaded(object)?;
                let slot = self.field_slot(object, field)?;
                let heap_object = self.heap.get_mut(object);
                let ty = heap_object.class.instance_fields[slot].ty.clone();
                match &mut heap_object.body {
                    ObjectBody::Fields(values) => values[slot] = value.narrow(&ty),
                    _ => return Err(invariant(format!("putfield {field} on non-instance"))),
                }
            }
            I::GetStatic(field) => {
                let (owner, index) = self.static_owner(field)?;
                if self.ensure_initialized(&owner)? {
                    return Ok(Flow::Stay);
                }
                let value = self.statics_of(&owner)[index];
                self.push(value)?;
            }
            I::PutStatic(field) => {
                let (owner, index) = self.static_owner(field)?;
                if self.ensure_initialized(&owner)? {
                    return Ok(Flow::Stay);
                }
                let value = self.pop()?.narrow(&owner.static_fields[index].ty);
                self.statics_of(&owner)[index] = value;
            }
            I::Invoke(kind, method) => return self.invoke(*kind, method),
            I::CheckCast(class_name) => {
                if let Value::Ref(Some(object)) = self.peek(0)? {
                    if !self.heap.get(object).class.is_subtype_of(class_name) {
                        return Err(self.host_exception(CLASS_CAST_EXCEPTION));
                    }
                }
            }
            I::InstanceOf(class_name) => {
                let result = match self.pop_ref()? {
                    Some(object) => self.heap.get(object).class.is_subtype_of(class_name),
                    None => false,
                };
                self.push(Value::Int(i32::from(result)))?;
            }
            I::AThrow => {
                let popped = self.pop_ref()?;
                let thrown = self.null_check(popped)?;
                return Err(Unwind::Throw(thrown));
            }
            I::Return => return Ok(Flow::Return(None)),
            I::IReturn | I::LReturn | I::AReturn => {
                let value = self.pop()?;
                return Ok(Flow::Return(Some(value)));
            }
        }
        Ok(Flow::Next)
    }

    fn invoke(&mut self, kind: InvokeKind, method: &MemberRef) -> Result<Flow, Unwind> {
        let descriptor = MethodDescriptor::parse(&method.descriptor)
            .map_err(|e| invariant(format!("call to {method}: {e}")))?;
        let argc = descriptor.params.len();

        let resolved = match kind {
            InvokeKind::Static => {
                let resolved =
                    self.classes
                        .resolve_method(&method.owner, &method.name, &method.descriptor)?;
                if let Some((class, _)) = &resolved {
                    if self.ensure_initialized(class)? {
                        return Ok(Flow::Stay);
                    }
                }
                resolved
            }
            InvokeKind::Special => {
                let receiver = match self.peek(argc)? {
                    Value::Ref(r) => r,
                    other => return Err(invariant(format!("receiver {other:?} for {method}"))),
                };
                self.null_check(receiver)?;
                self.classes
                    .resolve_method(&method.owner, &method.name, &method.descriptor)?
            }
            InvokeKind::Virtual | InvokeKind::Interface | InvokeKind::Dynamic => {
                let receiver = match self.peek(argc)? {
                    Value::Ref(r) => r,
                    other => return Err(invariant(format!("receiver {other:?} for {method}"))),
                };
                let receiver = self.null_check(receiver)?;
                let class = Arc::clone(&self.heap.get(receiver).class);
                self.classes
                    .resolve_virtual(&class, &method.name, &method.descriptor)?
            }
        };
        let (class, index) =
            resolved.ok_or_else(|| invariant(format!("unresolved call to {method}")))?;

        let args = self.pop_n(argc + usize::from(kind.has_receiver()))?;
        if class.file.methods[index].flags.is_native {
            if let Some(result) = self.call_native(&class, index, args)? {
                self.push(result)?;
            }
            return Ok(Flow::Next);
        }
        self.push_frame(class, index, args, FrameKind::Call)?;
        Ok(Flow::Stay)
    }
}
