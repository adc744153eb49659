#![allow(dead_code)]
//! Shared builders for engine integration tests.
//!
//! Programs are assembled directly in the class-file IR, the way a compiler
//! front end would emit them.

use avm_sandbox_core::{InMemoryKernel, SandboxConfig, SandboxEngine, TransactionResult};
use avm_types::{
    Address, ClassFile, CodeBuilder, ContractPackage, Instruction, InvokeKind, MemberRef,
    MethodDecl, TransactionContext,
};

pub const SENDER: Address = Address([0x11; 32]);
pub const ENERGY: u64 = 5_000_000;
pub const OBJECT: &str = "java/lang/Object";

/// `<init>()V` that only chains to the superclass constructor.
pub fn default_constructor(super_name: &str) -> MethodDecl {
    MethodDecl::new("<init>", "()V").with_max_locals(1).with_code(
        vec![
            Instruction::ALoad(0),
            Instruction::Invoke(InvokeKind::Special, MemberRef::new(super_name, "<init>", "()V")),
            Instruction::Return,
        ],
        vec![],
    )
}

/// A plain class extending `java/lang/Object` with a default constructor.
pub fn plain_class(name: &str) -> ClassFile {
    ClassFile::new(name, Some(OBJECT)).with_method(default_constructor(OBJECT))
}

/// Static method assembled from `build`.
pub fn static_method(
    name: &str,
    descriptor: &str,
    max_locals: u16,
    build: impl FnOnce(&mut CodeBuilder),
) -> MethodDecl {
    let mut b = CodeBuilder::new();
    build(&mut b);
    let (code, handlers) = b.finish().expect("labels bound");
    MethodDecl::new(name, descriptor)
        .with_static()
        .with_max_locals(max_locals)
        .with_code(code, handlers)
}

pub fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::invoke_static(owner, name, descriptor)
}

pub fn field(owner: &str, name: &str, descriptor: &str) -> MemberRef {
    MemberRef::new(owner, name, descriptor)
}

pub fn package(entry: &str, classes: &[ClassFile]) -> Vec<u8> {
    classes
        .iter()
        .try_fold(ContractPackage::new(entry), |p, c| p.with_class(c))
        .and_then(|p| p.encode())
        .expect("package encodes")
}

pub fn engine(config: SandboxConfig) -> SandboxEngine {
    SandboxEngine::new(config).expect("valid config")
}

pub fn deploy(engine: &SandboxEngine, store: &mut InMemoryKernel, code: Vec<u8>) -> Address {
    let result = engine.run(store, &TransactionContext::create(SENDER, code, ENERGY));
    assert!(result.is_success(), "deploy failed: {:?} {:?}", result.status, result.error);
    Address::from_bytes(&result.return_data).expect("address returned")
}

pub fn call(
    engine: &SandboxEngine,
    store: &mut InMemoryKernel,
    target: Address,
    data: Vec<u8>,
    energy_limit: u64,
) -> TransactionResult {
    engine.run(store, &TransactionContext::call(SENDER, target, data, energy_limit))
}

pub fn int_result(result: &TransactionResult) -> i32 {
    assert!(result.is_success(), "call failed: {:?} {:?}", result.status, result.error);
    let bytes: [u8; 4] = result.return_data.as_slice().try_into().expect("int return");
    i32::from_be_bytes(bytes)
}
