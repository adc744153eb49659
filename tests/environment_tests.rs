//! SandboxEnvironment Integration Tests
//!
//! Drives whole contract lifecycles through the in-memory environment:
//! deployment, repeated calls against persisted state, reverts and limits.
//!
//! Run with:
//!   cargo test --test environment_tests -- --nocapture

use avm_sandbox::avm_sandbox_core::SandboxConfig;
use avm_sandbox::avm_types::{
    Address, ArrayKind, ClassFile, CodeBuilder, Condition, ContractPackage, Instruction, InvokeKind,
    MemberRef, MethodDecl, ResultCode,
};
use avm_sandbox::SandboxEnvironment;

// =============================================================================
// Helper Functions
// =============================================================================

const OBJECT: &str = "java/lang/Object";
const BLOCKCHAIN: &str = "avm/api/Blockchain";

fn class(name: &str) -> ClassFile {
    ClassFile::new(name, Some(OBJECT)).with_method(
        MethodDecl::new("<init>", "()V").with_max_locals(1).with_code(
            vec![
                Instruction::ALoad(0),
                Instruction::invoke(InvokeKind::Special, OBJECT, "<init>", "()V"),
                Instruction::Return,
            ],
            vec![],
        ),
    )
}

fn static_method(name: &str, descriptor: &str, max_locals: u16, build: impl FnOnce(&mut CodeBuilder)) -> MethodDecl {
    let mut b = CodeBuilder::new();
    build(&mut b);
    let (code, handlers) = b.finish().expect("labels bound");
    MethodDecl::new(name, descriptor)
        .with_static()
        .with_max_locals(max_locals)
        .with_code(code, handlers)
}

/// Ledger keeping a running total: each call adds the first byte of the call
/// data; a zero byte reverts; empty data just reads the total.
fn ledger() -> ContractPackage {
    let total = MemberRef::new("com/Ledger", "total", "J");
    let main = class("com/Ledger")
        .with_field("total", "J", true)
        .with_method(static_method("main", "()J", 1, |b| {
            let (read, add) = (b.new_label(), b.new_label());
            b.emit_all([
                Instruction::invoke_static(BLOCKCHAIN, "getData", "()[B"),
                Instruction::AStore(0),
                Instruction::ALoad(0),
                Instruction::ArrayLength,
            ]);
            b.branch(|t| Instruction::IfZero(Condition::Eq, t), read);
            b.emit_all([
                Instruction::ALoad(0),
                Instruction::IConst(0),
                Instruction::ArrayLoad(ArrayKind::Byte),
            ]);
            b.branch(|t| Instruction::IfZero(Condition::Ne, t), add);
            b.emit(Instruction::invoke_static(BLOCKCHAIN, "revert", "()V"));
            b.bind(add);
            b.emit_all([
                Instruction::GetStatic(total.clone()),
                Instruction::ALoad(0),
                Instruction::IConst(0),
                Instruction::ArrayLoad(ArrayKind::Byte),
                Instruction::I2L,
                Instruction::LAdd,
                Instruction::PutStatic(total.clone()),
            ]);
            b.bind(read);
            b.emit_all([Instruction::GetStatic(total.clone()), Instruction::LReturn]);
        }));
    ContractPackage::new("com/Ledger")
        .with_class(&main)
        .expect("class encodes")
}

fn long_result(data: &[u8]) -> i64 {
    i64::from_be_bytes(data.try_into().expect("long return"))
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_ledger_accumulates_across_calls() {
    let mut env = SandboxEnvironment::new().expect("create env");
    let ledger = env.deploy_ok(&ledger()).expect("deploy ledger");

    for (amount, expected) in [(5u8, 5i64), (7, 12), (100, 112)] {
        let result = env.call(ledger, vec![amount]);
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(long_result(&result.return_data), expected);
    }

    let read = env.call(ledger, vec![]);
    assert_eq!(long_result(&read.return_data), 112);
}

#[test]
fn test_reverted_call_keeps_previous_total() {
    let mut env = SandboxEnvironment::new().expect("create env");
    let ledger = env.deploy_ok(&ledger()).expect("deploy ledger");
    env.call(ledger, vec![9]);

    let before = env.store().clone();
    let reverted = env.call(ledger, vec![0]);
    assert_eq!(reverted.status, ResultCode::Reverted);
    assert_eq!(env.store(), &before);
    assert_eq!(long_result(&env.call(ledger, vec![]).return_data), 9);
}

#[test]
fn test_each_deployment_gets_its_own_namespace() {
    let mut env = SandboxEnvironment::new().expect("create env");
    let first = env.deploy_ok(&ledger()).expect("first deploy");
    let second = env.deploy_ok(&ledger()).expect("second deploy");
    assert_ne!(first, second);

    env.call(first, vec![3]);
    assert_eq!(long_result(&env.call(first, vec![]).return_data), 3);
    assert_eq!(long_result(&env.call(second, vec![]).return_data), 0);
}

#[test]
fn test_senders_derive_distinct_addresses() {
    let mut alice = SandboxEnvironment::new().expect("create env");
    let mut bob = SandboxEnvironment::new()
        .expect("create env")
        .with_sender(Address([2u8; 32]));
    assert_ne!(
        alice.deploy_ok(&ledger()).expect("deploy"),
        bob.deploy_ok(&ledger()).expect("deploy")
    );
}

// =============================================================================
// Limits
// =============================================================================

#[test]
fn test_energy_limit_applies_to_calls() {
    let mut env = SandboxEnvironment::new().expect("create env");
    let ledger = env.deploy_ok(&ledger()).expect("deploy ledger");

    let base = env.engine().config().energy.transaction_base_cost;
    env.set_energy_limit(base + 1);
    let starved = env.call(ledger, vec![1]);
    assert_eq!(starved.status, ResultCode::OutOfEnergy);
    assert_eq!(starved.energy_used, base + 1);
    assert!(starved.return_data.is_empty());
}

#[test]
fn test_unknown_target_fails() {
    let mut env = SandboxEnvironment::new().expect("create env");
    let result = env.call(Address([0xee; 32]), vec![]);
    assert_eq!(result.status, ResultCode::Failed);
}

#[test]
fn test_config_from_json_drives_environment() {
    let config = SandboxConfig::from_json(
        r#"{ "max_stack_depth": 8, "prune_dead_code": true, "energy": { "instruction_cost": 3 } }"#,
    )
    .expect("parse config");
    assert_eq!(config.max_stack_depth, 8);
    assert_eq!(config.energy.invoke_cost, 10);

    let mut env = SandboxEnvironment::with_config(config).expect("create env");
    let ledger = env.deploy_ok(&ledger()).expect("deploy ledger");
    assert!(env.call(ledger, vec![1]).is_success());
}
