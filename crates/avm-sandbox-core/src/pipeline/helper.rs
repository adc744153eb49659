//! Entry points on the runtime helper class that instrumentation calls.

use avm_types::{Instruction, InvokeKind, HELPER_CLASS};

/// (method name, descriptor) of one helper entry point.
pub type HelperMethod = (&'static str, &'static str);

/// Deduct a basic block's cost from the remaining energy.
pub const CHARGE_ENERGY: HelperMethod = ("chargeEnergy", "(J)V");
/// Increment and check the frame depth; returns the new depth.
pub const ENTER_FRAME: HelperMethod = ("enterFrame", "()I");
pub const EXIT_FRAME: HelperMethod = ("exitFrame", "()V");
/// Re-check the frame depth on loop back-edges.
pub const CHECK_FRAME: HelperMethod = ("checkFrame", "()V");
/// Reset the depth to the value saved at method entry after a catch.
pub const RESTORE_FRAME: HelperMethod = ("restoreFrame", "(I)V");
pub const WRAP_THROWABLE: HelperMethod = (
    "wrapAsThrowable",
    "(Ls/java/lang/Object;)Ls/java/lang/Object;",
);
pub const UNWRAP_THROWABLE: HelperMethod = (
    "unwrapThrowable",
    "(Ls/java/lang/Object;)Ls/java/lang/Object;",
);

pub const ALL: [HelperMethod; 7] = [
    CHARGE_ENERGY,
    ENTER_FRAME,
    EXIT_FRAME,
    CHECK_FRAME,
    RESTORE_FRAME,
    WRAP_THROWABLE,
    UNWRAP_THROWABLE,
];

pub fn call(method: HelperMethod) -> Instruction {
    Instruction::invoke(InvokeKind::Static, HELPER_CLASS, method.0, method.1)
}

pub fn is_call(instruction: &Instruction, method: HelperMethod) -> bool {
    matches!(
        instruction,
        Instruction::Invoke(InvokeKind::Static, m) if m.is(HELPER_CLASS, method.0, method.1)
    )
}

pub fn is_helper_call(instruction: &Instruction) -> bool {
    matches!(instruction, Instruction::Invoke(_, m) if m.owner == HELPER_CLASS)
}
