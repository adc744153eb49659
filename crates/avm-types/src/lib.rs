//! Shared types for the avm-sandbox workspace.
//!
//! This crate holds the class-file model the sandbox consumes and produces,
//! the transaction inputs/outputs at the execution boundary, and the names of
//! the namespaces the sandbox reserves for itself.

pub mod class_file;
pub mod code;
pub mod descriptor;
pub mod instruction;
pub mod transaction;

pub use class_file::{
    ClassFile, ClassFlags, ClassFormatError, ExceptionHandler, FieldDecl, MethodDecl, MethodFlags,
};
pub use code::{CodeBuilder, LabelId};
pub use descriptor::{
    DescriptorError, ElementType, FieldType, MethodDescriptor, PrimitiveType, REFERENCE_WIDTH,
};
pub use instruction::{ArrayKind, Condition, Instruction, InvokeKind, Label, MemberRef};
pub use transaction::{Address, ContractPackage, ResultCode, TransactionContext, TransactionKind};

// =============================================================================
// Reserved namespaces
// =============================================================================

/// Host standard-library prefix that user code is written against.
pub const JDK_PREFIX: &str = "java/";

/// Prefix of the sandbox's shadow standard library.
pub const SHADOW_PREFIX: &str = "s/";

/// Everything the runtime itself defines lives under this prefix.
pub const RUNTIME_PREFIX: &str = "avm/";

/// Contract-facing API classes; the only `avm/` names user code may reference.
pub const API_PREFIX: &str = "avm/api/";

pub const ARRAY_WRAPPER_PREFIX: &str = "avm/arraywrapper/";
pub const ARRAY_INTERFACE_WRAPPER_PREFIX: &str = "avm/arraywrapper/interface/";
pub const EXCEPTION_WRAPPER_PREFIX: &str = "avm/exceptionwrapper/";

/// Static entry points the instrumentation calls into.
pub const HELPER_CLASS: &str = "avm/internal/Helper";

pub const SHADOW_OBJECT: &str = "s/java/lang/Object";
pub const SHADOW_THROWABLE: &str = "s/java/lang/Throwable";
