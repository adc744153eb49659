//! Error taxonomy.
//!
//! Three families:
//! - structural / input errors: the submitted code is refused before it runs
//!   ([`DeploymentError`] and everything it wraps);
//! - runtime-bounded failures: energy or stack exhaustion, revert, uncaught
//!   exceptions (see `runtime::Abort`);
//! - invariant violations: internal consistency failures that are fatal for
//!   the invocation and never reach user code.

use avm_types::{ClassFormatError, DescriptorError};

/// Class-hierarchy construction failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("class {0} cannot be its own parent")]
    SelfParent(String),
    #[error("class {child} already has parent {existing}, cannot attach it under {requested}")]
    ParentConflict {
        child: String,
        existing: String,
        requested: String,
    },
    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { child: String, parent: String },
    #[error("class {class} has ancestor {ancestor} with no known size")]
    UnknownParent { class: String, ancestor: String },
}

/// Reachability analysis failures; the class set is treated as corrupt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("entry class {0} not found")]
    MissingEntryClass(String),
    #[error("entry method {method} not found in {class}")]
    MissingEntryMethod { class: String, method: String },
    #[error("no declaration of {signature} reachable from {class}")]
    MissingDeclaration { class: String, signature: String },
    #[error("concrete class {class} has no implementation of {signature}")]
    MissingImplementation { class: String, signature: String },
}

/// Pre-execution checks on submitted classes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Format(#[from] ClassFormatError),
    #[error("invalid descriptor in {class}: {source}")]
    Descriptor {
        class: String,
        #[source]
        source: DescriptorError,
    },
    #[error("package key {key} does not match class name {name}")]
    NameMismatch { key: String, name: String },
    #[error("package contains {count} classes, limit is {limit}")]
    TooManyClasses { count: usize, limit: usize },
    #[error("package code size {size} exceeds limit {limit}")]
    CodeTooLarge { size: usize, limit: usize },
    #[error("class {0} is in a reserved namespace")]
    ReservedNamespace(String),
    #[error("class {class} references unknown type {referenced}")]
    UnknownType { class: String, referenced: String },
    #[error("class {0} has no superclass")]
    MissingSuperclass(String),
    #[error("{class}.{method} is declared native")]
    NativeMethod { class: String, method: String },
    #[error("{class}.{method}: {reason}")]
    MalformedCode {
        class: String,
        method: String,
        reason: String,
    },
    #[error("catch type {catch_type} in {class} is not a throwable")]
    NotThrowable { class: String, catch_type: String },
}

/// Array-wrapper generation failures. Callers only request wrappers for
/// validated input, so these indicate an internal inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WrapperError {
    #[error("cannot resolve array element type {0}")]
    UnresolvableElement(String),
    #[error("not an array wrapper name: {0}")]
    NotAWrapper(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Format(#[from] ClassFormatError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("pass {pass} failed on {class}: {reason}")]
    Pass {
        pass: &'static str,
        class: String,
        reason: String,
    },
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Wrapper(#[from] WrapperError),
}

/// Persistent object graph failures. All are fatal for the invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("root state of {0} was never written")]
    MissingRoot(String),
    #[error("instance {0} not found in storage")]
    MissingInstance(u64),
    #[error("instance id space exhausted: next id {next} reached limit {limit}")]
    InstanceIdOverflow { next: u64, limit: u64 },
    #[error("constant node hash {0} outside the reserved range")]
    InvalidConstantNode(i32),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

/// Anything that makes a deployment get rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl From<ClassFormatError> for DeploymentError {
    fn from(e: ClassFormatError) -> Self {
        Self::Validation(ValidationError::Format(e))
    }
}
