//! Deterministic execution of transformed classes.
//!
//! - [`shadow`]: the sandbox's own standard library and runtime classes
//! - [`loader`]: the class provider chain and per-invocation class table
//! - [`heap`]: objects, arrays and values
//! - [`Interpreter`]: a single-threaded interpreter over an explicit frame
//!   stack, so sandboxed call depth never depends on the host stack
//! - natives and persistence glue live beside the interpreter
//!
//! Execution ends in one of three ways: a normal return, an uncaught
//! sandbox exception, or an [`Abort`]. Aborts cannot be caught by
//! sandboxed code.

mod energy;
pub mod heap;
mod interpreter;
pub mod loader;
mod natives;
mod persist;
pub mod shadow;

pub use energy::EnergyMeter;
pub use heap::{ArrayStorage, Heap, ObjectRef, Value};
pub use interpreter::{ExecutionMode, Interpreter, Invocation};
pub use loader::{
    ArrayWrappers, ClassProvider, ClassTable, ExceptionWrappers, LoadedClass, ProviderChain,
    UserClasses,
};
pub use shadow::ShadowLibrary;

use serde::{Deserialize, Serialize};

/// Non-catchable termination of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Abort {
    #[error("out of energy")]
    OutOfEnergy,
    #[error("call depth limit exceeded")]
    OutOfStack,
    #[error("reverted by contract")]
    Revert,
    /// An internal consistency check failed; the host itself is at fault.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Why the interpreter stopped executing the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwind {
    /// A sandbox exception (an exception wrapper object) is propagating.
    Throw(ObjectRef),
    Abort(Abort),
}

impl From<Abort> for Unwind {
    fn from(abort: Abort) -> Self {
        Self::Abort(abort)
    }
}

pub(crate) fn invariant(message: impl Into<String>) -> Unwind {
    Unwind::Abort(Abort::Invariant(message.into()))
}

/// Counters collected during one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// Basic-block charges executed.
    pub block_charges: u64,
    /// Per-element charges made by array factories.
    pub array_charges: u64,
    pub instructions: u64,
    pub max_depth: u32,
    pub classes_loaded: usize,
    pub objects_created: u64,
    pub objects_loaded: u64,
    pub objects_stored: u64,
}
