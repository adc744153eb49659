//! AVM Sandbox
//!
//! Deterministic sandbox for untrusted, JVM-style contract bytecode.
//!
//! - [`avm_types`]: class-file model, transaction inputs and result codes
//! - [`avm_sandbox_core`]: transformation pipeline, interpreter and persistent
//!   object graph
//! - [`environment`]: an in-memory chain for driving deploys and calls
//!
//! See [`SandboxEngine`] for the execution entry point.

#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]

pub mod environment;

pub use avm_sandbox_core;
pub use avm_types;

pub use avm_sandbox_core::{
    EnergyConfig, InMemoryKernel, KernelStore, SandboxConfig, SandboxEngine, TransactionResult,
};
pub use avm_types::{Address, ContractPackage, ResultCode, TransactionContext};
pub use environment::SandboxEnvironment;
