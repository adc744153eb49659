//! AVM Sandbox Core
//!
//! Deterministic execution of untrusted, JVM-style contract bytecode.
//!
//! Submitted classes are validated, checked for reachability, rewritten by a
//! fixed chain of instrumentation passes and only then executed by a
//! single-threaded interpreter that persists contract state through an
//! object graph with an order-independent consensus digest.
//!
//! # Core Modules
//!
//! - [`hierarchy`]: class hierarchy forest (arena with string-id index)
//! - [`heap_cost`]: per-class instance sizes for allocation metering
//! - [`arraywrap`]: array wrapper classes and their shared cache
//! - [`pipeline`]: shadowing, array wrapping, stack bounding, exception
//!   interception and energy metering passes
//! - [`reachability`] / [`pruning`]: method reachability and dead-code removal
//! - [`persistence`]: persistent object graph over a key-value store
//! - [`runtime`]: class loading, heap, interpreter and natives
//! - [`engine`]: deploy/call orchestration
//!
//! # Example
//!
//! ```ignore
//! use avm_sandbox_core::{InMemoryKernel, SandboxConfig, SandboxEngine};
//! use avm_types::TransactionContext;
//!
//! let engine = SandboxEngine::new(SandboxConfig::default())?;
//! let mut store = InMemoryKernel::new();
//! let created = engine.run(&mut store, &TransactionContext::create(sender, code, 1_000_000));
//! ```

#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]

pub mod arraywrap;
pub mod config;
pub mod engine;
pub mod errors;
pub mod heap_cost;
pub mod hierarchy;
pub mod naming;
pub mod persistence;
pub mod pipeline;
pub mod pruning;
pub mod reachability;
pub mod runtime;
pub mod validation;

pub use config::{EnergyConfig, SandboxConfig};
pub use engine::{contract_address, DeployedClasses, SandboxEngine, TransactionResult};
pub use errors::{
    AnalysisError, DeploymentError, HierarchyError, PersistenceError, TransformError,
    ValidationError, WrapperError,
};
pub use hierarchy::{ClassHierarchy, ExternalClasses, Forest};
pub use heap_cost::HeapCostTable;
pub use persistence::{InMemoryKernel, KernelStore, ObjectGraph, StorageOverlay};
pub use pipeline::TransformationPipeline;
pub use reachability::{MethodReachabilityAnalyzer, ReachabilityReport};
pub use runtime::{Abort, ExecutionStats};
