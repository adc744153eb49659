//! # SandboxEngine: deploy and call orchestration
//!
//! The engine owns everything that is shared between invocations: the
//! configuration, the pass chain, the shadow library and the array wrapper
//! cache. Each [`SandboxEngine::run`] gets its own heap, energy meter and
//! object graph, and writes through a [`StorageOverlay`] that is applied to
//! the host store only when the invocation succeeds.
//!
//! ## Deploy (`Create`)
//!
//! 1. Charge the base cost plus the per-byte deployment cost
//! 2. Validate, gate on reachability (optionally prune), build the hierarchy
//!    and heap costs, run the pipeline, pre-generate every referenced wrapper
//! 3. Store the transformed package under the new address
//! 4. Run the class initializers, entry class first, and persist the result
//!
//! ## Call
//!
//! 1. Charge the base cost and load the transformed package
//! 2. Restore statics, invoke the static entry method, persist the result

use crate::arraywrap::WrapperCache;
use crate::config::SandboxConfig;
use crate::errors::{DeploymentError, PersistenceError};
use crate::heap_cost::HeapCostTable;
use crate::hierarchy::ClassHierarchy;
use crate::persistence::{KernelStore, ObjectGraph, StateChanges, StorageOverlay};
use crate::pipeline::{pass_error, referenced_wrappers, PassContext, TransformationPipeline};
use crate::pruning::prune_unreachable;
use crate::reachability;
use crate::runtime::shadow::BYTE_ARRAY_WRAPPER;
use crate::runtime::{
    Abort, ArrayWrappers, ClassProvider, ClassTable, EnergyMeter, ExceptionWrappers,
    ExecutionMode, ExecutionStats, Interpreter, Invocation, ProviderChain, ShadowLibrary,
    UserClasses, Unwind,
};
use crate::validation::validate_package;
use anyhow::Result;
use avm_types::{
    Address, ClassFile, ContractPackage, ResultCode, TransactionContext, TransactionKind,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Results
// =============================================================================

/// Outcome of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub status: ResultCode,
    /// Deploy: the new contract address. Call: the encoded entry result.
    pub return_data: Vec<u8>,
    pub energy_used: u64,
    pub stats: ExecutionStats,
    /// Consensus digest of the contract's storage after a successful run.
    pub state_digest: Option<[u8; 32]>,
    pub error: Option<String>,
}

impl TransactionResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    fn stopped(status: ResultCode, energy: &EnergyMeter, stats: ExecutionStats, error: String) -> Self {
        Self {
            status,
            return_data: Vec::new(),
            energy_used: energy.used(),
            stats,
            state_digest: None,
            error: Some(error),
        }
    }
}

/// Why an invocation stopped short of success.
#[derive(Debug)]
struct Stop {
    status: ResultCode,
    message: String,
}

impl Stop {
    fn new(status: ResultCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Abort> for Stop {
    fn from(abort: Abort) -> Self {
        let status = match &abort {
            Abort::OutOfEnergy => ResultCode::OutOfEnergy,
            Abort::OutOfStack => ResultCode::OutOfStack,
            Abort::Revert => ResultCode::Reverted,
            Abort::Invariant(message) => {
                tracing::error!(%message, "invariant violated during execution");
                ResultCode::Failed
            }
        };
        Self::new(status, abort.to_string())
    }
}

impl From<DeploymentError> for Stop {
    fn from(e: DeploymentError) -> Self {
        tracing::warn!(error = %e, "deployment rejected");
        Self::new(ResultCode::Rejected, e.to_string())
    }
}

impl From<PersistenceError> for Stop {
    fn from(e: PersistenceError) -> Self {
        tracing::error!(error = %e, "persistent state unusable");
        Self::new(ResultCode::Failed, e.to_string())
    }
}

/// A finished invocation whose writes have not been applied yet.
struct Completed {
    return_data: Vec<u8>,
    digest: [u8; 32],
    changes: StateChanges,
}

/// Transformed classes ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedClasses {
    pub entry_class: String,
    pub classes: BTreeMap<String, ClassFile>,
}

impl DeployedClasses {
    /// Package form stored as contract code.
    pub fn to_package(&self) -> Result<ContractPackage, DeploymentError> {
        let mut package = ContractPackage::new(self.entry_class.clone());
        for class in self.classes.values() {
            package = package.with_class(class)?;
        }
        Ok(package)
    }

    fn from_package(package: &ContractPackage) -> Result<Self, DeploymentError> {
        let mut classes = BTreeMap::new();
        for bytes in package.classes.values() {
            let class = ClassFile::decode(bytes)?;
            classes.insert(class.name.clone(), class);
        }
        Ok(Self {
            entry_class: package.entry_class.clone(),
            classes,
        })
    }
}

/// Address of a contract created by `sender` at `nonce`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(nonce.to_be_bytes());
    Address(hasher.finalize().into())
}

/// Entry-method descriptors tried in order, as they read after transformation.
fn entry_descriptors() -> [String; 4] {
    [
        format!("()L{BYTE_ARRAY_WRAPPER};"),
        "()I".to_string(),
        "()J".to_string(),
        "()V".to_string(),
    ]
}

// =============================================================================
// SandboxEngine
// =============================================================================

/// Shared deploy/call engine. `Send + Sync`; one instance serves any number
/// of invocations.
pub struct SandboxEngine {
    config: SandboxConfig,
    pipeline: TransformationPipeline,
    wrappers: Arc<WrapperCache>,
    library: Arc<ShadowLibrary>,
}

impl std::fmt::Debug for SandboxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEngine")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}

impl SandboxEngine {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        let library = ShadowLibrary::new()?;
        Ok(Self {
            config,
            pipeline: TransformationPipeline::standard(),
            wrappers: Arc::new(WrapperCache::new()),
            library: Arc::new(library),
        })
    }

    /// Builder method: share a wrapper cache with other engines.
    pub fn with_wrapper_cache(mut self, cache: Arc<WrapperCache>) -> Self {
        self.wrappers = cache;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn wrapper_cache(&self) -> &Arc<WrapperCache> {
        &self.wrappers
    }

    pub fn library(&self) -> &ShadowLibrary {
        &self.library
    }

    /// Validate and transform `package` without executing anything.
    pub fn deploy_classes(&self, package: &ContractPackage) -> Result<DeployedClasses, DeploymentError> {
        let classes = validate_package(package, &self.config, &*self.library)?;

        let report = reachability::analyze(
            &classes,
            &*self.library,
            &package.entry_class,
            &self.config.entry_method,
        )?;
        let classes = if self.config.prune_dead_code {
            let pruned = prune_unreachable(&classes, &report);
            tracing::debug!(before = classes.len(), after = pruned.len(), "pruned unreachable code");
            pruned
        } else {
            classes
        };

        let hierarchy = ClassHierarchy::build(&classes, &*self.library)?;
        let heap_costs = HeapCostTable::build(&hierarchy, &self.library.base_sizes())?;
        let ctx = PassContext {
            heap_costs: &heap_costs,
            energy: &self.config.energy,
        };
        let transformed = self
            .pipeline
            .transform_all(&classes, &ctx, self.config.parallel_transform)?;

        // Generate every wrapper now so a bad element type rejects the
        // deployment instead of failing a later call.
        let user = UserClasses(&transformed);
        let wrappers = ArrayWrappers(&self.wrappers);
        let providers: Vec<&dyn ClassProvider> =
            vec![&user, &*self.library, &wrappers, &ExceptionWrappers];
        let chain = ProviderChain::new(providers);
        for class in transformed.values() {
            for name in referenced_wrappers(class) {
                match chain.lookup(&name) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        return Err(pass_error("array-wrapping", &class.name, format!("no wrapper {name}")).into())
                    }
                    Err(e) => return Err(pass_error("array-wrapping", &class.name, format!("{e:#}")).into()),
                }
            }
        }

        tracing::debug!(
            entry = %package.entry_class,
            classes = transformed.len(),
            wrappers = self.wrappers.len(),
            "package transformed"
        );
        Ok(DeployedClasses {
            entry_class: package.entry_class.clone(),
            classes: transformed,
        })
    }

    /// Execute one transaction against `store`. Nothing is written to
    /// `store` unless the result is a success.
    pub fn run(&self, store: &mut dyn KernelStore, context: &TransactionContext) -> TransactionResult {
        let mut energy = EnergyMeter::new(context.energy_limit);
        let mut stats = ExecutionStats::default();
        let outcome = match &context.kind {
            TransactionKind::Create { code } => self.create(&*store, context, code, &mut energy, &mut stats),
            TransactionKind::Call { target } => self.call(&*store, context, *target, &mut energy, &mut stats),
        };
        match outcome {
            Ok(done) => {
                done.changes.apply_to(store);
                tracing::debug!(
                    energy_used = energy.used(),
                    digest = %hex::encode(done.digest),
                    "transaction succeeded"
                );
                TransactionResult {
                    status: ResultCode::Success,
                    return_data: done.return_data,
                    energy_used: energy.used(),
                    stats,
                    state_digest: Some(done.digest),
                    error: None,
                }
            }
            Err(stop) => {
                tracing::debug!(status = %stop.status, error = %stop.message, "transaction stopped");
                TransactionResult::stopped(stop.status, &energy, stats, stop.message)
            }
        }
    }

    fn create(
        &self,
        store: &dyn KernelStore,
        context: &TransactionContext,
        code: &[u8],
        energy: &mut EnergyMeter,
        stats: &mut ExecutionStats,
    ) -> Result<Completed, Stop> {
        energy.charge(self.config.energy.transaction_base_cost)?;
        energy.charge_bytes(code.len() as u64, self.config.energy.deploy_byte_cost)?;

        let package = ContractPackage::decode(code).map_err(DeploymentError::from)?;
        let deployed = self.deploy_classes(&package)?;
        let stored = deployed
            .to_package()?
            .encode()
            .map_err(DeploymentError::from)?;

        let address = contract_address(&context.sender, context.nonce);
        if store.get_code(&address).is_some() {
            return Err(Stop::new(
                ResultCode::Rejected,
                format!("contract already exists at {address}"),
            ));
        }
        tracing::debug!(%address, "deploying contract");

        let mut done = self.execute(store, context, address, &deployed, ExecutionMode::Deploy, Some(stored), energy, stats)?;
        done.return_data = address.as_bytes().to_vec();
        Ok(done)
    }

    fn call(
        &self,
        store: &dyn KernelStore,
        context: &TransactionContext,
        target: Address,
        energy: &mut EnergyMeter,
        stats: &mut ExecutionStats,
    ) -> Result<Completed, Stop> {
        energy.charge(self.config.energy.transaction_base_cost)?;
        let code = store
            .get_code(&target)
            .ok_or_else(|| Stop::new(ResultCode::Failed, format!("no contract at {target}")))?;
        let package = ContractPackage::decode(&code)
            .map_err(|e| Stop::new(ResultCode::Failed, format!("stored code unreadable: {e}")))?;
        let deployed = DeployedClasses::from_package(&package)
            .map_err(|e| Stop::new(ResultCode::Failed, format!("stored code unreadable: {e}")))?;
        self.execute(store, context, target, &deployed, ExecutionMode::Call, None, energy, stats)
    }

    /// Run one invocation over a fresh overlay of `store`.
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        store: &dyn KernelStore,
        context: &TransactionContext,
        address: Address,
        deployed: &DeployedClasses,
        mode: ExecutionMode,
        code: Option<Vec<u8>>,
        energy: &mut EnergyMeter,
        stats: &mut ExecutionStats,
    ) -> Result<Completed, Stop> {
        let user = UserClasses(&deployed.classes);
        let wrappers = ArrayWrappers(&self.wrappers);
        let mut overlay = StorageOverlay::new(store);

        let outcome = {
            let mut graph = ObjectGraph::open(&mut overlay, address)?;
            if let Some(code) = code {
                graph.put_code(code);
            }
            let providers: Vec<&dyn ClassProvider> =
                vec![&user, &*self.library, &wrappers, &ExceptionWrappers];
            let classes = ClassTable::new(ProviderChain::new(providers));
            let invocation = Invocation {
                config: &self.config,
                context,
                mode,
                user_classes: deployed.classes.keys().cloned().collect(),
            };
            let mut interpreter = Interpreter::new(invocation, classes, graph, energy.clone());

            let result = self
                .drive(&mut interpreter, deployed, mode)
                .map_err(|unwind| describe(&interpreter, unwind));
            *energy = interpreter.energy().clone();
            *stats = interpreter.stats();
            result
        };

        let (return_data, digest) = outcome?;
        Ok(Completed {
            return_data,
            digest,
            changes: overlay.into_changes(),
        })
    }

    fn drive(
        &self,
        interpreter: &mut Interpreter<'_>,
        deployed: &DeployedClasses,
        mode: ExecutionMode,
    ) -> Result<(Vec<u8>, [u8; 32]), Unwind> {
        let entry = deployed.entry_class.as_str();
        let return_data = match mode {
            ExecutionMode::Deploy => {
                interpreter.initialize(entry)?;
                for name in deployed.classes.keys().filter(|n| n.as_str() != entry) {
                    interpreter.initialize(name)?;
                }
                Vec::new()
            }
            ExecutionMode::Call => {
                interpreter.restore_state()?;
                let method = &self.config.entry_method;
                let class = deployed
                    .classes
                    .get(entry)
                    .ok_or_else(|| crate::runtime::invariant(format!("entry class {entry} missing")))?;
                let descriptor = entry_descriptors()
                    .into_iter()
                    .find(|d| {
                        class
                            .method_index(method, d)
                            .is_some_and(|i| class.methods[i].flags.is_static)
                    })
                    .ok_or_else(|| {
                        crate::runtime::invariant(format!("{entry} has no static {method} entry point"))
                    })?;
                let value = interpreter.invoke_static(entry, method, &descriptor, Vec::new())?;
                interpreter.return_bytes(value)?
            }
        };
        let digest = interpreter.commit()?;
        Ok((return_data, digest))
    }
}

/// Turn an unwind that escaped the entry point into a status.
fn describe(interpreter: &Interpreter<'_>, unwind: Unwind) -> Stop {
    match unwind {
        Unwind::Abort(abort) => abort.into(),
        Unwind::Throw(wrapper) => {
            let thrown = interpreter
                .unwrap_exception(wrapper)
                .map(|e| interpreter.class_of(e))
                .unwrap_or_else(|| interpreter.class_of(wrapper));
            tracing::debug!(exception = thrown, "uncaught exception");
            Stop::new(ResultCode::Failed, format!("uncaught exception {thrown}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyConfig;
    use crate::persistence::InMemoryKernel;
    use avm_types::{Instruction, MemberRef, MethodDecl};

    const SENDER: Address = Address([7u8; 32]);

    fn counter_package() -> Vec<u8> {
        let main = ClassFile::new("com/Counter", Some("java/lang/Object"))
            .with_field("count", "I", true)
            .with_method(
                MethodDecl::new("main", "()I").with_static().with_code(
                    vec![
                        Instruction::GetStatic(MemberRef::new("com/Counter", "count", "I")),
                        Instruction::IConst(1),
                        Instruction::IAdd,
                        Instruction::Dup,
                        Instruction::PutStatic(MemberRef::new("com/Counter", "count", "I")),
                        Instruction::IReturn,
                    ],
                    vec![],
                ),
            );
        ContractPackage::new("com/Counter")
            .with_class(&main)
            .unwrap()
            .encode()
            .unwrap()
    }

    fn engine() -> SandboxEngine {
        SandboxEngine::new(SandboxConfig::default().with_energy(EnergyConfig::free())).unwrap()
    }

    #[test]
    fn test_contract_address_depends_on_nonce() {
        assert_ne!(contract_address(&SENDER, 0), contract_address(&SENDER, 1));
        assert_eq!(contract_address(&SENDER, 3), contract_address(&SENDER, 3));
    }

    #[test]
    fn test_deploy_then_call() {
        let engine = engine();
        let mut store = InMemoryKernel::new();
        let created = engine.run(&mut store, &TransactionContext::create(SENDER, counter_package(), 1_000_000));
        assert!(created.is_success(), "{:?}", created.error);
        let address = Address::from_bytes(&created.return_data).unwrap();
        assert!(store.has_contract(&address));

        let first = engine.run(&mut store, &TransactionContext::call(SENDER, address, vec![], 1_000_000));
        assert!(first.is_success(), "{:?}", first.error);
        assert_eq!(first.return_data, 1i32.to_be_bytes());
        let second = engine.run(&mut store, &TransactionContext::call(SENDER, address, vec![], 1_000_000));
        assert_eq!(second.return_data, 2i32.to_be_bytes());
        assert_ne!(first.state_digest, second.state_digest);
    }

    #[test]
    fn test_garbage_code_is_rejected() {
        let engine = engine();
        let mut store = InMemoryKernel::new();
        let result = engine.run(&mut store, &TransactionContext::create(SENDER, vec![1, 2, 3], 1_000_000));
        assert_eq!(result.status, ResultCode::Rejected);
        assert_eq!(store.storage_len(), 0);
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let engine = engine();
        let mut store = InMemoryKernel::new();
        let tx = TransactionContext::create(SENDER, counter_package(), 1_000_000);
        assert!(engine.run(&mut store, &tx).is_success());
        assert_eq!(engine.run(&mut store, &tx).status, ResultCode::Rejected);
    }

    #[test]
    fn test_call_to_missing_contract_fails() {
        let engine = engine();
        let mut store = InMemoryKernel::new();
        let result = engine.run(&mut store, &TransactionContext::call(SENDER, Address([9; 32]), vec![], 100));
        assert_eq!(result.status, ResultCode::Failed);
        assert!(result.state_digest.is_none());
    }

    #[test]
    fn test_base_cost_above_limit_is_out_of_energy() {
        let engine = SandboxEngine::new(SandboxConfig::default()).unwrap();
        let mut store = InMemoryKernel::new();
        let result = engine.run(&mut store, &TransactionContext::create(SENDER, counter_package(), 10));
        assert_eq!(result.status, ResultCode::OutOfEnergy);
        assert_eq!(result.energy_used, 10);
        assert!(result.return_data.is_empty());
    }
}
