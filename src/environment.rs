//! In-memory chain around a [`SandboxEngine`].
//!
//! Holds one store, a sender and its nonce, and turns packages and call data
//! into transactions. Intended for tests and local experimentation.

use anyhow::{Context, Result};
use avm_sandbox_core::{InMemoryKernel, SandboxConfig, SandboxEngine, TransactionResult};
use avm_types::{Address, ContractPackage, TransactionContext};

/// Default energy limit per transaction.
pub const DEFAULT_ENERGY_LIMIT: u64 = 10_000_000;

pub struct SandboxEnvironment {
    engine: SandboxEngine,
    store: InMemoryKernel,
    sender: Address,
    nonce: u64,
    energy_limit: u64,
}

impl std::fmt::Debug for SandboxEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEnvironment")
            .field("sender", &self.sender)
            .field("nonce", &self.nonce)
            .field("energy_limit", &self.energy_limit)
            .field("storage_entries", &self.store.storage_len())
            .finish()
    }
}

impl SandboxEnvironment {
    pub fn new() -> Result<Self> {
        Self::with_config(SandboxConfig::default())
    }

    pub fn with_config(config: SandboxConfig) -> Result<Self> {
        Ok(Self {
            engine: SandboxEngine::new(config)?,
            store: InMemoryKernel::new(),
            sender: Address([1u8; 32]),
            nonce: 0,
            energy_limit: DEFAULT_ENERGY_LIMIT,
        })
    }

    /// Builder method: set the transaction sender.
    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    /// Builder method: set the per-transaction energy limit.
    pub fn with_energy_limit(mut self, limit: u64) -> Self {
        self.energy_limit = limit;
        self
    }

    pub fn set_energy_limit(&mut self, limit: u64) {
        self.energy_limit = limit;
    }

    pub fn engine(&self) -> &SandboxEngine {
        &self.engine
    }

    pub fn store(&self) -> &InMemoryKernel {
        &self.store
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Deploy `package`. The sender's nonce advances whatever the outcome.
    pub fn deploy(&mut self, package: &ContractPackage) -> Result<TransactionResult> {
        let code = package.encode().context("failed to encode contract package")?;
        Ok(self.deploy_code(code))
    }

    /// Deploy raw package bytes, valid or not.
    pub fn deploy_code(&mut self, code: Vec<u8>) -> TransactionResult {
        let context =
            TransactionContext::create(self.sender, code, self.energy_limit).with_nonce(self.nonce);
        self.nonce += 1;
        let result = self.engine.run(&mut self.store, &context);
        tracing::debug!(status = %result.status, nonce = context.nonce, "deploy finished");
        result
    }

    /// Deploy `package` and return its address, failing unless it succeeded.
    pub fn deploy_ok(&mut self, package: &ContractPackage) -> Result<Address> {
        let result = self.deploy(package)?;
        if !result.is_success() {
            anyhow::bail!(
                "deployment failed with {}: {}",
                result.status,
                result.error.unwrap_or_default()
            );
        }
        Address::from_bytes(&result.return_data).context("deployment returned no address")
    }

    pub fn call(&mut self, target: Address, data: Vec<u8>) -> TransactionResult {
        let context = TransactionContext::call(self.sender, target, data, self.energy_limit);
        self.engine.run(&mut self.store, &context)
    }
}
