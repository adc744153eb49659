//! Sandbox configuration.
//!
//! [`SandboxConfig`] collects the limits and cost constants applied to every
//! deployment and call. It is serde-serializable so hosts can load it from
//! JSON, and every field has a default so partial documents work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default bound on nested sandboxed calls.
pub const DEFAULT_MAX_STACK_DEPTH: u32 = 512;

/// Hard upper bound accepted for `max_stack_depth`.
///
/// The interpreter recurses on the host stack once per sandboxed frame, so
/// the configured depth must stay well inside what the host can hold.
pub const MAX_SUPPORTED_STACK_DEPTH: u32 = 4096;

pub const DEFAULT_MAX_CLASS_COUNT: usize = 1024;
pub const DEFAULT_MAX_CODE_SIZE: usize = 1024 * 1024;

// =============================================================================
// Energy costs
// =============================================================================

/// Cost constants used by the metering pass and the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Flat charge for every transaction before any code runs.
    pub transaction_base_cost: u64,
    /// Charged per byte of package code at deployment.
    pub deploy_byte_cost: u64,
    /// Base cost of every instruction.
    pub instruction_cost: u64,
    /// Added for each method invocation.
    pub invoke_cost: u64,
    /// Added for each field read or write.
    pub field_access_cost: u64,
    /// Added for each object or array allocation.
    pub allocation_cost: u64,
    /// Charged per byte of an allocated instance's heap size.
    pub heap_byte_cost: u64,
    /// Charged per byte of serialized state read from storage.
    pub storage_read_byte_cost: u64,
    /// Charged per byte of serialized state written to storage.
    pub storage_write_byte_cost: u64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            transaction_base_cost: 5_000,
            deploy_byte_cost: 1,
            instruction_cost: 1,
            invoke_cost: 10,
            field_access_cost: 2,
            allocation_cost: 10,
            heap_byte_cost: 1,
            storage_read_byte_cost: 1,
            storage_write_byte_cost: 2,
        }
    }
}

impl EnergyConfig {
    /// All costs zero; useful for tests that only care about control flow.
    pub fn free() -> Self {
        Self {
            transaction_base_cost: 0,
            deploy_byte_cost: 0,
            instruction_cost: 0,
            invoke_cost: 0,
            field_access_cost: 0,
            allocation_cost: 0,
            heap_byte_cost: 0,
            storage_read_byte_cost: 0,
            storage_write_byte_cost: 0,
        }
    }
}

// =============================================================================
// Sandbox configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum sandboxed call depth before execution aborts with out-of-stack.
    pub max_stack_depth: u32,

    /// Maximum number of classes accepted in one package.
    pub max_class_count: usize,

    /// Maximum total size of raw class bytes in one package.
    pub max_code_size: usize,

    /// Drop unreachable classes and methods before transformation.
    pub prune_dead_code: bool,

    /// Transform classes on the rayon pool. Output is identical either way.
    pub parallel_transform: bool,

    /// Name of the static entry method of the package's entry class.
    pub entry_method: String,

    pub energy: EnergyConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_class_count: DEFAULT_MAX_CLASS_COUNT,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            prune_dead_code: false,
            parallel_transform: true,
            entry_method: "main".to_string(),
            energy: EnergyConfig::default(),
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the maximum call depth.
    pub fn with_max_stack_depth(mut self, depth: u32) -> Self {
        self.max_stack_depth = depth;
        self
    }

    /// Builder method: replace the energy cost table.
    pub fn with_energy(mut self, energy: EnergyConfig) -> Self {
        self.energy = energy;
        self
    }

    /// Builder method: enable or disable dead-code pruning.
    pub fn with_dead_code_pruning(mut self, enabled: bool) -> Self {
        self.prune_dead_code = enabled;
        self
    }

    /// Builder method: enable or disable parallel class transformation.
    pub fn with_parallel_transform(mut self, enabled: bool) -> Self {
        self.parallel_transform = enabled;
        self
    }

    pub fn with_max_class_count(mut self, count: usize) -> Self {
        self.max_class_count = count;
        self
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("failed to parse sandbox configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_stack_depth == 0 || self.max_stack_depth > MAX_SUPPORTED_STACK_DEPTH {
            anyhow::bail!(
                "max_stack_depth must be between 1 and {}, got {}",
                MAX_SUPPORTED_STACK_DEPTH,
                self.max_stack_depth
            );
        }
        if self.max_class_count == 0 {
            anyhow::bail!("max_class_count must be positive");
        }
        if self.entry_method.is_empty() {
            anyhow::bail!("entry_method must not be empty");
        }
        Ok(())
    }
}
