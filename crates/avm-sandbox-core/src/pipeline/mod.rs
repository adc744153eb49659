//! Bytecode transformation pipeline.
//!
//! A fixed, ordered chain of per-class passes:
//!
//! 1. [`NamespaceShadowing`] - host library names move into the shadow namespace
//! 2. [`ArrayWrapping`] - array types and operations go through generated wrappers
//! 3. [`CallStackBounding`] - frame-depth accounting independent of the host stack
//! 4. [`ExceptionInterception`] - throws and catches cross a wrapping boundary
//! 5. [`EnergyMetering`] - every basic block pays its cost up front
//!
//! Each pass is a pure `ClassFile -> ClassFile` function and recognises its own
//! instrumentation, so running the pipeline over its own output is a no-op.

mod array_wrapping;
mod exceptions;
pub(crate) mod helper;
mod metering;
pub(crate) mod rewrite;
mod shadowing;
mod stack_bounding;

pub use array_wrapping::{referenced_wrappers, wrap_descriptor, ArrayWrapping};
pub use exceptions::{
    exception_wrapper_name, generate_exception_wrapper, ExceptionInterception, UNDERLYING_FIELD,
};
pub use metering::EnergyMetering;
pub use shadowing::NamespaceShadowing;
pub use stack_bounding::CallStackBounding;

use crate::config::EnergyConfig;
use crate::errors::TransformError;
use crate::heap_cost::HeapCostTable;
use avm_types::ClassFile;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Read-only inputs shared by every pass.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub heap_costs: &'a HeapCostTable,
    pub energy: &'a EnergyConfig,
}

/// One pure transformation over a class.
pub trait ClassPass: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform(&self, class: ClassFile, ctx: &PassContext<'_>) -> Result<ClassFile, TransformError>;
}

pub struct TransformationPipeline {
    passes: Vec<Box<dyn ClassPass>>,
}

impl Default for TransformationPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for TransformationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.passes.iter().map(|p| p.name()))
            .finish()
    }
}

impl TransformationPipeline {
    /// The full sandboxing chain in its required order.
    pub fn standard() -> Self {
        Self::with_passes(vec![
            Box::new(NamespaceShadowing),
            Box::new(ArrayWrapping),
            Box::new(CallStackBounding),
            Box::new(ExceptionInterception),
            Box::new(EnergyMetering),
        ])
    }

    pub fn with_passes(passes: Vec<Box<dyn ClassPass>>) -> Self {
        Self { passes }
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn transform_class(
        &self,
        class: ClassFile,
        ctx: &PassContext<'_>,
    ) -> Result<ClassFile, TransformError> {
        self.passes.iter().try_fold(class, |class, pass| {
            tracing::trace!(pass = pass.name(), class = %class.name, "running pass");
            pass.transform(class, ctx)
        })
    }

    /// Transform every class. The result does not depend on `parallel`.
    pub fn transform_all(
        &self,
        classes: &BTreeMap<String, ClassFile>,
        ctx: &PassContext<'_>,
        parallel: bool,
    ) -> Result<BTreeMap<String, ClassFile>, TransformError> {
        let run = |class: &ClassFile| {
            self.transform_class(class.clone(), ctx)
                .map(|c| (c.name.clone(), c))
        };
        let transformed: Vec<(String, ClassFile)> = if parallel {
            classes.par_iter().map(|(_, c)| run(c)).collect::<Result<_, _>>()?
        } else {
            classes.values().map(run).collect::<Result<_, _>>()?
        };
        tracing::debug!(classes = transformed.len(), parallel, "pipeline finished");
        Ok(transformed.into_iter().collect())
    }
}

pub(crate) fn pass_error(pass: &'static str, class: &str, reason: impl Into<String>) -> TransformError {
    TransformError::Pass {
        pass,
        class: class.to_string(),
        reason: reason.into(),
    }
}
