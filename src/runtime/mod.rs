//! Graph-executor seam.
//!
//! The session machinery is generic over the runtime that actually
//! instantiates and runs a serialized model graph: [`ModelRuntime`] turns a
//! binary artifact into a [`GraphSession`], which exposes declared tensor
//! names and executes single forward passes over named [`TensorData`] inputs.
//!
//! The bundled [`BigramRuntime`] is the baseline reference implementation;
//! heavier executors plug in through the same traits at controller
//! construction time.

pub mod bigram;

pub use bigram::BigramRuntime;

use std::collections::HashMap;

use crate::backend::ExecutionProvider;
use crate::error::EngineError;
use crate::tensor::TensorData;

/// How aggressively the runtime may rewrite the graph before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    Disabled,
    Basic,
    #[default]
    All,
}

/// Where `run` outputs should be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputPlacement {
    /// Host memory, readable immediately.
    #[default]
    Host,
    /// Device-resident, downloaded lazily by the runtime.
    Device,
}

/// Execution configuration handed to [`ModelRuntime::instantiate`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub provider: ExecutionProvider,
    pub optimization: OptimizationLevel,
    pub enable_profiling: bool,
    pub output_placement: OutputPlacement,
}

impl SessionOptions {
    /// Default options for a provider: accelerated sessions prefer
    /// device-resident outputs, baseline sessions host outputs.
    pub fn for_provider(provider: ExecutionProvider) -> Self {
        let output_placement = match provider {
            ExecutionProvider::Gpu => OutputPlacement::Device,
            ExecutionProvider::Cpu => OutputPlacement::Host,
        };
        Self {
            provider,
            optimization: OptimizationLevel::default(),
            enable_profiling: false,
            output_placement,
        }
    }
}

/// An instantiated model graph: declared tensor names plus single forward
/// passes. Never run concurrently; the owning session serializes access.
pub trait GraphSession: Send {
    /// Declared input tensor names.
    fn input_names(&self) -> &[String];

    /// Declared output tensor names.
    fn output_names(&self) -> &[String];

    /// Execute one forward pass.
    fn run(
        &mut self,
        inputs: &HashMap<String, TensorData>,
    ) -> Result<HashMap<String, TensorData>, EngineError>;
}

/// Instantiates [`GraphSession`]s from serialized model artifacts.
pub trait ModelRuntime: Send + Sync {
    fn instantiate(
        &self,
        graph: &[u8],
        options: &SessionOptions,
    ) -> Result<Box<dyn GraphSession>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_options_for_cpu() {
        let opts = SessionOptions::for_provider(ExecutionProvider::Cpu);
        assert_eq!(opts.provider, ExecutionProvider::Cpu);
        assert_eq!(opts.output_placement, OutputPlacement::Host);
        assert_eq!(opts.optimization, OptimizationLevel::All);
        assert!(!opts.enable_profiling);
    }

    #[test]
    fn test_session_options_for_gpu_prefers_device_outputs() {
        let opts = SessionOptions::for_provider(ExecutionProvider::Gpu);
        assert_eq!(opts.output_placement, OutputPlacement::Device);
    }
}
