//! Execution-provider detection with graceful degradation.
//!
//! [`detect_provider`] probes for accelerated compute (adapter discovery and
//! device acquisition through wgpu when built with the `gpu` feature) and
//! never fails: every probe failure degrades to the baseline provider.
//! Callers branch on the returned capability instead of catching errors.

use std::fmt;
use std::str::FromStr;

use tracing::info;

/// The compute path a session executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    /// Accelerated GPU execution.
    Gpu,
    /// Baseline CPU execution, always available.
    Cpu,
}

impl ExecutionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProvider::Gpu => "gpu",
            ExecutionProvider::Cpu => "cpu",
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller preference for provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderChoice {
    /// Probe for acceleration and fall back to the baseline.
    #[default]
    Auto,
    /// Require accelerated execution; no fallback on failure.
    Gpu,
    /// Require baseline execution.
    Cpu,
}

impl FromStr for ProviderChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ProviderChoice::Auto),
            "gpu" => Ok(ProviderChoice::Gpu),
            "cpu" => Ok(ProviderChoice::Cpu),
            other => Err(format!(
                "Unknown provider '{}'. Options: auto, gpu, cpu",
                other
            )),
        }
    }
}

/// Probe for an accelerated compute backend.
///
/// Returns [`ExecutionProvider::Gpu`] only when adapter discovery and device
/// acquisition both succeed; otherwise the baseline provider. Never panics or
/// returns an error. Safe to re-run on every load.
pub fn detect_provider() -> ExecutionProvider {
    #[cfg(feature = "gpu")]
    {
        if probe_gpu() {
            info!("Selected gpu provider");
            return ExecutionProvider::Gpu;
        }
        info!("GPU adapter unavailable, falling back to cpu provider");
    }
    #[cfg(not(feature = "gpu"))]
    {
        info!("Selected cpu provider (compiled without the `gpu` feature)");
    }
    ExecutionProvider::Cpu
}

/// Resolve a caller preference to a concrete provider.
pub fn resolve_provider(choice: ProviderChoice) -> ExecutionProvider {
    match choice {
        ProviderChoice::Auto => detect_provider(),
        ProviderChoice::Gpu => ExecutionProvider::Gpu,
        ProviderChoice::Cpu => ExecutionProvider::Cpu,
    }
}

/// Adapter discovery + device acquisition. Any failure is a clean `false`.
#[cfg(feature = "gpu")]
fn probe_gpu() -> bool {
    use tracing::debug;

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    })) {
        Ok(adapter) => adapter,
        Err(e) => {
            debug!(error = %e, "No suitable GPU adapter");
            return false;
        }
    };

    let info = adapter.get_info();
    debug!(name = %info.name, backend = ?info.backend, "GPU adapter found");

    match pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())) {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "GPU device acquisition failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_never_panics() {
        let provider = detect_provider();
        assert!(matches!(
            provider,
            ExecutionProvider::Gpu | ExecutionProvider::Cpu
        ));
    }

    #[test]
    fn test_detect_without_gpu_feature_is_cpu() {
        #[cfg(not(feature = "gpu"))]
        assert_eq!(detect_provider(), ExecutionProvider::Cpu);
    }

    #[test]
    fn test_resolve_explicit_choices() {
        assert_eq!(
            resolve_provider(ProviderChoice::Gpu),
            ExecutionProvider::Gpu
        );
        assert_eq!(
            resolve_provider(ProviderChoice::Cpu),
            ExecutionProvider::Cpu
        );
    }

    #[test]
    fn test_provider_choice_from_str() {
        assert_eq!("auto".parse::<ProviderChoice>(), Ok(ProviderChoice::Auto));
        assert_eq!("gpu".parse::<ProviderChoice>(), Ok(ProviderChoice::Gpu));
        assert_eq!("cpu".parse::<ProviderChoice>(), Ok(ProviderChoice::Cpu));
        let err = "tpu".parse::<ProviderChoice>().unwrap_err();
        assert!(err.contains("Unknown provider 'tpu'"));
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(ExecutionProvider::Gpu.to_string(), "gpu");
        assert_eq!(ExecutionProvider::Cpu.to_string(), "cpu");
    }
}
