//! Model-execution session: provider resolution with fallback, forward
//! passes, and latency statistics.
//!
//! A [`ModelSession`] wraps an instantiated [`GraphSession`] together with
//! its metadata (declared tensor names, selected provider, timing). It is
//! created once via [`ModelSession::load`], reused across many
//! [`ModelSession::run`] calls (never concurrently), and released exactly
//! once via [`ModelSession::release`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::backend::{resolve_provider, ExecutionProvider, ProviderChoice};
use crate::error::EngineError;
use crate::fetch::ArtifactSource;
use crate::runtime::{GraphSession, ModelRuntime, OptimizationLevel, SessionOptions};
use crate::tensor::TensorData;

/// Options for [`ModelSession::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub provider: ProviderChoice,
    pub optimization: OptimizationLevel,
    pub enable_profiling: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            provider: ProviderChoice::Auto,
            optimization: OptimizationLevel::All,
            enable_profiling: false,
        }
    }
}

/// Load and inference timing statistics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Wall-clock milliseconds spent in the last successful `load`.
    pub load_ms: f64,
    /// Latency of the most recent forward pass, in milliseconds.
    pub last_inference_ms: f64,
    /// Running mean forward-pass latency, in milliseconds.
    pub average_inference_ms: f64,
    /// Number of completed forward passes since load.
    pub inference_count: u64,
}

/// An opaque execution handle plus metadata.
pub struct ModelSession {
    runtime: Arc<dyn ModelRuntime>,
    session: Option<Box<dyn GraphSession>>,
    provider: Option<ExecutionProvider>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    stats: SessionStats,
}

impl ModelSession {
    /// Create an unloaded session bound to a graph runtime.
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self {
            runtime,
            session: None,
            provider: None,
            input_names: Vec::new(),
            output_names: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Load a model artifact. See [`ModelSession::load_with_progress`].
    pub fn load(&mut self, source: &ArtifactSource, options: &LoadOptions) -> Result<(), EngineError> {
        self.load_with_progress(source, options, |_, _| {})
    }

    /// Load a model artifact, reporting fetch progress for URI sources.
    ///
    /// `ProviderChoice::Auto` resolves through the capability probe. If
    /// instantiation fails while the provider was auto-resolved to the
    /// accelerated choice, the load retries once on the baseline provider
    /// before propagating the failure; an explicitly requested provider
    /// propagates immediately.
    pub fn load_with_progress(
        &mut self,
        source: &ArtifactSource,
        options: &LoadOptions,
        progress: impl Fn(u64, u64),
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let bytes = source.resolve(&progress)?;
        let auto_resolved = options.provider == ProviderChoice::Auto;
        let provider = resolve_provider(options.provider);
        self.instantiate(&bytes, options, provider, auto_resolved, started)
    }

    fn instantiate(
        &mut self,
        bytes: &[u8],
        options: &LoadOptions,
        provider: ExecutionProvider,
        auto_resolved: bool,
        started: Instant,
    ) -> Result<(), EngineError> {
        let session_options = SessionOptions {
            optimization: options.optimization,
            enable_profiling: options.enable_profiling,
            ..SessionOptions::for_provider(provider)
        };

        let (session, provider) = match self.runtime.instantiate(bytes, &session_options) {
            Ok(session) => (session, provider),
            Err(err) if auto_resolved && provider == ExecutionProvider::Gpu => {
                warn!(
                    error = %err,
                    "Accelerated instantiation failed, retrying on baseline provider"
                );
                let fallback = SessionOptions {
                    optimization: options.optimization,
                    enable_profiling: options.enable_profiling,
                    ..SessionOptions::for_provider(ExecutionProvider::Cpu)
                };
                (
                    self.runtime.instantiate(bytes, &fallback)?,
                    ExecutionProvider::Cpu,
                )
            }
            Err(err) => return Err(err),
        };

        self.input_names = session.input_names().to_vec();
        self.output_names = session.output_names().to_vec();
        self.provider = Some(provider);
        self.session = Some(session);
        self.stats = SessionStats {
            load_ms: started.elapsed().as_secs_f64() * 1000.0,
            ..SessionStats::default()
        };

        info!(
            provider = %provider,
            load_ms = self.stats.load_ms,
            inputs = ?self.input_names,
            outputs = ?self.output_names,
            "Model session loaded"
        );
        Ok(())
    }

    /// Execute one forward pass and update the running statistics.
    pub fn run(
        &mut self,
        inputs: &HashMap<String, TensorData>,
    ) -> Result<HashMap<String, TensorData>, EngineError> {
        let session = self
            .session
            .as_mut()
            .ok_or(EngineError::NotReady("session not loaded"))?;

        let started = Instant::now();
        let outputs = session.run(inputs)?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let n = self.stats.inference_count + 1;
        self.stats.average_inference_ms =
            (self.stats.average_inference_ms * (n - 1) as f64 + elapsed_ms) / n as f64;
        self.stats.last_inference_ms = elapsed_ms;
        self.stats.inference_count = n;

        Ok(outputs)
    }

    /// Free the session handle and clear metadata. Idempotent; safe before
    /// any load.
    pub fn release(&mut self) {
        if self.session.take().is_some() {
            info!("Model session released");
        }
        self.provider = None;
        self.input_names.clear();
        self.output_names.clear();
        self.stats = SessionStats::default();
    }

    /// True iff loaded and not released.
    pub fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    /// The provider the loaded session executes on.
    pub fn provider(&self) -> Option<ExecutionProvider> {
        self.provider
    }

    /// Declared input tensor names of the loaded graph.
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Declared output tensor names of the loaded graph.
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Current timing statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock runtime: fails instantiation on configured providers and records
    /// the options of every attempt.
    struct MockRuntime {
        fail_on_gpu: bool,
        attempts: AtomicUsize,
    }

    impl MockRuntime {
        fn new() -> Self {
            Self {
                fail_on_gpu: false,
                attempts: AtomicUsize::new(0),
            }
        }

        fn failing_gpu() -> Self {
            Self {
                fail_on_gpu: true,
                ..Self::new()
            }
        }
    }

    impl ModelRuntime for MockRuntime {
        fn instantiate(
            &self,
            _graph: &[u8],
            options: &SessionOptions,
        ) -> Result<Box<dyn GraphSession>, EngineError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_gpu && options.provider == ExecutionProvider::Gpu {
                return Err(EngineError::Load("instantiation refused".to_string()));
            }
            Ok(Box::new(MockSession {
                input_names: vec!["input_ids".to_string(), "attention_mask".to_string()],
                output_names: vec!["logits".to_string()],
            }))
        }
    }

    struct MockSession {
        input_names: Vec<String>,
        output_names: Vec<String>,
    }

    impl GraphSession for MockSession {
        fn input_names(&self) -> &[String] {
            &self.input_names
        }

        fn output_names(&self) -> &[String] {
            &self.output_names
        }

        fn run(
            &mut self,
            _inputs: &HashMap<String, TensorData>,
        ) -> Result<HashMap<String, TensorData>, EngineError> {
            let mut outputs = HashMap::new();
            outputs.insert(
                "logits".to_string(),
                TensorData::from_f32(vec![1, 1, 2], vec![0.0, 1.0]),
            );
            Ok(outputs)
        }
    }

    fn bytes_source() -> ArtifactSource {
        ArtifactSource::Bytes(vec![0u8; 4])
    }

    #[test]
    fn test_load_records_metadata() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();
        assert!(session.is_ready());
        assert_eq!(session.input_names(), &["input_ids", "attention_mask"]);
        assert_eq!(session.output_names(), &["logits"]);
        assert!(session.provider().is_some());
        assert!(session.stats().load_ms >= 0.0);
    }

    #[test]
    fn test_auto_resolved_gpu_failure_retries_on_cpu() {
        let runtime = Arc::new(MockRuntime::failing_gpu());
        let mut session = ModelSession::new(runtime.clone());
        // Force the auto-resolved accelerated path without a real probe.
        session
            .instantiate(
                &[0u8; 4],
                &LoadOptions::default(),
                ExecutionProvider::Gpu,
                true,
                Instant::now(),
            )
            .unwrap();
        assert_eq!(runtime.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(session.provider(), Some(ExecutionProvider::Cpu));
        assert!(session.is_ready());
    }

    #[test]
    fn test_explicit_gpu_failure_does_not_retry() {
        let runtime = Arc::new(MockRuntime::failing_gpu());
        let mut session = ModelSession::new(runtime.clone());
        let err = session
            .instantiate(
                &[0u8; 4],
                &LoadOptions {
                    provider: ProviderChoice::Gpu,
                    ..LoadOptions::default()
                },
                ExecutionProvider::Gpu,
                false,
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
        assert_eq!(runtime.attempts.load(Ordering::SeqCst), 1);
        assert!(!session.is_ready());
    }

    #[test]
    fn test_forced_probe_failure_auto_load_uses_baseline() {
        // With the probe degraded (no `gpu` feature in test builds), an auto
        // load must complete on the baseline provider and report it.
        #[cfg(not(feature = "gpu"))]
        {
            let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
            session
                .load(&bytes_source(), &LoadOptions::default())
                .unwrap();
            assert_eq!(session.provider(), Some(ExecutionProvider::Cpu));
        }
    }

    #[test]
    fn test_run_before_load_is_not_ready() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        let err = session.run(&HashMap::new()).unwrap_err();
        assert!(matches!(err, EngineError::NotReady(_)));
    }

    #[test]
    fn test_run_updates_statistics() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();

        for expected in 1..=3u64 {
            session.run(&HashMap::new()).unwrap();
            assert_eq!(session.stats().inference_count, expected);
        }
        assert!(session.stats().last_inference_ms >= 0.0);
        assert!(session.stats().average_inference_ms >= 0.0);
    }

    #[test]
    fn test_running_mean_formula() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();

        // Drive the formula directly: avg after simulated runs must follow
        // new_avg = (old_avg * (n-1) + latest) / n.
        session.stats.average_inference_ms = 10.0;
        session.stats.inference_count = 2;
        let old = session.stats.clone();
        session.run(&HashMap::new()).unwrap();
        let stats = session.stats();
        let expected = (old.average_inference_ms * old.inference_count as f64
            + stats.last_inference_ms)
            / stats.inference_count as f64;
        assert!((stats.average_inference_ms - expected).abs() < 1e-9);
        assert_eq!(stats.inference_count, 3);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        // Safe before any load.
        session.release();
        assert!(!session.is_ready());

        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();
        assert!(session.is_ready());

        session.release();
        assert!(!session.is_ready());
        assert!(session.provider().is_none());
        assert!(session.input_names().is_empty());
        assert_eq!(session.stats().inference_count, 0);

        session.release();
        assert!(!session.is_ready());
    }

    #[test]
    fn test_run_after_release_is_not_ready() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();
        session.release();
        assert!(matches!(
            session.run(&HashMap::new()),
            Err(EngineError::NotReady(_))
        ));
    }

    #[test]
    fn test_reload_after_release() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();
        session.release();
        session
            .load(&bytes_source(), &LoadOptions::default())
            .unwrap();
        assert!(session.is_ready());
    }

    #[test]
    fn test_load_propagates_invalid_source() {
        let mut session = ModelSession::new(Arc::new(MockRuntime::new()));
        let err = session
            .load(
                &ArtifactSource::uri("ftp://host/model.bin"),
                &LoadOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSource(_)));
    }
}
