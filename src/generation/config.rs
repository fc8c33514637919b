//! Generation configuration and per-call overrides.
//!
//! A controller persists one [`GenerationConfig`] of defaults; callers hand
//! in [`GenerationOverrides`] whose set fields shallow-merge over those
//! defaults. No validation happens beyond types: out-of-range values take
//! effect literally in the decoding algorithm (`top_p >= 1.0` disables
//! nucleus filtering, `top_k <= 0` disables top-k, `repetition_penalty ==
//! 1.0` is a no-op).

use serde::{Deserialize, Serialize};

/// Resolved generation parameters.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Upper bound on decode steps.
    pub max_new_tokens: usize,
    /// Logit divisor when sampling; `<= 0` forces greedy decoding.
    pub temperature: f32,
    /// Keep only the `top_k` most probable candidates; `<= 0` disables.
    pub top_k: i32,
    /// Nucleus threshold; `>= 1.0` disables.
    pub top_p: f32,
    /// Penalty over ids already generated; `1.0` is a no-op.
    pub repetition_penalty: f32,
    /// `false` selects the arg-max deterministically.
    pub do_sample: bool,
    /// Extra stop ids joined with the end-of-sequence id.
    pub stop_tokens: Vec<u32>,
    /// Seed for reproducible sampling.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
            do_sample: false,
            stop_tokens: Vec::new(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Produce a config with the overrides' set fields applied.
    pub fn apply(&self, overrides: &GenerationOverrides) -> GenerationConfig {
        let mut merged = self.clone();
        merged.merge_from(overrides);
        merged
    }

    /// Shallow-merge the overrides' set fields into this config in place.
    pub fn merge_from(&mut self, overrides: &GenerationOverrides) {
        if let Some(v) = overrides.max_new_tokens {
            self.max_new_tokens = v;
        }
        if let Some(v) = overrides.temperature {
            self.temperature = v;
        }
        if let Some(v) = overrides.top_k {
            self.top_k = v;
        }
        if let Some(v) = overrides.top_p {
            self.top_p = v;
        }
        if let Some(v) = overrides.repetition_penalty {
            self.repetition_penalty = v;
        }
        if let Some(v) = overrides.do_sample {
            self.do_sample = v;
        }
        if let Some(v) = &overrides.stop_tokens {
            self.stop_tokens = v.clone();
        }
        if let Some(v) = overrides.seed {
            self.seed = Some(v);
        }
    }
}

/// Caller-provided overrides; unset fields keep the persisted defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOverrides {
    pub max_new_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub top_k: Option<i32>,
    pub top_p: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub do_sample: Option<bool>,
    #[serde(default)]
    pub stop_tokens: Option<Vec<u32>>,
    pub seed: Option<u64>,
}

impl GenerationOverrides {
    /// Overrides forcing deterministic greedy decoding.
    pub fn greedy() -> Self {
        Self {
            do_sample: Some(false),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_new_tokens, 256);
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.top_k, 0);
        assert_eq!(config.top_p, 1.0);
        assert_eq!(config.repetition_penalty, 1.0);
        assert!(!config.do_sample);
        assert!(config.stop_tokens.is_empty());
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_apply_merges_set_fields_only() {
        let defaults = GenerationConfig::default();
        let merged = defaults.apply(&GenerationOverrides {
            temperature: Some(0.5),
            top_k: Some(40),
            ..Default::default()
        });
        assert_eq!(merged.temperature, 0.5);
        assert_eq!(merged.top_k, 40);
        assert_eq!(merged.max_new_tokens, defaults.max_new_tokens);
        assert_eq!(merged.top_p, defaults.top_p);
    }

    #[test]
    fn test_apply_does_not_mutate_defaults() {
        let defaults = GenerationConfig::default();
        let _ = defaults.apply(&GenerationOverrides {
            max_new_tokens: Some(1),
            ..Default::default()
        });
        assert_eq!(defaults.max_new_tokens, 256);
    }

    #[test]
    fn test_out_of_range_values_take_effect_literally() {
        let merged = GenerationConfig::default().apply(&GenerationOverrides {
            temperature: Some(-3.0),
            top_p: Some(4.5),
            top_k: Some(-7),
            ..Default::default()
        });
        assert_eq!(merged.temperature, -3.0);
        assert_eq!(merged.top_p, 4.5);
        assert_eq!(merged.top_k, -7);
    }

    #[test]
    fn test_merge_from_replaces_stop_tokens() {
        let mut config = GenerationConfig {
            stop_tokens: vec![1, 2],
            ..Default::default()
        };
        config.merge_from(&GenerationOverrides {
            stop_tokens: Some(vec![9]),
            ..Default::default()
        });
        assert_eq!(config.stop_tokens, vec![9]);

        config.merge_from(&GenerationOverrides::default());
        assert_eq!(config.stop_tokens, vec![9]);
    }

    #[test]
    fn test_overrides_deserialize_from_json() {
        let overrides: GenerationOverrides =
            serde_json::from_str(r#"{"temperature": 0.8, "stop_tokens": [5, 6]}"#).unwrap();
        assert_eq!(overrides.temperature, Some(0.8));
        assert_eq!(overrides.stop_tokens, Some(vec![5, 6]));
        assert!(overrides.top_k.is_none());
    }
}
