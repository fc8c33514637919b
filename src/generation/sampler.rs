//! Next-token selection over a logits vector.
//!
//! Greedy arg-max when sampling is disabled or temperature is non-positive;
//! otherwise temperature scaling, a numerically stable softmax (maximum
//! subtracted before exponentiating), descending-probability ordering, top-k
//! and top-p truncation, renormalization, and a seeded uniform draw. A
//! XorShift generator keeps sampling reproducible without a `rand`
//! dependency.

use std::collections::HashSet;

use super::config::GenerationConfig;

/// XorShift64 generator for reproducible draws.
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Create a generator from a seed. Seed 0 is adjusted to 1.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// A value in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Apply the repetition penalty over the distinct ids already present in the
/// running sequence: positive logits are divided by the penalty, all others
/// multiplied. Logits of unseen ids are untouched.
pub fn apply_repetition_penalty(logits: &mut [f32], prior_ids: &[u32], penalty: f32) {
    let distinct: HashSet<u32> = prior_ids.iter().copied().collect();
    for id in distinct {
        let index = id as usize;
        if let Some(logit) = logits.get_mut(index) {
            *logit = if *logit > 0.0 {
                *logit / penalty
            } else {
                *logit * penalty
            };
        }
    }
}

/// The index of the maximum logit; the first occurrence wins on ties.
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best_idx = 0u32;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i as u32;
        }
    }
    best_idx
}

/// Select the next token id from a logits vector.
pub fn select_token(logits: &[f32], config: &GenerationConfig, rng: &mut XorShiftRng) -> u32 {
    if logits.is_empty() {
        return 0;
    }

    if !config.do_sample || config.temperature <= 0.0 {
        return argmax(logits);
    }

    // Temperature scaling, then a stable softmax over the full vocabulary.
    let scaled: Vec<f32> = logits.iter().map(|&l| l / config.temperature).collect();
    let max_logit = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut candidates: Vec<(u32, f32)> = scaled
        .iter()
        .enumerate()
        .map(|(i, &l)| (i as u32, (l - max_logit).exp()))
        .collect();
    let sum: f32 = candidates.iter().map(|c| c.1).sum();
    for c in &mut candidates {
        c.1 /= sum;
    }

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    if config.top_k > 0 && (config.top_k as usize) < candidates.len() {
        candidates.truncate(config.top_k as usize);
    }

    if config.top_p < 1.0 {
        nucleus_truncate(&mut candidates, config.top_p);
    }

    // Renormalize the retained candidates to sum to 1.
    let retained_sum: f32 = candidates.iter().map(|c| c.1).sum();
    for c in &mut candidates {
        c.1 /= retained_sum;
    }

    // Walk the retained list; first candidate whose cumulative probability
    // exceeds the draw wins. Floating-point rounding can leave the draw
    // unreached; the highest-probability candidate is the fallback.
    let draw = rng.next_f32();
    let mut cumulative = 0.0f32;
    for &(idx, p) in &candidates {
        cumulative += p;
        if cumulative > draw {
            return idx;
        }
    }
    candidates.first().map(|c| c.0).unwrap_or(0)
}

/// Keep the smallest descending-probability prefix whose cumulative
/// probability is `>= top_p`.
fn nucleus_truncate(candidates: &mut Vec<(u32, f32)>, top_p: f32) {
    let mut cumulative = 0.0f32;
    let mut cutoff = candidates.len();
    for (i, &(_, p)) in candidates.iter().enumerate() {
        cumulative += p;
        if cumulative >= top_p {
            cutoff = i + 1;
            break;
        }
    }
    candidates.truncate(cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampling_config() -> GenerationConfig {
        GenerationConfig {
            do_sample: true,
            temperature: 1.0,
            ..Default::default()
        }
    }

    // ===== Repetition penalty =====

    #[test]
    fn test_penalty_of_one_is_identity() {
        let original = vec![2.5f32, -1.25, 0.0, 7.75, -0.5];
        let mut logits = original.clone();
        apply_repetition_penalty(&mut logits, &[0, 1, 2, 3, 4], 1.0);
        assert_eq!(logits, original);
    }

    #[test]
    fn test_penalty_divides_positive_multiplies_negative() {
        let mut logits = vec![4.0f32, -4.0, 2.0];
        apply_repetition_penalty(&mut logits, &[0, 1], 2.0);
        assert_eq!(logits, vec![2.0, -8.0, 2.0]);
    }

    #[test]
    fn test_penalty_applies_once_per_distinct_id() {
        let mut logits = vec![8.0f32, 1.0];
        apply_repetition_penalty(&mut logits, &[0, 0, 0], 2.0);
        assert_eq!(logits[0], 4.0);
    }

    #[test]
    fn test_penalty_ignores_out_of_range_ids() {
        let mut logits = vec![1.0f32];
        apply_repetition_penalty(&mut logits, &[9], 2.0);
        assert_eq!(logits, vec![1.0]);
    }

    #[test]
    fn test_penalty_zero_logit_multiplied() {
        let mut logits = vec![0.0f32];
        apply_repetition_penalty(&mut logits, &[0], 2.0);
        assert_eq!(logits[0], 0.0);
    }

    // ===== Greedy =====

    #[test]
    fn test_argmax_first_occurrence_wins_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
    }

    #[test]
    fn test_argmax_negative_values() {
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), 1);
    }

    #[test]
    fn test_greedy_when_sampling_disabled() {
        let logits = vec![1.0, 5.0, 2.0];
        let config = GenerationConfig::default();
        let mut rng = XorShiftRng::new(42);
        assert_eq!(select_token(&logits, &config, &mut rng), 1);
    }

    #[test]
    fn test_greedy_when_temperature_non_positive() {
        let logits = vec![1.0, 5.0, 2.0];
        let config = GenerationConfig {
            do_sample: true,
            temperature: 0.0,
            ..Default::default()
        };
        let mut rng = XorShiftRng::new(42);
        assert_eq!(select_token(&logits, &config, &mut rng), 1);

        let config = GenerationConfig {
            temperature: -1.0,
            ..config
        };
        assert_eq!(select_token(&logits, &config, &mut rng), 1);
    }

    #[test]
    fn test_greedy_ignores_rng_state() {
        let logits = vec![0.5, 4.0, 1.0];
        let config = GenerationConfig::default();
        let mut rng1 = XorShiftRng::new(7);
        let mut rng2 = XorShiftRng::new(99);
        assert_eq!(
            select_token(&logits, &config, &mut rng1),
            select_token(&logits, &config, &mut rng2)
        );
    }

    // ===== Sampling =====

    #[test]
    fn test_sampling_same_seed_same_token() {
        let logits = vec![1.0, 2.0, 3.0, 0.5];
        let config = sampling_config();
        let mut rng1 = XorShiftRng::new(42);
        let mut rng2 = XorShiftRng::new(42);
        assert_eq!(
            select_token(&logits, &config, &mut rng1),
            select_token(&logits, &config, &mut rng2)
        );
    }

    #[test]
    fn test_top_k_one_is_effectively_greedy() {
        let logits = vec![1.0, 10.0, 2.0];
        let config = GenerationConfig {
            top_k: 1,
            ..sampling_config()
        };
        let mut rng = XorShiftRng::new(42);
        for _ in 0..50 {
            assert_eq!(select_token(&logits, &config, &mut rng), 1);
        }
    }

    #[test]
    fn test_top_k_zero_or_negative_disables_truncation() {
        let logits = vec![0.0, 0.0, 100.0];
        for top_k in [0, -5] {
            let config = GenerationConfig {
                top_k,
                ..sampling_config()
            };
            let mut rng = XorShiftRng::new(42);
            // With one dominant logit the draw lands on index 2 regardless.
            assert_eq!(select_token(&logits, &config, &mut rng), 2);
        }
    }

    #[test]
    fn test_top_p_tiny_keeps_only_top_candidate() {
        let logits = vec![0.0, 100.0, 0.0];
        let config = GenerationConfig {
            top_p: 0.01,
            ..sampling_config()
        };
        let mut rng = XorShiftRng::new(42);
        for _ in 0..50 {
            assert_eq!(select_token(&logits, &config, &mut rng), 1);
        }
    }

    #[test]
    fn test_top_p_at_or_above_one_disables_truncation() {
        let logits = vec![3.0, 2.0, 1.0];
        let config = GenerationConfig {
            top_p: 1.0,
            ..sampling_config()
        };
        let mut rng = XorShiftRng::new(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            seen.insert(select_token(&logits, &config, &mut rng));
        }
        // All three candidates remain reachable.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_sampled_index_always_in_range() {
        let logits = vec![1.0; 64];
        let config = GenerationConfig {
            top_k: 10,
            top_p: 0.9,
            ..sampling_config()
        };
        let mut rng = XorShiftRng::new(42);
        for _ in 0..200 {
            assert!((select_token(&logits, &config, &mut rng) as usize) < 64);
        }
    }

    #[test]
    fn test_empty_logits_returns_zero() {
        let mut rng = XorShiftRng::new(42);
        assert_eq!(select_token(&[], &sampling_config(), &mut rng), 0);
    }

    #[test]
    fn test_low_temperature_peaks_distribution() {
        let logits = vec![1.0, 2.0, 3.0, 4.0];
        let config = GenerationConfig {
            temperature: 0.01,
            ..sampling_config()
        };
        let mut rng = XorShiftRng::new(42);
        let mut hits = 0;
        for _ in 0..100 {
            if select_token(&logits, &config, &mut rng) == 3 {
                hits += 1;
            }
        }
        assert!(hits > 90, "Low temperature should favor the top token, got {}/100", hits);
    }

    // ===== Nucleus property =====

    /// Softmax of the given logits paired with indices, sorted descending.
    fn sorted_probs(logits: &[f32]) -> Vec<(u32, f32)> {
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut probs: Vec<(u32, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i as u32, (l - max).exp()))
            .collect();
        let sum: f32 = probs.iter().map(|c| c.1).sum();
        for p in &mut probs {
            p.1 /= sum;
        }
        probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        probs
    }

    #[test]
    fn test_nucleus_prefix_is_minimal_and_renormalizes_to_one() {
        let logits = vec![3.0, 1.0, 2.0, 0.5, -1.0];
        let top_p = 0.8;

        let mut retained = sorted_probs(&logits);
        let full = retained.clone();
        nucleus_truncate(&mut retained, top_p);

        // Minimal prefix: cumulative sum reaches top_p only at the last
        // retained entry.
        let cumulative: f32 = retained.iter().map(|c| c.1).sum();
        assert!(cumulative >= top_p);
        if retained.len() > 1 {
            let without_last: f32 = retained[..retained.len() - 1].iter().map(|c| c.1).sum();
            assert!(without_last < top_p);
        }
        // Prefix of the descending ordering, not an arbitrary subset.
        assert_eq!(&full[..retained.len()], &retained[..]);

        // Renormalized probabilities sum to 1.
        let total: f32 = retained.iter().map(|c| c.1).sum::<f32>();
        let renormalized: f32 = retained.iter().map(|c| c.1 / total).sum();
        assert!((renormalized - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nucleus_keeps_everything_when_threshold_high() {
        let mut retained = sorted_probs(&[1.0, 1.0, 1.0]);
        nucleus_truncate(&mut retained, 0.999_999);
        assert_eq!(retained.len(), 3);
    }

    // ===== RNG =====

    #[test]
    fn test_rng_zero_seed_adjusted() {
        let mut rng = XorShiftRng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_rng_f32_range() {
        let mut rng = XorShiftRng::new(42);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v), "out of range: {}", v);
        }
    }

    #[test]
    fn test_rng_sequences_differ_across_seeds() {
        let mut a = XorShiftRng::new(1);
        let mut b = XorShiftRng::new(2);
        let seq_a: Vec<u64> = (0..4).map(|_| a.next_u64()).collect();
        let seq_b: Vec<u64> = (0..4).map(|_| b.next_u64()).collect();
        assert_ne!(seq_a, seq_b);
    }
}
