//! Humanized delay generation — normal-shaped message spacing via the
//! Box–Muller transform, so inter-message timing never shows the flat
//! signature of uniform sampling.

use rand::Rng;

use relay_core::config::{ComplianceConfig, TypingConfig};
use relay_core::types::DelayOverride;

/// Pure generator of humanized delays and rate-limit parameters. No mutable
/// state beyond configuration.
#[derive(Debug, Clone, Copy)]
pub struct ComplianceEngine {
    min_delay_ms: u64,
    max_delay_ms: u64,
    max_per_hour: u32,
    max_per_day: u32,
    typing: TypingConfig,
}

impl ComplianceEngine {
    pub fn new(config: ComplianceConfig, typing: TypingConfig) -> Self {
        let (min, max) = normalize(config.min_delay_ms, config.max_delay_ms);
        Self {
            min_delay_ms: min,
            max_delay_ms: max,
            max_per_hour: config.max_per_hour,
            max_per_day: config.max_per_day,
            typing,
        }
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    pub fn delay_range_ms(&self) -> (u64, u64) {
        (self.min_delay_ms, self.max_delay_ms)
    }

    /// Overrides the spacing bounds. Inverted bounds are swapped so
    /// `min <= max` always holds.
    pub fn set_delay_range(&mut self, min_ms: Option<u64>, max_ms: Option<u64>) {
        let min = min_ms.unwrap_or(self.min_delay_ms);
        let max = max_ms.unwrap_or(self.max_delay_ms);
        let (min, max) = normalize(min, max);
        self.min_delay_ms = min;
        self.max_delay_ms = max;
    }

    /// Copy of this engine with a per-dispatch override applied.
    pub fn merged(&self, delay_override: Option<DelayOverride>) -> Self {
        let mut engine = *self;
        if let Some(o) = delay_override {
            engine.set_delay_range(o.min_delay_ms, o.max_delay_ms);
        }
        engine
    }

    /// Post-send spacing delay in `[min, max]`, normal-shaped around the
    /// midpoint. Samples falling outside `[0, 1]` after normalization are
    /// redrawn from scratch rather than clamped, which would pile mass on
    /// the edges.
    pub fn variable_delay_ms(&self) -> u64 {
        let mut rng = rand::thread_rng();
        let n = loop {
            let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            let v: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            let z = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
            let n = z / 10.0 + 0.5;
            if (0.0..=1.0).contains(&n) {
                break n;
            }
        };
        let span = (self.max_delay_ms - self.min_delay_ms) as f64;
        self.min_delay_ms + (n * span).floor() as u64
    }

    /// Simulated typing latency for `text`: one per-character delay drawn
    /// uniformly, multiplied by length, capped so long messages stay
    /// plausible.
    pub fn typing_delay_ms(&self, text: &str) -> u64 {
        let mut rng = rand::thread_rng();
        let per_char = rng.gen_range(self.typing.per_char_min_ms..=self.typing.per_char_max_ms);
        let total = per_char.saturating_mul(text.chars().count() as u64);
        total.min(self.typing.cap_ms)
    }

    /// Uniform jitter in `[min, max]` ms, used for rate-limit resume and
    /// reconnect backoff windows.
    pub fn jitter_ms(&self, min_ms: u64, max_ms: u64) -> u64 {
        let (min, max) = normalize(min_ms, max_ms);
        rand::thread_rng().gen_range(min..=max)
    }
}

fn normalize(min: u64, max: u64) -> (u64, u64) {
    if min <= max {
        (min, max)
    } else {
        (max, min)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use relay_core::config::ComplianceConfig;

    fn engine(min_ms: u64, max_ms: u64) -> ComplianceEngine {
        ComplianceEngine::new(
            ComplianceConfig {
                min_delay_ms: min_ms,
                max_delay_ms: max_ms,
                ..ComplianceConfig::default()
            },
            TypingConfig::default(),
        )
    }

    #[test]
    fn test_variable_delay_within_bounds() {
        let engine = engine(2_000, 9_000);
        for _ in 0..5_000 {
            let d = engine.variable_delay_ms();
            assert!((2_000..=9_000).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_variable_delay_clusters_around_midpoint() {
        let engine = engine(0, 10_000);
        let samples: Vec<u64> = (0..20_000).map(|_| engine.variable_delay_ms()).collect();

        // Middle fifth of the range. A uniform draw would put ~20% of the
        // mass here; the normal shape concentrates far more.
        let middle = samples
            .iter()
            .filter(|&&d| (4_000..6_000).contains(&d))
            .count();
        let fraction = middle as f64 / samples.len() as f64;
        assert!(
            fraction > 0.5,
            "expected >50% of samples in the middle fifth, got {fraction:.3}"
        );
    }

    #[test]
    fn test_variable_delay_degenerate_range() {
        let engine = engine(5_000, 5_000);
        assert_eq!(engine.variable_delay_ms(), 5_000);
    }

    #[test]
    fn test_set_delay_range_swaps_inverted_bounds() {
        let mut engine = engine(1_000, 2_000);
        engine.set_delay_range(Some(8_000), Some(3_000));
        assert_eq!(engine.delay_range_ms(), (3_000, 8_000));
    }

    #[test]
    fn test_merged_override_partial() {
        let base = engine(3_000, 8_000);
        let merged = base.merged(Some(DelayOverride {
            min_delay_ms: Some(1_000),
            max_delay_ms: None,
        }));
        assert_eq!(merged.delay_range_ms(), (1_000, 8_000));
        // Base engine untouched.
        assert_eq!(base.delay_range_ms(), (3_000, 8_000));
    }

    #[test]
    fn test_typing_delay_scales_with_length() {
        let engine = engine(0, 1);
        // Bounds implied by the 100-150ms per-char window.
        let short = engine.typing_delay_ms("hi");
        assert!((200..=300).contains(&short));
        let medium = engine.typing_delay_ms(&"x".repeat(50));
        assert!((5_000..=7_500).contains(&medium));
        assert!(short < medium);
    }

    #[test]
    fn test_typing_delay_capped() {
        let engine = engine(0, 1);
        let long = engine.typing_delay_ms(&"x".repeat(10_000));
        assert_eq!(long, 15_000);
    }

    #[test]
    fn test_jitter_within_window() {
        let engine = engine(0, 1);
        for _ in 0..1_000 {
            let j = engine.jitter_ms(3_000, 12_000);
            assert!((3_000..=12_000).contains(&j));
        }
    }
}
