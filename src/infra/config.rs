// src/infra/config.rs — Configuration loading (TOML)

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub domain: DomainConfig,

    #[serde(default)]
    pub closed_loop: ClosedLoopConfig,

    #[serde(default)]
    pub consult: ConsultConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub continuous: ContinuousConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub tuner: TunerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub primary_count: usize,
    pub primary_max: u32,
    pub secondary_max: u32,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            primary_count: 6,
            primary_max: 33,
            secondary_max: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClosedLoopConfig {
    /// `<= 0` means unlimited by count.
    pub max_attempts_per_issue: i64,
    pub max_seconds_per_issue: Option<f64>,
    pub concurrency_limit: usize,
    /// Pause between rounds; 0 disables.
    pub sleep_interval_ms: u64,
    /// Backtest seed. `None` runs in live mode with entropy.
    pub seed: Option<u64>,
}

impl Default for ClosedLoopConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_issue: 120,
            max_seconds_per_issue: None,
            concurrency_limit: 1,
            sleep_interval_ms: 0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultConfig {
    pub enabled: bool,
    /// Consult once every `interval` attempts.
    pub interval: u32,
    pub min_interval_secs: f64,
    pub timeout_secs: f64,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    /// Recent attempts quoted in the prompt context.
    pub recent_attempts: usize,
}

impl Default for ConsultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 12,
            min_interval_secs: 10.0,
            timeout_secs: 30.0,
            base_url: "https://api.deepseek.com/v1".into(),
            model: "deepseek-chat".into(),
            api_key_env: "DEEPSEEK_API_KEY".into(),
            recent_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub temperature_primary: f64,
    pub temperature_secondary: f64,
    pub top_p_primary: f64,
    pub top_p_secondary: f64,
    pub alpha_primary: f64,
    pub alpha_secondary: f64,
    pub enforce_region_coverage: bool,
    pub region_buckets: Vec<[u32; 2]>,
    pub diversify: bool,
    pub max_overlap: usize,
    pub batch_retry_cap: usize,
    pub max_batch: usize,
    /// Trailing issues used for dynamic weights.
    pub weight_window: usize,
    /// Apply fusion parameters stored alongside tuned weights.
    pub use_tuned: bool,
    /// Bias-score local search over batch candidates before rescoring.
    pub refine: bool,
    pub refine_iters: usize,
    pub refine_topk: usize,
    pub rescore: bool,
    pub rescore_model_mix: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            temperature_primary: 1.0,
            temperature_secondary: 1.0,
            top_p_primary: 1.0,
            top_p_secondary: 1.0,
            alpha_primary: 0.1,
            alpha_secondary: 0.1,
            enforce_region_coverage: true,
            region_buckets: vec![[1, 11], [12, 22], [23, 33]],
            diversify: true,
            max_overlap: 3,
            batch_retry_cap: 50,
            max_batch: 50,
            weight_window: 50,
            use_tuned: true,
            refine: true,
            refine_iters: 3,
            refine_topk: 5,
            rescore: true,
            rescore_model_mix: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GammaConfig {
    pub primary: f64,
    pub secondary: f64,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            primary: 1.0,
            secondary: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisWeights {
    pub year: f64,
    pub month: f64,
    pub day: f64,
    pub hour: f64,
    pub season: f64,
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self {
            year: 1.0,
            month: 1.0,
            day: 1.5,
            hour: 1.2,
            season: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub jitter: f64,
    pub swap_base: f64,
    pub swap_cap: f64,
    /// Synthetic draw time of issue 0 in backtests.
    pub anchor: DateTime<Utc>,
    pub cadence_hours: f64,
    pub axis_defaults: AxisWeights,
    pub gamma: BTreeMap<String, GammaConfig>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            jitter: 0.02,
            swap_base: 0.2,
            swap_cap: 0.9,
            anchor: Utc
                .with_ymd_and_hms(2020, 1, 2, 21, 15, 0)
                .single()
                .unwrap_or_default(),
            cadence_hours: 56.0,
            axis_defaults: AxisWeights::default(),
            gamma: BTreeMap::new(),
        }
    }
}

impl ScoringConfig {
    pub fn gamma_for(&self, strategy_id: &str) -> GammaConfig {
        self.gamma.get(strategy_id).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub learn: bool,
    pub decay: f64,
    pub boost_fused: f64,
    pub boost_candidate: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            learn: true,
            decay: 0.999,
            boost_fused: 0.01,
            boost_candidate: 0.002,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    pub tick_interval_secs: f64,
    pub candidates: usize,
    pub max_lines: usize,
    pub max_ticks: Option<u64>,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60.0,
            candidates: 5,
            max_lines: 2000,
            max_ticks: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub enabled: bool,
    /// Most recent records used for frequencies; 0 = all.
    pub window: usize,
    pub smoothing: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 0,
            smoothing: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Share of the tuning score taken by the primary hit rate.
    pub primary_share: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self { primary_share: 0.7 }
    }
}

/// Seconds setting as a `Duration`; negatives clamp to zero, values that
/// do not fit (NaN, infinite, overflow) yield `fallback`.
pub fn secs_or(secs: f64, fallback: Duration) -> Duration {
    if secs.is_nan() {
        return fallback;
    }
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(fallback)
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.domain.primary_count, 6);
        assert_eq!(c.domain.primary_max, 33);
        assert_eq!(c.closed_loop.max_attempts_per_issue, 120);
        assert_eq!(c.consult.interval, 12);
        assert!(!c.consult.enabled);
        assert_eq!(c.fusion.region_buckets.len(), 3);
        assert_eq!(c.fusion.max_overlap, 3);
        assert!((c.memory.decay - 0.999).abs() < 1e-9);
        assert_eq!(c.continuous.max_lines, 2000);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.closed_loop.concurrency_limit, 1);
        assert!(c.fusion.enforce_region_coverage);
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml_str = r#"
[closed_loop]
max_attempts_per_issue = 5
max_seconds_per_issue = 0.5
seed = 42

[fusion]
temperature_primary = 0.7
region_buckets = [[1, 16], [17, 33]]

[scoring.gamma.stride]
primary = 0.4

[continuous]
max_ticks = 3
"#;
        let c: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(c.closed_loop.max_attempts_per_issue, 5);
        assert_eq!(c.closed_loop.seed, Some(42));
        assert_eq!(c.closed_loop.concurrency_limit, 1);
        assert!((c.fusion.temperature_primary - 0.7).abs() < 1e-9);
        assert!((c.fusion.top_p_primary - 1.0).abs() < 1e-9);
        assert_eq!(c.fusion.region_buckets, vec![[1, 16], [17, 33]]);
        let g = c.scoring.gamma_for("stride");
        assert!((g.primary - 0.4).abs() < 1e-9);
        assert!((g.secondary - 1.0).abs() < 1e-9);
        assert!((c.scoring.gamma_for("cycle").primary - 1.0).abs() < 1e-9);
        assert_eq!(c.continuous.max_ticks, Some(3));
    }

    #[test]
    fn test_secs_or_falls_back_on_unrepresentable() {
        let fallback = Duration::from_secs(60);
        assert_eq!(secs_or(1.5, fallback), Duration::from_millis(1500));
        assert_eq!(secs_or(-3.0, fallback), Duration::ZERO);
        assert_eq!(secs_or(1e20, fallback), fallback);
        assert_eq!(secs_or(f64::INFINITY, fallback), fallback);
        assert_eq!(secs_or(f64::NAN, fallback), fallback);
    }

    #[test]
    fn test_anchor_roundtrips_as_string() {
        let c: Config = toml::from_str("[scoring]\nanchor = \"2024-03-01T20:00:00Z\"\n").unwrap();
        assert_eq!(c.scoring.anchor.to_rfc3339(), "2024-03-01T20:00:00+00:00");
    }
}
