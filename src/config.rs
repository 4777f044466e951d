//! Configuration for metric computation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::MetricError;
use crate::success::ChannelWeights;

/// Environment variable overriding [`MetricsConfig::tcrr_window_size`].
pub const ENV_TCRR_WINDOW_SIZE: &str = "AGENT_METRICS_TCRR_WINDOW_SIZE";

/// Environment variable overriding [`MetricsConfig::tcrr_batch_threshold`].
pub const ENV_TCRR_BATCH_THRESHOLD: &str = "AGENT_METRICS_TCRR_BATCH_THRESHOLD";

/// Default judge model for goal-shift recovery.
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";

/// Configuration for the metrics engine.
///
/// Controls redundancy windows, blend weights and judge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Previous assistant turns considered for window redundancy.
    ///
    /// Default: 3
    pub tcrr_window_size: usize,

    /// Identical calls allowed within one turn before the excess is redundant.
    ///
    /// Default: 2
    pub tcrr_batch_threshold: usize,

    /// TSR channel weights.
    ///
    /// Default: 0.5 / 0.3 / 0.2
    pub tsr_weights: ChannelWeights,

    /// Weight of tool correctness in the primary TUE score.
    ///
    /// Default: 0.6
    pub tue_correctness_weight: f64,

    /// Weight of parameter accuracy in the primary TUE score.
    ///
    /// Default: 0.4
    pub tue_param_weight: f64,

    /// Percentile of observed costs and latencies used as the TUE fallback cap.
    ///
    /// Default: 95.0
    pub cost_percentile: f64,

    /// Distance from 1.0 within which a reward counts as a pass^k success.
    ///
    /// Default: 1e-6
    pub success_tolerance: f64,

    /// Judge model used when the results do not name one.
    ///
    /// Default: `gpt-4o-mini`
    pub judge_model: String,

    /// Judge arguments used when the results do not provide any.
    ///
    /// Default: `{"temperature": 0.0}`
    pub judge_args: Map<String, Value>,

    /// Messages before a goal shift included in the judge window.
    ///
    /// Default: 2
    pub judge_context_before: usize,

    /// Messages after a goal shift included in the judge window.
    ///
    /// Default: 12
    pub judge_window_after: usize,

    /// TCRR ratio above which a task is reported as problematic.
    ///
    /// Default: 0.3
    pub problematic_tcrr_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let mut judge_args = Map::new();
        judge_args.insert("temperature".to_string(), Value::from(0.0));
        Self {
            tcrr_window_size: 3,
            tcrr_batch_threshold: 2,
            tsr_weights: ChannelWeights::default(),
            tue_correctness_weight: 0.6,
            tue_param_weight: 0.4,
            cost_percentile: 95.0,
            success_tolerance: 1e-6,
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            judge_args,
            judge_context_before: 2,
            judge_window_after: 12,
            problematic_tcrr_threshold: 0.3,
        }
    }
}

impl MetricsConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration with defaults overlaid by environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlays values read through `lookup`.
    ///
    /// Values that do not parse are logged and ignored.
    #[must_use]
    pub fn overlay_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_usize(&lookup, ENV_TCRR_WINDOW_SIZE) {
            self.tcrr_window_size = v;
        }
        if let Some(v) = parse_usize(&lookup, ENV_TCRR_BATCH_THRESHOLD) {
            self.tcrr_batch_threshold = v;
        }
        self
    }

    /// Sets the TCRR window size.
    #[must_use]
    pub const fn with_tcrr_window_size(mut self, window_size: usize) -> Self {
        self.tcrr_window_size = window_size;
        self
    }

    /// Sets the TCRR batch threshold.
    #[must_use]
    pub const fn with_tcrr_batch_threshold(mut self, threshold: usize) -> Self {
        self.tcrr_batch_threshold = threshold;
        self
    }

    /// Sets the TSR channel weights.
    #[must_use]
    pub const fn with_tsr_weights(mut self, weights: ChannelWeights) -> Self {
        self.tsr_weights = weights;
        self
    }

    /// Sets the primary TUE weights.
    #[must_use]
    pub const fn with_tue_weights(mut self, correctness: f64, params: f64) -> Self {
        self.tue_correctness_weight = correctness;
        self.tue_param_weight = params;
        self
    }

    /// Sets the default judge model.
    #[must_use]
    pub fn with_judge_model(mut self, model: impl Into<String>) -> Self {
        self.judge_model = model.into();
        self
    }

    /// Sets the default judge arguments.
    #[must_use]
    pub fn with_judge_args(mut self, args: Map<String, Value>) -> Self {
        self.judge_args = args;
        self
    }

    /// Sets the judge window around each goal shift.
    #[must_use]
    pub const fn with_judge_window(mut self, before: usize, after: usize) -> Self {
        self.judge_context_before = before;
        self.judge_window_after = after;
        self
    }

    /// Checks that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<(), MetricError> {
        if self.tcrr_window_size == 0 {
            return Err(MetricError::InvalidConfig {
                field: "tcrr_window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.cost_percentile > 0.0 && self.cost_percentile <= 100.0) {
            return Err(MetricError::InvalidConfig {
                field: "cost_percentile",
                reason: format!("{} is outside (0, 100]", self.cost_percentile),
            });
        }
        self.validate_shared()
    }

    /// Checks only the values every metric depends on.
    ///
    /// Metric-specific values are checked by the estimator that uses them,
    /// so a bad window size degrades TCRR alone.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::InvalidConfig` for an unusable `success_tolerance`.
    pub fn validate_shared(&self) -> Result<(), MetricError> {
        if !(self.success_tolerance >= 0.0 && self.success_tolerance.is_finite()) {
            return Err(MetricError::InvalidConfig {
                field: "success_tolerance",
                reason: format!("{} is not a finite non-negative number", self.success_tolerance),
            });
        }
        Ok(())
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring unparseable metrics setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.tcrr_window_size, 3);
        assert_eq!(config.tcrr_batch_threshold, 2);
        assert_eq!(config.judge_model, "gpt-4o-mini");
        assert_eq!(config.judge_args.get("temperature"), Some(&Value::from(0.0)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = MetricsConfig::new()
            .with_tcrr_window_size(5)
            .with_tcrr_batch_threshold(1)
            .with_judge_model("judge-x")
            .with_judge_window(1, 4);
        assert_eq!(config.tcrr_window_size, 5);
        assert_eq!(config.tcrr_batch_threshold, 1);
        assert_eq!(config.judge_model, "judge-x");
        assert_eq!(config.judge_window_after, 4);
    }

    #[test]
    fn env_overlay() {
        let config = MetricsConfig::default().overlay_env(|key| match key {
            ENV_TCRR_WINDOW_SIZE => Some(" 7 ".to_string()),
            ENV_TCRR_BATCH_THRESHOLD => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.tcrr_window_size, 7);
        assert_eq!(config.tcrr_batch_threshold, 2);
    }

    #[test]
    fn zero_window_is_invalid() {
        let err = MetricsConfig::default()
            .with_tcrr_window_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            MetricError::InvalidConfig {
                field: "tcrr_window_size",
                ..
            }
        ));
    }

    #[test]
    fn shared_validation_ignores_metric_fields() {
        let config = MetricsConfig {
            cost_percentile: 150.0,
            ..MetricsConfig::default().with_tcrr_window_size(0)
        };
        assert!(config.validate().is_err());
        assert!(config.validate_shared().is_ok());

        let bad_tolerance = MetricsConfig {
            success_tolerance: f64::NAN,
            ..MetricsConfig::default()
        };
        assert!(bad_tolerance.validate_shared().is_err());
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: MetricsConfig =
            serde_json::from_str(r#"{"tcrr_window_size": 4, "judge_model": "local"}"#).unwrap();
        assert_eq!(config.tcrr_window_size, 4);
        assert_eq!(config.judge_model, "local");
        assert_eq!(config.tcrr_batch_threshold, 2);
    }
}
