//! Two-tier metric estimation: a primary estimator with a declared fallback.
//!
//! Every scorer exposes an [`Estimator`]. [`run_resilient`] tries the primary
//! estimate and, if it reports an error, logs it and substitutes the fallback.
//! The caller always receives a value of the same shape; only the
//! [`Provenance`] differs.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::MetricError;

/// A metric with a primary and a fallback estimator.
pub trait Estimator {
    /// The estimate produced by both tiers.
    type Output;

    /// Short metric name used in logs (e.g. `"tsr"`).
    fn metric(&self) -> &'static str;

    /// Full estimate.
    ///
    /// # Errors
    ///
    /// Returns a `MetricError` when the inputs cannot support the full estimate.
    fn primary(&self) -> Result<Self::Output, MetricError>;

    /// Simpler estimate that cannot fail on well-formed input.
    fn fallback(&self) -> Self::Output;
}

/// Which tier produced an estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Provenance {
    /// The primary estimator succeeded.
    Primary,
    /// The primary estimator failed and the fallback was used.
    Fallback {
        /// Why the primary estimator failed.
        reason: String,
    },
}

impl Provenance {
    /// Returns true if the fallback produced the estimate.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// An estimate together with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate<T> {
    /// The estimated value.
    pub value: T,
    /// Which tier produced it.
    pub provenance: Provenance,
}

impl<T> Estimate<T> {
    /// Discards the provenance.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Runs the primary estimator, substituting the fallback on error.
///
/// # Examples
///
/// ```
/// use agent_metrics::{run_resilient, Estimator, MetricError};
///
/// struct AlwaysFails;
///
/// impl Estimator for AlwaysFails {
///     type Output = f64;
///     fn metric(&self) -> &'static str { "demo" }
///     fn primary(&self) -> Result<f64, MetricError> { Err(MetricError::CriteriaUnavailable) }
///     fn fallback(&self) -> f64 { 0.5 }
/// }
///
/// let estimate = run_resilient(&AlwaysFails);
/// assert!((estimate.value - 0.5).abs() < f64::EPSILON);
/// assert!(estimate.provenance.is_fallback());
/// ```
#[must_use]
pub fn run_resilient<E: Estimator>(estimator: &E) -> Estimate<E::Output> {
    match estimator.primary() {
        Ok(value) => {
            debug!(metric = estimator.metric(), "primary estimate computed");
            Estimate {
                value,
                provenance: Provenance::Primary,
            }
        }
        Err(e) => {
            warn!(
                metric = estimator.metric(),
                error = %e,
                "primary estimate failed, falling back to simple estimate"
            );
            Estimate {
                value: estimator.fallback(),
                provenance: Provenance::Fallback {
                    reason: e.to_string(),
                },
            }
        }
    }
}
