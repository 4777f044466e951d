//! Error types for the metrics engine.

use thiserror::Error;

/// Top-level error type for metric estimators.
///
/// Estimators return these from their primary path; the resilient executor
/// turns them into logged warnings and substitutes the fallback estimate.
/// Only [`MetricError::InvalidArgument`] is surfaced directly to callers,
/// through [`crate::pass_hat_k`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    /// pass^k requested with more samples than trials.
    #[error("number of trials {num_trials} is less than k {k}")]
    InvalidArgument {
        /// Number of trials available.
        num_trials: usize,
        /// Requested subset size.
        k: usize,
    },
    /// The results contain no simulation runs.
    #[error("results contain no simulations")]
    NoSimulations,
    /// No task carries evaluation criteria.
    #[error("no task carries evaluation criteria")]
    CriteriaUnavailable,
    /// A simulation references a task that is not in the task set.
    #[error("simulation references unknown task '{task_id}'")]
    UnknownTask {
        /// The unresolved task identifier.
        task_id: String,
    },
    /// Evaluation criteria on a task cannot be evaluated.
    #[error("task '{task_id}' has malformed evaluation criteria: {reason}")]
    MalformedCriteria {
        /// The offending task.
        task_id: String,
        /// What is wrong with the criteria.
        reason: String,
    },
    /// A goal-shift scenario cannot be scored.
    #[error("task '{task_id}' has a malformed goal-shift scenario: {reason}")]
    MalformedScenario {
        /// The offending task.
        task_id: String,
        /// What is wrong with the scenario.
        reason: String,
    },
    /// Blend weights do not sum to one.
    #[error("{metric} weights sum to {sum}, expected 1.0")]
    InvalidWeights {
        /// Metric whose weights are invalid.
        metric: &'static str,
        /// Actual sum of the weights.
        sum: f64,
    },
    /// A configuration value is out of range.
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        /// The configuration field.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },
    /// An external judge failed.
    #[error("judge error: {0}")]
    Judge(#[from] JudgeError),
    /// JSON serialization/deserialization error.
    #[error("JSON error in {context}: {message}")]
    Json {
        /// Context where error occurred.
        context: String,
        /// Error message.
        message: String,
    },
}

/// Failure reported by an external judge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JudgeError {
    /// The judge backend could not be reached.
    #[error("judge '{model}' unavailable: {message}")]
    Unavailable {
        /// Judge model identifier.
        model: String,
        /// Backend message.
        message: String,
    },
    /// The judge answered with something that is not a verdict.
    #[error("judge returned an invalid response: {message}")]
    InvalidResponse {
        /// Parse or validation message.
        message: String,
    },
    /// The judge refused to evaluate the request.
    #[error("judge rejected the request: {reason}")]
    Rejected {
        /// Reason given by the judge.
        reason: String,
    },
}
