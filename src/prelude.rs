//! Convenient re-exports for glob imports.
//!
//! ```rust
//! use agent_metrics::prelude::*;
//!
//! let metrics = compute_metrics(&Results::default());
//! assert!(metrics.pass_hat_ks.is_empty());
//! ```
//!
//! Per-metric estimators and low-level helpers are left out; import them
//! from the crate root when needed.

pub use crate::{
    // Input model
    Message, ParticipantMessage, Results, SimulationRun, Task, ToolCall, ToolMessage,
    // Computation
    MetricsAggregator, MetricsConfig, compute_metrics,
    // Judges
    AssertionJudge, JudgeRequest, RecoveryJudge, RecoveryOutcome, RecoveryVerdict,
    // Report
    AgentMetrics, ComputationPath, Provenance,
    // Errors
    JudgeError, MetricError,
};
