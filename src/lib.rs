//! Metrics engine for tool-using conversational agents.
//!
//! This crate scores benchmark transcripts of an agent talking to a simulated
//! user and calling tools. Given the tasks and the simulation runs of an
//! evaluation, it computes:
//!
//! | Metric | Meaning |
//! |--------|---------|
//! | TSR | Task Success Rate, weighted over communicated info, actions and NL assertions |
//! | TUE | Tool Usage Efficiency, tool correctness and parameter accuracy |
//! | TCRR | Tool-Call Redundancy Ratio, window and batch repeats of identical calls |
//! | GSRT | Goal-Shift Recovery Time, turns to acknowledge, act on and finish a new goal |
//! | pass^k | Probability that k independent trials of a task all succeed |
//!
//! # Quick Start
//!
//! ```rust
//! use agent_metrics::{Message, MetricsAggregator, MetricsConfig, Results, SimulationRun, Task, ToolCall};
//! use serde_json::json;
//!
//! let run = SimulationRun::new(
//!     "lookup",
//!     0,
//!     vec![
//!         Message::user("What's my balance?"),
//!         Message::assistant_calls(vec![ToolCall::new("c1", "get_balance", json!({"id": 7}))]),
//!         Message::assistant("It is 42."),
//!     ],
//! )
//! .with_reward(1.0);
//! let results = Results::new(vec![Task::new("lookup")], vec![run]);
//!
//! let metrics = MetricsAggregator::new(MetricsConfig::default()).compute(&results);
//! assert_eq!(metrics.num_tool_calls, 1);
//! assert!((metrics.tcrr - 0.0).abs() < f64::EPSILON);
//! println!("{metrics}");
//! ```
//!
//! # Fault Isolation
//!
//! Each metric has a primary and a fallback estimator (see [`Estimator`]).
//! A failing primary degrades only its own metric, and the report records
//! the [`Provenance`] of each value. If the whole computation fails, the
//! aggregator switches to [`MetricsAggregator::compute_simple`].
//!
//! # Judges
//!
//! Goal-shift recovery and natural-language assertions may be scored by an
//! external model. Implement [`RecoveryJudge`] or [`AssertionJudge`] (closures
//! work) and attach them to the aggregator; without one, deterministic
//! heuristics are used.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod aggregate;
mod canonical;
mod config;
mod efficiency;
mod error;
mod estimator;
mod extract;
mod judge;
pub mod metrics;
mod model;
mod pass_k;
pub mod prelude;
mod recovery;
mod redundancy;
mod report;
mod success;

pub use aggregate::{MetricsAggregator, PROBLEMATIC_TASK_LIMIT, compute_metrics};
pub use canonical::{
    CallIdentity, CanonicalArgs, CanonicalValue, FloatBits, MAX_CANONICAL_DEPTH, canonicalize,
    canonicalize_value,
};
pub use config::{
    DEFAULT_JUDGE_MODEL, ENV_TCRR_BATCH_THRESHOLD, ENV_TCRR_WINDOW_SIZE, MetricsConfig,
};
pub use efficiency::{
    TueEstimator, TueResult, TueSummary, TueWeights, compute_tue, compute_tue_blended,
    compute_tue_by_task,
};
pub use error::{JudgeError, MetricError};
pub use estimator::{Estimate, Estimator, Provenance, run_resilient};
pub use extract::{
    ExtractedCall, PARAMETER_ERROR_KEYWORDS, TranscriptCalls, extract_simulation_calls,
    extract_tool_calls, is_parameter_error,
};
pub use judge::{
    AssertionJudge, JudgeRequest, RecoveryJudge, RecoveryOutcome, RecoveryVerdict,
    ShiftClassification,
};
pub use metrics::{mean, median, percentile, ratio};
pub use model::{
    EvaluationCriteria, ExpectedAction, GoalShiftScenario, GoalSpec, Message, MultiToolMessage,
    ParticipantMessage, Requestor, Results, RewardInfo, RunInfo, SimulationRun, SystemMessage,
    Task, ToolCall, ToolMessage,
};
pub use pass_k::{
    TaskPassHatK, compute_pass_hat_ks, is_successful, max_k, mean_task_success_rate, pass_hat_k,
    tasks_pass_hat_k,
};
pub use recovery::{
    DetectedShift, GsrtEstimator, GsrtResult, JudgeWindow, ShiftMeasurement, TRANSFER_TOOL,
    TaskRecovery, compute_gsrt, detect_goal_shifts, measure_recovery,
};
pub use redundancy::{
    ProblematicTask, TcrrEstimator, TcrrResult, TcrrSummary, compute_tcrr, compute_tcrr_by_task,
    compute_tcrr_simple, problematic_tasks,
};
pub use report::{AgentMetrics, ComputationPath, MetricProvenance, ReportMetadata};
pub use success::{
    ChannelRates, ChannelWeights, TaskSuccess, TsrEstimator, TsrResult, compute_tsr,
    compute_tsr_binary,
};
