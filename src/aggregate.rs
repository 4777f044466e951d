//! Orchestration of every metric into one [`AgentMetrics`] report.
//!
//! Two tiers of fault isolation:
//! 1. each metric runs through [`run_resilient`], so a failing primary
//!    estimator degrades only that metric; an out-of-range setting that a
//!    single estimator owns (the TCRR window, the TUE weights) is rejected
//!    there;
//! 2. an error escaping the full computation (no simulations, pass^k
//!    failure, an unusable success tolerance) switches to
//!    [`MetricsAggregator::compute_simple`], which cannot fail.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::MetricsConfig;
use crate::efficiency::{TueEstimator, TueSummary, TueWeights};
use crate::error::MetricError;
use crate::estimator::{run_resilient, Estimate, Estimator, Provenance};
use crate::extract::{extract_simulation_calls, TranscriptCalls};
use crate::judge::{AssertionJudge, RecoveryJudge};
use crate::metrics::mean;
use crate::model::{Results, SimulationRun};
use crate::pass_k::{compute_pass_hat_ks, mean_task_success_rate};
use crate::recovery::{GsrtEstimator, GsrtResult, JudgeWindow};
use crate::redundancy::{problematic_tasks, TcrrEstimator, TcrrSummary};
use crate::report::{AgentMetrics, ComputationPath, MetricProvenance, ReportMetadata};
use crate::success::TsrEstimator;

/// Maximum number of high-redundancy tasks listed in a report.
pub const PROBLEMATIC_TASK_LIMIT: usize = 5;

/// Computes [`AgentMetrics`] from benchmark results.
///
/// # Examples
///
/// ```
/// use agent_metrics::{Message, MetricsAggregator, MetricsConfig, Results, SimulationRun, Task, ToolCall};
/// use serde_json::json;
///
/// let run = SimulationRun::new(
///     "t1",
///     0,
///     vec![
///         Message::user("balance please"),
///         Message::assistant_calls(vec![ToolCall::new("c1", "get_balance", json!({}))]),
///         Message::assistant_calls(vec![ToolCall::new("c2", "get_balance", json!({}))]),
///     ],
/// )
/// .with_reward(1.0);
/// let results = Results::new(vec![Task::new("t1")], vec![run]);
///
/// let metrics = MetricsAggregator::new(MetricsConfig::default()).compute(&results);
/// assert_eq!(metrics.num_tool_calls, 2);
/// assert!((metrics.tcrr - 0.5).abs() < f64::EPSILON);
/// assert!((metrics.pass_hat_ks[&1] - 1.0).abs() < f64::EPSILON);
/// ```
#[derive(Default)]
pub struct MetricsAggregator {
    config: MetricsConfig,
    recovery_judge: Option<Box<dyn RecoveryJudge>>,
    assertion_judge: Option<Box<dyn AssertionJudge>>,
}

impl MetricsAggregator {
    /// Creates an aggregator without judges.
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            recovery_judge: None,
            assertion_judge: None,
        }
    }

    /// Sets the goal-shift recovery judge.
    #[must_use]
    pub fn with_recovery_judge(mut self, judge: impl RecoveryJudge + 'static) -> Self {
        self.recovery_judge = Some(Box::new(judge));
        self
    }

    /// Sets the natural-language assertion judge.
    #[must_use]
    pub fn with_assertion_judge(mut self, judge: impl AssertionJudge + 'static) -> Self {
        self.assertion_judge = Some(Box::new(judge));
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Computes all metrics, falling back to [`Self::compute_simple`] on error.
    #[must_use]
    pub fn compute(&self, results: &Results) -> AgentMetrics {
        match self.compute_full(results) {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(
                    error = %e,
                    "full metrics computation failed, falling back to simple computation"
                );
                self.simple(results, Some(e.to_string()))
            }
        }
    }

    /// Computes all metrics through their estimators.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the shared settings do not validate
    /// - `NoSimulations` if `results` holds no runs
    /// - errors from the pass^k table
    pub fn compute_full(&self, results: &Results) -> Result<AgentMetrics, MetricError> {
        self.config.validate_shared()?;
        if results.simulations.is_empty() {
            return Err(MetricError::NoSimulations);
        }
        let config = &self.config;

        let rewards: Vec<f64> = results
            .simulations
            .iter()
            .filter_map(SimulationRun::reward)
            .collect();
        let costs: Vec<f64> = results
            .simulations
            .iter()
            .filter_map(|s| s.agent_cost)
            .collect();
        let pass_hat_ks = compute_pass_hat_ks(results, config.success_tolerance)?;

        let transcripts = extract_simulation_calls(&results.simulations);
        let num_tool_calls = TranscriptCalls::total_calls(&transcripts);
        info!(
            simulations = results.simulations.len(),
            tasks = results.tasks.len(),
            num_tool_calls,
            "computing agent metrics"
        );

        let tsr = run_resilient(
            &TsrEstimator::new(&results.tasks, &results.simulations, config.tsr_weights)
                .with_judge(self.assertion_judge.as_deref()),
        );

        let (tcrr, tue) = if num_tool_calls == 0 {
            debug!("no tool calls, TCRR and TUE are zero");
            (
                primary(TcrrSummary::empty(config.tcrr_window_size)),
                primary(TueSummary::default()),
            )
        } else {
            (
                run_resilient(&TcrrEstimator::new(
                    &transcripts,
                    config.tcrr_window_size,
                    config.tcrr_batch_threshold,
                )),
                run_resilient(&TueEstimator::new(
                    &transcripts,
                    self.tue_weights(),
                    config.cost_percentile,
                )),
            )
        };

        let judge_model = judge_model(results, config);
        let judge_args = judge_args(results, config);
        let gsrt = run_resilient(
            &GsrtEstimator::new(&results.tasks, &results.simulations, &judge_model, &judge_args)
                .with_judge(self.recovery_judge.as_deref())
                .with_window(JudgeWindow {
                    before: config.judge_context_before,
                    after: config.judge_window_after,
                }),
        );

        let problematic = problematic_tasks(
            &tcrr.value.by_task,
            config.problematic_tcrr_threshold,
            PROBLEMATIC_TASK_LIMIT,
        );

        Ok(AgentMetrics {
            metadata: self.metadata(results, judge_model, ComputationPath::Full),
            avg_reward: mean(&rewards),
            avg_agent_cost: mean(&costs),
            pass_hat_ks,
            tsr: tsr.value.overall,
            tue: tue.value.overall.overall,
            tcrr: tcrr.value.overall.redundancy_ratio,
            num_tool_calls,
            provenance: MetricProvenance {
                tsr: tsr.provenance,
                tue: tue.provenance,
                tcrr: tcrr.provenance,
                gsrt: gsrt.provenance,
            },
            success: tsr.value,
            efficiency: tue.value,
            redundancy: tcrr.value,
            recovery: gsrt.value,
            problematic_tasks: problematic,
        })
    }

    /// Computes metrics with every fallback estimator; never fails.
    ///
    /// Missing rewards and costs count as 0, pass^1 is the mean per-task
    /// success rate and no goal shifts are reported.
    #[must_use]
    pub fn compute_simple(&self, results: &Results) -> AgentMetrics {
        self.simple(results, None)
    }

    fn simple(&self, results: &Results, reason: Option<String>) -> AgentMetrics {
        let config = &self.config;
        let sims = &results.simulations;

        let rewards: Vec<f64> = sims.iter().map(|s| s.reward().unwrap_or(0.0)).collect();
        let costs: Vec<f64> = sims.iter().map(|s| s.agent_cost.unwrap_or(0.0)).collect();
        let mut pass_hat_ks = BTreeMap::new();
        if let Some(rate) = mean_task_success_rate(sims, config.success_tolerance) {
            pass_hat_ks.insert(1, rate);
        }

        let transcripts = extract_simulation_calls(sims);
        let num_tool_calls = TranscriptCalls::total_calls(&transcripts);
        let success = TsrEstimator::new(&results.tasks, sims, config.tsr_weights).fallback();
        let redundancy = TcrrEstimator::new(
            &transcripts,
            config.tcrr_window_size,
            config.tcrr_batch_threshold,
        )
        .fallback();
        let efficiency =
            TueEstimator::new(&transcripts, self.tue_weights(), config.cost_percentile).fallback();

        let judge_model = judge_model(results, config);
        let tier = reason.as_deref().unwrap_or("simple computation requested");
        AgentMetrics {
            metadata: self.metadata(
                results,
                judge_model,
                ComputationPath::Simple {
                    reason: reason.clone(),
                },
            ),
            avg_reward: mean(&rewards),
            avg_agent_cost: mean(&costs),
            pass_hat_ks,
            tsr: success.overall,
            tue: efficiency.overall.overall,
            tcrr: redundancy.overall.redundancy_ratio,
            num_tool_calls,
            success,
            efficiency,
            redundancy,
            recovery: GsrtResult::empty(),
            problematic_tasks: Vec::new(),
            provenance: MetricProvenance::fallback(tier),
        }
    }

    const fn tue_weights(&self) -> TueWeights {
        TueWeights::new(self.config.tue_correctness_weight, self.config.tue_param_weight)
    }

    fn metadata(
        &self,
        results: &Results,
        judge_model: String,
        computation: ComputationPath,
    ) -> ReportMetadata {
        debug!(judge_model = %judge_model, "building report metadata");
        ReportMetadata {
            judge_model,
            agent_llm: results.info.agent_llm.clone(),
            user_llm: results.info.user_llm.clone(),
            computation,
            ..ReportMetadata::default()
        }
    }
}

/// Computes metrics with the default configuration and no judges.
#[must_use]
pub fn compute_metrics(results: &Results) -> AgentMetrics {
    MetricsAggregator::default().compute(results)
}

const fn primary<T>(value: T) -> Estimate<T> {
    Estimate {
        value,
        provenance: Provenance::Primary,
    }
}

fn judge_model(results: &Results, config: &MetricsConfig) -> String {
    results
        .info
        .gsrt_judge_llm
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&config.judge_model)
        .to_string()
}

fn judge_args(results: &Results, config: &MetricsConfig) -> Map<String, Value> {
    results
        .info
        .gsrt_judge_llm_args
        .clone()
        .filter(|args| !args.is_empty())
        .unwrap_or_else(|| config.judge_args.clone())
}
