//! Task Success Rate (TSR).
//!
//! TSR = sum over channels of `weight * success_rate`, renormalized over the
//! channels that apply to at least one run.
//!
//! Channels:
//! - `communicate_info`: required facts mentioned by the assistant
//! - `action`: expected tool calls executed successfully
//! - `nl_assertion`: assertions accepted by an [`AssertionJudge`]

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical::canonicalize;
use crate::error::{JudgeError, MetricError};
use crate::estimator::Estimator;
use crate::extract::{extract_tool_calls, ExtractedCall};
use crate::judge::AssertionJudge;
use crate::metrics::{count_as_f64, ratio};
use crate::model::{EvaluationCriteria, ExpectedAction, Message, SimulationRun, Task};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Weight of each TSR channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    /// Weight of the information channel.
    pub communicate_info: f64,
    /// Weight of the action channel.
    pub action: f64,
    /// Weight of the assertion channel.
    pub nl_assertion: f64,
}

impl ChannelWeights {
    /// Creates weights.
    #[must_use]
    pub const fn new(communicate_info: f64, action: f64, nl_assertion: f64) -> Self {
        Self {
            communicate_info,
            action,
            nl_assertion,
        }
    }

    /// Sum of the three weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.communicate_info + self.action + self.nl_assertion
    }

    /// Checks the weights are non-negative and sum to 1.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::InvalidWeights` otherwise.
    pub fn validate(&self) -> Result<(), MetricError> {
        let sum = self.sum();
        let negative = [self.communicate_info, self.action, self.nl_assertion]
            .iter()
            .any(|w| *w < 0.0);
        if negative || (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(MetricError::InvalidWeights { metric: "tsr", sum });
        }
        Ok(())
    }
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self::new(0.5, 0.3, 0.2)
    }
}

/// Success rate of each channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRates {
    /// Information channel rate.
    pub communicate_info: f64,
    /// Action channel rate.
    pub action: f64,
    /// Assertion channel rate.
    pub nl_assertion: f64,
}

/// Success of one task across its runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSuccess {
    /// Weighted success for the task.
    pub overall: f64,
    /// Channel rates for the task.
    pub channels: ChannelRates,
    /// Runs evaluated.
    pub num_runs: usize,
}

/// Task success across all runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsrResult {
    /// Weighted success in [0, 1].
    pub overall: f64,
    /// Mean rate per channel over runs where it applies.
    pub channel_success: ChannelRates,
    /// Weights used.
    pub weights: ChannelWeights,
    /// Per-task breakdown.
    pub by_task: BTreeMap<String, TaskSuccess>,
    /// Runs left out because their task carries no evaluation criteria.
    #[serde(default)]
    pub skipped_runs: usize,
}

impl TsrResult {
    /// All-zero result with default weights.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            overall: 0.0,
            channel_success: ChannelRates::default(),
            weights: ChannelWeights::default(),
            by_task: BTreeMap::new(),
            skipped_runs: 0,
        }
    }
}

/// Channel rates of a single run; `None` where the channel does not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunChannels {
    communicate_info: Option<f64>,
    action: Option<f64>,
    nl_assertion: Option<f64>,
}

/// Running sums for averaging channel rates over runs.
#[derive(Debug, Default)]
struct ChannelTally {
    sums: [f64; 3],
    counts: [usize; 3],
    runs: usize,
}

impl ChannelTally {
    fn push(&mut self, run: RunChannels) {
        self.runs += 1;
        for (i, rate) in [run.communicate_info, run.action, run.nl_assertion]
            .into_iter()
            .enumerate()
        {
            if let Some(rate) = rate {
                self.sums[i] += rate;
                self.counts[i] += 1;
            }
        }
    }

    fn rates(&self) -> ChannelRates {
        let rate = |i: usize| {
            if self.counts[i] == 0 {
                0.0
            } else {
                self.sums[i] / count_as_f64(self.counts[i])
            }
        };
        ChannelRates {
            communicate_info: rate(0),
            action: rate(1),
            nl_assertion: rate(2),
        }
    }

    fn overall(&self, weights: &ChannelWeights) -> f64 {
        let rates = self.rates();
        let pairs = [
            (weights.communicate_info, rates.communicate_info),
            (weights.action, rates.action),
            (weights.nl_assertion, rates.nl_assertion),
        ];
        let (weighted, total_weight) = pairs
            .iter()
            .zip(self.counts)
            .filter(|(_, count)| *count > 0)
            .fold((0.0, 0.0), |(acc, tw), ((w, r), _)| (acc + w * r, tw + w));
        if total_weight > 0.0 {
            weighted / total_weight
        } else {
            0.0
        }
    }
}

/// Computes multi-channel task success.
///
/// Runs whose task has no criteria are skipped.
///
/// # Errors
///
/// - `InvalidWeights` if `weights` do not sum to 1
/// - `CriteriaUnavailable` if no task carries criteria
/// - `UnknownTask` if a simulation names a task not in `tasks`
/// - `MalformedCriteria` if an expected action has an empty name
/// - `Judge` if the assertion judge fails or returns the wrong number of verdicts
pub fn compute_tsr(
    tasks: &[Task],
    simulations: &[SimulationRun],
    weights: ChannelWeights,
    judge: Option<&dyn AssertionJudge>,
) -> Result<TsrResult, MetricError> {
    weights.validate()?;
    if !tasks.iter().any(|t| t.evaluation_criteria.is_some()) {
        return Err(MetricError::CriteriaUnavailable);
    }
    let task_index: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    if judge.is_none() {
        debug!("no assertion judge configured, nl_assertion channel skipped");
    }

    let mut overall = ChannelTally::default();
    let mut per_task: BTreeMap<&str, ChannelTally> = BTreeMap::new();
    let mut skipped_runs = 0;

    for sim in simulations {
        let task = task_index
            .get(sim.task_id.as_str())
            .ok_or_else(|| MetricError::UnknownTask {
                task_id: sim.task_id.clone(),
            })?;
        let Some(criteria) = &task.evaluation_criteria else {
            debug!(
                task_id = %task.id,
                trial = sim.trial,
                "task has no evaluation criteria, run skipped"
            );
            skipped_runs += 1;
            continue;
        };

        let run = evaluate_run(&task.id, criteria, &sim.messages, judge)?;
        overall.push(run);
        per_task.entry(task.id.as_str()).or_default().push(run);
    }

    let by_task = per_task
        .into_iter()
        .map(|(task_id, tally)| {
            let success = TaskSuccess {
                overall: tally.overall(&weights),
                channels: tally.rates(),
                num_runs: tally.runs,
            };
            (task_id.to_string(), success)
        })
        .collect();

    Ok(TsrResult {
        overall: overall.overall(&weights),
        channel_success: overall.rates(),
        weights,
        by_task,
        skipped_runs,
    })
}

/// Binary success: the share of runs with a positive reward.
///
/// Channel rates are zero and weights are the defaults.
#[must_use]
pub fn compute_tsr_binary(simulations: &[SimulationRun]) -> TsrResult {
    let successes = simulations
        .iter()
        .filter(|s| s.reward().is_some_and(|r| r > 0.0))
        .count();
    TsrResult {
        overall: ratio(successes, simulations.len()),
        ..TsrResult::empty()
    }
}

fn evaluate_run(
    task_id: &str,
    criteria: &EvaluationCriteria,
    messages: &[Message],
    judge: Option<&dyn AssertionJudge>,
) -> Result<RunChannels, MetricError> {
    let communicate_info = (!criteria.communicate_info.is_empty())
        .then(|| communicate_info_rate(&criteria.communicate_info, messages));

    let action = if criteria.actions.is_empty() {
        None
    } else {
        Some(action_rate(task_id, &criteria.actions, messages)?)
    };

    let nl_assertion = match judge {
        Some(judge) if !criteria.nl_assertions.is_empty() => {
            Some(assertion_rate(judge, &criteria.nl_assertions, messages)?)
        }
        _ => None,
    };

    Ok(RunChannels {
        communicate_info,
        action,
        nl_assertion,
    })
}

fn communicate_info_rate(required: &[String], messages: &[Message]) -> f64 {
    let spoken = messages
        .iter()
        .filter(|m| m.is_assistant())
        .filter_map(Message::content)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("\n");
    let found = required
        .iter()
        .filter(|info| spoken.contains(&info.to_lowercase()))
        .count();
    ratio(found, required.len())
}

fn action_rate(
    task_id: &str,
    expected: &[ExpectedAction],
    messages: &[Message],
) -> Result<f64, MetricError> {
    if let Some(action) = expected.iter().find(|a| a.name.trim().is_empty()) {
        return Err(MetricError::MalformedCriteria {
            task_id: task_id.to_string(),
            reason: format!("expected action with empty name (arguments: {:?})", action.arguments),
        });
    }
    let executed: Vec<ExtractedCall> = extract_tool_calls(messages)
        .into_iter()
        .filter(|c| c.correct)
        .collect();
    let matched = expected
        .iter()
        .filter(|action| executed.iter().any(|call| action_matches(action, call)))
        .count();
    Ok(ratio(matched, expected.len()))
}

fn action_matches(action: &ExpectedAction, call: &ExtractedCall) -> bool {
    if call.name != action.name {
        return false;
    }
    action
        .arguments
        .as_ref()
        .is_none_or(|args| call.identity.args.contains_all(&canonicalize(args)))
}

fn assertion_rate(
    judge: &dyn AssertionJudge,
    assertions: &[String],
    messages: &[Message],
) -> Result<f64, MetricError> {
    let verdicts = judge.evaluate(assertions, messages)?;
    if verdicts.len() != assertions.len() {
        return Err(JudgeError::InvalidResponse {
            message: format!(
                "expected {} assertion verdicts, got {}",
                assertions.len(),
                verdicts.len()
            ),
        }
        .into());
    }
    let passed = verdicts.iter().filter(|v| **v).count();
    Ok(ratio(passed, assertions.len()))
}

/// TSR estimator over tasks and simulations.
#[derive(Clone, Copy)]
pub struct TsrEstimator<'a> {
    tasks: &'a [Task],
    simulations: &'a [SimulationRun],
    weights: ChannelWeights,
    judge: Option<&'a dyn AssertionJudge>,
}

impl<'a> TsrEstimator<'a> {
    /// Creates an estimator without an assertion judge.
    #[must_use]
    pub const fn new(
        tasks: &'a [Task],
        simulations: &'a [SimulationRun],
        weights: ChannelWeights,
    ) -> Self {
        Self {
            tasks,
            simulations,
            weights,
            judge: None,
        }
    }

    /// Sets the assertion judge.
    #[must_use]
    pub const fn with_judge(mut self, judge: Option<&'a dyn AssertionJudge>) -> Self {
        self.judge = judge;
        self
    }
}

impl Estimator for TsrEstimator<'_> {
    type Output = TsrResult;

    fn metric(&self) -> &'static str {
        "tsr"
    }

    fn primary(&self) -> Result<TsrResult, MetricError> {
        compute_tsr(self.tasks, self.simulations, self.weights, self.judge)
    }

    fn fallback(&self) -> TsrResult {
        compute_tsr_binary(self.simulations)
    }
}
