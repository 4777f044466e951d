//! Tool Usage Efficiency (TUE).
//!
//! TUE = `w_c` * `tool_correctness` + `w_p` * `param_accuracy`
//!
//! The fallback blend also rewards low cost and low latency:
//! 0.4 * T + 0.25 * P + 0.2 * C + 0.15 * L.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MetricError;
use crate::estimator::Estimator;
use crate::extract::{ExtractedCall, TranscriptCalls};
use crate::metrics::{mean, percentile, ratio};

const WEIGHT_TOLERANCE: f64 = 1e-6;
const MIN_CAP: f64 = 0.001;

const BLEND_CORRECTNESS: f64 = 0.4;
const BLEND_PARAMS: f64 = 0.25;
const BLEND_COST: f64 = 0.2;
const BLEND_LATENCY: f64 = 0.15;

/// Efficiency statistics for a set of calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TueResult {
    /// Combined score in [0, 1].
    pub overall: f64,
    /// `correct_calls / total_calls`.
    pub tool_correctness: f64,
    /// `valid_param_calls / total_calls`.
    pub param_accuracy: f64,
    /// Calls that executed without error.
    pub correct_calls: usize,
    /// Calls that did not fail on parameters.
    pub valid_param_calls: usize,
    /// Calls analyzed.
    pub total_calls: usize,
    /// Cost component, set only by the fallback blend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_score: Option<f64>,
    /// Latency component, set only by the fallback blend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_score: Option<f64>,
}

impl TueResult {
    /// All-zero result.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            overall: 0.0,
            tool_correctness: 0.0,
            param_accuracy: 0.0,
            correct_calls: 0,
            valid_param_calls: 0,
            total_calls: 0,
            cost_score: None,
            latency_score: None,
        }
    }
}

impl Default for TueResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Aggregate and per-task efficiency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TueSummary {
    /// Efficiency over all calls.
    pub overall: TueResult,
    /// Efficiency per task.
    pub by_task: BTreeMap<String, TueResult>,
}

/// Weights of the primary TUE score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TueWeights {
    /// Weight of tool correctness.
    pub correctness: f64,
    /// Weight of parameter accuracy.
    pub params: f64,
}

impl TueWeights {
    /// Creates weights.
    #[must_use]
    pub const fn new(correctness: f64, params: f64) -> Self {
        Self {
            correctness,
            params,
        }
    }

    /// Checks the weights sum to 1.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::InvalidWeights` otherwise.
    pub fn validate(self) -> Result<(), MetricError> {
        let sum = self.correctness + self.params;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE || self.correctness < 0.0 || self.params < 0.0 {
            return Err(MetricError::InvalidWeights { metric: "tue", sum });
        }
        Ok(())
    }
}

impl Default for TueWeights {
    fn default() -> Self {
        Self::new(0.6, 0.4)
    }
}

struct Tally {
    total: usize,
    correct: usize,
    valid_params: usize,
}

fn tally<'a, I>(calls: I) -> Tally
where
    I: IntoIterator<Item = &'a ExtractedCall>,
{
    calls.into_iter().fold(
        Tally {
            total: 0,
            correct: 0,
            valid_params: 0,
        },
        |mut t, call| {
            t.total += 1;
            t.correct += usize::from(call.correct);
            t.valid_params += usize::from(call.params_valid);
            t
        },
    )
}

/// Computes the primary correctness/parameter score.
///
/// Weights are used as given; see [`TueWeights::validate`].
///
/// # Examples
///
/// ```
/// use agent_metrics::{compute_tue, extract_tool_calls, Message, ToolCall, ToolMessage, TueWeights};
/// use serde_json::json;
///
/// let messages = vec![
///     Message::assistant_calls(vec![
///         ToolCall::new("c1", "get_balance", json!({})),
///         ToolCall::new("c2", "get_card", json!({})),
///     ]),
///     Message::Tool(ToolMessage::err("c2", "invalid parameter: card_id")),
/// ];
/// let tue = compute_tue(&extract_tool_calls(&messages), TueWeights::default());
/// assert!((tue.tool_correctness - 0.5).abs() < f64::EPSILON);
/// assert!((tue.overall - 0.5).abs() < 1e-12);
/// ```
#[must_use]
pub fn compute_tue<'a, I>(calls: I, weights: TueWeights) -> TueResult
where
    I: IntoIterator<Item = &'a ExtractedCall>,
{
    let t = tally(calls);
    if t.total == 0 {
        return TueResult::empty();
    }
    let tool_correctness = ratio(t.correct, t.total);
    let param_accuracy = ratio(t.valid_params, t.total);
    TueResult {
        overall: weights.correctness * tool_correctness + weights.params * param_accuracy,
        tool_correctness,
        param_accuracy,
        correct_calls: t.correct,
        valid_param_calls: t.valid_params,
        total_calls: t.total,
        cost_score: None,
        latency_score: None,
    }
}

/// Computes the primary score separately for each task.
#[must_use]
pub fn compute_tue_by_task(
    transcripts: &[TranscriptCalls],
    weights: TueWeights,
) -> BTreeMap<String, TueResult> {
    let mut grouped: BTreeMap<&str, Vec<&ExtractedCall>> = BTreeMap::new();
    for transcript in transcripts {
        grouped
            .entry(transcript.task_id.as_str())
            .or_default()
            .extend(transcript.calls.iter());
    }
    grouped
        .into_iter()
        .map(|(task_id, calls)| (task_id.to_string(), compute_tue(calls, weights)))
        .collect()
}

/// Computes the cost- and latency-adjusted fallback blend.
///
/// Caps are the `cap_percentile`-th percentile of positive per-call costs and
/// latencies (1.0 when none), floored at 0.001. The cost component compares
/// the total cost of all calls against the cap; the latency component compares
/// the mean positive latency against the cap and is 1.0 with no timing data.
#[must_use]
pub fn compute_tue_blended(calls: &[&ExtractedCall], cap_percentile: f64) -> TueResult {
    let t = tally(calls.iter().copied());
    if t.total == 0 {
        return TueResult::empty();
    }

    let costs: Vec<f64> = calls.iter().map(|c| c.cost).filter(|&c| c > 0.0).collect();
    let latencies: Vec<f64> = calls
        .iter()
        .filter_map(|c| c.latency_secs)
        .filter(|&l| l > 0.0)
        .collect();

    let cost_cap = percentile(&costs, cap_percentile).unwrap_or(1.0).max(MIN_CAP);
    let latency_cap = percentile(&latencies, cap_percentile)
        .unwrap_or(1.0)
        .max(MIN_CAP);

    let total_cost: f64 = calls.iter().map(|c| c.cost).sum();
    let cost_score = (1.0 - total_cost / cost_cap).clamp(0.0, 1.0);
    let latency_score = if latencies.is_empty() {
        1.0
    } else {
        let capped = mean(&latencies).min(latency_cap);
        (1.0 - capped / latency_cap).clamp(0.0, 1.0)
    };

    let tool_correctness = ratio(t.correct, t.total);
    let param_accuracy = ratio(t.valid_params, t.total);
    TueResult {
        overall: BLEND_CORRECTNESS * tool_correctness
            + BLEND_PARAMS * param_accuracy
            + BLEND_COST * cost_score
            + BLEND_LATENCY * latency_score,
        tool_correctness,
        param_accuracy,
        correct_calls: t.correct,
        valid_param_calls: t.valid_params,
        total_calls: t.total,
        cost_score: Some(cost_score),
        latency_score: Some(latency_score),
    }
}

/// TUE estimator over extracted transcripts.
#[derive(Debug, Clone, Copy)]
pub struct TueEstimator<'a> {
    transcripts: &'a [TranscriptCalls],
    weights: TueWeights,
    cap_percentile: f64,
}

impl<'a> TueEstimator<'a> {
    /// Creates an estimator.
    #[must_use]
    pub const fn new(
        transcripts: &'a [TranscriptCalls],
        weights: TueWeights,
        cap_percentile: f64,
    ) -> Self {
        Self {
            transcripts,
            weights,
            cap_percentile,
        }
    }
}

impl Estimator for TueEstimator<'_> {
    type Output = TueSummary;

    fn metric(&self) -> &'static str {
        "tue"
    }

    fn primary(&self) -> Result<TueSummary, MetricError> {
        self.weights.validate()?;
        Ok(TueSummary {
            overall: compute_tue(TranscriptCalls::flatten(self.transcripts), self.weights),
            by_task: compute_tue_by_task(self.transcripts, self.weights),
        })
    }

    fn fallback(&self) -> TueSummary {
        let calls: Vec<&ExtractedCall> = TranscriptCalls::flatten(self.transcripts).collect();
        TueSummary {
            overall: compute_tue_blended(&calls, self.cap_percentile),
            by_task: BTreeMap::new(),
        }
    }
}
