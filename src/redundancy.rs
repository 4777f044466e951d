//! Tool-Call Redundancy Ratio (TCRR).
//!
//! TCRR = (`window_redundant` + `batch_redundant`) / `total_calls`
//!
//! - **Window redundant**: calls identical to a call made in one of the
//!   previous `window_size` assistant turns.
//! - **Batch redundant**: identical calls within one turn beyond
//!   `batch_threshold` (only the excess counts).
//!
//! The two rules are applied independently, so one call can be counted by
//! both in the same turn and `redundant_calls` may exceed the number of
//! distinct calls flagged.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::canonical::CallIdentity;
use crate::error::MetricError;
use crate::estimator::Estimator;
use crate::extract::{ExtractedCall, TranscriptCalls};
use crate::metrics::ratio;

/// Redundancy statistics for a set of calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcrrResult {
    /// Number of calls analyzed.
    pub total_calls: usize,
    /// `window_redundant_calls + batch_redundant_calls`.
    pub redundant_calls: usize,
    /// `redundant_calls / total_calls` (0.0 when empty).
    pub redundancy_ratio: f64,
    /// Redundant count per assistant turn, for every turn holding calls.
    pub redundant_by_turn: BTreeMap<usize, usize>,
    /// Window size used.
    pub window_size: usize,
    /// Calls repeating an identity from the preceding window.
    pub window_redundant_calls: usize,
    /// Excess identical calls within a turn.
    pub batch_redundant_calls: usize,
}

impl TcrrResult {
    /// All-zero result.
    #[must_use]
    pub fn empty(window_size: usize) -> Self {
        Self {
            total_calls: 0,
            redundant_calls: 0,
            redundancy_ratio: 0.0,
            redundant_by_turn: BTreeMap::new(),
            window_size,
            window_redundant_calls: 0,
            batch_redundant_calls: 0,
        }
    }

    /// Window-only ratio (TCRR-W).
    #[must_use]
    pub fn window_ratio(&self) -> f64 {
        ratio(self.window_redundant_calls, self.total_calls)
    }

    /// Batch-only ratio (TCRR-B).
    #[must_use]
    pub fn batch_ratio(&self) -> f64 {
        ratio(self.batch_redundant_calls, self.total_calls)
    }
}

/// Aggregate and per-task redundancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcrrSummary {
    /// Redundancy over all calls pooled together.
    pub overall: TcrrResult,
    /// Redundancy per task.
    pub by_task: BTreeMap<String, TcrrResult>,
}

impl TcrrSummary {
    /// All-zero summary.
    #[must_use]
    pub fn empty(window_size: usize) -> Self {
        Self {
            overall: TcrrResult::empty(window_size),
            by_task: BTreeMap::new(),
        }
    }
}

/// A task whose redundancy ratio exceeds the reporting threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblematicTask {
    /// Task identifier.
    pub task_id: String,
    /// The task's redundancy ratio.
    pub redundancy_ratio: f64,
    /// Calls made for the task.
    pub total_calls: usize,
    /// Redundant calls for the task.
    pub redundant_calls: usize,
}

/// Computes window and batch redundancy.
///
/// Calls are grouped by assistant-turn index and turns are processed in
/// ascending order. For turn `T`, the window covers turns
/// `max(1, T - window_size)..T`.
///
/// # Examples
///
/// ```
/// use agent_metrics::{compute_tcrr, extract_tool_calls, Message, ToolCall};
/// use serde_json::json;
///
/// let messages = vec![
///     Message::assistant_calls(vec![ToolCall::new("c1", "get_balance", json!({"id": 1}))]),
///     Message::assistant_calls(vec![ToolCall::new("c2", "get_balance", json!({"id": 1}))]),
/// ];
/// let result = compute_tcrr(&extract_tool_calls(&messages), 3, 2);
/// assert_eq!(result.window_redundant_calls, 1);
/// assert!((result.redundancy_ratio - 0.5).abs() < f64::EPSILON);
/// ```
#[must_use]
pub fn compute_tcrr<'a, I>(calls: I, window_size: usize, batch_threshold: usize) -> TcrrResult
where
    I: IntoIterator<Item = &'a ExtractedCall>,
{
    let mut by_turn: BTreeMap<usize, Vec<&CallIdentity>> = BTreeMap::new();
    let mut total_calls = 0;
    for call in calls {
        by_turn
            .entry(call.assistant_turn_idx)
            .or_default()
            .push(&call.identity);
        total_calls += 1;
    }

    if total_calls == 0 {
        return TcrrResult::empty(window_size);
    }

    let mut window_redundant_calls = 0;
    let mut batch_redundant_calls = 0;
    let mut redundant_by_turn = BTreeMap::new();

    for (&turn, identities) in &by_turn {
        let window_start = turn.saturating_sub(window_size).max(1);
        let previous: HashSet<&CallIdentity> = if window_start < turn {
            by_turn
                .range(window_start..turn)
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect()
        } else {
            HashSet::new()
        };

        let window_hits = identities
            .iter()
            .filter(|id| previous.contains(*id))
            .count();

        let mut counts: HashMap<&CallIdentity, usize> = HashMap::new();
        for &id in identities {
            *counts.entry(id).or_insert(0) += 1;
        }
        let batch_excess: usize = counts
            .values()
            .filter(|&&count| count > batch_threshold)
            .map(|&count| count - batch_threshold)
            .sum();

        window_redundant_calls += window_hits;
        batch_redundant_calls += batch_excess;
        redundant_by_turn.insert(turn, window_hits + batch_excess);
    }

    let redundant_calls = window_redundant_calls + batch_redundant_calls;
    TcrrResult {
        total_calls,
        redundant_calls,
        redundancy_ratio: ratio(redundant_calls, total_calls),
        redundant_by_turn,
        window_size,
        window_redundant_calls,
        batch_redundant_calls,
    }
}

/// Computes redundancy separately for each task.
///
/// Calls of all runs of one task are pooled before grouping by turn.
#[must_use]
pub fn compute_tcrr_by_task(
    transcripts: &[TranscriptCalls],
    window_size: usize,
    batch_threshold: usize,
) -> BTreeMap<String, TcrrResult> {
    group_by_task(transcripts)
        .into_iter()
        .map(|(task_id, calls)| {
            let result = compute_tcrr(calls, window_size, batch_threshold);
            (task_id.to_string(), result)
        })
        .collect()
}

/// Counts every repeat of an identity already seen anywhere in `calls`.
///
/// This is the fallback estimate: no turn structure, no batch rule.
#[must_use]
pub fn compute_tcrr_simple<'a, I>(calls: I, window_size: usize) -> TcrrResult
where
    I: IntoIterator<Item = &'a ExtractedCall>,
{
    let mut seen: HashSet<&CallIdentity> = HashSet::new();
    let mut total_calls = 0;
    let mut duplicates = 0;
    for call in calls {
        total_calls += 1;
        if !seen.insert(&call.identity) {
            duplicates += 1;
        }
    }

    TcrrResult {
        total_calls,
        redundant_calls: duplicates,
        redundancy_ratio: ratio(duplicates, total_calls),
        redundant_by_turn: BTreeMap::new(),
        window_size,
        window_redundant_calls: 0,
        batch_redundant_calls: 0,
    }
}

/// Returns tasks whose ratio exceeds `threshold`, worst first, at most `limit`.
#[must_use]
pub fn problematic_tasks(
    by_task: &BTreeMap<String, TcrrResult>,
    threshold: f64,
    limit: usize,
) -> Vec<ProblematicTask> {
    let mut tasks: Vec<ProblematicTask> = by_task
        .iter()
        .filter(|(_, r)| r.redundancy_ratio > threshold)
        .map(|(task_id, r)| ProblematicTask {
            task_id: task_id.clone(),
            redundancy_ratio: r.redundancy_ratio,
            total_calls: r.total_calls,
            redundant_calls: r.redundant_calls,
        })
        .collect();
    tasks.sort_by(|a, b| b.redundancy_ratio.total_cmp(&a.redundancy_ratio));
    tasks.truncate(limit);
    tasks
}

fn group_by_task(transcripts: &[TranscriptCalls]) -> BTreeMap<&str, Vec<&ExtractedCall>> {
    let mut grouped: BTreeMap<&str, Vec<&ExtractedCall>> = BTreeMap::new();
    for transcript in transcripts {
        grouped
            .entry(transcript.task_id.as_str())
            .or_default()
            .extend(transcript.calls.iter());
    }
    grouped
}

/// TCRR estimator over extracted transcripts.
#[derive(Debug, Clone, Copy)]
pub struct TcrrEstimator<'a> {
    transcripts: &'a [TranscriptCalls],
    window_size: usize,
    batch_threshold: usize,
}

impl<'a> TcrrEstimator<'a> {
    /// Creates an estimator.
    #[must_use]
    pub const fn new(
        transcripts: &'a [TranscriptCalls],
        window_size: usize,
        batch_threshold: usize,
    ) -> Self {
        Self {
            transcripts,
            window_size,
            batch_threshold,
        }
    }
}

impl Estimator for TcrrEstimator<'_> {
    type Output = TcrrSummary;

    fn metric(&self) -> &'static str {
        "tcrr"
    }

    fn primary(&self) -> Result<TcrrSummary, MetricError> {
        if self.window_size == 0 {
            return Err(MetricError::InvalidConfig {
                field: "tcrr_window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(TcrrSummary {
            overall: compute_tcrr(
                TranscriptCalls::flatten(self.transcripts),
                self.window_size,
                self.batch_threshold,
            ),
            by_task: compute_tcrr_by_task(self.transcripts, self.window_size, self.batch_threshold),
        })
    }

    fn fallback(&self) -> TcrrSummary {
        TcrrSummary {
            overall: compute_tcrr_simple(
                TranscriptCalls::flatten(self.transcripts),
                self.window_size,
            ),
            by_task: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::run_resilient;
    use crate::extract::extract_tool_calls;
    use crate::model::{Message, ToolCall};
    use serde_json::json;

    fn balance(id: &str) -> ToolCall {
        ToolCall::new(id, "get_balance", json!({"account_id": "A1"}))
    }

    fn transcript(task_id: &str, messages: &[Message]) -> TranscriptCalls {
        TranscriptCalls {
            task_id: task_id.to_string(),
            trial: 0,
            calls: extract_tool_calls(messages),
        }
    }

    #[test]
    fn window_redundancy_across_turns() {
        let calls = extract_tool_calls(&[
            Message::assistant_calls(vec![balance("c1")]),
            Message::assistant_calls(vec![balance("c2")]),
        ]);
        let r = compute_tcrr(&calls, 3, 2);

        assert_eq!(r.total_calls, 2);
        assert_eq!(r.window_redundant_calls, 1);
        assert_eq!(r.batch_redundant_calls, 0);
        assert_eq!(r.redundant_calls, 1);
        assert!((r.redundancy_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(r.redundant_by_turn.get(&1), Some(&0));
        assert_eq!(r.redundant_by_turn.get(&2), Some(&1));
    }

    #[test]
    fn batch_redundancy_within_turn() {
        let calls = extract_tool_calls(&[Message::assistant_calls(vec![
            balance("c1"),
            balance("c2"),
            balance("c3"),
        ])]);
        let r = compute_tcrr(&calls, 3, 2);

        assert_eq!(r.total_calls, 3);
        assert_eq!(r.batch_redundant_calls, 1);
        assert_eq!(r.window_redundant_calls, 0);
        assert!((r.redundancy_ratio - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let r = compute_tcrr(std::iter::empty(), 3, 2);
        assert_eq!(r.total_calls, 0);
        assert_eq!(r.redundant_calls, 0);
        assert!((r.redundancy_ratio - 0.0).abs() < f64::EPSILON);
        assert!(r.redundant_by_turn.is_empty());
    }

    #[test]
    fn window_excludes_turns_outside_range() {
        let calls = extract_tool_calls(&[
            Message::assistant_calls(vec![balance("c1")]),
            Message::assistant("thinking"),
            Message::assistant("still thinking"),
            Message::assistant_calls(vec![balance("c2")]),
        ]);
        // Turn 4 with window 2 looks at turns 2..=3 only.
        assert_eq!(compute_tcrr(&calls, 2, 2).window_redundant_calls, 0);
        assert_eq!(compute_tcrr(&calls, 3, 2).window_redundant_calls, 1);
    }

    #[test]
    fn turn_zero_calls_never_see_a_window() {
        let mut calls = extract_tool_calls(&[Message::assistant_calls(vec![balance("c1")])]);
        calls[0].assistant_turn_idx = 0;
        let r = compute_tcrr(&calls, 3, 2);
        assert_eq!(r.window_redundant_calls, 0);
        assert_eq!(r.redundant_by_turn.get(&0), Some(&0));
    }

    #[test]
    fn turn_zero_is_outside_every_window() {
        let mut calls = extract_tool_calls(&[
            Message::assistant_calls(vec![balance("c1")]),
            Message::assistant_calls(vec![balance("c2")]),
        ]);
        calls[0].assistant_turn_idx = 0;
        // Turn 2's window starts at 1, so the turn-0 call is not seen.
        assert_eq!(compute_tcrr(&calls, 3, 2).window_redundant_calls, 0);
    }

    #[test]
    fn window_and_batch_can_double_count() {
        let calls = extract_tool_calls(&[
            Message::assistant_calls(vec![balance("c1")]),
            Message::assistant_calls(vec![balance("c2"), balance("c3"), balance("c4")]),
        ]);
        let r = compute_tcrr(&calls, 3, 2);
        assert_eq!(r.window_redundant_calls, 3);
        assert_eq!(r.batch_redundant_calls, 1);
        assert_eq!(r.redundant_calls, 4);
        assert_eq!(r.total_calls, 4);
        assert!((r.redundancy_ratio - 1.0).abs() < f64::EPSILON);
        assert!((r.window_ratio() - 0.75).abs() < f64::EPSILON);
        assert!((r.batch_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn argument_order_does_not_matter() {
        let calls = extract_tool_calls(&[
            Message::assistant_calls(vec![ToolCall::new("c1", "f", json!({"a": 1, "b": [2, 1]}))]),
            Message::assistant_calls(vec![ToolCall::new("c2", "f", json!({"b": [1, 2], "a": 1}))]),
        ]);
        assert_eq!(compute_tcrr(&calls, 3, 2).window_redundant_calls, 1);
    }

    #[test]
    fn by_task_partitions_calls() {
        let transcripts = vec![
            transcript("t1", &[
                Message::assistant_calls(vec![balance("c1")]),
                Message::assistant_calls(vec![balance("c2")]),
            ]),
            transcript("t2", &[Message::assistant_calls(vec![balance("c1")])]),
        ];
        let by_task = compute_tcrr_by_task(&transcripts, 3, 2);
        assert_eq!(by_task["t1"].redundant_calls, 1);
        assert_eq!(by_task["t2"].redundant_calls, 0);
    }

    #[test]
    fn simple_counts_global_duplicates() {
        let calls = extract_tool_calls(&[
            Message::assistant_calls(vec![balance("c1"), balance("c2")]),
            Message::assistant_calls(vec![ToolCall::new("c3", "other", json!({}))]),
        ]);
        let r = compute_tcrr_simple(&calls, 3);
        assert_eq!(r.total_calls, 3);
        assert_eq!(r.redundant_calls, 1);
        assert!(r.redundant_by_turn.is_empty());
    }

    #[test]
    fn estimator_falls_back_on_zero_window() {
        let transcripts = vec![transcript("t1", &[Message::assistant_calls(vec![
            balance("c1"),
            balance("c2"),
        ])])];
        let estimate = run_resilient(&TcrrEstimator::new(&transcripts, 0, 2));
        assert!(estimate.provenance.is_fallback());
        assert_eq!(estimate.value.overall.redundant_calls, 1);
        assert!(estimate.value.by_task.is_empty());
    }

    #[test]
    fn problematic_tasks_sorted_and_limited() {
        let mut by_task = BTreeMap::new();
        for (id, redundant) in [("a", 1), ("b", 3), ("c", 2), ("d", 0)] {
            let mut r = TcrrResult::empty(3);
            r.total_calls = 4;
            r.redundant_calls = redundant;
            r.redundancy_ratio = ratio(redundant, 4);
            by_task.insert(id.to_string(), r);
        }
        let worst = problematic_tasks(&by_task, 0.3, 5);
        let ids: Vec<&str> = worst.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(problematic_tasks(&by_task, 0.3, 1).len(), 1);
    }
}
