//! Goal-Shift Recovery Time (GSRT).
//!
//! For every detected change of user goal, measures how many assistant turns
//! the agent needs to (a) acknowledge the new goal, (b) call a relevant tool,
//! and (c) get a relevant tool call to succeed.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::MetricError;
use crate::estimator::Estimator;
use crate::judge::{
    JudgeRequest, RecoveryJudge, RecoveryOutcome, RecoveryVerdict, ShiftClassification,
};
use crate::metrics::{count_as_f64, median, ratio};
use crate::model::{GoalShiftScenario, GoalSpec, Message, SimulationRun, Task};

/// Tool whose invocation hands the user to a human.
pub const TRANSFER_TOOL: &str = "transfer_to_human_agents";

/// Messages around a shift handed to the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeWindow {
    /// Messages before the shift message.
    pub before: usize,
    /// Messages after the shift message.
    pub after: usize,
}

impl Default for JudgeWindow {
    fn default() -> Self {
        Self {
            before: 2,
            after: 12,
        }
    }
}

/// A goal change located in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedShift {
    /// Index of the goal in the scenario (1 for the first shift).
    pub goal_index: usize,
    /// Index of the user message that introduced the goal.
    pub message_index: usize,
}

/// Recovery measured for one shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftMeasurement {
    /// Task of the run.
    pub task_id: String,
    /// Trial of the run.
    pub trial: usize,
    /// Goal index in the scenario.
    pub goal_index: usize,
    /// Index of the shift message in the transcript.
    pub message_index: usize,
    /// Per-variant outcome.
    pub verdict: RecoveryVerdict,
    /// Combined classification.
    pub classification: ShiftClassification,
    /// Whether the verdict came from the judge.
    pub judged: bool,
}

/// Recovery statistics for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecovery {
    /// Median acknowledgment turns.
    pub median_ack: Option<f64>,
    /// Median tool-usage turns.
    pub median_tool: Option<f64>,
    /// Median outcome turns.
    pub median_outcome: Option<f64>,
    /// Shifts detected.
    pub num_shifts: usize,
    /// Share of shifts recovered.
    pub recovery_rate: f64,
    /// Share of shifts transferred.
    pub transfer_rate: f64,
}

/// Recovery statistics over all runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GsrtResult {
    /// Median acknowledgment turns over recovered measurements.
    pub median_ack: Option<f64>,
    /// Median tool-usage turns over recovered measurements.
    pub median_tool: Option<f64>,
    /// Median outcome turns over recovered measurements.
    pub median_outcome: Option<f64>,
    /// Shifts detected.
    pub num_shifts: usize,
    /// Share of shifts recovered.
    pub recovery_rate: f64,
    /// Share of shifts transferred.
    pub transfer_rate: f64,
    /// Share of shifts never recovered.
    pub never_recovered_rate: f64,
    /// Per-task statistics, only for tasks with shifts.
    pub by_task: BTreeMap<String, TaskRecovery>,
    /// Every measured shift.
    pub shifts: Vec<ShiftMeasurement>,
}

impl GsrtResult {
    /// No shifts, no medians, zero rates.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Locates the shifts of `scenario` in a transcript.
///
/// The shift to goal `i` is the first user message after the previous
/// detected shift whose content contains one of goal `i`'s cues, ignoring
/// case. Goals that are never cued are skipped.
#[must_use]
pub fn detect_goal_shifts(
    scenario: &GoalShiftScenario,
    messages: &[Message],
) -> Vec<DetectedShift> {
    let mut shifts = Vec::new();
    let mut search_from = 0;
    for (goal_index, goal) in scenario.goals.iter().enumerate().skip(1) {
        let cues: Vec<String> = goal.cues.iter().map(|c| c.to_lowercase()).collect();
        let found = messages
            .iter()
            .enumerate()
            .skip(search_from)
            .filter(|(_, m)| m.is_user())
            .find(|(_, m)| {
                m.content().map(str::to_lowercase).is_some_and(|text| {
                    cues.iter()
                        .any(|cue| !cue.is_empty() && text.contains(cue.as_str()))
                })
            });
        match found {
            Some((message_index, _)) => {
                shifts.push(DetectedShift {
                    goal_index,
                    message_index,
                });
                search_from = message_index + 1;
            }
            None => debug!(goal_index, goal = %goal.description, "goal shift not detected"),
        }
    }
    shifts
}

/// Measures recovery from the messages after a shift.
///
/// `messages` starts right after the shift message and ends where the next
/// shift begins. Turn counts are assistant messages seen so far, so the
/// immediate reply is turn 1.
#[must_use]
pub fn measure_recovery(goal: &GoalSpec, messages: &[Message]) -> RecoveryVerdict {
    let succeeded: HashMap<&str, bool> = messages
        .iter()
        .flat_map(Message::tool_results)
        .map(|r| (r.id.as_str(), r.success()))
        .collect();
    let markers: Vec<String> = goal
        .cues
        .iter()
        .chain(goal.tools.iter())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();

    let mut ack = None;
    let mut tool = None;
    let mut outcome = None;
    let mut transferred = false;
    let mut turn = 0;

    'scan: for message in messages.iter().filter(|m| m.is_assistant()) {
        turn += 1;
        if ack.is_none()
            && message
                .content()
                .map(str::to_lowercase)
                .is_some_and(|text| markers.iter().any(|m| text.contains(m)))
        {
            ack = Some(turn);
        }
        for call in message.tool_calls() {
            if call.name == TRANSFER_TOOL {
                transferred = true;
                break 'scan;
            }
            if goal.tools.contains(&call.name) {
                tool.get_or_insert(turn);
                // Unanswered calls count as succeeded.
                if outcome.is_none() && succeeded.get(call.id.as_str()).copied().unwrap_or(true) {
                    outcome = Some(turn);
                }
            }
        }
    }

    let resolve = |turns: Option<usize>| match turns {
        Some(turns) => RecoveryOutcome::Recovered { turns },
        None if transferred => RecoveryOutcome::Transferred,
        None => RecoveryOutcome::NeverRecovered,
    };
    RecoveryVerdict {
        acknowledgment: resolve(ack),
        tool_usage: resolve(tool),
        outcome: resolve(outcome),
    }
}

/// Computes GSRT over every run whose task has a goal-shift scenario.
///
/// With a judge, each shift is judged on a window of messages around it and
/// the verdict replaces the heuristic; a judge error affects only that shift.
///
/// # Errors
///
/// - `InvalidConfig` if `judge_model` is empty
/// - `MalformedScenario` if a scenario has fewer than two goals
pub fn compute_gsrt(
    tasks: &[Task],
    simulations: &[SimulationRun],
    judge_model: &str,
    judge_args: &Map<String, Value>,
    judge: Option<&dyn RecoveryJudge>,
    window: JudgeWindow,
) -> Result<GsrtResult, MetricError> {
    if judge_model.trim().is_empty() {
        return Err(MetricError::InvalidConfig {
            field: "judge_model",
            reason: "must not be empty".to_string(),
        });
    }
    let scenarios: HashMap<&str, &GoalShiftScenario> = tasks
        .iter()
        .filter_map(|t| t.goal_shifts.as_ref().map(|s| (t.id.as_str(), s)))
        .collect();
    if let Some((task_id, scenario)) = scenarios.iter().find(|(_, s)| s.goals.len() < 2) {
        return Err(MetricError::MalformedScenario {
            task_id: (*task_id).to_string(),
            reason: format!("{} goal(s), at least 2 required", scenario.goals.len()),
        });
    }

    let mut shifts = Vec::new();
    for sim in simulations {
        if let Some(scenario) = scenarios.get(sim.task_id.as_str()) {
            let judging = judge.map(|judge| JudgeContext {
                judge,
                model: judge_model,
                args: judge_args,
                window,
            });
            shifts.extend(measure_run(sim, scenario, judging.as_ref()));
        }
    }

    let mut grouped: BTreeMap<&str, Vec<&ShiftMeasurement>> = BTreeMap::new();
    for m in &shifts {
        grouped.entry(m.task_id.as_str()).or_default().push(m);
    }
    let by_task = grouped
        .into_iter()
        .map(|(task_id, ms)| (task_id.to_string(), summarize_task(&ms)))
        .collect();

    let all: Vec<&ShiftMeasurement> = shifts.iter().collect();
    let stats = ShiftStats::of(&all);
    Ok(GsrtResult {
        median_ack: stats.median_ack,
        median_tool: stats.median_tool,
        median_outcome: stats.median_outcome,
        num_shifts: stats.num_shifts,
        recovery_rate: stats.recovery_rate,
        transfer_rate: stats.transfer_rate,
        never_recovered_rate: stats.never_recovered_rate,
        by_task,
        shifts,
    })
}

struct JudgeContext<'a> {
    judge: &'a dyn RecoveryJudge,
    model: &'a str,
    args: &'a Map<String, Value>,
    window: JudgeWindow,
}

fn measure_run(
    sim: &SimulationRun,
    scenario: &GoalShiftScenario,
    judging: Option<&JudgeContext<'_>>,
) -> Vec<ShiftMeasurement> {
    let detected = detect_goal_shifts(scenario, &sim.messages);
    detected
        .iter()
        .enumerate()
        .map(|(i, shift)| {
            let end = detected
                .get(i + 1)
                .map_or(sim.messages.len(), |next| next.message_index);
            let goal = &scenario.goals[shift.goal_index];
            let judged = judging.and_then(|ctx| {
                let request = judge_request(sim, goal, shift, ctx.model, ctx.args, ctx.window);
                ctx.judge
                    .judge(&request)
                    .map_err(|e| {
                        warn!(
                            task_id = %sim.task_id,
                            trial = sim.trial,
                            goal_index = shift.goal_index,
                            error = %e,
                            "recovery judge failed, using heuristic for this shift"
                        );
                    })
                    .ok()
            });
            let (verdict, was_judged) = match judged {
                Some(verdict) => (verdict, true),
                None => (
                    measure_recovery(goal, &sim.messages[shift.message_index + 1..end]),
                    false,
                ),
            };
            ShiftMeasurement {
                task_id: sim.task_id.clone(),
                trial: sim.trial,
                goal_index: shift.goal_index,
                message_index: shift.message_index,
                verdict,
                classification: verdict.classify(),
                judged: was_judged,
            }
        })
        .collect()
}

fn judge_request<'a>(
    sim: &'a SimulationRun,
    goal: &'a GoalSpec,
    shift: &DetectedShift,
    model: &'a str,
    args: &'a Map<String, Value>,
    window: JudgeWindow,
) -> JudgeRequest<'a> {
    let start = shift.message_index.saturating_sub(window.before);
    let end = (shift.message_index + 1 + window.after).min(sim.messages.len());
    JudgeRequest {
        model,
        args,
        task_id: &sim.task_id,
        goal,
        goal_index: shift.goal_index,
        window: &sim.messages[start..end],
        shift_offset: shift.message_index - start,
    }
}

struct ShiftStats {
    median_ack: Option<f64>,
    median_tool: Option<f64>,
    median_outcome: Option<f64>,
    num_shifts: usize,
    recovery_rate: f64,
    transfer_rate: f64,
    never_recovered_rate: f64,
}

impl ShiftStats {
    fn of(measurements: &[&ShiftMeasurement]) -> Self {
        let turns = |pick: fn(&RecoveryVerdict) -> RecoveryOutcome| -> Option<f64> {
            let values: Vec<f64> = measurements
                .iter()
                .filter_map(|m| pick(&m.verdict).turns())
                .map(count_as_f64)
                .collect();
            median(&values)
        };
        let count = |class: ShiftClassification| {
            measurements
                .iter()
                .filter(|m| m.classification == class)
                .count()
        };
        let n = measurements.len();
        Self {
            median_ack: turns(|v| v.acknowledgment),
            median_tool: turns(|v| v.tool_usage),
            median_outcome: turns(|v| v.outcome),
            num_shifts: n,
            recovery_rate: ratio(count(ShiftClassification::Recovered), n),
            transfer_rate: ratio(count(ShiftClassification::Transferred), n),
            never_recovered_rate: ratio(count(ShiftClassification::NeverRecovered), n),
        }
    }
}

fn summarize_task(measurements: &[&ShiftMeasurement]) -> TaskRecovery {
    let stats = ShiftStats::of(measurements);
    TaskRecovery {
        median_ack: stats.median_ack,
        median_tool: stats.median_tool,
        median_outcome: stats.median_outcome,
        num_shifts: stats.num_shifts,
        recovery_rate: stats.recovery_rate,
        transfer_rate: stats.transfer_rate,
    }
}

/// GSRT estimator over tasks and simulations.
#[derive(Clone, Copy)]
pub struct GsrtEstimator<'a> {
    tasks: &'a [Task],
    simulations: &'a [SimulationRun],
    judge_model: &'a str,
    judge_args: &'a Map<String, Value>,
    judge: Option<&'a dyn RecoveryJudge>,
    window: JudgeWindow,
}

impl<'a> GsrtEstimator<'a> {
    /// Creates an estimator without a judge.
    #[must_use]
    pub fn new(
        tasks: &'a [Task],
        simulations: &'a [SimulationRun],
        judge_model: &'a str,
        judge_args: &'a Map<String, Value>,
    ) -> Self {
        Self {
            tasks,
            simulations,
            judge_model,
            judge_args,
            judge: None,
            window: JudgeWindow::default(),
        }
    }

    /// Sets the recovery judge.
    #[must_use]
    pub const fn with_judge(mut self, judge: Option<&'a dyn RecoveryJudge>) -> Self {
        self.judge = judge;
        self
    }

    /// Sets the judge window.
    #[must_use]
    pub const fn with_window(mut self, window: JudgeWindow) -> Self {
        self.window = window;
        self
    }
}

impl Estimator for GsrtEstimator<'_> {
    type Output = GsrtResult;

    fn metric(&self) -> &'static str {
        "gsrt"
    }

    fn primary(&self) -> Result<GsrtResult, MetricError> {
        compute_gsrt(
            self.tasks,
            self.simulations,
            self.judge_model,
            self.judge_args,
            self.judge,
            self.window,
        )
    }

    fn fallback(&self) -> GsrtResult {
        GsrtResult::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JudgeError;
    use crate::estimator::run_resilient;
    use crate::model::{ToolCall, ToolMessage};
    use serde_json::json;

    fn scenario() -> GoalShiftScenario {
        GoalShiftScenario {
            goals: vec![
                GoalSpec {
                    description: "check balance".to_string(),
                    cues: vec!["balance".to_string()],
                    tools: vec!["get_balance".to_string()],
                },
                GoalSpec {
                    description: "dispute a charge".to_string(),
                    cues: vec!["dispute".to_string()],
                    tools: vec!["file_dispute".to_string()],
                },
            ],
        }
    }

    fn dispute(id: &str) -> ToolCall {
        ToolCall::new(id, "file_dispute", json!({"txn": "T1"}))
    }

    fn recovering_transcript() -> Vec<Message> {
        vec![
            Message::user("what's my balance?"),
            Message::assistant("It is $40."),
            Message::user("Actually, I want to DISPUTE a charge."),
            Message::assistant("Sure, let me open a dispute."),
            Message::assistant_calls(vec![dispute("c1")]),
            Message::Tool(ToolMessage::err("c1", "missing argument")),
            Message::assistant_calls(vec![dispute("c2")]),
            Message::Tool(ToolMessage::ok("c2", "filed")),
        ]
    }

    fn task() -> Task {
        Task::new("t1").with_goal_shifts(scenario())
    }

    fn args() -> Map<String, Value> {
        Map::new()
    }

    #[test]
    fn detects_cued_user_message() {
        let shifts = detect_goal_shifts(&scenario(), &recovering_transcript());
        assert_eq!(
            shifts,
            vec![DetectedShift {
                goal_index: 1,
                message_index: 2
            }]
        );
    }

    #[test]
    fn assistant_mentions_do_not_trigger_detection() {
        let messages = vec![Message::assistant("do you want to dispute?"), Message::user("no")];
        assert!(detect_goal_shifts(&scenario(), &messages).is_empty());
    }

    #[test]
    fn heuristic_measures_three_variants() {
        let messages = recovering_transcript();
        let v = measure_recovery(&scenario().goals[1], &messages[3..]);
        assert_eq!(v.acknowledgment, RecoveryOutcome::Recovered { turns: 1 });
        assert_eq!(v.tool_usage, RecoveryOutcome::Recovered { turns: 2 });
        assert_eq!(v.outcome, RecoveryOutcome::Recovered { turns: 3 });
    }

    #[test]
    fn transfer_before_recovery() {
        let messages = vec![
            Message::assistant("Let me look into that dispute."),
            Message::assistant_calls(vec![ToolCall::new("c1", TRANSFER_TOOL, json!({}))]),
        ];
        let v = measure_recovery(&scenario().goals[1], &messages);
        assert_eq!(v.acknowledgment, RecoveryOutcome::Recovered { turns: 1 });
        assert_eq!(v.tool_usage, RecoveryOutcome::Transferred);
        assert_eq!(v.classify(), ShiftClassification::Transferred);
    }

    #[test]
    fn never_recovered_at_window_end() {
        let v = measure_recovery(&scenario().goals[1], &[Message::assistant("Anything else?")]);
        assert_eq!(v.classify(), ShiftClassification::NeverRecovered);
    }

    #[test]
    fn aggregates_over_runs() {
        let sims = vec![
            SimulationRun::new("t1", 0, recovering_transcript()),
            SimulationRun::new(
                "t1",
                1,
                vec![
                    Message::user("I need to dispute something"),
                    Message::assistant("Hmm."),
                ],
            ),
            SimulationRun::new("t2", 0, recovering_transcript()),
        ];
        let r = compute_gsrt(&[task()], &sims, "judge", &args(), None, JudgeWindow::default())
            .unwrap();

        assert_eq!(r.num_shifts, 2);
        assert!((r.recovery_rate - 0.5).abs() < f64::EPSILON);
        assert!((r.never_recovered_rate - 0.5).abs() < f64::EPSILON);
        assert!((r.transfer_rate - 0.0).abs() < f64::EPSILON);
        assert_eq!(r.median_ack, Some(1.0));
        assert_eq!(r.median_outcome, Some(3.0));
        assert_eq!(r.by_task.len(), 1);
        assert_eq!(r.by_task["t1"].num_shifts, 2);
        assert!(r.shifts.iter().all(|s| !s.judged));
    }

    #[test]
    fn judge_verdict_replaces_heuristic() {
        let judge = |request: &JudgeRequest<'_>| {
            assert_eq!(request.model, "judge-x");
            assert_eq!(request.goal_index, 1);
            // One message before the shift, two after.
            assert_eq!(request.window.len(), 4);
            assert_eq!(request.shift_offset, 1);
            RecoveryVerdict::from_json(r#"{"acknowledgment": 4, "tool_usage": 5, "outcome": 6}"#)
        };
        let sims = vec![SimulationRun::new("t1", 0, recovering_transcript())];
        let r = compute_gsrt(
            &[task()],
            &sims,
            "judge-x",
            &args(),
            Some(&judge),
            JudgeWindow { before: 1, after: 2 },
        )
        .unwrap();
        assert_eq!(r.median_ack, Some(4.0));
        assert!(r.shifts[0].judged);
    }

    #[test]
    fn judge_error_falls_back_per_shift() {
        let judge = |_: &JudgeRequest<'_>| -> Result<RecoveryVerdict, JudgeError> {
            Err(JudgeError::Unavailable {
                model: "judge".to_string(),
                message: "timeout".to_string(),
            })
        };
        let sims = vec![SimulationRun::new("t1", 0, recovering_transcript())];
        let window = JudgeWindow::default();
        let r = compute_gsrt(&[task()], &sims, "judge", &args(), Some(&judge), window).unwrap();
        assert_eq!(r.num_shifts, 1);
        assert_eq!(r.median_tool, Some(2.0));
        assert!(!r.shifts[0].judged);
    }

    #[test]
    fn failure_modes() {
        let sims = vec![SimulationRun::new("t1", 0, recovering_transcript())];
        assert!(matches!(
            compute_gsrt(&[task()], &sims, " ", &args(), None, JudgeWindow::default()),
            Err(MetricError::InvalidConfig { field: "judge_model", .. })
        ));

        let mut short = scenario();
        short.goals.truncate(1);
        let tasks = vec![Task::new("t1").with_goal_shifts(short)];
        assert!(matches!(
            compute_gsrt(&tasks, &sims, "judge", &args(), None, JudgeWindow::default()),
            Err(MetricError::MalformedScenario { .. })
        ));
    }

    #[test]
    fn estimator_fallback_is_empty() {
        let tasks = vec![task()];
        let sims = vec![SimulationRun::new("t1", 0, recovering_transcript())];
        let judge_args = args();
        let estimate = run_resilient(&GsrtEstimator::new(&tasks, &sims, "", &judge_args));
        assert!(estimate.provenance.is_fallback());
        assert_eq!(estimate.value, GsrtResult::empty());
    }
}
