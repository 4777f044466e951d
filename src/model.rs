//! Transcript, task and results types consumed by the metrics engine.
//!
//! These mirror the JSON layout of a tau2-style results file so a run can be
//! deserialized directly with `serde_json`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MetricError;

/// Party that requested a tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requestor {
    /// The agent under evaluation.
    #[default]
    Assistant,
    /// The simulated user.
    User,
}

/// A single tool invocation attached to a user or assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier, unique within one run.
    #[serde(default)]
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Argument mapping.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Party that issued the call.
    #[serde(default)]
    pub requestor: Requestor,
}

impl ToolCall {
    /// Creates an assistant tool call.
    ///
    /// Non-object `arguments` are treated as an empty mapping.
    ///
    /// # Examples
    ///
    /// ```
    /// use agent_metrics::ToolCall;
    /// use serde_json::json;
    ///
    /// let call = ToolCall::new("call_1", "get_balance", json!({"account_id": "A1"}));
    /// assert_eq!(call.arguments.len(), 1);
    /// ```
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            requestor: Requestor::Assistant,
        }
    }

    /// Marks the call as issued by the simulated user.
    #[must_use]
    pub fn from_user(mut self) -> Self {
        self.requestor = Requestor::User;
        self
    }
}

/// Message sent by the user or the assistant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantMessage {
    /// Text content.
    #[serde(default)]
    pub content: Option<String>,
    /// Tool calls attached to this message.
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolCall>,
    /// Raw turn marker recorded by the simulator.
    #[serde(default)]
    pub turn_idx: Option<usize>,
    /// Cost of producing this message.
    #[serde(default)]
    pub cost: Option<f64>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ParticipantMessage {
    /// Creates a text-only message.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Creates a message carrying tool calls and no text.
    #[must_use]
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }
}

/// Result of one tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    /// Identifier of the [`ToolCall`] this answers.
    pub id: String,
    /// Diagnostic or result text.
    #[serde(default)]
    pub content: Option<String>,
    /// Whether the tool reported an error.
    #[serde(default)]
    pub error: bool,
    /// Party that requested the call.
    #[serde(default)]
    pub requestor: Requestor,
    /// Raw turn marker recorded by the simulator.
    #[serde(default)]
    pub turn_idx: Option<usize>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ToolMessage {
    /// Creates a successful result.
    #[must_use]
    pub fn ok(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn err(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
            error: true,
            ..Self::default()
        }
    }

    /// Returns true if the tool did not report an error.
    #[must_use]
    pub const fn success(&self) -> bool {
        !self.error
    }
}

/// Bundle of tool results delivered together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiToolMessage {
    /// The bundled results.
    #[serde(default)]
    pub tool_messages: Vec<ToolMessage>,
    /// Raw turn marker recorded by the simulator.
    #[serde(default)]
    pub turn_idx: Option<usize>,
}

/// System prompt message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    /// Prompt text.
    #[serde(default)]
    pub content: Option<String>,
    /// Raw turn marker recorded by the simulator.
    #[serde(default)]
    pub turn_idx: Option<usize>,
}

/// One entry of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// System prompt.
    System(SystemMessage),
    /// Simulated user turn.
    User(ParticipantMessage),
    /// Agent turn.
    Assistant(ParticipantMessage),
    /// Single tool result.
    Tool(ToolMessage),
    /// Bundle of tool results.
    MultiTool(MultiToolMessage),
}

impl Message {
    /// Creates an assistant text message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(ParticipantMessage::text(content))
    }

    /// Creates an assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant(ParticipantMessage::calls(tool_calls))
    }

    /// Creates a user text message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(ParticipantMessage::text(content))
    }

    /// Returns true for assistant messages.
    #[must_use]
    pub const fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant(_))
    }

    /// Returns true for user messages.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Text content, if this variant carries any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::System(m) => m.content.as_deref(),
            Self::User(m) | Self::Assistant(m) => m.content.as_deref(),
            Self::Tool(m) => m.content.as_deref(),
            Self::MultiTool(_) => None,
        }
    }

    /// Tool calls attached to a user or assistant message.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::User(m) | Self::Assistant(m) => &m.tool_calls,
            _ => &[],
        }
    }

    /// Tool results carried by a tool or multi-tool message.
    #[must_use]
    pub fn tool_results(&self) -> &[ToolMessage] {
        match self {
            Self::Tool(m) => std::slice::from_ref(m),
            Self::MultiTool(m) => &m.tool_messages,
            _ => &[],
        }
    }

    /// Raw turn marker recorded by the simulator.
    #[must_use]
    pub const fn turn_idx(&self) -> Option<usize> {
        match self {
            Self::System(m) => m.turn_idx,
            Self::User(m) | Self::Assistant(m) => m.turn_idx,
            Self::Tool(m) => m.turn_idx,
            Self::MultiTool(m) => m.turn_idx,
        }
    }

    /// Cost of a user or assistant message.
    #[must_use]
    pub const fn cost(&self) -> Option<f64> {
        match self {
            Self::User(m) | Self::Assistant(m) => m.cost,
            _ => None,
        }
    }

    /// Timestamp of a user, assistant or tool message.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            Self::User(m) | Self::Assistant(m) => m.timestamp.as_deref(),
            Self::Tool(m) => m.timestamp.as_deref(),
            _ => None,
        }
    }
}

/// Reward assigned to a finished simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardInfo {
    /// Scalar reward, absent if the evaluator produced none.
    #[serde(default)]
    pub reward: Option<f64>,
}

/// One simulated conversation for one trial of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    /// Run identifier.
    #[serde(default)]
    pub id: String,
    /// Task this run attempts.
    pub task_id: String,
    /// Trial index.
    #[serde(default)]
    pub trial: usize,
    /// Ordered transcript.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Reward information.
    #[serde(default)]
    pub reward_info: Option<RewardInfo>,
    /// Total cost of the agent side.
    #[serde(default)]
    pub agent_cost: Option<f64>,
}

impl SimulationRun {
    /// Creates a run with no reward or cost.
    #[must_use]
    pub fn new(task_id: impl Into<String>, trial: usize, messages: Vec<Message>) -> Self {
        let task_id = task_id.into();
        Self {
            id: format!("{task_id}-{trial}"),
            task_id,
            trial,
            messages,
            reward_info: None,
            agent_cost: None,
        }
    }

    /// Sets the reward.
    #[must_use]
    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward_info = Some(RewardInfo {
            reward: Some(reward),
        });
        self
    }

    /// Sets the agent cost.
    #[must_use]
    pub fn with_agent_cost(mut self, cost: f64) -> Self {
        self.agent_cost = Some(cost);
        self
    }

    /// Scalar reward, if any.
    #[must_use]
    pub fn reward(&self) -> Option<f64> {
        self.reward_info.and_then(|r| r.reward)
    }
}

/// Action the agent is expected to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedAction {
    /// Tool name.
    pub name: String,
    /// Arguments that must match; keys absent here are unconstrained.
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Success criteria for a task, one list per TSR channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    /// Facts the agent must communicate to the user.
    #[serde(default)]
    pub communicate_info: Vec<String>,
    /// Actions the agent must execute.
    #[serde(default)]
    pub actions: Vec<ExpectedAction>,
    /// Natural-language assertions about the conversation.
    #[serde(default)]
    pub nl_assertions: Vec<String>,
}

/// A user objective within a goal-shift scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalSpec {
    /// Human-readable objective.
    #[serde(default)]
    pub description: String,
    /// Phrases that signal this goal in conversation.
    #[serde(default)]
    pub cues: Vec<String>,
    /// Tools relevant to this goal.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Ordered objectives of the simulated user; every goal after the first is a shift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalShiftScenario {
    /// Goals in the order the user pursues them.
    #[serde(default)]
    pub goals: Vec<GoalSpec>,
}

/// A benchmark task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    pub id: String,
    /// Success criteria.
    #[serde(default)]
    pub evaluation_criteria: Option<EvaluationCriteria>,
    /// Goal-shift scenario, if the user changes objectives.
    #[serde(default)]
    pub goal_shifts: Option<GoalShiftScenario>,
    /// Number of trials expected for this task.
    #[serde(default)]
    pub num_trials: Option<usize>,
}

impl Task {
    /// Creates a task with no criteria.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            evaluation_criteria: None,
            goal_shifts: None,
            num_trials: None,
        }
    }

    /// Sets the evaluation criteria.
    #[must_use]
    pub fn with_criteria(mut self, criteria: EvaluationCriteria) -> Self {
        self.evaluation_criteria = Some(criteria);
        self
    }

    /// Sets the goal-shift scenario.
    #[must_use]
    pub fn with_goal_shifts(mut self, scenario: GoalShiftScenario) -> Self {
        self.goal_shifts = Some(scenario);
        self
    }

    /// Sets the expected trial count.
    #[must_use]
    pub const fn with_num_trials(mut self, num_trials: usize) -> Self {
        self.num_trials = Some(num_trials);
        self
    }
}

/// Metadata describing the run that produced the results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Trials per task requested for the run.
    #[serde(default)]
    pub num_trials: Option<usize>,
    /// Judge model for goal-shift recovery.
    #[serde(default)]
    pub gsrt_judge_llm: Option<String>,
    /// Judge model arguments.
    #[serde(default)]
    pub gsrt_judge_llm_args: Option<Map<String, Value>>,
    /// Agent model.
    #[serde(default)]
    pub agent_llm: Option<String>,
    /// User simulator model.
    #[serde(default)]
    pub user_llm: Option<String>,
}

/// Tasks, simulations and run metadata for one benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Run metadata.
    #[serde(default)]
    pub info: RunInfo,
    /// Benchmark tasks.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Simulation runs.
    #[serde(default)]
    pub simulations: Vec<SimulationRun>,
}

impl Results {
    /// Creates results from tasks and simulations with empty metadata.
    #[must_use]
    pub fn new(tasks: Vec<Task>, simulations: Vec<SimulationRun>) -> Self {
        Self {
            info: RunInfo::default(),
            tasks,
            simulations,
        }
    }

    /// Parses a results document.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::Json` if the document does not match the schema.
    pub fn from_json(json: &str) -> Result<Self, MetricError> {
        serde_json::from_str(json).map_err(|e| MetricError::Json {
            context: "results deserialization".to_string(),
            message: e.to_string(),
        })
    }

    /// Looks up a task by identifier.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
