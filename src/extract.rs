//! Tool-call extraction with turn context and correlated outcomes.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::canonical::CallIdentity;
use crate::model::{Message, Requestor, SimulationRun, ToolCall, ToolMessage};

/// Error-content phrases that mark a failure as a parameter problem.
pub const PARAMETER_ERROR_KEYWORDS: [&str; 6] = [
    "invalid parameter",
    "missing parameter",
    "parameter error",
    "bad parameter",
    "invalid argument",
    "missing argument",
];

/// A tool call reconstructed from a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCall {
    /// Tool name.
    pub name: String,
    /// Raw arguments.
    pub arguments: Map<String, Value>,
    /// Canonical `(name, arguments)` identity.
    pub identity: CallIdentity,
    /// Raw turn marker of the carrying message (0 if absent).
    pub turn_idx: usize,
    /// Assistant messages seen up to and including the carrying message.
    pub assistant_turn_idx: usize,
    /// Call identifier.
    pub call_id: String,
    /// Tool executed without error (true when no result was recorded).
    pub correct: bool,
    /// Tool did not fail because of its parameters.
    pub params_valid: bool,
    /// Party that issued the call.
    pub requestor: Requestor,
    /// Cost of the carrying message.
    pub cost: f64,
    /// Seconds between the call and its result, when both carry timestamps.
    pub latency_secs: Option<f64>,
}

/// Calls extracted from one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptCalls {
    /// Task the run attempted.
    pub task_id: String,
    /// Trial index of the run.
    pub trial: usize,
    /// Calls in transcript order.
    pub calls: Vec<ExtractedCall>,
}

impl TranscriptCalls {
    /// Iterates over the calls of every transcript, in order.
    #[must_use]
    pub fn flatten(transcripts: &[Self]) -> impl Iterator<Item = &ExtractedCall> {
        transcripts.iter().flat_map(|t| t.calls.iter())
    }

    /// Total number of calls across transcripts.
    #[must_use]
    pub fn total_calls(transcripts: &[Self]) -> usize {
        transcripts.iter().map(|t| t.calls.len()).sum()
    }
}

/// Running state of the in-order transcript scan.
struct TurnCursor {
    assistant_turns: usize,
    calls: Vec<ExtractedCall>,
}

/// Extracts every tool call in a transcript.
///
/// Results are correlated by call id regardless of where they appear. The
/// assistant-turn counter starts at 0 and is bumped on each assistant message
/// before that message's calls are stamped, so calls on the first assistant
/// message carry 1 and user calls made before any assistant message carry 0.
///
/// # Examples
///
/// ```
/// use agent_metrics::{extract_tool_calls, Message, ToolCall, ToolMessage};
/// use serde_json::json;
///
/// let messages = vec![
///     Message::user("what's my balance?"),
///     Message::assistant_calls(vec![ToolCall::new("c1", "get_balance", json!({}))]),
///     Message::Tool(ToolMessage::err("c1", "Invalid parameter: account_id")),
/// ];
/// let calls = extract_tool_calls(&messages);
/// assert_eq!(calls[0].assistant_turn_idx, 1);
/// assert!(!calls[0].correct);
/// assert!(!calls[0].params_valid);
/// ```
#[must_use]
pub fn extract_tool_calls(messages: &[Message]) -> Vec<ExtractedCall> {
    let results = index_results(messages);

    let cursor = messages.iter().fold(
        TurnCursor {
            assistant_turns: 0,
            calls: Vec::new(),
        },
        |mut cursor, message| {
            if message.is_assistant() {
                cursor.assistant_turns += 1;
            }
            for call in message.tool_calls() {
                let record = record_call(call, message, cursor.assistant_turns, &results);
                cursor.calls.push(record);
            }
            cursor
        },
    );

    cursor.calls
}

/// Extracts calls from every simulation, keeping task and trial attribution.
#[must_use]
pub fn extract_simulation_calls(simulations: &[SimulationRun]) -> Vec<TranscriptCalls> {
    simulations
        .iter()
        .map(|sim| TranscriptCalls {
            task_id: sim.task_id.clone(),
            trial: sim.trial,
            calls: extract_tool_calls(&sim.messages),
        })
        .collect()
}

/// Returns true if error content names a parameter problem.
#[must_use]
pub fn is_parameter_error(content: &str) -> bool {
    let lowered = content.to_lowercase();
    PARAMETER_ERROR_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

fn index_results(messages: &[Message]) -> HashMap<&str, &ToolMessage> {
    messages
        .iter()
        .flat_map(Message::tool_results)
        .fold(HashMap::new(), |mut index, result| {
            index.insert(result.id.as_str(), result);
            index
        })
}

fn record_call(
    call: &ToolCall,
    message: &Message,
    assistant_turn_idx: usize,
    results: &HashMap<&str, &ToolMessage>,
) -> ExtractedCall {
    let result = if call.id.is_empty() {
        None
    } else {
        results.get(call.id.as_str()).copied()
    };

    let correct = result.is_none_or(ToolMessage::success);
    let params_valid = !result.is_some_and(|r| {
        r.error && r.content.as_deref().is_some_and(is_parameter_error)
    });
    let latency_secs =
        result.and_then(|r| latency_between(message.timestamp(), r.timestamp.as_deref()));

    ExtractedCall {
        name: call.name.clone(),
        arguments: call.arguments.clone(),
        identity: CallIdentity::new(call.name.clone(), &call.arguments),
        turn_idx: message.turn_idx().unwrap_or(0),
        assistant_turn_idx,
        call_id: call.id.clone(),
        correct,
        params_valid,
        requestor: call.requestor,
        cost: message.cost().unwrap_or(0.0),
        latency_secs,
    }
}

fn latency_between(sent: Option<&str>, answered: Option<&str>) -> Option<f64> {
    let sent = DateTime::parse_from_rfc3339(sent?).ok()?;
    let answered = DateTime::parse_from_rfc3339(answered?).ok()?;
    let elapsed = answered.signed_duration_since(sent);
    #[allow(clippy::cast_precision_loss)]
    let secs = elapsed.num_milliseconds() as f64 / 1000.0;
    (secs >= 0.0).then_some(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MultiToolMessage, ParticipantMessage};
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({"account_id": "A1"}))
    }

    #[test]
    fn first_assistant_message_is_turn_one() {
        let messages = vec![
            Message::user("hello"),
            Message::assistant_calls(vec![call("c1", "get_balance"), call("c2", "get_card")]),
            Message::assistant_calls(vec![call("c3", "get_balance")]),
        ];
        let calls = extract_tool_calls(&messages);
        let turns: Vec<usize> = calls.iter().map(|c| c.assistant_turn_idx).collect();
        assert_eq!(turns, vec![1, 1, 2]);
    }

    #[test]
    fn calls_before_any_assistant_message_are_turn_zero() {
        let messages = vec![
            Message::User(ParticipantMessage::calls(vec![call("u1", "check_phone").from_user()])),
            Message::assistant("sure"),
        ];
        let calls = extract_tool_calls(&messages);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].assistant_turn_idx, 0);
        assert_eq!(calls[0].requestor, Requestor::User);
    }

    #[test]
    fn user_calls_take_the_running_counter() {
        let messages = vec![
            Message::assistant("hi"),
            Message::User(ParticipantMessage::calls(vec![call("u1", "toggle_wifi").from_user()])),
        ];
        let calls = extract_tool_calls(&messages);
        assert_eq!(calls[0].assistant_turn_idx, 1);
    }

    #[test]
    fn unresolved_calls_count_as_succeeded() {
        let calls = extract_tool_calls(&[Message::assistant_calls(vec![call("c1", "x")])]);
        assert!(calls[0].correct);
        assert!(calls[0].params_valid);
    }

    #[test]
    fn results_correlate_regardless_of_position() {
        let messages = vec![
            Message::Tool(ToolMessage::err("c1", "service down")),
            Message::assistant_calls(vec![call("c1", "get_balance")]),
        ];
        let calls = extract_tool_calls(&messages);
        assert!(!calls[0].correct);
        // Not a parameter keyword.
        assert!(calls[0].params_valid);
    }

    #[test]
    fn multi_tool_results_are_indexed() {
        let messages = vec![
            Message::assistant_calls(vec![call("c1", "a"), call("c2", "b")]),
            Message::MultiTool(MultiToolMessage {
                tool_messages: vec![
                    ToolMessage::ok("c1", "done"),
                    ToolMessage::err("c2", "Error: MISSING ARGUMENT 'card_id'"),
                ],
                turn_idx: None,
            }),
        ];
        let calls = extract_tool_calls(&messages);
        assert!(calls[0].correct && calls[0].params_valid);
        assert!(!calls[1].correct && !calls[1].params_valid);
    }

    #[test]
    fn parameter_keywords_only_count_on_errors() {
        let messages = vec![
            Message::assistant_calls(vec![call("c1", "lookup")]),
            Message::Tool(ToolMessage::ok("c1", "no invalid parameter found")),
        ];
        let calls = extract_tool_calls(&messages);
        assert!(calls[0].params_valid);
    }

    #[test]
    fn cost_turn_marker_and_latency() {
        let mut sent = ParticipantMessage::calls(vec![call("c1", "get_balance")]);
        sent.cost = Some(0.25);
        sent.turn_idx = Some(4);
        sent.timestamp = Some("2025-01-01T00:00:00Z".to_string());
        let mut result = ToolMessage::ok("c1", "42");
        result.timestamp = Some("2025-01-01T00:00:01.500Z".to_string());

        let calls = extract_tool_calls(&[Message::Assistant(sent), Message::Tool(result)]);
        assert!((calls[0].cost - 0.25).abs() < f64::EPSILON);
        assert_eq!(calls[0].turn_idx, 4);
        assert!((calls[0].latency_secs.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn empty_ids_are_never_correlated() {
        let messages = vec![
            Message::assistant_calls(vec![ToolCall::new("", "x", json!({}))]),
            Message::Tool(ToolMessage::err("", "invalid parameter")),
        ];
        let calls = extract_tool_calls(&messages);
        assert!(calls[0].correct);
    }

    #[test]
    fn simulation_calls_keep_attribution() {
        let sims = vec![
            SimulationRun::new("t1", 0, vec![Message::assistant_calls(vec![call("c1", "a")])]),
            SimulationRun::new("t2", 1, vec![]),
        ];
        let transcripts = extract_simulation_calls(&sims);
        assert_eq!(transcripts[0].task_id, "t1");
        assert_eq!(transcripts[1].trial, 1);
        assert_eq!(TranscriptCalls::total_calls(&transcripts), 1);
        assert_eq!(TranscriptCalls::flatten(&transcripts).count(), 1);
    }
}
