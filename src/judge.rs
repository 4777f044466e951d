//! Judge interfaces for natural-language evaluation.
//!
//! The engine never talks to a model itself. Goal-shift recovery and
//! natural-language assertions are delegated to implementations of
//! [`RecoveryJudge`] and [`AssertionJudge`], which may wrap a model client,
//! a rule set, or a test stub. Closures with the matching signature
//! implement both traits.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JudgeError;
use crate::model::{GoalSpec, Message};

/// Result of one recovery variant after a goal shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOutcome", into = "RawOutcome")]
pub enum RecoveryOutcome {
    /// Recovered after this many assistant turns.
    Recovered {
        /// Assistant turns from the shift to recovery.
        turns: usize,
    },
    /// The window ended without recovery.
    NeverRecovered,
    /// The agent handed the user to a human.
    Transferred,
}

impl RecoveryOutcome {
    /// Turn distance, if recovered.
    #[must_use]
    pub const fn turns(self) -> Option<usize> {
        match self {
            Self::Recovered { turns } => Some(turns),
            _ => None,
        }
    }

    /// Returns true for [`RecoveryOutcome::Recovered`].
    #[must_use]
    pub const fn is_recovered(self) -> bool {
        matches!(self, Self::Recovered { .. })
    }

    /// Returns true for [`RecoveryOutcome::Transferred`].
    #[must_use]
    pub const fn is_transferred(self) -> bool {
        matches!(self, Self::Transferred)
    }
}

/// Wire form: a turn count, a label, or null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawOutcome {
    Turns(usize),
    Label(String),
    Missing,
}

impl TryFrom<RawOutcome> for RecoveryOutcome {
    type Error = String;

    fn try_from(raw: RawOutcome) -> Result<Self, Self::Error> {
        match raw {
            RawOutcome::Turns(turns) => Ok(Self::Recovered { turns }),
            RawOutcome::Missing => Ok(Self::NeverRecovered),
            RawOutcome::Label(label) => match label.trim().to_ascii_lowercase().as_str() {
                "never_recovered" | "never" | "none" => Ok(Self::NeverRecovered),
                "transferred" | "transfer" => Ok(Self::Transferred),
                other => other
                    .parse()
                    .map(|turns| Self::Recovered { turns })
                    .map_err(|_| format!("unknown recovery outcome '{label}'")),
            },
        }
    }
}

impl From<RecoveryOutcome> for RawOutcome {
    fn from(outcome: RecoveryOutcome) -> Self {
        match outcome {
            RecoveryOutcome::Recovered { turns } => Self::Turns(turns),
            RecoveryOutcome::NeverRecovered => Self::Label("never_recovered".to_string()),
            RecoveryOutcome::Transferred => Self::Label("transferred".to_string()),
        }
    }
}

/// A judge's assessment of one goal shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryVerdict {
    /// Agent acknowledged the new goal.
    pub acknowledgment: RecoveryOutcome,
    /// Agent used a tool relevant to the new goal.
    pub tool_usage: RecoveryOutcome,
    /// A relevant tool call succeeded.
    pub outcome: RecoveryOutcome,
}

impl RecoveryVerdict {
    /// Parses a verdict from judge output.
    ///
    /// Text around the outermost JSON object is ignored, so a model reply
    /// wrapped in prose or a code fence still parses.
    ///
    /// # Errors
    ///
    /// Returns `JudgeError::InvalidResponse` if no verdict object is found.
    ///
    /// # Examples
    ///
    /// ```
    /// use agent_metrics::{RecoveryOutcome, RecoveryVerdict};
    ///
    /// let verdict = RecoveryVerdict::from_json(
    ///     r#"{"acknowledgment": 1, "tool_usage": 2, "outcome": "never_recovered"}"#,
    /// ).unwrap();
    /// assert_eq!(verdict.tool_usage, RecoveryOutcome::Recovered { turns: 2 });
    /// assert_eq!(verdict.outcome, RecoveryOutcome::NeverRecovered);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, JudgeError> {
        let body = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => &text[start..=end],
            _ => {
                return Err(JudgeError::InvalidResponse {
                    message: "no JSON object in judge output".to_string(),
                });
            }
        };
        serde_json::from_str(body).map_err(|e| JudgeError::InvalidResponse {
            message: e.to_string(),
        })
    }

    /// Combined classification of the three variants.
    ///
    /// `Transferred` wins over `Recovered`, which wins over `NeverRecovered`.
    #[must_use]
    pub fn classify(&self) -> ShiftClassification {
        let variants = [self.acknowledgment, self.tool_usage, self.outcome];
        if variants.iter().any(|v| v.is_transferred()) {
            ShiftClassification::Transferred
        } else if variants.iter().any(|v| v.is_recovered()) {
            ShiftClassification::Recovered
        } else {
            ShiftClassification::NeverRecovered
        }
    }
}

/// Overall classification of a goal shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftClassification {
    /// At least one variant recovered and none transferred.
    Recovered,
    /// No variant recovered.
    NeverRecovered,
    /// The agent transferred the user.
    Transferred,
}

/// Context handed to a [`RecoveryJudge`] for one goal shift.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    /// Judge model identifier.
    pub model: &'a str,
    /// Model arguments (temperature, etc.).
    pub args: &'a Map<String, Value>,
    /// Task the transcript belongs to.
    pub task_id: &'a str,
    /// Goal the user shifted to.
    pub goal: &'a GoalSpec,
    /// Position of that goal in the scenario (1 for the first shift).
    pub goal_index: usize,
    /// Messages around the shift.
    pub window: &'a [Message],
    /// Index of the shift message within `window`.
    pub shift_offset: usize,
}

/// Assesses recovery after a goal shift.
///
/// Implementations are called synchronously once per detected shift.
pub trait RecoveryJudge: Send + Sync {
    /// Judges one shift.
    ///
    /// # Errors
    ///
    /// Returns `JudgeError` if the backend fails or answers with something
    /// that is not a verdict. The engine then falls back to its heuristic
    /// for that shift only.
    fn judge(&self, request: &JudgeRequest<'_>) -> Result<RecoveryVerdict, JudgeError>;
}

impl<F> RecoveryJudge for F
where
    F: Fn(&JudgeRequest<'_>) -> Result<RecoveryVerdict, JudgeError> + Send + Sync,
{
    fn judge(&self, request: &JudgeRequest<'_>) -> Result<RecoveryVerdict, JudgeError> {
        self(request)
    }
}

/// Evaluates natural-language assertions against a transcript.
pub trait AssertionJudge: Send + Sync {
    /// Returns one verdict per assertion, in order.
    ///
    /// # Errors
    ///
    /// Returns `JudgeError` if the assertions cannot be evaluated.
    fn evaluate(&self, assertions: &[String], messages: &[Message])
    -> Result<Vec<bool>, JudgeError>;
}

impl<F> AssertionJudge for F
where
    F: Fn(&[String], &[Message]) -> Result<Vec<bool>, JudgeError> + Send + Sync,
{
    fn evaluate(
        &self,
        assertions: &[String],
        messages: &[Message],
    ) -> Result<Vec<bool>, JudgeError> {
        self(assertions, messages)
    }
}
