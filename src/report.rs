//! The metrics report: JSON, flat key map and text summary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DEFAULT_JUDGE_MODEL;
use crate::efficiency::TueSummary;
use crate::error::MetricError;
use crate::estimator::Provenance;
use crate::recovery::GsrtResult;
use crate::redundancy::{ProblematicTask, TcrrSummary};
use crate::success::TsrResult;

/// How the report was computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum ComputationPath {
    /// Every metric went through its estimator.
    Full,
    /// The full computation failed and the simple one was used.
    Simple {
        /// Why the full computation failed.
        reason: Option<String>,
    },
}

/// Report metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp.
    pub generated_at: String,
    /// Version of agent-metrics.
    pub version: String,
    /// Judge model used for goal-shift recovery.
    pub judge_model: String,
    /// Agent model, if recorded in the results.
    pub agent_llm: Option<String>,
    /// User simulator model, if recorded in the results.
    pub user_llm: Option<String>,
    /// Computation path.
    pub computation: ComputationPath,
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            agent_llm: None,
            user_llm: None,
            computation: ComputationPath::Full,
        }
    }
}

/// Which estimator tier produced each metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricProvenance {
    /// TSR tier.
    pub tsr: Provenance,
    /// TUE tier.
    pub tue: Provenance,
    /// TCRR tier.
    pub tcrr: Provenance,
    /// GSRT tier.
    pub gsrt: Provenance,
}

impl MetricProvenance {
    /// Every metric from its primary estimator.
    #[must_use]
    pub const fn primary() -> Self {
        Self {
            tsr: Provenance::Primary,
            tue: Provenance::Primary,
            tcrr: Provenance::Primary,
            gsrt: Provenance::Primary,
        }
    }

    /// Every metric from its fallback, for the same reason.
    #[must_use]
    pub fn fallback(reason: &str) -> Self {
        let tier = || Provenance::Fallback {
            reason: reason.to_string(),
        };
        Self {
            tsr: tier(),
            tue: tier(),
            tcrr: tier(),
            gsrt: tier(),
        }
    }
}

/// Complete agent metrics for one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Report metadata.
    pub metadata: ReportMetadata,
    /// Mean reward.
    pub avg_reward: f64,
    /// Mean agent cost.
    pub avg_agent_cost: f64,
    /// pass^k by k.
    pub pass_hat_ks: BTreeMap<usize, f64>,
    /// Task Success Rate.
    pub tsr: f64,
    /// Tool Usage Efficiency.
    pub tue: f64,
    /// Tool-Call Redundancy Ratio.
    pub tcrr: f64,
    /// Tool calls across all runs.
    pub num_tool_calls: usize,
    /// TSR breakdown.
    pub success: TsrResult,
    /// TUE breakdown.
    pub efficiency: TueSummary,
    /// TCRR breakdown.
    pub redundancy: TcrrSummary,
    /// GSRT breakdown.
    pub recovery: GsrtResult,
    /// Tasks with the highest redundancy.
    pub problematic_tasks: Vec<ProblematicTask>,
    /// Estimator tier of each metric.
    pub provenance: MetricProvenance,
}

impl AgentMetrics {
    /// Flattens the report into the legacy key set.
    ///
    /// Keys follow the `tsr_*`, `tue_*`, `tcrr_*`, `gsrt_*` naming with one
    /// `pass_hat_{k}` entry per k.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::Json` if a nested breakdown cannot be converted.
    pub fn as_flat_map(&self) -> Result<Map<String, Value>, MetricError> {
        let mut map = Map::new();
        let mut put = |key: &str, value: Value| {
            map.insert(key.to_string(), value);
        };

        put("avg_reward", Value::from(self.avg_reward));
        put("avg_agent_cost", Value::from(self.avg_agent_cost));
        put("tsr", Value::from(self.tsr));
        put("tue", Value::from(self.tue));
        put("tcrr", Value::from(self.tcrr));
        put("num_tool_calls", Value::from(self.num_tool_calls));

        let tsr = &self.success;
        put("tsr_communicate_info", Value::from(tsr.channel_success.communicate_info));
        put("tsr_action", Value::from(tsr.channel_success.action));
        put("tsr_nl_assertion", Value::from(tsr.channel_success.nl_assertion));
        put("tsr_weights", to_value(&tsr.weights, "tsr_weights")?);
        put("tsr_by_task", to_value(&tsr.by_task, "tsr_by_task")?);
        put("tsr_skipped_runs", Value::from(tsr.skipped_runs));

        let tue = &self.efficiency.overall;
        put("tue_tool_correctness", Value::from(tue.tool_correctness));
        put("tue_param_accuracy", Value::from(tue.param_accuracy));
        put("tue_correct_calls", Value::from(tue.correct_calls));
        put("tue_valid_param_calls", Value::from(tue.valid_param_calls));
        put("tue_by_task", to_value(&self.efficiency.by_task, "tue_by_task")?);

        let tcrr = &self.redundancy.overall;
        put("tcrr_window_size", Value::from(tcrr.window_size));
        put("tcrr_total_calls", Value::from(tcrr.total_calls));
        put("tcrr_redundant_calls", Value::from(tcrr.redundant_calls));
        put("tcrr_by_task", to_value(&self.redundancy.by_task, "tcrr_by_task")?);

        let gsrt = &self.recovery;
        put("gsrt_median_ack", Value::from(gsrt.median_ack));
        put("gsrt_median_tool", Value::from(gsrt.median_tool));
        put("gsrt_median_outcome", Value::from(gsrt.median_outcome));
        put("gsrt_num_shifts", Value::from(gsrt.num_shifts));
        put("gsrt_recovery_rate", Value::from(gsrt.recovery_rate));
        put("gsrt_transfer_rate", Value::from(gsrt.transfer_rate));
        put("gsrt_never_recovered_rate", Value::from(gsrt.never_recovered_rate));
        put("gsrt_by_task", to_value(&gsrt.by_task, "gsrt_by_task")?);

        for (k, v) in &self.pass_hat_ks {
            put(&format!("pass_hat_{k}"), Value::from(*v));
        }
        Ok(map)
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, MetricError> {
        serde_json::to_string_pretty(self).map_err(|e| MetricError::Json {
            context: "report serialization".to_string(),
            message: e.to_string(),
        })
    }

    /// Serializes to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns `MetricError::Json` if serialization fails.
    pub fn to_json_compact(&self) -> Result<String, MetricError> {
        serde_json::to_string(self).map_err(|e| MetricError::Json {
            context: "report serialization".to_string(),
            message: e.to_string(),
        })
    }
}

fn to_value<T: Serialize>(value: &T, context: &str) -> Result<Value, MetricError> {
    serde_json::to_value(value).map_err(|e| MetricError::Json {
        context: context.to_string(),
        message: e.to_string(),
    })
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

impl fmt::Display for AgentMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Average reward: {:.4}", self.avg_reward)?;
        writeln!(f, "Pass^k")?;
        for (k, v) in &self.pass_hat_ks {
            writeln!(f, "  k={k}: {v:.4}")?;
        }
        writeln!(f, "Average agent cost: {:.4}", self.avg_agent_cost)?;
        writeln!(f)?;

        let tsr = &self.success;
        writeln!(f, "TSR (Task Success Rate): {}", pct(self.tsr))?;
        writeln!(
            f,
            "  Communicate info: {} (weight {:.0}%)",
            pct(tsr.channel_success.communicate_info),
            tsr.weights.communicate_info * 100.0
        )?;
        writeln!(
            f,
            "  Actions: {} (weight {:.0}%)",
            pct(tsr.channel_success.action),
            tsr.weights.action * 100.0
        )?;
        writeln!(
            f,
            "  NL assertions: {} (weight {:.0}%)",
            pct(tsr.channel_success.nl_assertion),
            tsr.weights.nl_assertion * 100.0
        )?;
        if !tsr.by_task.is_empty() {
            writeln!(f, "  Task-level breakdown: {} tasks", tsr.by_task.len())?;
        }
        if tsr.skipped_runs > 0 {
            writeln!(f, "  Runs without evaluation criteria: {}", tsr.skipped_runs)?;
        }

        let tue = &self.efficiency.overall;
        writeln!(f, "TUE (Tool Usage Efficiency): {}", pct(self.tue))?;
        writeln!(
            f,
            "  Tool correctness: {} ({}/{})",
            pct(tue.tool_correctness),
            tue.correct_calls,
            self.num_tool_calls
        )?;
        writeln!(
            f,
            "  Parameter accuracy: {} ({}/{})",
            pct(tue.param_accuracy),
            tue.valid_param_calls,
            self.num_tool_calls
        )?;

        let tcrr = &self.redundancy.overall;
        writeln!(f, "TCRR (Tool-Call Redundancy Ratio): {}", pct(self.tcrr))?;
        writeln!(f, "  Redundant calls: {}/{}", tcrr.redundant_calls, tcrr.total_calls)?;
        writeln!(f, "  Window size: {} assistant turns", tcrr.window_size)?;
        for task in &self.problematic_tasks {
            writeln!(
                f,
                "  High redundancy: {} {} ({}/{})",
                task.task_id,
                pct(task.redundancy_ratio),
                task.redundant_calls,
                task.total_calls
            )?;
        }
        writeln!(f, "Total tool calls: {}", self.num_tool_calls)?;

        let gsrt = &self.recovery;
        writeln!(f, "GSRT (Goal Shift Recovery Time):")?;
        if gsrt.num_shifts == 0 {
            return writeln!(f, "  No goal shifts detected");
        }
        writeln!(f, "  Goal shifts detected: {}", gsrt.num_shifts)?;
        writeln!(f, "  Recovery rate: {:.1}%", gsrt.recovery_rate * 100.0)?;
        writeln!(f, "  Transfer rate: {:.1}%", gsrt.transfer_rate * 100.0)?;
        writeln!(f, "  Never recovered rate: {:.1}%", gsrt.never_recovered_rate * 100.0)?;
        let variants = [
            ("Acknowledgment", gsrt.median_ack),
            ("Tool usage", gsrt.median_tool),
            ("Outcome success", gsrt.median_outcome),
        ];
        for (label, median) in variants {
            if let Some(turns) = median {
                writeln!(f, "  {label}: {turns:.1} turns (median)")?;
            }
        }
        if !gsrt.by_task.is_empty() {
            writeln!(f, "  Task-level breakdown: {} tasks with shifts", gsrt.by_task.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efficiency::TueResult;
    use crate::redundancy::TcrrResult;

    fn sample() -> AgentMetrics {
        let mut pass_hat_ks = BTreeMap::new();
        pass_hat_ks.insert(1, 0.75);
        pass_hat_ks.insert(2, 0.5);
        let mut redundancy = TcrrSummary::empty(3);
        redundancy.overall = TcrrResult {
            total_calls: 4,
            redundant_calls: 1,
            redundancy_ratio: 0.25,
            ..TcrrResult::empty(3)
        };
        AgentMetrics {
            metadata: ReportMetadata::default(),
            avg_reward: 0.75,
            avg_agent_cost: 0.02,
            pass_hat_ks,
            tsr: 0.6,
            tue: 0.9,
            tcrr: 0.25,
            num_tool_calls: 4,
            success: TsrResult::empty(),
            efficiency: TueSummary {
                overall: TueResult {
                    overall: 0.9,
                    total_calls: 4,
                    ..TueResult::empty()
                },
                by_task: BTreeMap::new(),
            },
            redundancy,
            recovery: GsrtResult::empty(),
            problematic_tasks: vec![],
            provenance: MetricProvenance::primary(),
        }
    }

    #[test]
    fn flat_map_has_legacy_keys() {
        let map = sample().as_flat_map().unwrap();
        for key in [
            "avg_reward",
            "tsr_communicate_info",
            "tsr_weights",
            "tue_valid_param_calls",
            "tcrr_window_size",
            "gsrt_median_ack",
            "gsrt_never_recovered_rate",
            "pass_hat_1",
            "pass_hat_2",
        ] {
            assert!(map.contains_key(key), "missing {key}");
        }
        assert_eq!(map["tcrr_redundant_calls"], 1);
        assert_eq!(map["gsrt_median_ack"], Value::Null);
        assert_eq!(map["tsr_weights"]["communicate_info"], 0.5);
    }

    #[test]
    fn report_to_json() {
        let report = sample();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"pass_hat_ks\""));
        assert!(json.contains("\"generated_at\""));
        let back: AgentMetrics = serde_json::from_str(&report.to_json_compact().unwrap()).unwrap();
        assert_eq!(back.pass_hat_ks, report.pass_hat_ks);
        assert_eq!(back.metadata.computation, ComputationPath::Full);
    }

    #[test]
    fn summary_text() {
        let text = sample().to_string();
        assert!(text.contains("k=2: 0.5000"));
        assert!(text.contains("TCRR (Tool-Call Redundancy Ratio): 25.00%"));
        assert!(text.contains("Redundant calls: 1/4"));
        assert!(text.contains("No goal shifts detected"));
    }

    #[test]
    fn summary_text_with_shifts() {
        let mut report = sample();
        report.recovery.num_shifts = 2;
        report.recovery.recovery_rate = 0.5;
        report.recovery.median_ack = Some(1.0);
        let text = report.to_string();
        assert!(text.contains("Goal shifts detected: 2"));
        assert!(text.contains("Acknowledgment: 1.0 turns (median)"));
        assert!(!text.contains("Tool usage:"));
    }

    #[test]
    fn metadata_defaults() {
        let meta = ReportMetadata::default();
        assert_eq!(meta.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(meta.judge_model, "gpt-4o-mini");
        assert!(chrono::DateTime::parse_from_rfc3339(&meta.generated_at).is_ok());
    }
}
