//! The pass^k reliability statistic.
//!
//! pass^k = C(successes, k) / C(trials, k): the probability that k trials
//! drawn without replacement from a task's trials all succeed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MetricError;
use crate::metrics::{count_as_f64, mean, ratio};
use crate::model::{Results, SimulationRun};

/// Returns true if `reward` is within `tolerance` of 1.0.
#[inline]
#[must_use]
pub fn is_successful(reward: f64, tolerance: f64) -> bool {
    (reward - 1.0).abs() <= tolerance
}

/// Computes pass^k for one task.
///
/// # Errors
///
/// Returns `MetricError::InvalidArgument` if `num_trials < k`.
///
/// # Examples
///
/// ```
/// use agent_metrics::pass_hat_k;
///
/// // C(3, 2) / C(4, 2) = 3 / 6
/// assert!((pass_hat_k(4, 3, 2).unwrap() - 0.5).abs() < f64::EPSILON);
/// assert!(pass_hat_k(2, 2, 3).is_err());
/// ```
pub fn pass_hat_k(num_trials: usize, success_count: usize, k: usize) -> Result<f64, MetricError> {
    if num_trials < k {
        return Err(MetricError::InvalidArgument { num_trials, k });
    }
    Ok(binomial(success_count, k) / binomial(num_trials, k))
}

/// Binomial coefficient, exact while it fits in u128.
#[allow(clippy::cast_precision_loss)]
fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut exact: u128 = 1;
    for i in 0..k {
        let step = exact
            .checked_mul((n - i) as u128)
            .map(|v| v / (i as u128 + 1));
        match step {
            Some(v) => exact = v,
            None => return binomial_approx(n, k),
        }
    }
    exact as f64
}

fn binomial_approx(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * count_as_f64(n - i) / count_as_f64(i + 1))
}

/// Trial count and pass^k values of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPassHatK {
    /// Runs observed for the task.
    pub num_trials: usize,
    /// Runs whose reward counts as success.
    pub successes: usize,
    /// pass^k for k = 1..=max_k.
    pub pass_hat_ks: BTreeMap<usize, f64>,
}

/// Largest k for which pass^k can be computed for every task.
///
/// Declared trial counts come from each run's task, or the run info when the
/// task declares none. Disagreeing declarations are logged and the largest is
/// used; with no declaration the largest observed run count is used. The
/// result is clamped to the smallest observed run count of any task.
///
/// # Errors
///
/// Returns `MetricError::NoSimulations` for empty results.
pub fn max_k(results: &Results) -> Result<usize, MetricError> {
    let runs = runs_per_task(&results.simulations);
    let Some(&min_observed) = runs.values().min() else {
        return Err(MetricError::NoSimulations);
    };
    let max_observed = runs.values().copied().max().unwrap_or(min_observed);

    let declared: BTreeSet<usize> = results
        .simulations
        .iter()
        .filter_map(|sim| {
            results
                .task(&sim.task_id)
                .and_then(|t| t.num_trials)
                .or(results.info.num_trials)
        })
        .collect();
    if declared.len() > 1 {
        warn!(?declared, "simulations declare different trial counts");
    }
    let expected = declared.last().copied().unwrap_or(max_observed);

    if min_observed < expected {
        warn!(
            min_observed,
            expected, "a task has fewer runs than expected trials, clamping max k"
        );
        return Ok(min_observed);
    }
    Ok(expected)
}

/// Per-task pass^k table for k = 1..=`max_k`.
///
/// # Errors
///
/// Returns `MetricError::NoSimulations` for empty results and propagates
/// `InvalidArgument` from [`pass_hat_k`].
pub fn tasks_pass_hat_k(
    results: &Results,
    tolerance: f64,
) -> Result<BTreeMap<String, TaskPassHatK>, MetricError> {
    let max_k = max_k(results)?;
    let mut table = BTreeMap::new();
    for (task_id, sims) in group_by_task(&results.simulations) {
        let num_trials = sims.len();
        let successes = sims
            .iter()
            .filter(|s| is_successful(s.reward().unwrap_or(0.0), tolerance))
            .count();
        let pass_hat_ks = (1..=max_k)
            .map(|k| pass_hat_k(num_trials, successes, k).map(|v| (k, v)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        table.insert(
            task_id.to_string(),
            TaskPassHatK {
                num_trials,
                successes,
                pass_hat_ks,
            },
        );
    }
    Ok(table)
}

/// Mean pass^k over tasks for k = 1..=`max_k`.
///
/// # Errors
///
/// Same as [`tasks_pass_hat_k`].
pub fn compute_pass_hat_ks(
    results: &Results,
    tolerance: f64,
) -> Result<BTreeMap<usize, f64>, MetricError> {
    let table = tasks_pass_hat_k(results, tolerance)?;
    let max_k = table
        .values()
        .filter_map(|t| t.pass_hat_ks.keys().next_back().copied())
        .max()
        .unwrap_or(0);
    Ok((1..=max_k)
        .map(|k| {
            let values: Vec<f64> = table
                .values()
                .filter_map(|t| t.pass_hat_ks.get(&k).copied())
                .collect();
            (k, mean(&values))
        })
        .collect())
}

/// Mean per-task success rate, or `None` without simulations.
///
/// Equals pass^1 and never fails; runs without a reward count as failures.
#[must_use]
pub fn mean_task_success_rate(simulations: &[SimulationRun], tolerance: f64) -> Option<f64> {
    let groups = group_by_task(simulations);
    if groups.is_empty() {
        return None;
    }
    let rates: Vec<f64> = groups
        .values()
        .map(|sims| {
            let successes = sims
                .iter()
                .filter(|s| is_successful(s.reward().unwrap_or(0.0), tolerance))
                .count();
            ratio(successes, sims.len())
        })
        .collect();
    Some(mean(&rates))
}

fn group_by_task(simulations: &[SimulationRun]) -> BTreeMap<&str, Vec<&SimulationRun>> {
    let mut groups: BTreeMap<&str, Vec<&SimulationRun>> = BTreeMap::new();
    for sim in simulations {
        groups.entry(sim.task_id.as_str()).or_default().push(sim);
    }
    groups
}

fn runs_per_task(simulations: &[SimulationRun]) -> BTreeMap<&str, usize> {
    simulations.iter().fold(BTreeMap::new(), |mut counts, sim| {
        *counts.entry(sim.task_id.as_str()).or_insert(0) += 1;
        counts
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;

    const TOL: f64 = 1e-6;

    fn runs(task_id: &str, rewards: &[f64]) -> Vec<SimulationRun> {
        rewards
            .iter()
            .enumerate()
            .map(|(trial, &r)| SimulationRun::new(task_id, trial, vec![]).with_reward(r))
            .collect()
    }

    #[test]
    fn pass_hat_k_examples() {
        assert!((pass_hat_k(4, 3, 2).unwrap() - 0.5).abs() < f64::EPSILON);
        assert!((pass_hat_k(4, 4, 4).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((pass_hat_k(4, 1, 2).unwrap() - 0.0).abs() < f64::EPSILON);
        assert!((pass_hat_k(5, 3, 1).unwrap() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn pass_hat_k_rejects_k_above_trials() {
        assert_eq!(
            pass_hat_k(2, 1, 3),
            Err(MetricError::InvalidArgument { num_trials: 2, k: 3 })
        );
    }

    #[test]
    fn pass_hat_zero_is_one() {
        assert!((pass_hat_k(3, 0, 0).unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn binomial_exact_and_large() {
        assert!((binomial(10, 3) - 120.0).abs() < f64::EPSILON);
        assert!((binomial(3, 5) - 0.0).abs() < f64::EPSILON);
        // C(200, 100) overflows u128 and takes the approximate path.
        let big = binomial(200, 100);
        assert!(big.is_finite() && big > 9.0e58);
    }

    #[test]
    fn success_tolerance() {
        assert!(is_successful(1.0, TOL));
        assert!(is_successful(0.999_999_5, TOL));
        assert!(!is_successful(0.99, TOL));
    }

    #[test]
    fn max_k_from_declared_and_observed() {
        let mut results = Results::new(vec![], runs("t1", &[1.0, 1.0, 0.0]));
        assert_eq!(max_k(&results).unwrap(), 3);

        results.info.num_trials = Some(2);
        assert_eq!(max_k(&results).unwrap(), 2);

        results.info.num_trials = Some(5);
        assert_eq!(max_k(&results).unwrap(), 3);

        results.tasks = vec![Task::new("t1").with_num_trials(1)];
        assert_eq!(max_k(&results).unwrap(), 1);
    }

    #[test]
    fn max_k_clamps_to_smallest_task() {
        let mut sims = runs("t1", &[1.0, 1.0, 1.0, 1.0]);
        sims.extend(runs("t2", &[1.0, 0.0]));
        let mut results = Results::new(vec![], sims);
        results.info.num_trials = Some(4);
        assert_eq!(max_k(&results).unwrap(), 2);
    }

    #[test]
    fn max_k_without_simulations() {
        assert_eq!(max_k(&Results::default()), Err(MetricError::NoSimulations));
    }

    #[test]
    fn pass_hat_ks_average_over_tasks() {
        let mut sims = runs("t1", &[1.0, 1.0, 1.0, 0.0]);
        sims.extend(runs("t2", &[1.0, 1.0, 1.0, 1.0]));
        let results = Results::new(vec![], sims);

        let table = tasks_pass_hat_k(&results, TOL).unwrap();
        assert_eq!(table["t1"].successes, 3);
        assert!((table["t1"].pass_hat_ks[&2] - 0.5).abs() < f64::EPSILON);

        let ks = compute_pass_hat_ks(&results, TOL).unwrap();
        assert_eq!(ks.len(), 4);
        assert!((ks[&1] - (0.75 + 1.0) / 2.0).abs() < f64::EPSILON);
        assert!((ks[&2] - (0.5 + 1.0) / 2.0).abs() < f64::EPSILON);
        assert!((ks[&4] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_rewards_are_failures() {
        let results = Results::new(vec![], runs("t1", &[0.5, 1.0]));
        let ks = compute_pass_hat_ks(&results, TOL).unwrap();
        assert!((ks[&1] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn mean_success_rate_counts_missing_rewards_as_failures() {
        let mut sims = runs("t1", &[1.0]);
        sims.push(SimulationRun::new("t1", 1, vec![]));
        sims.extend(runs("t2", &[1.0]));
        let rate = mean_task_success_rate(&sims, TOL).unwrap();
        assert!((rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(mean_task_success_rate(&[], TOL), None);
    }
}
