use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::engine::{PreparedPlan, prepare_plan, scenario_result};
use super::error::{EngineError, EngineResult};
use super::rng::{Rng, derive_seed, percentile_of_sorted, sample_mean, sample_std_dev};
use super::types::{MonteCarloSummary, PercentileBands, PlanInputs, ScenarioResult};

pub const MONTE_CARLO_CONFIG_KEY: &str = "nestegg.monteCarloConfig";

const BATCH_SIZE: u32 = 50;
const TRIM_FRACTION: f64 = 0.05;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub num_scenarios: u32,
    pub seed: u64,
    /// Mean annual return in percent.
    pub return_mean: f64,
    /// Standard deviation of the annual return in percent.
    pub return_std_dev: f64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_scenarios: 1_000,
            seed: 42,
            return_mean: 7.0,
            return_std_dev: 15.0,
        }
    }
}

impl MonteCarloConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.num_scenarios == 0 {
            return Err(EngineError::invalid("numScenarios", "must be positive"));
        }
        if !self.return_mean.is_finite() {
            return Err(EngineError::invalid("returnMean", "must be finite"));
        }
        if !self.return_std_dev.is_finite() || self.return_std_dev < 0.0 {
            return Err(EngineError::invalid(
                "returnStdDev",
                "must be a non-negative finite number",
            ));
        }
        Ok(())
    }
}

pub fn run_monte_carlo(
    plan: &PlanInputs,
    config: &MonteCarloConfig,
    on_progress: Option<&mut dyn FnMut(f64)>,
) -> EngineResult<MonteCarloSummary> {
    let never = AtomicBool::new(false);
    run_monte_carlo_with_control(plan, config, on_progress, &never)
}

/// Like [`run_monte_carlo`], but checks `cancel` before every batch of
/// scenarios. A cancelled run yields [`EngineError::Cancelled`], never a partial
/// summary.
pub fn run_monte_carlo_with_control(
    plan: &PlanInputs,
    config: &MonteCarloConfig,
    on_progress: Option<&mut dyn FnMut(f64)>,
    cancel: &AtomicBool,
) -> EngineResult<MonteCarloSummary> {
    config.validate()?;
    let prepared = prepare_plan(plan)?;

    let started = Instant::now();
    info!(
        scenarios = config.num_scenarios,
        years = prepared.simulated_years(),
        seed = config.seed,
        "starting monte carlo run"
    );

    let results = run_scenarios(&prepared, config, on_progress, cancel)?;
    let summary = summarize(&results, config.seed);

    info!(
        scenarios = summary.total_scenarios,
        success_rate = summary.success_rate,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "monte carlo run finished"
    );
    Ok(summary)
}

pub(crate) fn run_scenarios(
    prepared: &PreparedPlan<'_>,
    config: &MonteCarloConfig,
    mut on_progress: Option<&mut dyn FnMut(f64)>,
    cancel: &AtomicBool,
) -> EngineResult<Vec<ScenarioResult>> {
    let total = config.num_scenarios;
    let mut results = Vec::with_capacity(total as usize);
    let mut start = 0;

    while start < total {
        if cancel.load(Ordering::Relaxed) {
            info!(completed = start, total, "monte carlo run cancelled");
            return Err(EngineError::Cancelled);
        }
        let end = total.min(start + BATCH_SIZE);
        results.extend(run_batch(prepared, config, start..end)?);
        start = end;

        if let Some(report) = on_progress.as_mut() {
            report(start as f64 / total as f64 * 100.0);
        }
    }

    Ok(results)
}

#[cfg(feature = "parallel")]
fn run_batch(
    prepared: &PreparedPlan<'_>,
    config: &MonteCarloConfig,
    indices: Range<u32>,
) -> EngineResult<Vec<ScenarioResult>> {
    indices
        .into_par_iter()
        .map(|index| run_scenario(prepared, config, index))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_batch(
    prepared: &PreparedPlan<'_>,
    config: &MonteCarloConfig,
    indices: Range<u32>,
) -> EngineResult<Vec<ScenarioResult>> {
    indices
        .map(|index| run_scenario(prepared, config, index))
        .collect()
}

pub fn scenario_returns(config: &MonteCarloConfig, index: u32, years: u32) -> Vec<f64> {
    let mut rng = Rng::new(derive_seed(config.seed, index));
    let mean = config.return_mean / 100.0;
    let std_dev = config.return_std_dev / 100.0;
    (0..years).map(|_| rng.next_normal(mean, std_dev)).collect()
}

fn run_scenario(
    prepared: &PreparedPlan<'_>,
    config: &MonteCarloConfig,
    index: u32,
) -> EngineResult<ScenarioResult> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let returns = scenario_returns(config, index, prepared.simulated_years());
        let years = prepared.simulate(Some(&returns));
        scenario_result(index, years, returns)
    }))
    .map_err(|payload| {
        let err = EngineError::from_panic(payload);
        warn!(scenario = index, error = %err, "scenario failed");
        err
    })
}

fn trimmed_mean(sorted: &[f64]) -> f64 {
    let trim = (sorted.len() as f64 * TRIM_FRACTION).floor() as usize;
    if sorted.len() > 2 * trim {
        sample_mean(&sorted[trim..sorted.len() - trim])
    } else {
        sample_mean(sorted)
    }
}

fn percentile_bands(results: &[ScenarioResult]) -> PercentileBands {
    let Some(first) = results.first() else {
        return PercentileBands::default();
    };
    let mut bands = PercentileBands {
        years: first.years.iter().map(|y| y.year).collect(),
        ages: first.years.iter().map(|y| y.age).collect(),
        ..PercentileBands::default()
    };

    let mut column = Vec::with_capacity(results.len());
    for idx in 0..first.years.len() {
        column.clear();
        column.extend(
            results
                .iter()
                .filter_map(|r| r.years.get(idx).map(|y| y.net_worth)),
        );
        column.sort_by(|a, b| a.total_cmp(b));
        bands.p10.push(percentile_of_sorted(&column, 10.0));
        bands.p25.push(percentile_of_sorted(&column, 25.0));
        bands.p50.push(percentile_of_sorted(&column, 50.0));
        bands.p75.push(percentile_of_sorted(&column, 75.0));
        bands.p90.push(percentile_of_sorted(&column, 90.0));
    }
    bands
}

pub(crate) fn summarize(results: &[ScenarioResult], seed: u64) -> MonteCarloSummary {
    let total = results.len();
    let successful = results.iter().filter(|r| r.success).count();

    // Ascending by final net worth, ties by scenario index.
    let mut ranked = results.iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        a.final_net_worth
            .total_cmp(&b.final_net_worth)
            .then(a.scenario_id.cmp(&b.scenario_id))
    });
    let finals = ranked.iter().map(|r| r.final_net_worth).collect::<Vec<_>>();
    let pick = |idx: usize| {
        ranked
            .get(idx)
            .map(|r| (*r).clone())
            .unwrap_or_else(|| scenario_result(0, Vec::new(), Vec::new()))
    };

    MonteCarloSummary {
        success_rate: if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        },
        successful_scenarios: successful as u32,
        total_scenarios: total as u32,
        percentiles: percentile_bands(results),
        worst_case: pick(0),
        median_case: pick(total / 2),
        best_case: pick(total.saturating_sub(1)),
        trimmed_mean_final_net_worth: trimmed_mean(&finals),
        mean_final_net_worth: sample_mean(&finals),
        final_net_worth_std_dev: sample_std_dev(&finals),
        seed,
    }
}
