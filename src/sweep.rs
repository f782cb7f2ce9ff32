//! Parallel grid sweep over lot size, loss trigger and profit target.
//!
//! Every combination runs on its own RNG seeded from `base_seed + index`,
//! so results do not depend on thread count or evaluation order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ConfigError, SweepConfig};
use crate::data::{PriceTick, split_into_month_windows};
use crate::engine::{ParameterSet, simulate, simulate_monthly};

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sweep aborted before completion")]
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepResult {
    #[serde(flatten)]
    pub parameters: ParameterSet,
    pub net_profit: f64,
    pub final_balance: f64,
    pub max_drawdown_pct: f64,
    pub trades_opened: usize,
    pub max_open_trades: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthlyResult {
    pub month_key: String,
    #[serde(flatten)]
    pub parameters: ParameterSet,
    pub net_profit: f64,
    pub final_balance: f64,
    pub ticks: usize,
}

/// The configured seed, or a fresh one from the OS.
pub fn resolve_seed(cfg: &SweepConfig) -> u64 {
    cfg.seed.unwrap_or_else(rand::random)
}

fn run_rng(base_seed: u64, idx: usize) -> StdRng {
    StdRng::seed_from_u64(base_seed.wrapping_add(idx as u64))
}

struct Progress {
    done: AtomicUsize,
    total: usize,
    every: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            every: (total / 10).max(1),
        }
    }

    fn tick(&self) {
        let n = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every == 0 || n == self.total {
            info!(done = n, total = self.total, "sweep progress");
        }
    }
}

fn start(ticks: &[PriceTick], cfg: &SweepConfig) -> Result<(Vec<ParameterSet>, u64), SweepError> {
    cfg.validate()?;
    let combos = cfg.grid.combinations();
    let base_seed = resolve_seed(cfg);
    info!(
        combinations = combos.len(),
        ticks = ticks.len(),
        seed = base_seed,
        instrument = %cfg.instrument,
        policy = ?cfg.policy,
        threads = rayon::current_num_threads(),
        "starting sweep"
    );
    Ok((combos, base_seed))
}

pub fn run_sweep(ticks: &[PriceTick], cfg: &SweepConfig) -> Result<Vec<SweepResult>, SweepError> {
    run_sweep_with_abort(ticks, cfg, &AtomicBool::new(false))
}

/// Whole-series sweep. Raising `abort` makes the sweep return
/// [`SweepError::Aborted`] instead of a partial table.
pub fn run_sweep_with_abort(
    ticks: &[PriceTick],
    cfg: &SweepConfig,
    abort: &AtomicBool,
) -> Result<Vec<SweepResult>, SweepError> {
    let (combos, base_seed) = start(ticks, cfg)?;
    let progress = Progress::new(combos.len());

    combos
        .par_iter()
        .enumerate()
        .map(|(i, &parameters)| {
            if abort.load(Ordering::Relaxed) {
                return Err(SweepError::Aborted);
            }
            let out = simulate(ticks, parameters, cfg, run_rng(base_seed, i))?;
            debug!(
                lot_size = parameters.lot_size,
                loss_trigger = parameters.loss_trigger,
                profit_target = parameters.profit_target,
                net_profit = out.net_profit,
                "combination done"
            );
            progress.tick();
            Ok(SweepResult {
                parameters,
                net_profit: out.net_profit,
                final_balance: out.final_balance,
                max_drawdown_pct: out.max_drawdown_pct,
                trades_opened: out.trades_opened,
                max_open_trades: out.max_open_trades,
            })
        })
        .collect()
}

pub fn run_monthly_sweep(
    ticks: &[PriceTick],
    cfg: &SweepConfig,
) -> Result<Vec<MonthlyResult>, SweepError> {
    run_monthly_sweep_with_abort(ticks, cfg, &AtomicBool::new(false))
}

/// One record per `(combination, month)`; months below
/// `min_ticks_per_month` are left out.
pub fn run_monthly_sweep_with_abort(
    ticks: &[PriceTick],
    cfg: &SweepConfig,
    abort: &AtomicBool,
) -> Result<Vec<MonthlyResult>, SweepError> {
    let (combos, base_seed) = start(ticks, cfg)?;
    let progress = Progress::new(combos.len());

    let per_combo: Vec<Vec<MonthlyResult>> = combos
        .par_iter()
        .enumerate()
        .map(|(i, &parameters)| {
            if abort.load(Ordering::Relaxed) {
                return Err(SweepError::Aborted);
            }
            let (out, ledger) = simulate_monthly(ticks, parameters, cfg, run_rng(base_seed, i))?;
            debug!(
                lot_size = parameters.lot_size,
                loss_trigger = parameters.loss_trigger,
                profit_target = parameters.profit_target,
                net_profit = out.net_profit,
                months = ledger.entries().len(),
                "combination done"
            );
            progress.tick();
            Ok(ledger
                .into_entries()
                .into_iter()
                .filter(|m| m.ticks >= cfg.min_ticks_per_month)
                .map(|m| MonthlyResult {
                    net_profit: m.net_profit(),
                    final_balance: m.end_balance,
                    month_key: m.month_key,
                    parameters,
                    ticks: m.ticks,
                })
                .collect())
        })
        .collect::<Result<_, SweepError>>()?;

    Ok(per_combo.into_iter().flatten().collect())
}

/// Re-runs one parameter set on each calendar month as an independent series.
pub fn validate_by_month(
    ticks: &[PriceTick],
    parameters: ParameterSet,
    cfg: &SweepConfig,
) -> Result<Vec<MonthlyResult>, SweepError> {
    cfg.validate()?;
    let base_seed = resolve_seed(cfg);
    let mut results = Vec::new();
    for (i, (month_key, window)) in split_into_month_windows(ticks).into_iter().enumerate() {
        if window.len() < cfg.min_ticks_per_month {
            debug!(month = %month_key, ticks = window.len(), "skipping short month");
            continue;
        }
        let out = simulate(window, parameters, cfg, run_rng(base_seed, i))?;
        results.push(MonthlyResult {
            month_key,
            parameters,
            net_profit: out.net_profit,
            final_balance: out.final_balance,
            ticks: window.len(),
        });
    }
    info!(months = results.len(), "month validation finished");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamGrid;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn series() -> Vec<PriceTick> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..24 * 90)
            .map(|h| PriceTick {
                timestamp: start + chrono::Duration::hours(h),
                price: 1.1 + 0.01 * ((h as f64) / 7.0).sin() + 0.002 * ((h as f64) / 3.0).cos(),
            })
            .collect()
    }

    fn small_cfg() -> SweepConfig {
        SweepConfig {
            grid: ParamGrid {
                lot_sizes: vec![1.0, 2.0],
                loss_triggers: vec![0.02, 0.05, 0.1],
                profit_targets: vec![0.03, 0.06],
            },
            seed: Some(11),
            ..SweepConfig::default()
        }
    }

    #[test]
    fn one_result_per_combination() {
        let cfg = small_cfg();
        let results = run_sweep(&series(), &cfg).unwrap();
        assert_eq!(results.len(), 12);
        for (i, a) in results.iter().enumerate() {
            for b in &results[i + 1..] {
                assert_ne!(a.parameters, b.parameters);
            }
        }
    }

    #[test]
    fn seeded_sweep_is_reproducible() {
        let cfg = small_cfg();
        let ticks = series();
        assert_eq!(run_sweep(&ticks, &cfg).unwrap(), run_sweep(&ticks, &cfg).unwrap());
    }

    #[test]
    fn monthly_sweep_sums_to_whole_series() {
        let cfg = small_cfg();
        let ticks = series();
        let whole = run_sweep(&ticks, &cfg).unwrap();
        let monthly = run_monthly_sweep(&ticks, &cfg).unwrap();
        assert_eq!(monthly.len(), whole.len() * 3);
        for r in &whole {
            let sum: f64 = monthly
                .iter()
                .filter(|m| m.parameters == r.parameters)
                .map(|m| m.net_profit)
                .sum();
            assert_relative_eq!(sum, r.net_profit, epsilon = 1e-6);
        }
    }

    #[test]
    fn short_months_filtered() {
        let mut ticks = series();
        // one lone tick in April
        let last = ticks.last().unwrap().timestamp;
        ticks.push(PriceTick {
            timestamp: last + chrono::Duration::days(2),
            price: 1.1,
        });
        let cfg = SweepConfig {
            min_ticks_per_month: 24,
            ..small_cfg()
        };
        let monthly = run_monthly_sweep(&ticks, &cfg).unwrap();
        assert!(monthly.iter().all(|m| m.month_key != "2024-04"));
        assert!(monthly.iter().any(|m| m.month_key == "2024-03"));
    }

    #[test]
    fn invalid_config_fails_before_running() {
        let cfg = SweepConfig {
            grid: ParamGrid {
                lot_sizes: vec![],
                ..ParamGrid::default()
            },
            ..SweepConfig::default()
        };
        assert!(matches!(
            run_sweep(&series(), &cfg),
            Err(SweepError::Config(ConfigError::EmptyGrid { axis: "lot_sizes" }))
        ));
    }

    #[test]
    fn raised_abort_flag_discards_results() {
        let abort = AtomicBool::new(true);
        let res = run_sweep_with_abort(&series(), &small_cfg(), &abort);
        assert!(matches!(res, Err(SweepError::Aborted)));
        let res = run_monthly_sweep_with_abort(&series(), &small_cfg(), &abort);
        assert!(matches!(res, Err(SweepError::Aborted)));
    }

    #[test]
    fn month_validation_runs_each_month_alone() {
        let cfg = small_cfg();
        let p = cfg.grid.combinations()[0];
        let months = validate_by_month(&series(), p, &cfg).unwrap();
        let keys: Vec<&str> = months.iter().map(|m| m.month_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);
        for m in &months {
            assert_relative_eq!(m.final_balance - cfg.initial_balance, m.net_profit, epsilon = 1e-9);
        }
    }
}
