use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::round_to;
use crate::sweep::{MonthlyResult, SweepResult};

/// Best first. Ties keep no particular order.
pub fn rank_results(results: &mut [SweepResult]) {
    results.sort_by(|a, b| b.net_profit.partial_cmp(&a.net_profit).unwrap_or(Ordering::Equal));
}

pub fn rank_monthly(results: &mut [MonthlyResult]) {
    results.sort_by(|a, b| {
        a.month_key
            .cmp(&b.month_key)
            .then_with(|| b.net_profit.partial_cmp(&a.net_profit).unwrap_or(Ordering::Equal))
    });
}

pub fn top_k(ranked: &[SweepResult], k: usize) -> &[SweepResult] {
    &ranked[..k.min(ranked.len())]
}

#[derive(Serialize)]
struct ResultRow {
    lot_size: f64,
    loss_trigger: f64,
    profit_target: f64,
    net_profit: f64,
    final_balance: f64,
    max_drawdown_pct: f64,
    trades_opened: usize,
    max_open_trades: usize,
}

impl From<&SweepResult> for ResultRow {
    fn from(r: &SweepResult) -> Self {
        Self {
            lot_size: r.parameters.lot_size,
            loss_trigger: r.parameters.loss_trigger,
            profit_target: r.parameters.profit_target,
            net_profit: round_to(r.net_profit, 2),
            final_balance: round_to(r.final_balance, 2),
            max_drawdown_pct: round_to(r.max_drawdown_pct, 2),
            trades_opened: r.trades_opened,
            max_open_trades: r.max_open_trades,
        }
    }
}

#[derive(Serialize)]
struct MonthlyRow<'a> {
    month: &'a str,
    lot_size: f64,
    loss_trigger: f64,
    profit_target: f64,
    net_profit: f64,
    final_balance: f64,
    ticks: usize,
}

impl<'a> From<&'a MonthlyResult> for MonthlyRow<'a> {
    fn from(r: &'a MonthlyResult) -> Self {
        Self {
            month: &r.month_key,
            lot_size: r.parameters.lot_size,
            loss_trigger: r.parameters.loss_trigger,
            profit_target: r.parameters.profit_target,
            net_profit: round_to(r.net_profit, 2),
            final_balance: round_to(r.final_balance, 2),
            ticks: r.ticks,
        }
    }
}

pub fn write_results_csv(path: &Path, results: &[SweepResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for r in results {
        wtr.serialize(ResultRow::from(r))?;
    }
    wtr.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_monthly_csv(path: &Path, results: &[MonthlyResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for r in results {
        wtr.serialize(MonthlyRow::from(r))?;
    }
    wtr.flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_summary_json(path: &Path, payload: &Value) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn format_top_table(ranked: &[SweepResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4} {:>9} {:>13} {:>14} {:>12} {:>14} {:>8}",
        "rank", "lot_size", "loss_trigger", "profit_target", "net_profit", "final_balance", "max_dd%"
    );
    for (i, r) in ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4} {:>9.2} {:>13.2} {:>14.2} {:>12.2} {:>14.2} {:>8.2}",
            i + 1,
            r.parameters.lot_size,
            r.parameters.loss_trigger,
            r.parameters.profit_target,
            r.net_profit,
            r.final_balance,
            r.max_drawdown_pct
        );
    }
    out
}
