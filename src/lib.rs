//! Backtesting and grid optimisation of a single averaging ("martingale") strategy.
//!
//! The crate simulates the strategy tick by tick over a close-price series,
//! sweeps a lot size / loss trigger / profit target grid in parallel and ranks
//! the outcome by net profit, either over the whole series or per calendar month.

pub mod config;
pub mod data;
pub mod engine;
pub mod monthly;
pub mod pip;
pub mod report;
pub mod sweep;

pub use config::{ConfigError, ParamGrid, SweepConfig};
pub use data::PriceTick;
pub use engine::{
    ClosePolicy, Direction, EngineState, ParameterSet, RunOutcome, Simulation, Trade,
};
pub use monthly::{MonthlyLedger, MonthlyLedgerEntry};
pub use sweep::{MonthlyResult, SweepError, SweepResult};

/// Rounds `v` to `digits` decimal places.
pub fn round_to(v: f64, digits: i32) -> f64 {
    let f = 10_f64.powi(digits);
    (v * f).round() / f
}
