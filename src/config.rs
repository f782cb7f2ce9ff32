use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{ClosePolicy, ParameterSet};
use crate::pip::InstrumentClass;

pub const DEFAULT_INITIAL_BALANCE: f64 = 1000.0;
pub const DEFAULT_INSTRUMENT: &str = "EURUSD";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("grid axis `{axis}` has no values")]
    EmptyGrid { axis: &'static str },

    #[error("grid axis `{axis}` contains a non-finite value")]
    NonFiniteGridValue { axis: &'static str },

    #[error("initial balance must be positive, got {0}")]
    NonPositiveBalance(f64),

    #[error("instrument code is empty")]
    EmptyInstrument,

    #[error("top-k must be at least 1")]
    InvalidTopK,

    #[error("max open trades must be at least 1")]
    InvalidMaxOpenTrades,
}

/// The three ordered axes of the sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub lot_sizes: Vec<f64>,
    pub loss_triggers: Vec<f64>,
    pub profit_targets: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            lot_sizes: (1..=10).map(|i| i as f64 / 100.0).collect(),
            loss_triggers: (1..=10).map(|i| i as f64 * 5.0).collect(),
            profit_targets: (1..=10).map(|i| i as f64 * 10.0).collect(),
        }
    }
}

impl ParamGrid {
    pub fn len(&self) -> usize {
        self.lot_sizes.len() * self.loss_triggers.len() * self.profit_targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product, lot size outermost and profit target innermost.
    pub fn combinations(&self) -> Vec<ParameterSet> {
        self.lot_sizes
            .iter()
            .flat_map(|&lot_size| {
                self.loss_triggers.iter().flat_map(move |&loss_trigger| {
                    self.profit_targets.iter().map(move |&profit_target| ParameterSet {
                        lot_size,
                        loss_trigger,
                        profit_target,
                    })
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, values) in [
            ("lot_sizes", &self.lot_sizes),
            ("loss_triggers", &self.loss_triggers),
            ("profit_targets", &self.profit_targets),
        ] {
            if values.is_empty() {
                return Err(ConfigError::EmptyGrid { axis });
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ConfigError::NonFiniteGridValue { axis });
            }
        }
        Ok(())
    }

    /// Loads a grid from JSON. Axes missing from the file keep their default values.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read grid file: {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("failed to parse grid file: {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: GridFile = serde_json::from_str(raw)?;
        let mut grid = Self::default();
        if let Some(v) = file.lot_sizes {
            grid.lot_sizes = v;
        }
        if let Some(v) = file.loss_triggers {
            grid.loss_triggers = v;
        }
        if let Some(v) = file.profit_targets {
            grid.profit_targets = v;
        }
        Ok(grid)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GridFile {
    lot_sizes: Option<Vec<f64>>,
    loss_triggers: Option<Vec<f64>>,
    profit_targets: Option<Vec<f64>>,
}

/// Everything a sweep needs besides the price series.
#[derive(Clone, Debug, Serialize)]
pub struct SweepConfig {
    pub initial_balance: f64,
    pub instrument: String,
    pub grid: ParamGrid,
    pub policy: ClosePolicy,
    /// Months with fewer processed ticks are left out of monthly reports.
    pub min_ticks_per_month: usize,
    pub max_open_trades: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            instrument: DEFAULT_INSTRUMENT.to_string(),
            grid: ParamGrid::default(),
            policy: ClosePolicy::default(),
            min_ticks_per_month: 1,
            max_open_trades: None,
            seed: None,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(ConfigError::NonPositiveBalance(self.initial_balance));
        }
        InstrumentClass::classify(&self.instrument)?;
        if self.max_open_trades == Some(0) {
            return Err(ConfigError::InvalidMaxOpenTrades);
        }
        self.grid.validate()
    }
}
