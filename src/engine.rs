use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, SweepConfig};
use crate::data::PriceTick;
use crate::monthly::MonthlyLedger;
use crate::pip::pip_value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.random_bool(0.5) {
            Direction::Long
        } else {
            Direction::Short
        }
    }
}

/// When open trades are turned into realized balance.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ClosePolicy {
    /// Close the whole basket once its summed floating profit reaches the target.
    #[default]
    Aggregate,
    /// Close each trade on its own once its floating profit reaches the target.
    PerTrade,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub lot_size: f64,
    pub loss_trigger: f64,
    pub profit_target: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Trade {
    pub entry_price: f64,
    pub direction: Direction,
    pub floating_profit: f64,
}

impl Trade {
    fn open(entry_price: f64, direction: Direction) -> Self {
        Self {
            entry_price,
            direction,
            floating_profit: 0.0,
        }
    }

    fn mark(&mut self, price: f64, pip: f64) {
        self.floating_profit = match self.direction {
            Direction::Long => (price - self.entry_price) * pip,
            Direction::Short => (self.entry_price - price) * pip,
        };
    }
}

#[derive(Clone, Debug)]
pub struct EngineState {
    pub balance: f64,
    pub direction: Direction,
    pub open_trades: Vec<Trade>,
    pub trades_opened: usize,
    pub max_open_trades: usize,
    pub peak_equity: f64,
    pub max_drawdown: f64,
}

impl EngineState {
    fn new(initial_balance: f64, direction: Direction) -> Self {
        Self {
            balance: initial_balance,
            direction,
            open_trades: Vec::new(),
            trades_opened: 0,
            max_open_trades: 0,
            peak_equity: initial_balance,
            max_drawdown: 0.0,
        }
    }

    pub fn floating_profit(&self) -> f64 {
        self.open_trades.iter().map(|t| t.floating_profit).sum()
    }

    pub fn equity(&self) -> f64 {
        self.balance + self.floating_profit()
    }
}

/// Balance and equity right after a tick has been processed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub balance: f64,
    pub equity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunOutcome {
    pub final_balance: f64,
    pub net_profit: f64,
    pub trades_opened: usize,
    pub max_open_trades: usize,
    pub still_open: usize,
    pub max_drawdown_pct: f64,
}

/// One strategy run over one price series.
pub struct Simulation<R> {
    params: ParameterSet,
    policy: ClosePolicy,
    pip: f64,
    initial_balance: f64,
    max_open_trades: Option<usize>,
    primed: bool,
    state: EngineState,
    rng: R,
}

impl<R: Rng> Simulation<R> {
    pub fn new(params: ParameterSet, cfg: &SweepConfig, mut rng: R) -> Result<Self, ConfigError> {
        let pip = pip_value(&cfg.instrument, params.lot_size)?;
        let direction = Direction::random(&mut rng);
        Ok(Self {
            params,
            policy: cfg.policy,
            pip,
            initial_balance: cfg.initial_balance,
            max_open_trades: cfg.max_open_trades,
            primed: false,
            state: EngineState::new(cfg.initial_balance, direction),
            rng,
        })
    }

    /// Overrides the randomly drawn starting direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.state.direction = direction;
        self
    }

    pub fn pip(&self) -> f64 {
        self.pip
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Advances the state machine by one tick.
    ///
    /// The first tick is only a reference point and yields `None`.
    pub fn step(&mut self, tick: &PriceTick) -> Option<EquityPoint> {
        if !self.primed {
            self.primed = true;
            return None;
        }

        let price = tick.price;
        for t in &mut self.state.open_trades {
            t.mark(price, self.pip);
        }

        match self.policy {
            ClosePolicy::Aggregate => self.settle_aggregate(price),
            ClosePolicy::PerTrade => self.settle_per_trade(price),
        }

        if self.state.open_trades.is_empty() {
            self.open_trade(price);
        }

        let equity = self.state.equity();
        self.track_drawdown(equity);

        Some(EquityPoint {
            timestamp: tick.timestamp,
            balance: self.state.balance,
            equity,
        })
    }

    fn settle_aggregate(&mut self, price: f64) {
        let floating = self.state.floating_profit();
        if !self.state.open_trades.is_empty() && floating >= self.params.profit_target {
            self.state.balance += floating;
            self.state.open_trades.clear();
            self.state.direction = Direction::random(&mut self.rng);
        } else if self.averaging_due() {
            self.open_trade(price);
        }
    }

    fn settle_per_trade(&mut self, price: f64) {
        let target = self.params.profit_target;
        let mut realized = 0.0;
        let mut closed = 0_usize;
        self.state.open_trades.retain(|t| {
            if t.floating_profit >= target {
                realized += t.floating_profit;
                closed += 1;
                false
            } else {
                true
            }
        });
        self.state.balance += realized;
        // one fresh direction per realized trade
        for _ in 0..closed {
            self.state.direction = Direction::random(&mut self.rng);
        }

        if self.averaging_due() {
            self.open_trade(price);
        }
    }

    fn averaging_due(&self) -> bool {
        let Some(last) = self.state.open_trades.last() else {
            return false;
        };
        if let Some(cap) = self.max_open_trades {
            if self.state.open_trades.len() >= cap {
                return false;
            }
        }
        last.floating_profit <= -self.params.loss_trigger
    }

    fn open_trade(&mut self, price: f64) {
        self.state
            .open_trades
            .push(Trade::open(price, self.state.direction));
        self.state.trades_opened += 1;
        self.state.max_open_trades = self.state.max_open_trades.max(self.state.open_trades.len());
    }

    fn track_drawdown(&mut self, equity: f64) {
        if equity > self.state.peak_equity {
            self.state.peak_equity = equity;
        }
        let peak = self.state.peak_equity;
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > self.state.max_drawdown {
                self.state.max_drawdown = dd;
            }
        }
    }

    /// Runs every tick, handing each produced point to `on_point`.
    pub fn run<F: FnMut(&EquityPoint)>(&mut self, ticks: &[PriceTick], mut on_point: F) {
        for tick in ticks {
            if let Some(point) = self.step(tick) {
                on_point(&point);
            }
        }
    }

    /// Final figures, with still-open trades valued at their last floating profit.
    pub fn outcome(&self) -> RunOutcome {
        let final_balance = self.state.equity();
        RunOutcome {
            final_balance,
            net_profit: final_balance - self.initial_balance,
            trades_opened: self.state.trades_opened,
            max_open_trades: self.state.max_open_trades,
            still_open: self.state.open_trades.len(),
            max_drawdown_pct: self.state.max_drawdown * 100.0,
        }
    }
}

/// Whole-series run.
pub fn simulate<R: Rng>(
    ticks: &[PriceTick],
    params: ParameterSet,
    cfg: &SweepConfig,
    rng: R,
) -> Result<RunOutcome, ConfigError> {
    let mut sim = Simulation::new(params, cfg, rng)?;
    sim.run(ticks, |_| {});
    Ok(sim.outcome())
}

/// Whole-series run that also buckets the equity trajectory by month.
pub fn simulate_monthly<R: Rng>(
    ticks: &[PriceTick],
    params: ParameterSet,
    cfg: &SweepConfig,
    rng: R,
) -> Result<(RunOutcome, MonthlyLedger), ConfigError> {
    let mut sim = Simulation::new(params, cfg, rng)?;
    let mut ledger = MonthlyLedger::new(cfg.initial_balance);
    sim.run(ticks, |p| ledger.record(p));
    Ok((sim.outcome(), ledger))
}

/// Whole-series run keeping every equity point.
pub fn simulate_trajectory<R: Rng>(
    ticks: &[PriceTick],
    params: ParameterSet,
    cfg: &SweepConfig,
    rng: R,
) -> Result<(RunOutcome, Vec<EquityPoint>), ConfigError> {
    let mut sim = Simulation::new(params, cfg, rng)?;
    let mut points = Vec::with_capacity(ticks.len().saturating_sub(1));
    sim.run(ticks, |p| points.push(*p));
    Ok((sim.outcome(), points))
}
