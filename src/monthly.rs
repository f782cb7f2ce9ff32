//! Calendar-month bucketing of an equity trajectory.
//!
//! Month keys come from the tick timestamps. A month opens with the equity
//! carried over from the previous processed tick, so per-month net profits
//! of one run add up to the run's whole-series net profit.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::engine::EquityPoint;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthlyLedgerEntry {
    pub month_key: String,
    pub start_balance: f64,
    pub end_balance: f64,
    pub ticks: usize,
}

impl MonthlyLedgerEntry {
    pub fn net_profit(&self) -> f64 {
        self.end_balance - self.start_balance
    }
}

pub fn month_key(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m").to_string()
}

#[derive(Clone, Debug)]
pub struct MonthlyLedger {
    entries: Vec<MonthlyLedgerEntry>,
    index: HashMap<String, usize>,
    carried_equity: f64,
}

impl MonthlyLedger {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            carried_equity: initial_balance,
        }
    }

    pub fn record(&mut self, point: &EquityPoint) {
        let key = month_key(&point.timestamp);
        let same_as_last = self.entries.last().is_some_and(|e| e.month_key == key);
        let idx = if same_as_last {
            self.entries.len() - 1
        } else if let Some(&i) = self.index.get(&key) {
            i
        } else {
            self.entries.push(MonthlyLedgerEntry {
                month_key: key.clone(),
                start_balance: self.carried_equity,
                end_balance: self.carried_equity,
                ticks: 0,
            });
            let i = self.entries.len() - 1;
            self.index.insert(key, i);
            i
        };

        let entry = &mut self.entries[idx];
        entry.end_balance = point.equity;
        entry.ticks += 1;
        self.carried_equity = point.equity;
    }

    pub fn entries(&self) -> &[MonthlyLedgerEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MonthlyLedgerEntry> {
        self.entries
    }

    pub fn total_net_profit(&self) -> f64 {
        self.entries.iter().map(MonthlyLedgerEntry::net_profit).sum()
    }
}

/// Buckets a stored trajectory in one pass.
pub fn aggregate_monthly(initial_balance: f64, points: &[EquityPoint]) -> Vec<MonthlyLedgerEntry> {
    let mut ledger = MonthlyLedger::new(initial_balance);
    for p in points {
        ledger.record(p);
    }
    ledger.into_entries()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn point(y: i32, m: u32, d: u32, balance: f64, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            balance,
            equity,
        }
    }

    #[test]
    fn months_in_first_seen_order() {
        let points = vec![
            point(2024, 1, 5, 1000.0, 1002.0),
            point(2024, 1, 20, 1010.0, 1008.0),
            point(2024, 2, 1, 1010.0, 1015.0),
            point(2024, 3, 1, 1030.0, 1030.0),
        ];
        let months = aggregate_monthly(1000.0, &points);
        let keys: Vec<&str> = months.iter().map(|m| m.month_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02", "2024-03"]);

        assert_relative_eq!(months[0].start_balance, 1000.0);
        assert_relative_eq!(months[0].end_balance, 1008.0);
        assert_eq!(months[0].ticks, 2);

        // opens where January closed
        assert_relative_eq!(months[1].start_balance, 1008.0);
        assert_relative_eq!(months[1].net_profit(), 7.0);
        assert_relative_eq!(months[2].net_profit(), 15.0);
    }

    #[test]
    fn month_nets_sum_to_whole_series() {
        let points = vec![
            point(2023, 11, 30, 1000.0, 990.0),
            point(2023, 12, 1, 1000.0, 970.0),
            point(2024, 1, 2, 1025.0, 1025.0),
        ];
        let mut ledger = MonthlyLedger::new(1000.0);
        for p in &points {
            ledger.record(p);
        }
        assert_relative_eq!(ledger.total_net_profit(), 25.0);
    }

    #[test]
    fn month_key_is_year_dash_month() {
        let p = point(2021, 7, 4, 0.0, 0.0);
        assert_eq!(month_key(&p.timestamp), "2021-07");
    }

    #[test]
    fn empty_trajectory_has_no_months() {
        assert!(aggregate_monthly(1000.0, &[]).is_empty());
    }
}
