use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{info, warn};

use crate::monthly::month_key;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PriceTick {
    pub timestamp: NaiveDateTime,
    pub price: f64,
}

const TIME_COLUMNS: &[&str] = &["date", "datetime", "time", "timestamp", "gmt time"];
const PRICE_COLUMNS: &[&str] = &["close", "price"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
];

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        let secs = if n.abs() >= EPOCH_MILLIS_THRESHOLD { n / 1000 } else { n };
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|name| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    })
}

/// Reads `(timestamp, close)` ticks from a headed CSV file.
///
/// Rows with an unparseable timestamp or a missing, non-finite or
/// non-positive price are skipped. The result is stably sorted by time.
pub fn load_ticks_from_csv(path: &Path) -> Result<Vec<PriceTick>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open csv: {}", path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("failed to read csv header: {}", path.display()))?
        .clone();
    let Some(time_col) = find_column(&headers, TIME_COLUMNS) else {
        bail!("no timestamp column in {}", path.display());
    };
    let Some(price_col) = find_column(&headers, PRICE_COLUMNS) else {
        bail!("no close/price column in {}", path.display());
    };

    let mut ticks = Vec::new();
    let mut dropped = 0_usize;
    for rec in rdr.records() {
        let r = match rec {
            Ok(x) => x,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };
        let ts = r.get(time_col).and_then(parse_timestamp);
        let price = r
            .get(price_col)
            .and_then(|x| x.parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p > 0.0);
        match (ts, price) {
            (Some(timestamp), Some(price)) => ticks.push(PriceTick { timestamp, price }),
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(dropped, file = %path.display(), "skipped malformed rows");
    }
    ticks.sort_by_key(|t| t.timestamp);
    info!(ticks = ticks.len(), file = %path.display(), "loaded price series");
    Ok(ticks)
}

/// Splits an ordered series into consecutive calendar-month slices.
pub fn split_into_month_windows(ticks: &[PriceTick]) -> Vec<(String, &[PriceTick])> {
    let mut windows = Vec::new();
    let mut start = 0_usize;
    while start < ticks.len() {
        let key = month_key(&ticks[start].timestamp);
        let mut end = start + 1;
        while end < ticks.len() && month_key(&ticks[end].timestamp) == key {
            end += 1;
        }
        windows.push((key, &ticks[start..end]));
        start = end;
    }
    windows
}
