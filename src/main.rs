use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use martingale_optimizer::config::{
    ConfigError, DEFAULT_INITIAL_BALANCE, DEFAULT_INSTRUMENT, ParamGrid, SweepConfig,
};
use martingale_optimizer::data::load_ticks_from_csv;
use martingale_optimizer::engine::ClosePolicy;
use martingale_optimizer::report::{
    format_top_table, rank_monthly, rank_results, top_k, write_monthly_csv, write_results_csv,
    write_summary_json,
};
use martingale_optimizer::sweep::{resolve_seed, run_monthly_sweep, run_sweep, validate_by_month};

#[derive(Parser, Debug)]
#[command(author, version, about = "Grid optimizer for an averaging (martingale) strategy")]
struct Args {
    /// Headed CSV with a Date and a Close column.
    #[arg(long, default_value = "DATA.csv")]
    data_file: PathBuf,
    #[arg(long, default_value = DEFAULT_INSTRUMENT)]
    symbol: String,
    #[arg(long, default_value_t = DEFAULT_INITIAL_BALANCE)]
    initial_balance: f64,
    /// JSON file with `lot_sizes`, `loss_triggers` and `profit_targets` arrays.
    #[arg(long)]
    grid: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = ClosePolicy::Aggregate)]
    policy: ClosePolicy,
    #[arg(long, default_value_t = 1)]
    min_ticks_per_month: usize,
    #[arg(long)]
    max_open_trades: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 10)]
    top: usize,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long, default_value = "year_end_optimization.csv")]
    out: PathBuf,
    /// Also sweep per calendar month and write the table here.
    #[arg(long)]
    monthly_out: Option<PathBuf>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
    /// Re-run the best parameter set on each month separately.
    #[arg(long)]
    validate_best: bool,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("bad log level: {level}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.top == 0 {
        bail!(ConfigError::InvalidTopK);
    }

    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("failed to configure worker pool")?;
    }

    let grid = match &args.grid {
        Some(p) => ParamGrid::from_json_file(p)?,
        None => ParamGrid::default(),
    };

    let mut cfg = SweepConfig {
        initial_balance: args.initial_balance,
        instrument: args.symbol.clone(),
        grid,
        policy: args.policy,
        min_ticks_per_month: args.min_ticks_per_month,
        max_open_trades: args.max_open_trades,
        seed: args.seed,
    };
    cfg.validate()?;
    // pin the seed so every mode below replays the same draws
    cfg.seed = Some(resolve_seed(&cfg));

    let ticks = load_ticks_from_csv(&args.data_file)?;
    if ticks.is_empty() {
        warn!(file = %args.data_file.display(), "price series is empty, every combination nets zero");
    }

    let mut results = run_sweep(&ticks, &cfg)?;
    rank_results(&mut results);

    let top = top_k(&results, args.top);
    println!("{}", format_top_table(top));

    write_results_csv(&args.out, &results)?;
    info!(rows = results.len(), file = %args.out.display(), "saved results");

    if let Some(path) = &args.monthly_out {
        let mut monthly = run_monthly_sweep(&ticks, &cfg)?;
        rank_monthly(&mut monthly);
        write_monthly_csv(path, &monthly)?;
        info!(rows = monthly.len(), file = %path.display(), "saved monthly results");
    }

    let validation = match (args.validate_best, results.first()) {
        (true, Some(best)) => {
            let months = validate_by_month(&ticks, best.parameters, &cfg)?;
            let positive = months.iter().filter(|m| m.net_profit > 0.0).count();
            println!(
                "Best set profitable in {}/{} months when run month by month",
                positive,
                months.len()
            );
            Some(months)
        }
        _ => None,
    };

    if let Some(path) = &args.summary_out {
        let payload = json!({
            "objective": format!("maximize net profit on {}", cfg.instrument),
            "generated_at_utc": Utc::now().to_rfc3339(),
            "data_file": args.data_file,
            "ticks": ticks.len(),
            "config": cfg,
            "combinations": results.len(),
            "top_results": top,
            "best_month_validation": validation,
        });
        write_summary_json(path, &payload)?;
        info!(file = %path.display(), "saved summary");
    }

    Ok(())
}
