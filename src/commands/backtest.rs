use crate::backtester::{BatchReport, Backtester};
use crate::commands::market_data_snapshot::load_market_data;
use crate::config::{parse_date, parse_overrides, SimulationConfig};
use crate::grid::StrategyGrid;
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

pub struct BacktestOptions<'a> {
    pub market_data_path: &'a Path,
    pub output: Option<&'a Path>,
    pub ledger_dir: Option<&'a Path>,
    pub patterns: &'a [String],
    pub threads: Option<usize>,
    pub start_date: Option<&'a str>,
    pub end_date: Option<&'a str>,
    pub overrides: &'a [String],
}

pub fn run(options: &BacktestOptions<'_>) -> Result<BatchReport> {
    let status = RunStatus::new();
    let overrides = parse_overrides(options.overrides)?;
    let start_date = options
        .start_date
        .map(|raw| parse_date(raw, "--start-date"))
        .transpose()?;
    let end_date = options
        .end_date
        .map(|raw| parse_date(raw, "--end-date"))
        .transpose()?;

    let market_data = load_market_data(
        options.market_data_path,
        &overrides,
        start_date,
        end_date,
        &status,
    )?;

    let config = SimulationConfig::from_settings_map(market_data.settings())
        .context("Invalid simulation settings")?;
    info!("Simulation settings: {}", config.label());

    let mut grid = StrategyGrid::from_settings(market_data.settings(), &market_data.patterns())?;
    if !options.patterns.is_empty() {
        grid.restrict_patterns(options.patterns);
    }
    let runs = grid.runs()?;
    if runs.is_empty() {
        return Err(anyhow!(
            "No strategy runs to evaluate: the signal set has no matching patterns"
        ));
    }

    let backtester = Backtester::new(config, status)?
        .with_threads(options.threads)
        .with_progress(true);
    let report = backtester.run(&runs, &market_data)?;

    for row in report.rankings.iter().filter(|row| row.rank == 1) {
        info!(
            "Best {} run: {} ({}) Sharpe {:.3}, return {:.2}%, {} trades, max DD {:.2}%",
            row.pattern,
            row.run_id,
            row.exit_policy,
            row.sharpe_ratio,
            row.total_return * 100.0,
            row.total_trades,
            row.max_drawdown_percent
        );
    }

    if let Some(output) = options.output {
        write_json(output, &report)?;
        info!("Batch report written to {}", output.display());
    }

    if let Some(ledger_dir) = options.ledger_dir {
        fs::create_dir_all(ledger_dir).with_context(|| {
            format!("Failed to create ledger directory {}", ledger_dir.display())
        })?;
        for result in &report.results {
            let path = ledger_dir.join(format!("{}.json", result.run.id));
            write_json(&path, &result.ledger)?;
        }
        info!(
            "Wrote {} ledgers to {}",
            report.results.len(),
            ledger_dir.display()
        );
    }

    if !report.failures.is_empty() {
        warn!(
            "{} of {} runs failed; see the failures section of the report",
            report.failures.len(),
            report.total_runs
        );
    }

    Ok(report)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory {}", parent.display())
            })?;
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write JSON to {}", path.display()))
}
