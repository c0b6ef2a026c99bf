use crate::config::SimulationConfig;
use crate::data_context::MarketData;
use crate::engine::Engine;
use crate::errors::SimulationError;
use crate::models::{StrategyRun, StrategyRunResult};
use crate::run_status::RunStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub run_id: String,
    pub pattern: String,
    pub error: String,
}

/// One line of the per-pattern leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub pattern: String,
    pub rank: usize,
    pub run_id: String,
    pub exit_policy: String,
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_percent: f64,
    pub skipped_candidates: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub config: SimulationConfig,
    pub total_runs: usize,
    pub duration_ms: u64,
    pub rankings: Vec<RankingRow>,
    pub failures: Vec<RunFailure>,
    pub results: Vec<StrategyRunResult>,
}

/// Evaluates independent strategy runs in parallel. Each run owns its own
/// capital pool, so results are simply collected in input order.
pub struct Backtester {
    engine: Engine,
    status: RunStatus,
    threads: Option<usize>,
    show_progress: bool,
}

impl Backtester {
    pub fn new(config: SimulationConfig, status: RunStatus) -> Result<Self, SimulationError> {
        Ok(Self {
            engine: Engine::new(config)?,
            status,
            threads: None,
            show_progress: false,
        })
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads.filter(|n| *n > 0);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn run(&self, runs: &[StrategyRun], data: &MarketData) -> Result<BatchReport> {
        let total = runs.len();
        let started = Instant::now();
        let num_workers = self
            .threads
            .unwrap_or_else(|| std::cmp::min(total, std::cmp::max(1, num_cpus::get())))
            .max(1);

        self.status
            .set_phase(format!("Backtesting {} strategy runs in parallel", total));
        self.status.start_batch(total);
        info!(
            "Running {} strategy runs on {} worker threads",
            total, num_workers
        );

        let pb = if self.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()
            .context("Failed to build backtest worker pool")?;

        let outcomes: Vec<Result<StrategyRunResult, SimulationError>> = pool.install(|| {
            runs.par_iter()
                .map(|run| {
                    let outcome = self.engine.backtest(run, data);
                    self.status.record_run(
                        outcome
                            .as_ref()
                            .ok()
                            .map(|result| result.performance.sharpe_ratio),
                    );
                    pb.inc(1);
                    outcome
                })
                .collect()
        });

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (run, outcome) in runs.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!("Strategy run {} failed: {}", run.id, err);
                    failures.push(RunFailure {
                        run_id: run.id.clone(),
                        pattern: run.pattern.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            pb.finish_with_message("Backtesting completed");
        } else {
            warn!("Backtesting completed with {} failed runs", failures.len());
            pb.finish_with_message("Backtesting completed with errors");
        }

        let rankings = rank_results(&results);
        self.status.set_phase("Backtesting complete");
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Finished {} runs ({} failed) in {} ms",
            total,
            failures.len(),
            duration_ms
        );

        Ok(BatchReport {
            id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            config: self.engine.config().clone(),
            total_runs: total,
            duration_ms,
            rankings,
            failures,
            results,
        })
    }
}

/// Order by pattern, then Sharpe ratio descending; run id breaks ties.
pub fn rank_results(results: &[StrategyRunResult]) -> Vec<RankingRow> {
    let mut ordered: Vec<&StrategyRunResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        a.run
            .pattern
            .cmp(&b.run.pattern)
            .then_with(|| {
                b.performance
                    .sharpe_ratio
                    .partial_cmp(&a.performance.sharpe_ratio)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.run.id.cmp(&b.run.id))
    });

    let mut rows = Vec::with_capacity(ordered.len());
    let mut rank = 0;
    let mut current_pattern: Option<&str> = None;
    for result in ordered {
        if current_pattern != Some(result.run.pattern.as_str()) {
            current_pattern = Some(result.run.pattern.as_str());
            rank = 0;
        }
        rank += 1;
        let performance = &result.performance;
        rows.push(RankingRow {
            pattern: result.run.pattern.clone(),
            rank,
            run_id: result.run.id.clone(),
            exit_policy: result.run.exit_policy.describe(),
            total_trades: performance.total_trades,
            win_rate: performance.win_rate,
            total_return: performance.total_return,
            annualized_return: performance.annualized_return,
            sharpe_ratio: performance.sharpe_ratio,
            max_drawdown_percent: performance.max_drawdown_percent,
            skipped_candidates: result.skipped.len(),
        });
    }
    rows
}
