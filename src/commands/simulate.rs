use crate::commands::backtest::write_json;
use crate::commands::market_data_snapshot::load_market_data;
use crate::config::{parse_overrides, SimulationConfig};
use crate::engine::Engine;
use crate::models::{StrategyRun, StrategyRunResult, TrailingReference};
use crate::param_utils::{
    exit_policy_from_parameters, BREAKEVEN_ON_TRIGGER, LADDER, R_MULTIPLE, TIME_EXIT_DAYS,
    TRIGGER_R_MULTIPLE,
};
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use log::info;
use std::collections::HashMap;
use std::path::Path;

pub struct SimulateOptions<'a> {
    pub market_data_path: &'a Path,
    pub pattern: &'a str,
    pub exit_mode: &'a str,
    pub r_multiple: Option<f64>,
    pub time_exit: Option<usize>,
    pub trigger_r: Option<f64>,
    pub reference: Option<&'a str>,
    pub breakeven: bool,
    pub ladder: bool,
    pub output: Option<&'a Path>,
    pub overrides: &'a [String],
}

pub fn run(options: &SimulateOptions<'_>) -> Result<StrategyRunResult> {
    let status = RunStatus::new();
    let overrides = parse_overrides(options.overrides)?;
    let market_data = load_market_data(options.market_data_path, &overrides, None, None, &status)?;

    let pattern = options.pattern.trim().to_ascii_lowercase();
    if !market_data.patterns().contains(&pattern) {
        return Err(anyhow!(
            "Pattern {} has no signals in the snapshot (available: {})",
            pattern,
            market_data
                .patterns()
                .into_iter()
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let mut params = HashMap::new();
    if let Some(r) = options.r_multiple {
        params.insert(R_MULTIPLE.to_string(), r);
    }
    if let Some(days) = options.time_exit {
        params.insert(TIME_EXIT_DAYS.to_string(), days as f64);
    }
    if let Some(trigger) = options.trigger_r {
        params.insert(TRIGGER_R_MULTIPLE.to_string(), trigger);
    }
    if options.breakeven {
        params.insert(BREAKEVEN_ON_TRIGGER.to_string(), 1.0);
    }
    if options.ladder {
        params.insert(LADDER.to_string(), 1.0);
    }
    let reference = options
        .reference
        .map(|raw| raw.parse::<TrailingReference>())
        .transpose()
        .context("Invalid --reference")?;

    let exit_policy = exit_policy_from_parameters(options.exit_mode, &params, reference)?;
    let run = StrategyRun::new(&pattern, exit_policy);

    let config = SimulationConfig::from_settings_map(market_data.settings())
        .context("Invalid simulation settings")?;
    status.set_phase(format!("Simulating {}", run.id));
    let engine = Engine::new(config)?;
    let result = engine.backtest(&run, &market_data)?;

    let performance = &result.performance;
    info!(
        "{}: {} trades, win rate {:.1}%, final equity {:.2}, Sharpe {:.3}, max DD {:.2}%, {} expired, {} skipped",
        run.id,
        performance.total_trades,
        performance.win_rate * 100.0,
        performance.final_equity,
        performance.sharpe_ratio,
        performance.max_drawdown_percent,
        result.expired_signals,
        result.skipped.len()
    );

    if let Some(output) = options.output {
        write_json(output, &result)?;
        info!("Run result written to {}", output.display());
    }

    Ok(result)
}
