use crate::allocator::{allocate, Holding};
use crate::config::{MalformedSignalPolicy, SimulationConfig};
use crate::data_context::MarketData;
use crate::entry::{resolve, EntryResolution};
use crate::errors::SimulationError;
use crate::exits::{simulate_exit, ExitInputs, ExitOutcome};
use crate::indicators::reference_values;
use crate::models::*;
use crate::performance::PerformanceCalculator;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Per-trade results of one strategy run before any capital is allocated.
#[derive(Debug, Clone, Default)]
pub struct TradeSimulation {
    pub closed: Vec<TradeRecord>,
    pub open_at_data_end: Vec<OpenTrade>,
    pub signals_considered: usize,
    pub discarded_signals: usize,
    pub expired_signals: usize,
    pub missing_history: usize,
}

/// Runs strategy configurations against loaded market data with one immutable config.
#[derive(Debug, Clone)]
pub struct Engine {
    config: SimulationConfig,
}

impl Engine {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Resolve entries and simulate exits for every signal matching the run's pattern.
    pub fn simulate_trades(
        &self,
        run: &StrategyRun,
        data: &MarketData,
    ) -> Result<TradeSimulation, SimulationError> {
        run.exit_policy.validate()?;

        let mut simulation = TradeSimulation::default();
        let mut reference_cache: HashMap<&str, Vec<Option<f64>>> = HashMap::new();

        for signal in data.signals_for_pattern(&run.pattern) {
            simulation.signals_considered += 1;
            if let Err(err) = signal.validate() {
                match self.config.malformed_signals {
                    MalformedSignalPolicy::Reject => return Err(err),
                    MalformedSignalPolicy::Discard => {
                        debug!("{}: {}", run.id, err);
                        simulation.discarded_signals += 1;
                        continue;
                    }
                }
            }

            let series = data.series(&signal.instrument_id);
            if series.is_none() {
                simulation.missing_history += 1;
            }
            let candidate = resolve(signal, series, self.config.entry_window_days);
            let (Some(series), EntryResolution::Triggered { entry_index, .. }) =
                (series, &candidate.resolution)
            else {
                debug!(
                    "{} {} {}: expired without trigger",
                    run.id, signal.instrument_id, signal.signal_date
                );
                simulation.expired_signals += 1;
                continue;
            };

            let reference = match run.exit_policy.trailing_reference() {
                Some(trailing_reference) => Some(
                    reference_cache
                        .entry(signal.instrument_id.as_str())
                        .or_insert_with(|| {
                            reference_values(
                                series,
                                trailing_reference,
                                data.references_for(&signal.instrument_id),
                            )
                        })
                        .as_slice(),
                ),
                None => None,
            };

            let inputs = ExitInputs {
                signal,
                series,
                entry_index: *entry_index,
                reference,
                costs: &self.config.costs,
            };
            match simulate_exit(&inputs, &run.exit_policy) {
                ExitOutcome::Closed(record) => simulation.closed.push(record),
                ExitOutcome::OpenAtDataEnd(open) => simulation.open_at_data_end.push(open),
            }
        }

        if simulation.missing_history > 0 {
            warn!(
                "{}: {} signal(s) reference instruments without price history",
                run.id, simulation.missing_history
            );
        }

        Ok(simulation)
    }

    /// Run one strategy configuration end to end with its own capital pool.
    pub fn backtest(
        &self,
        run: &StrategyRun,
        data: &MarketData,
    ) -> Result<StrategyRunResult, SimulationError> {
        let simulation = self.simulate_trades(run, data)?;
        let holdings = simulation
            .closed
            .into_iter()
            .map(Holding::from)
            .chain(simulation.open_at_data_end.into_iter().map(Holding::from));
        let allocation = allocate(&self.config, holdings)?;

        let performance = PerformanceCalculator::summarize(
            &allocation.ledger,
            self.config.initial_capital,
            None,
            self.config.risk_free_rate,
        );
        let equity_curve = PerformanceCalculator::equity_curve(
            &allocation.ledger,
            self.config.initial_capital,
            None,
        );

        info!(
            "{} ({}): {} trades, {} skipped, {} open at data end, return {:.2}%, Sharpe {:.2}, max DD {:.2}%",
            run.id,
            run.exit_policy.describe(),
            performance.total_trades,
            allocation.skipped.len(),
            allocation.open_at_data_end.len(),
            performance.total_return * 100.0,
            performance.sharpe_ratio,
            performance.max_drawdown_percent
        );

        Ok(StrategyRunResult {
            run: run.clone(),
            settings_label: self.config.label(),
            initial_capital: self.config.initial_capital,
            final_cash: allocation.final_cash,
            signals_considered: simulation.signals_considered,
            discarded_signals: simulation.discarded_signals,
            expired_signals: simulation.expired_signals,
            performance,
            ledger: allocation.ledger,
            open_at_data_end: allocation.open_at_data_end,
            skipped: allocation.skipped,
            max_concurrent_positions: allocation.max_concurrent_positions,
            pool_events: allocation.events,
            equity_curve,
        })
    }
}
