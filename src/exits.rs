use crate::config::TradeCosts;
use crate::models::{ExitPolicyConfig, ExitReason, OpenTrade, PriceBar, Signal, TradeRecord};
use crate::price_series::PriceSeries;
use crate::trading_rules::{
    ladder_stop, net_pnl_pct, r_multiple_target, ratchet_stop, trailing_trigger_price,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    Closed(TradeRecord),
    /// No exit fired before the price data ended. Excluded from realized statistics.
    OpenAtDataEnd(OpenTrade),
}

/// Inputs shared by both exit policies for one triggered candidate.
pub struct ExitInputs<'a> {
    pub signal: &'a Signal,
    pub series: &'a PriceSeries,
    pub entry_index: usize,
    /// Trailing reference values aligned with `series`, if the policy needs them.
    pub reference: Option<&'a [Option<f64>]>,
    pub costs: &'a TradeCosts,
}

impl ExitInputs<'_> {
    fn reference_at(&self, index: usize) -> Option<f64> {
        self.reference
            .and_then(|values| values.get(index).copied())
            .flatten()
    }

    fn entry_bar(&self) -> Option<&PriceBar> {
        self.series.get(self.entry_index)
    }

    fn closed(&self, offset: usize, bar: &PriceBar, exit_price: f64, reason: ExitReason) -> ExitOutcome {
        let signal = self.signal;
        ExitOutcome::Closed(TradeRecord {
            instrument_id: signal.instrument_id.clone(),
            pattern: signal.pattern.clone(),
            signal_date: signal.signal_date,
            entry_date: self.entry_bar().map_or(bar.date, |b| b.date),
            entry_price: signal.entry_price,
            stop_price: signal.stop_price,
            exit_date: bar.date,
            exit_price,
            exit_reason: reason,
            holding_days: (offset + 1) as u32,
            pnl_pct: net_pnl_pct(signal.entry_price, exit_price, self.costs),
            quality_grade: signal.quality_grade.clone(),
        })
    }

    fn open_at_data_end(&self, current_stop: f64) -> ExitOutcome {
        let signal = self.signal;
        let entry_bar = self.entry_bar();
        let last = self.series.last().or(entry_bar);
        let last_close = last.map_or(signal.entry_price, |b| b.close);
        let entry_date = entry_bar.map_or(signal.signal_date, |b| b.date);
        ExitOutcome::OpenAtDataEnd(OpenTrade {
            instrument_id: signal.instrument_id.clone(),
            pattern: signal.pattern.clone(),
            signal_date: signal.signal_date,
            entry_date,
            entry_price: signal.entry_price,
            current_stop,
            last_date: last.map_or(entry_date, |b| b.date),
            last_close,
            unrealized_pnl_pct: net_pnl_pct(signal.entry_price, last_close, self.costs),
            quality_grade: signal.quality_grade.clone(),
        })
    }
}

/// Advance a triggered trade bar by bar, starting with the bar after entry,
/// until the configured policy exits or the data runs out.
pub fn simulate_exit(inputs: &ExitInputs<'_>, policy: &ExitPolicyConfig) -> ExitOutcome {
    match policy {
        ExitPolicyConfig::FixedTarget {
            r_multiple,
            time_exit_days,
        } => simulate_fixed_target(inputs, *r_multiple, *time_exit_days),
        ExitPolicyConfig::TrailingStop {
            trigger_r_multiple,
            breakeven_on_trigger,
            ladder,
            ..
        } => {
            let mut state = TrailingStopState::new(
                inputs.signal,
                *trigger_r_multiple,
                *breakeven_on_trigger,
                *ladder,
            );
            let bars = inputs.series.bars_after_index(inputs.entry_index, usize::MAX);
            for (offset, bar) in bars.iter().enumerate() {
                let reference = inputs.reference_at(inputs.entry_index + 1 + offset);
                if let Some(exit_price) = state.advance(bar, reference) {
                    return inputs.closed(offset, bar, exit_price, ExitReason::TrailingStop);
                }
            }
            inputs.open_at_data_end(state.current_stop())
        }
    }
}

/// Static stop, static target, optional time exit.
///
/// Both conditions are located independently over the window. Whichever fires
/// first wins; when both first fire on the same bar the trade leaves at that
/// bar's close with reason `time`, with no attempt at intrabar sequencing.
fn simulate_fixed_target(
    inputs: &ExitInputs<'_>,
    r_multiple: f64,
    time_exit_days: Option<usize>,
) -> ExitOutcome {
    let signal = inputs.signal;
    let stop = signal.stop_price;
    let target = r_multiple_target(signal.entry_price, stop, r_multiple);

    let window = inputs
        .series
        .bars_after_index(inputs.entry_index, time_exit_days.unwrap_or(usize::MAX));
    let stop_i = window.iter().position(|bar| bar.low <= stop);
    let target_i = window.iter().position(|bar| bar.high >= target);

    let hit = match (stop_i, target_i) {
        (Some(s), Some(t)) if s == t => Some((s, window[s].close, ExitReason::Time)),
        (Some(s), Some(t)) if s < t => Some((s, stop, ExitReason::Stop)),
        (Some(_), Some(t)) => Some((t, target, ExitReason::Target)),
        (Some(s), None) => Some((s, stop, ExitReason::Stop)),
        (None, Some(t)) => Some((t, target, ExitReason::Target)),
        (None, None) => match time_exit_days {
            // Only a complete window closes on time; a truncated one stays open.
            Some(days) if window.len() == days => {
                Some((days - 1, window[days - 1].close, ExitReason::Time))
            }
            _ => None,
        },
    };

    match hit {
        Some((offset, exit_price, reason)) => {
            inputs.closed(offset, &window[offset], exit_price, reason)
        }
        None => inputs.open_at_data_end(stop),
    }
}

/// Per-trade trailing stop state. `current_stop` is monotonic non-decreasing.
#[derive(Debug, Clone)]
pub struct TrailingStopState {
    entry_price: f64,
    stop_price: f64,
    trigger_r_multiple: f64,
    trigger_price: f64,
    breakeven_on_trigger: bool,
    ladder: bool,
    current_stop: f64,
    triggered: bool,
}

impl TrailingStopState {
    pub fn new(signal: &Signal, trigger_r_multiple: f64, breakeven_on_trigger: bool, ladder: bool) -> Self {
        Self {
            entry_price: signal.entry_price,
            stop_price: signal.stop_price,
            trigger_r_multiple,
            trigger_price: trailing_trigger_price(
                signal.entry_price,
                signal.stop_price,
                trigger_r_multiple,
            ),
            breakeven_on_trigger,
            ladder,
            current_stop: signal.stop_price,
            triggered: false,
        }
    }

    pub fn current_stop(&self) -> f64 {
        self.current_stop
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Process one bar. Returns the exit price when the stop in force at the
    /// start of the bar is touched; otherwise updates the stop for the next bar.
    pub fn advance(&mut self, bar: &PriceBar, reference: Option<f64>) -> Option<f64> {
        if bar.low <= self.current_stop {
            return Some(self.current_stop);
        }

        if !self.triggered && bar.high >= self.trigger_price {
            self.triggered = true;
            if self.breakeven_on_trigger {
                self.current_stop = self.current_stop.max(self.entry_price);
            }
        }

        if self.triggered {
            if self.ladder {
                let level = ladder_stop(
                    self.entry_price,
                    self.stop_price,
                    self.trigger_r_multiple,
                    bar.high,
                );
                self.current_stop = ratchet_stop(self.current_stop, level);
            }
            self.current_stop = ratchet_stop(self.current_stop, reference);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrailingReference;
    use chrono::NaiveDate;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn candle(offset: i64, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            instrument_id: "AAA".to_string(),
            date: day(offset),
            open: close,
            high,
            low,
            close,
            volume: 10_000,
        }
    }

    /// Entry bar at index 0 followed by `bars` (high, low, close).
    fn series(bars: &[(f64, f64, f64)]) -> PriceSeries {
        let mut all = vec![candle(0, 101.0, 95.0, 100.0)];
        all.extend(
            bars.iter()
                .enumerate()
                .map(|(i, (h, l, c))| candle(i as i64 + 1, *h, *l, *c)),
        );
        PriceSeries::new("AAA", all)
    }

    fn signal() -> Signal {
        Signal {
            instrument_id: "AAA".to_string(),
            signal_date: day(-1),
            pattern: "vcp".to_string(),
            entry_price: 100.0,
            stop_price: 90.0,
            quality_grade: None,
        }
    }

    fn run(
        series: &PriceSeries,
        policy: &ExitPolicyConfig,
        reference: Option<&[Option<f64>]>,
    ) -> ExitOutcome {
        let signal = signal();
        let costs = TradeCosts::default();
        let inputs = ExitInputs {
            signal: &signal,
            series,
            entry_index: 0,
            reference,
            costs: &costs,
        };
        simulate_exit(&inputs, policy)
    }

    fn closed(outcome: ExitOutcome) -> TradeRecord {
        match outcome {
            ExitOutcome::Closed(record) => record,
            other => panic!("expected closed trade, got {:?}", other),
        }
    }

    #[test]
    fn fixed_target_stop_before_target() {
        let series = series(&[(105.0, 95.0, 100.0), (110.0, 89.0, 92.0), (125.0, 100.0, 121.0)]);
        let record = closed(run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(20)), None));
        assert_eq!(record.exit_reason, ExitReason::Stop);
        assert_eq!(record.exit_price, 90.0);
        assert_eq!(record.exit_date, day(2));
        assert_eq!(record.holding_days, 2);
        assert!((record.pnl_pct + 0.10).abs() < 1e-12);
    }

    #[test]
    fn fixed_target_target_before_stop() {
        let series = series(&[(121.0, 99.0, 118.0), (110.0, 80.0, 85.0)]);
        let record = closed(run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(20)), None));
        assert_eq!(record.exit_reason, ExitReason::Target);
        assert_eq!(record.exit_price, 120.0);
        assert_eq!(record.holding_days, 1);
        assert!((record.pnl_pct - 0.20).abs() < 1e-12);
    }

    #[test]
    fn fixed_target_same_bar_tie_exits_on_time_at_close() {
        let series = series(&[(105.0, 95.0, 100.0), (125.0, 85.0, 103.0), (130.0, 80.0, 90.0)]);
        let record = closed(run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(20)), None));
        assert_eq!(record.exit_reason, ExitReason::Time);
        assert_eq!(record.exit_price, 103.0);
        assert_eq!(record.exit_date, day(2));
    }

    #[test]
    fn fixed_target_time_exit_at_window_close() {
        let bars: Vec<(f64, f64, f64)> = (0..5).map(|i| (105.0, 95.0, 100.0 + i as f64)).collect();
        let series = series(&bars);
        let record = closed(run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(3)), None));
        assert_eq!(record.exit_reason, ExitReason::Time);
        assert_eq!(record.exit_date, day(3));
        assert_eq!(record.exit_price, 102.0);
        assert_eq!(record.holding_days, 3);
    }

    #[test]
    fn fixed_target_ignores_hits_after_window() {
        let series = series(&[(105.0, 95.0, 101.0), (105.0, 95.0, 102.0), (130.0, 95.0, 125.0)]);
        let record = closed(run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(2)), None));
        assert_eq!(record.exit_reason, ExitReason::Time);
        assert_eq!(record.exit_price, 102.0);
    }

    #[test]
    fn fixed_target_truncated_window_stays_open() {
        let series = series(&[(105.0, 95.0, 101.0), (106.0, 96.0, 104.0)]);
        match run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(20)), None) {
            ExitOutcome::OpenAtDataEnd(open) => {
                assert_eq!(open.last_date, day(2));
                assert_eq!(open.last_close, 104.0);
                assert_eq!(open.current_stop, 90.0);
                assert!((open.unrealized_pnl_pct - 0.04).abs() < 1e-12);
            }
            other => panic!("expected open trade, got {:?}", other),
        }

        let unbounded = run(&series, &ExitPolicyConfig::fixed_target(2.0, None), None);
        assert!(matches!(unbounded, ExitOutcome::OpenAtDataEnd(_)));
    }

    #[test]
    fn entry_bar_is_not_checked() {
        // Entry bar low (95) is above the stop but a deeper entry-day low would
        // still be ignored; only following bars count.
        let mut bars = vec![candle(0, 101.0, 85.0, 100.0)];
        bars.push(candle(1, 121.0, 95.0, 119.0));
        let series = PriceSeries::new("AAA", bars);
        let record = closed(run(&series, &ExitPolicyConfig::fixed_target(2.0, Some(5)), None));
        assert_eq!(record.exit_reason, ExitReason::Target);
    }

    #[test]
    fn trailing_stop_follows_reference_after_trigger() {
        // trigger = 115
        let series = series(&[
            (112.0, 101.0, 110.0),
            (120.0, 112.0, 118.0),
            (122.0, 115.0, 120.0),
            (121.0, 108.0, 109.0),
        ]);
        let reference = vec![None, Some(103.0), Some(105.0), Some(110.0), Some(111.0)];
        let policy = ExitPolicyConfig::trailing_stop(1.5, TrailingReference::MovingAverage(20));
        let record = closed(run(&series, &policy, Some(&reference)));
        assert_eq!(record.exit_reason, ExitReason::TrailingStop);
        assert_eq!(record.exit_price, 110.0);
        assert_eq!(record.exit_date, day(4));
        assert_eq!(record.holding_days, 4);
    }

    #[test]
    fn trailing_reference_before_trigger_is_ignored() {
        let series = series(&[(110.0, 95.0, 105.0), (112.0, 96.0, 104.0)]);
        let reference = vec![None, Some(104.0), Some(104.0)];
        let policy = ExitPolicyConfig::trailing_stop(1.5, TrailingReference::MovingAverage(20));
        match run(&series, &policy, Some(&reference)) {
            ExitOutcome::OpenAtDataEnd(open) => assert_eq!(open.current_stop, 90.0),
            other => panic!("expected open trade, got {:?}", other),
        }
    }

    #[test]
    fn trailing_initial_stop_still_protects() {
        let series = series(&[(104.0, 92.0, 95.0), (99.0, 88.0, 89.0)]);
        let policy = ExitPolicyConfig::trailing_stop(1.5, TrailingReference::MovingAverage(20));
        let record = closed(run(&series, &policy, None));
        assert_eq!(record.exit_reason, ExitReason::TrailingStop);
        assert_eq!(record.exit_price, 90.0);
    }

    #[test]
    fn trailing_stop_never_decreases() {
        let signal = signal();
        let mut state = TrailingStopState::new(&signal, 1.5, false, false);
        let path = [
            (candle(1, 116.0, 100.0, 114.0), Some(104.0)),
            (candle(2, 118.0, 108.0, 117.0), Some(107.0)),
            (candle(3, 119.0, 109.0, 118.0), Some(102.0)),
            (candle(4, 119.0, 109.0, 118.0), None),
            (candle(5, 119.0, 109.0, 118.0), Some(f64::NAN)),
        ];
        let mut previous = state.current_stop();
        for (bar, reference) in path.iter() {
            assert!(state.advance(bar, *reference).is_none());
            assert!(state.current_stop() >= previous);
            previous = state.current_stop();
        }
        assert!(state.is_triggered());
        assert_eq!(state.current_stop(), 107.0);
    }

    #[test]
    fn trailing_breakeven_and_ladder_options() {
        let signal = signal();
        let mut state = TrailingStopState::new(&signal, 1.5, true, false);
        assert!(state.advance(&candle(1, 116.0, 101.0, 115.0), None).is_none());
        assert_eq!(state.current_stop(), 100.0);

        let mut laddered = TrailingStopState::new(&signal, 1.5, false, true);
        // High 137 is 3.7R, 2.2R above the trigger: stop to entry + 2R.
        assert!(laddered.advance(&candle(1, 137.0, 121.0, 130.0), None).is_none());
        assert_eq!(laddered.current_stop(), 120.0);
        assert_eq!(laddered.advance(&candle(2, 125.0, 119.0, 120.0), None), Some(120.0));
    }

    #[test]
    fn costs_reduce_realized_return() {
        let series = series(&[(121.0, 99.0, 118.0)]);
        let signal = signal();
        let costs = TradeCosts {
            fee_rate: 0.001,
            tax_rate: 0.003,
            slippage_rate: 0.0,
        };
        let inputs = ExitInputs {
            signal: &signal,
            series: &series,
            entry_index: 0,
            reference: None,
            costs: &costs,
        };
        let record = closed(simulate_exit(&inputs, &ExitPolicyConfig::fixed_target(2.0, None)));
        assert!(record.pnl_pct < 0.20);
        assert!(record.pnl_pct > 0.19);
    }
}
