use crate::config::{AllocationMode, SettlementTiming, SimulationConfig};
use crate::errors::SimulationError;
use crate::models::{
    LedgerEntry, OpenPosition, OpenTrade, PoolEvent, PoolEventKind, SkipReason, SkippedCandidate,
    TradeRecord,
};
use crate::trading_rules::{determine_position_size, PositionSizingOutcome, PositionSizingParams};
use chrono::NaiveDate;
use log::debug;

/// A filled trade offered to the pool: either exited before the data ends or
/// still held at the last bar.
#[derive(Debug, Clone, PartialEq)]
pub enum Holding {
    Closed(TradeRecord),
    Open(OpenTrade),
}

impl Holding {
    pub fn instrument_id(&self) -> &str {
        match self {
            Holding::Closed(record) => &record.instrument_id,
            Holding::Open(open) => &open.instrument_id,
        }
    }

    pub fn entry_date(&self) -> NaiveDate {
        match self {
            Holding::Closed(record) => record.entry_date,
            Holding::Open(open) => open.entry_date,
        }
    }

    /// `None` for a trade still held at data end; it never settles.
    pub fn exit_date(&self) -> Option<NaiveDate> {
        match self {
            Holding::Closed(record) => Some(record.exit_date),
            Holding::Open(_) => None,
        }
    }

    pub fn admission_key(&self) -> (NaiveDate, &str, NaiveDate, &str) {
        match self {
            Holding::Closed(record) => record.admission_key(),
            Holding::Open(open) => open.admission_key(),
        }
    }
}

impl From<TradeRecord> for Holding {
    fn from(record: TradeRecord) -> Self {
        Holding::Closed(record)
    }
}

impl From<OpenTrade> for Holding {
    fn from(open: OpenTrade) -> Self {
        Holding::Open(open)
    }
}

/// An admitted trade that has not settled yet.
#[derive(Debug, Clone)]
pub struct Position {
    pub holding: Holding,
    pub allocated_capital: f64,
    pub cost_basis: f64,
    sequence: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    Admitted { position_size: f64 },
    Skipped(SkipReason),
}

/// What a pool leaves behind at data end. `final_cash` excludes the capital
/// still tied up in `open_at_data_end`.
#[derive(Debug, Clone, Default)]
pub struct AllocationResult {
    pub ledger: Vec<LedgerEntry>,
    pub open_at_data_end: Vec<OpenPosition>,
    pub skipped: Vec<SkippedCandidate>,
    pub events: Vec<PoolEvent>,
    pub final_cash: f64,
    pub max_concurrent_positions: usize,
}

/// Compounding capital pool owned by exactly one strategy run.
///
/// In constrained mode `cash` never goes negative and at most `max_positions`
/// positions are open. In unconstrained mode every trade is admitted with a
/// fixed stake and `cash` tracks realized equity only.
#[derive(Debug, Clone)]
pub struct CapitalPool {
    cash: f64,
    initial_capital: f64,
    max_positions: usize,
    position_size_fraction: f64,
    mode: AllocationMode,
    settlement_timing: SettlementTiming,
    open_positions: Vec<Position>,
    ledger: Vec<LedgerEntry>,
    skipped: Vec<SkippedCandidate>,
    events: Vec<PoolEvent>,
    next_sequence: usize,
    max_concurrent_positions: usize,
}

impl CapitalPool {
    pub fn new(config: &SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Self {
            cash: config.initial_capital,
            initial_capital: config.initial_capital,
            max_positions: config.max_positions,
            position_size_fraction: config.position_size_fraction,
            mode: config.allocation_mode,
            settlement_timing: config.settlement_timing,
            open_positions: Vec::new(),
            ledger: Vec::new(),
            skipped: Vec::new(),
            events: Vec::new(),
            next_sequence: 0,
            max_concurrent_positions: 0,
        })
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Cash plus the cost basis of every open position.
    pub fn equity(&self) -> f64 {
        match self.mode {
            AllocationMode::Constrained => {
                self.cash
                    + self
                        .open_positions
                        .iter()
                        .map(|p| p.cost_basis)
                        .sum::<f64>()
            }
            AllocationMode::Unconstrained => self.cash,
        }
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open_positions
    }

    pub fn ledger(&self) -> &[LedgerEntry] {
        &self.ledger
    }

    pub fn skipped(&self) -> &[SkippedCandidate] {
        &self.skipped
    }

    /// Settle every position whose exit has cleared before admissions on `date`,
    /// in exit-date order (admission order breaks ties).
    pub fn settle_through(&mut self, date: NaiveDate) {
        let timing = self.settlement_timing;
        self.settle_where(|exit_date| timing.is_settled(exit_date, date));
    }

    /// Settle every closed position. Positions held at data end stay open.
    pub fn settle_all(&mut self) {
        self.settle_where(|_| true);
    }

    fn settle_where<F>(&mut self, mut due: F)
    where
        F: FnMut(NaiveDate) -> bool,
    {
        let (mut settling, still_open): (Vec<Position>, Vec<Position>) = self
            .open_positions
            .drain(..)
            .partition(|p| p.holding.exit_date().map_or(false, &mut due));
        self.open_positions = still_open;
        settling.sort_by(|a, b| {
            a.holding
                .exit_date()
                .cmp(&b.holding.exit_date())
                .then(a.sequence.cmp(&b.sequence))
        });

        for position in settling {
            let Holding::Closed(record) = position.holding else {
                continue;
            };
            let proceeds = position.allocated_capital * (1.0 + record.pnl_pct);
            let profit = proceeds - position.allocated_capital;
            match self.mode {
                AllocationMode::Constrained => self.cash += proceeds,
                AllocationMode::Unconstrained => self.cash += profit,
            }
            self.record_event(record.exit_date, PoolEventKind::Settled, &record.instrument_id);
            self.ledger.push(LedgerEntry {
                trade: record,
                position_size: position.allocated_capital,
                proceeds,
                profit,
            });
        }
    }

    /// Try to open a position at the trade's entry date. Call
    /// `settle_through(entry_date)` first.
    pub fn admit(&mut self, holding: impl Into<Holding>) -> AdmissionOutcome {
        let holding = holding.into();
        let position_size = match self.mode {
            AllocationMode::Unconstrained => self.initial_capital * self.position_size_fraction,
            AllocationMode::Constrained => {
                let outcome = determine_position_size(PositionSizingParams {
                    equity: self.equity(),
                    available_cash: self.cash,
                    position_size_fraction: self.position_size_fraction,
                    open_positions: self.open_positions.len(),
                    max_positions: self.max_positions,
                });
                match outcome {
                    PositionSizingOutcome::Sized { position_size } => position_size,
                    PositionSizingOutcome::AtCapacity => {
                        return self.skip(&holding, SkipReason::AtCapacity, self.equity());
                    }
                    PositionSizingOutcome::InsufficientCash { required } => {
                        return self.skip(&holding, SkipReason::InsufficientCash, required);
                    }
                }
            }
        };

        if self.mode == AllocationMode::Constrained {
            self.cash = (self.cash - position_size).max(0.0);
        }
        let entry_date = holding.entry_date();
        let instrument_id = holding.instrument_id().to_string();
        self.open_positions.push(Position {
            holding,
            allocated_capital: position_size,
            cost_basis: position_size,
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        self.max_concurrent_positions = self.max_concurrent_positions.max(self.open_positions.len());
        self.record_event(entry_date, PoolEventKind::Admitted, &instrument_id);

        AdmissionOutcome::Admitted { position_size }
    }

    fn skip(&mut self, holding: &Holding, reason: SkipReason, requested: f64) -> AdmissionOutcome {
        let requested_size = match reason {
            SkipReason::AtCapacity => requested * self.position_size_fraction,
            SkipReason::InsufficientCash => requested,
        };
        debug!(
            "{} {}: skipped ({}), requested {:.2} with {:.2} cash and {} open",
            holding.instrument_id(),
            holding.entry_date(),
            reason.as_str(),
            requested_size,
            self.cash,
            self.open_positions.len()
        );
        self.skipped.push(SkippedCandidate {
            instrument_id: holding.instrument_id().to_string(),
            entry_date: holding.entry_date(),
            reason,
            requested_size,
            available_cash: self.cash,
            open_positions: self.open_positions.len(),
        });
        AdmissionOutcome::Skipped(reason)
    }

    fn record_event(&mut self, date: NaiveDate, kind: PoolEventKind, instrument_id: &str) {
        self.events.push(PoolEvent {
            date,
            kind,
            instrument_id: instrument_id.to_string(),
            cash: self.cash,
            open_positions: self.open_positions.len(),
        });
    }

    /// Settle the remaining closed positions and hand back what is still held.
    pub fn finish(mut self) -> AllocationResult {
        self.settle_all();
        let open_at_data_end = self
            .open_positions
            .into_iter()
            .filter_map(|position| match position.holding {
                Holding::Open(trade) => Some(OpenPosition {
                    trade,
                    position_size: position.allocated_capital,
                }),
                Holding::Closed(_) => None,
            })
            .collect();
        AllocationResult {
            ledger: self.ledger,
            open_at_data_end,
            skipped: self.skipped,
            events: self.events,
            final_cash: self.cash,
            max_concurrent_positions: self.max_concurrent_positions,
        }
    }
}

/// Sort trades into admission order: entry date, then instrument, signal
/// date and pattern for same-day ties.
pub fn sort_for_admission(holdings: &mut [Holding]) {
    holdings.sort_by(|a, b| a.admission_key().cmp(&b.admission_key()));
}

/// Run the full admission/settlement sequence for one strategy run. Trades
/// still held at data end take capital and a slot like any other position.
pub fn allocate<I>(config: &SimulationConfig, trades: I) -> Result<AllocationResult, SimulationError>
where
    I: IntoIterator,
    I::Item: Into<Holding>,
{
    let mut pool = CapitalPool::new(config)?;
    let mut holdings: Vec<Holding> = trades.into_iter().map(Into::into).collect();
    sort_for_admission(&mut holdings);
    for holding in holdings {
        pool.settle_through(holding.entry_date());
        pool.admit(holding);
    }
    Ok(pool.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn trade(id: &str, entry: i64, exit: i64, pnl_pct: f64) -> TradeRecord {
        TradeRecord {
            instrument_id: id.to_string(),
            pattern: "vcp".to_string(),
            signal_date: day(entry - 1),
            entry_date: day(entry),
            entry_price: 100.0,
            stop_price: 90.0,
            exit_date: day(exit),
            exit_price: 100.0 * (1.0 + pnl_pct),
            exit_reason: ExitReason::Time,
            holding_days: (exit - entry) as u32,
            pnl_pct,
            quality_grade: None,
        }
    }

    fn held(id: &str, entry: i64) -> OpenTrade {
        OpenTrade {
            instrument_id: id.to_string(),
            pattern: "vcp".to_string(),
            signal_date: day(entry - 1),
            entry_date: day(entry),
            entry_price: 100.0,
            current_stop: 90.0,
            last_date: day(30),
            last_close: 104.0,
            unrealized_pnl_pct: 0.04,
            quality_grade: None,
        }
    }

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    #[test]
    fn first_position_is_a_tenth_of_equity() {
        let mut pool = CapitalPool::new(&config()).unwrap();
        let outcome = pool.admit(trade("AAA", 0, 5, 0.1));
        assert_eq!(
            outcome,
            AdmissionOutcome::Admitted {
                position_size: 100_000.0
            }
        );
        assert!((pool.cash() - 900_000.0).abs() < 1e-6);
        assert!((pool.equity() - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn closed_trade_compounds_into_next_size() {
        let mut cfg = config();
        cfg.position_size_fraction = 0.5;
        // 500k doubled: equity 1.5M, next position 750k at 50%.
        let result = allocate(
            &cfg,
            vec![trade("AAA", 0, 3, 1.0), trade("BBB", 4, 8, 0.0)],
        )
        .unwrap();
        assert_eq!(result.ledger.len(), 2);
        assert!((result.ledger[0].position_size - 500_000.0).abs() < 1e-6);
        assert!((result.ledger[0].proceeds - 1_000_000.0).abs() < 1e-6);
        assert!((result.ledger[1].position_size - 750_000.0).abs() < 1e-6);
        assert!((result.final_cash - 1_500_000.0).abs() < 1e-6);
    }

    #[test]
    fn capacity_limit_skips_excess_same_day_candidates() {
        let trades: Vec<TradeRecord> = (0..12)
            .map(|i| trade(&format!("T{:02}", 11 - i), 0, 10, 0.0))
            .collect();
        let result = allocate(&config(), trades).unwrap();
        assert_eq!(result.ledger.len(), 10);
        assert_eq!(result.skipped.len(), 2);
        assert!(result
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::AtCapacity));
        // Deterministic tie order: instrument id ascending.
        let skipped: Vec<&str> = result.skipped.iter().map(|s| s.instrument_id.as_str()).collect();
        assert_eq!(skipped, vec!["T10", "T11"]);
        assert_eq!(result.max_concurrent_positions, 10);
    }

    #[test]
    fn insufficient_cash_skips_admission() {
        let mut cfg = config();
        cfg.position_size_fraction = 0.6;
        let result = allocate(
            &cfg,
            vec![trade("AAA", 0, 10, 0.0), trade("BBB", 1, 10, 0.0)],
        )
        .unwrap();
        assert_eq!(result.ledger.len(), 1);
        assert_eq!(result.skipped[0].reason, SkipReason::InsufficientCash);
        assert!((result.skipped[0].requested_size - 600_000.0).abs() < 1e-6);
        assert!((result.skipped[0].available_cash - 400_000.0).abs() < 1e-6);
    }

    #[test]
    fn proceeds_return_the_day_after_exit_by_default() {
        let mut cfg = config();
        cfg.max_positions = 1;
        let trades = vec![trade("AAA", 0, 5, 0.0), trade("BBB", 5, 9, 0.0)];

        let next_day = allocate(&cfg, trades.clone()).unwrap();
        assert_eq!(next_day.ledger.len(), 1);
        assert_eq!(next_day.skipped[0].instrument_id, "BBB");
        assert_eq!(next_day.skipped[0].reason, SkipReason::AtCapacity);

        cfg.settlement_timing = SettlementTiming::SameDay;
        let same_day = allocate(&cfg, trades).unwrap();
        assert_eq!(same_day.ledger.len(), 2);
    }

    #[test]
    fn ledger_follows_settlement_order() {
        let result = allocate(
            &config(),
            vec![trade("AAA", 0, 9, 0.05), trade("BBB", 1, 3, -0.05)],
        )
        .unwrap();
        let order: Vec<&str> = result
            .ledger
            .iter()
            .map(|e| e.trade.instrument_id.as_str())
            .collect();
        assert_eq!(order, vec!["BBB", "AAA"]);
    }

    #[test]
    fn cash_never_negative_and_capacity_respected() {
        let mut cfg = config();
        cfg.max_positions = 3;
        cfg.position_size_fraction = 0.4;
        let trades: Vec<TradeRecord> = (0..20)
            .map(|i| trade(&format!("I{}", i), i / 2, i / 2 + 3, if i % 3 == 0 { -0.1 } else { 0.2 }))
            .collect();
        let result = allocate(&cfg, trades).unwrap();
        assert!(!result.events.is_empty());
        for event in &result.events {
            assert!(event.cash >= 0.0);
            assert!(event.open_positions <= 3);
        }
    }

    #[test]
    fn unconstrained_mode_admits_everything_with_fixed_stake() {
        let mut cfg = config();
        cfg.allocation_mode = AllocationMode::Unconstrained;
        let trades: Vec<TradeRecord> = (0..15).map(|i| trade(&format!("U{}", i), 0, 4, 0.1)).collect();
        let result = allocate(&cfg, trades).unwrap();
        assert_eq!(result.ledger.len(), 15);
        assert!(result.skipped.is_empty());
        assert!(result
            .ledger
            .iter()
            .all(|e| (e.position_size - 100_000.0).abs() < 1e-6));
        assert!((result.final_cash - 1_150_000.0).abs() < 1e-3);
    }

    #[test]
    fn position_held_at_data_end_keeps_its_slot() {
        let mut cfg = config();
        cfg.max_positions = 1;
        let holdings = vec![
            Holding::from(trade("BBB", 5, 6, 0.2)),
            Holding::from(held("AAA", 1)),
        ];
        let result = allocate(&cfg, holdings).unwrap();

        assert!(result.ledger.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].instrument_id, "BBB");
        assert_eq!(result.skipped[0].reason, SkipReason::AtCapacity);
        assert_eq!(result.open_at_data_end.len(), 1);
        assert_eq!(result.open_at_data_end[0].trade.instrument_id, "AAA");
        assert!((result.open_at_data_end[0].position_size - 100_000.0).abs() < 1e-6);
        assert!((result.final_cash - 900_000.0).abs() < 1e-6);
    }

    #[test]
    fn held_capital_counts_toward_equity_but_not_cash() {
        let mut cfg = config();
        cfg.position_size_fraction = 0.5;
        let holdings = vec![
            Holding::from(held("AAA", 0)),
            Holding::from(trade("BBB", 2, 4, 0.0)),
            Holding::from(trade("CCC", 3, 5, 0.0)),
        ];
        let result = allocate(&cfg, holdings).unwrap();
        // AAA holds 500k, BBB takes the other 500k, CCC finds no cash left.
        assert_eq!(result.ledger.len(), 1);
        assert!((result.ledger[0].position_size - 500_000.0).abs() < 1e-6);
        assert_eq!(result.skipped[0].instrument_id, "CCC");
        assert_eq!(result.skipped[0].reason, SkipReason::InsufficientCash);
        assert!((result.final_cash - 500_000.0).abs() < 1e-6);
        let settled = result
            .events
            .iter()
            .filter(|e| e.kind == PoolEventKind::Settled)
            .count();
        assert_eq!(settled, 1);
    }

    #[test]
    fn invalid_pool_configuration_is_fatal() {
        let mut cfg = config();
        cfg.max_positions = 0;
        assert!(matches!(
            CapitalPool::new(&cfg),
            Err(SimulationError::InvalidMaxPositions(0))
        ));
    }
}
