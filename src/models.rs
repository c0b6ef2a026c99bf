use crate::errors::SimulationError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument_id: String,
    pub signal_date: NaiveDate,
    pub pattern: String,
    pub entry_price: f64,
    pub stop_price: f64,
    #[serde(default)]
    pub quality_grade: Option<String>,
}

impl Signal {
    /// Distance between the entry order and the protective stop.
    pub fn risk(&self) -> f64 {
        self.entry_price - self.stop_price
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let prices_finite = self.entry_price.is_finite() && self.stop_price.is_finite();
        if prices_finite && self.entry_price > self.stop_price {
            return Ok(());
        }
        Err(SimulationError::MalformedSignal {
            instrument_id: self.instrument_id.clone(),
            signal_date: self.signal_date,
            pattern: self.pattern.clone(),
            entry_price: self.entry_price,
            stop_price: self.stop_price,
        })
    }

    /// Ordering key used wherever signals need a deterministic sequence.
    pub fn sort_key(&self) -> (NaiveDate, &str, &str) {
        (self.signal_date, self.instrument_id.as_str(), self.pattern.as_str())
    }
}

/// Named value on a trailing reference series supplied alongside the bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub instrument_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Stop,
    Target,
    Time,
    TrailingStop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Stop => "stop",
            ExitReason::Target => "target",
            ExitReason::Time => "time",
            ExitReason::TrailingStop => "trailing_stop",
        }
    }
}

/// Series the trailing stop follows once activated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingReference {
    /// Simple moving average of closes over the given number of bars.
    MovingAverage(usize),
    /// Externally supplied series looked up by name.
    Named(String),
}

impl TrailingReference {
    pub fn label(&self) -> String {
        match self {
            TrailingReference::MovingAverage(period) => format!("ma{}", period),
            TrailingReference::Named(name) => name.clone(),
        }
    }
}

impl FromStr for TrailingReference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(anyhow::anyhow!("Trailing reference name cannot be empty"));
        }
        if let Some(period) = normalized
            .strip_prefix("ma")
            .or_else(|| normalized.strip_prefix("sma"))
            .and_then(|digits| digits.parse::<usize>().ok())
        {
            if period == 0 {
                return Err(anyhow::anyhow!("Moving average period must be positive"));
            }
            return Ok(TrailingReference::MovingAverage(period));
        }
        Ok(TrailingReference::Named(normalized))
    }
}

impl fmt::Display for TrailingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExitPolicyConfig {
    FixedTarget {
        r_multiple: f64,
        /// `None` holds until stop, target or the end of the data.
        time_exit_days: Option<usize>,
    },
    TrailingStop {
        trigger_r_multiple: f64,
        trailing_reference: TrailingReference,
        #[serde(default)]
        breakeven_on_trigger: bool,
        #[serde(default)]
        ladder: bool,
    },
}

impl ExitPolicyConfig {
    pub fn fixed_target(r_multiple: f64, time_exit_days: Option<usize>) -> Self {
        ExitPolicyConfig::FixedTarget {
            r_multiple,
            time_exit_days,
        }
    }

    pub fn trailing_stop(trigger_r_multiple: f64, trailing_reference: TrailingReference) -> Self {
        ExitPolicyConfig::TrailingStop {
            trigger_r_multiple,
            trailing_reference,
            breakeven_on_trigger: false,
            ladder: false,
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        match self {
            ExitPolicyConfig::FixedTarget {
                r_multiple,
                time_exit_days,
            } => {
                if !r_multiple.is_finite() || *r_multiple <= 0.0 {
                    return Err(SimulationError::InvalidExitParameter {
                        name: "r_multiple",
                        value: *r_multiple,
                    });
                }
                if let Some(days) = time_exit_days {
                    if *days == 0 {
                        return Err(SimulationError::InvalidExitParameter {
                            name: "time_exit_days",
                            value: 0.0,
                        });
                    }
                }
                Ok(())
            }
            ExitPolicyConfig::TrailingStop {
                trigger_r_multiple,
                trailing_reference,
                ..
            } => {
                if !trigger_r_multiple.is_finite() || *trigger_r_multiple <= 0.0 {
                    return Err(SimulationError::InvalidExitParameter {
                        name: "trigger_r_multiple",
                        value: *trigger_r_multiple,
                    });
                }
                if let TrailingReference::MovingAverage(0) = trailing_reference {
                    return Err(SimulationError::InvalidExitParameter {
                        name: "trailing_reference",
                        value: 0.0,
                    });
                }
                Ok(())
            }
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            ExitPolicyConfig::FixedTarget { .. } => "fixed",
            ExitPolicyConfig::TrailingStop { .. } => "trailing",
        }
    }

    /// Short human-readable parameter summary, e.g. `R=2, T=20`.
    pub fn describe(&self) -> String {
        match self {
            ExitPolicyConfig::FixedTarget {
                r_multiple,
                time_exit_days,
            } => match time_exit_days {
                Some(days) => format!("R={}, T={}", r_multiple, days),
                None => format!("R={}, T=none", r_multiple),
            },
            ExitPolicyConfig::TrailingStop {
                trigger_r_multiple,
                trailing_reference,
                breakeven_on_trigger,
                ladder,
            } => {
                let mut text = format!("Trig={}R, Trail={}", trigger_r_multiple, trailing_reference);
                if *breakeven_on_trigger {
                    text.push_str(", breakeven");
                }
                if *ladder {
                    text.push_str(", ladder");
                }
                text
            }
        }
    }

    pub fn trailing_reference(&self) -> Option<&TrailingReference> {
        match self {
            ExitPolicyConfig::TrailingStop {
                trailing_reference, ..
            } => Some(trailing_reference),
            ExitPolicyConfig::FixedTarget { .. } => None,
        }
    }
}

/// A closed trade produced by the exit simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument_id: String,
    pub pattern: String,
    pub signal_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub stop_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// Trading bars between the entry bar and the exit bar.
    pub holding_days: u32,
    pub pnl_pct: f64,
    #[serde(default)]
    pub quality_grade: Option<String>,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl_pct > 0.0
    }

    /// Deterministic admission order: entry date first, then instrument, then signal.
    pub fn admission_key(&self) -> (NaiveDate, &str, NaiveDate, &str) {
        (
            self.entry_date,
            self.instrument_id.as_str(),
            self.signal_date,
            self.pattern.as_str(),
        )
    }
}

/// A triggered trade whose exit never fired before the price data ran out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub instrument_id: String,
    pub pattern: String,
    pub signal_date: NaiveDate,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub current_stop: f64,
    pub last_date: NaiveDate,
    pub last_close: f64,
    pub unrealized_pnl_pct: f64,
    #[serde(default)]
    pub quality_grade: Option<String>,
}

impl OpenTrade {
    /// Same ordering as `TradeRecord::admission_key`.
    pub fn admission_key(&self) -> (NaiveDate, &str, NaiveDate, &str) {
        (
            self.entry_date,
            self.instrument_id.as_str(),
            self.signal_date,
            self.pattern.as_str(),
        )
    }
}

/// A position still held by the pool when the price data ran out. Its capital
/// stays allocated and it never reaches the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    #[serde(flatten)]
    pub trade: OpenTrade,
    pub position_size: f64,
}

/// One settled position in a capital pool ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub trade: TradeRecord,
    pub position_size: f64,
    pub proceeds: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AtCapacity,
    InsufficientCash,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AtCapacity => "at_capacity",
            SkipReason::InsufficientCash => "insufficient_cash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub instrument_id: String,
    pub entry_date: NaiveDate,
    pub reason: SkipReason,
    pub requested_size: f64,
    pub available_cash: f64,
    pub open_positions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolEventKind {
    Admitted,
    Settled,
}

/// Pool state right after an admission or settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub date: NaiveDate,
    pub kind: PoolEventKind,
    pub instrument_id: String,
    pub cash: f64,
    pub open_positions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitReasonCounts {
    pub stop: usize,
    pub target: usize,
    pub time: usize,
    pub trailing_stop: usize,
}

impl ExitReasonCounts {
    pub fn record(&mut self, reason: ExitReason) {
        match reason {
            ExitReason::Stop => self.stop += 1,
            ExitReason::Target => self.target += 1,
            ExitReason::Time => self.time += 1,
            ExitReason::TrailingStop => self.trailing_stop += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPerformance {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub avg_holding_days: f64,
    pub avg_trade_pnl_percent: f64,
    pub avg_winning_pnl_percent: f64,
    pub avg_losing_pnl_percent: f64,
    pub best_trade_pnl_percent: f64,
    pub worst_trade_pnl_percent: f64,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
    pub total_instruments: usize,
    pub exit_reasons: ExitReasonCounts,
    pub span_start: Option<NaiveDate>,
    pub span_end: Option<NaiveDate>,
}

/// One pattern crossed with one exit policy. Owns exactly one capital pool when run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRun {
    pub id: String,
    pub pattern: String,
    pub exit_policy: ExitPolicyConfig,
}

impl StrategyRun {
    pub fn new(pattern: &str, exit_policy: ExitPolicyConfig) -> Self {
        let id = generate_run_id(pattern, &exit_policy);
        Self {
            id,
            pattern: pattern.to_string(),
            exit_policy,
        }
    }
}

pub fn generate_run_id(pattern: &str, exit_policy: &ExitPolicyConfig) -> String {
    let suffix = match exit_policy {
        ExitPolicyConfig::FixedTarget {
            r_multiple,
            time_exit_days,
        } => format!(
            "r{}_t{}",
            r_multiple,
            time_exit_days
                .map(|days| days.to_string())
                .unwrap_or_else(|| "none".to_string())
        ),
        ExitPolicyConfig::TrailingStop {
            trigger_r_multiple,
            trailing_reference,
            breakeven_on_trigger,
            ladder,
        } => {
            let mut text = format!("trig{}_{}", trigger_r_multiple, trailing_reference);
            if *breakeven_on_trigger {
                text.push_str("_be");
            }
            if *ladder {
                text.push_str("_ladder");
            }
            text
        }
    };
    format!("{}_{}_{}", pattern, exit_policy.mode(), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRunResult {
    pub run: StrategyRun,
    pub settings_label: String,
    pub initial_capital: f64,
    pub final_cash: f64,
    pub signals_considered: usize,
    pub discarded_signals: usize,
    pub expired_signals: usize,
    pub performance: StrategyPerformance,
    pub ledger: Vec<LedgerEntry>,
    pub open_at_data_end: Vec<OpenPosition>,
    pub skipped: Vec<SkippedCandidate>,
    pub max_concurrent_positions: usize,
    pub pool_events: Vec<PoolEvent>,
    pub equity_curve: Vec<EquityPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(entry_price: f64, stop_price: f64) -> Signal {
        Signal {
            instrument_id: "2330".to_string(),
            signal_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            pattern: "vcp".to_string(),
            entry_price,
            stop_price,
            quality_grade: None,
        }
    }

    #[test]
    fn signal_requires_positive_risk() {
        assert!(signal(100.0, 90.0).validate().is_ok());
        assert!(matches!(
            signal(90.0, 90.0).validate(),
            Err(SimulationError::MalformedSignal { .. })
        ));
        assert!(signal(80.0, 90.0).validate().is_err());
        assert!(signal(f64::NAN, 90.0).validate().is_err());
        assert!(signal(5.0, 0.0).validate().is_ok());
    }

    #[test]
    fn parses_trailing_references() {
        assert_eq!(
            "ma20".parse::<TrailingReference>().unwrap(),
            TrailingReference::MovingAverage(20)
        );
        assert_eq!(
            " SMA50 ".parse::<TrailingReference>().unwrap(),
            TrailingReference::MovingAverage(50)
        );
        assert_eq!(
            "ema10".parse::<TrailingReference>().unwrap(),
            TrailingReference::Named("ema10".to_string())
        );
        assert!("ma0".parse::<TrailingReference>().is_err());
        assert!("".parse::<TrailingReference>().is_err());
    }

    #[test]
    fn run_ids_encode_policy_parameters() {
        let fixed = StrategyRun::new("vcp", ExitPolicyConfig::fixed_target(2.0, Some(20)));
        assert_eq!(fixed.id, "vcp_fixed_r2_t20");

        let open_ended = StrategyRun::new("cup", ExitPolicyConfig::fixed_target(3.0, None));
        assert_eq!(open_ended.id, "cup_fixed_r3_tnone");

        let trailing = StrategyRun::new(
            "htf",
            ExitPolicyConfig::trailing_stop(1.5, TrailingReference::MovingAverage(20)),
        );
        assert_eq!(trailing.id, "htf_trailing_trig1.5_ma20");
    }

    #[test]
    fn exit_policy_rejects_non_positive_parameters() {
        assert!(ExitPolicyConfig::fixed_target(0.0, Some(20)).validate().is_err());
        assert!(ExitPolicyConfig::fixed_target(2.0, Some(0)).validate().is_err());
        assert!(ExitPolicyConfig::fixed_target(2.0, None).validate().is_ok());
        assert!(
            ExitPolicyConfig::trailing_stop(-1.0, TrailingReference::MovingAverage(20))
                .validate()
                .is_err()
        );
    }
}
