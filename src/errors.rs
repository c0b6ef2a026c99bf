use chrono::NaiveDate;
use thiserror::Error;

/// Fatal problems that abort a strategy run before any simulation proceeds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error(
        "malformed signal for {instrument_id} on {signal_date} ({pattern}): entry {entry_price} must be above stop {stop_price}"
    )]
    MalformedSignal {
        instrument_id: String,
        signal_date: NaiveDate,
        pattern: String,
        entry_price: f64,
        stop_price: f64,
    },

    #[error("unknown exit policy '{0}' (expected fixed or trailing)")]
    UnknownExitPolicy(String),

    #[error("position_size_fraction must be in (0, 1] (value: {0})")]
    InvalidPositionSizeFraction(f64),

    #[error("max_positions must be positive (value: {0})")]
    InvalidMaxPositions(usize),

    #[error("initial_capital must be positive and finite (value: {0})")]
    InvalidInitialCapital(f64),

    #[error("entry_window_days must be positive (value: {0})")]
    InvalidEntryWindow(usize),

    #[error("exit parameter {name} is invalid (value: {value})")]
    InvalidExitParameter { name: &'static str, value: f64 },

    #[error("trade cost {name} must be in [0, 1) (value: {value})")]
    InvalidTradeCost { name: &'static str, value: f64 },
}
