use crate::errors::SimulationError;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 1_000_000.0;
pub const DEFAULT_MAX_POSITIONS: usize = 10;
pub const DEFAULT_POSITION_SIZE_FRACTION: f64 = 0.10;
pub const DEFAULT_ENTRY_WINDOW_DAYS: usize = 30;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

/// How triggered trades are admitted into a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Compounding pool limited by cash and max_positions.
    Constrained,
    /// Every trade receives a fixed `initial_capital * position_size_fraction` stake.
    Unconstrained,
}

impl AllocationMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "constrained" | "compounding" => Ok(Self::Constrained),
            "unconstrained" | "unlimited" => Ok(Self::Unconstrained),
            other => Err(anyhow!(
                "ALLOCATION_MODE must be constrained or unconstrained (value: {})",
                other
            )),
        }
    }
}

/// Whether exit proceeds dated on an admission day are available to that admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementTiming {
    SameDay,
    NextDay,
}

impl SettlementTiming {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "same_day" | "same-day" => Ok(Self::SameDay),
            "next_day" | "next-day" => Ok(Self::NextDay),
            other => Err(anyhow!(
                "SETTLEMENT_TIMING must be same_day or next_day (value: {})",
                other
            )),
        }
    }

    /// True when an exit dated `exit_date` has settled before admissions on `date`.
    pub fn is_settled(self, exit_date: NaiveDate, date: NaiveDate) -> bool {
        match self {
            Self::SameDay => exit_date <= date,
            Self::NextDay => exit_date < date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedSignalPolicy {
    /// Abort the run on the first signal whose entry is not above its stop.
    Reject,
    /// Drop such signals and count them.
    Discard,
}

impl MalformedSignalPolicy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reject" | "fail" => Ok(Self::Reject),
            "discard" | "drop" => Ok(Self::Discard),
            other => Err(anyhow!(
                "MALFORMED_SIGNALS must be reject or discard (value: {})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeCosts {
    /// Charged on both legs.
    pub fee_rate: f64,
    /// Charged on the exit leg only.
    pub tax_rate: f64,
    /// Proportional price concession on both legs.
    pub slippage_rate: f64,
}

impl TradeCosts {
    pub fn is_zero(&self) -> bool {
        self.fee_rate == 0.0 && self.tax_rate == 0.0 && self.slippage_rate == 0.0
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let checks = [
            ("fee_rate", self.fee_rate),
            ("tax_rate", self.tax_rate),
            ("slippage_rate", self.slippage_rate),
        ];
        for (name, value) in checks {
            if !value.is_finite() || !(0.0..1.0).contains(&value) {
                return Err(SimulationError::InvalidTradeCost { name, value });
            }
        }
        if self.fee_rate + self.tax_rate >= 1.0 {
            return Err(SimulationError::InvalidTradeCost {
                name: "fee_rate + tax_rate",
                value: self.fee_rate + self.tax_rate,
            });
        }
        Ok(())
    }
}

/// Immutable per-run configuration. Every `Engine` receives its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    pub max_positions: usize,
    pub position_size_fraction: f64,
    pub entry_window_days: usize,
    pub allocation_mode: AllocationMode,
    pub settlement_timing: SettlementTiming,
    pub costs: TradeCosts,
    pub malformed_signals: MalformedSignalPolicy,
    pub risk_free_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            max_positions: DEFAULT_MAX_POSITIONS,
            position_size_fraction: DEFAULT_POSITION_SIZE_FRACTION,
            entry_window_days: DEFAULT_ENTRY_WINDOW_DAYS,
            allocation_mode: AllocationMode::Constrained,
            settlement_timing: SettlementTiming::NextDay,
            costs: TradeCosts::default(),
            malformed_signals: MalformedSignalPolicy::Reject,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

impl SimulationConfig {
    /// Build a config from a settings map. Absent keys fall back to defaults.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let initial_capital =
            optional_setting_f64(settings, "INITIAL_CAPITAL", DEFAULT_INITIAL_CAPITAL)?;
        let max_positions =
            optional_setting_usize(settings, "MAX_POSITIONS", DEFAULT_MAX_POSITIONS)?;
        let position_size_fraction = optional_setting_f64(
            settings,
            "POSITION_SIZE_FRACTION",
            DEFAULT_POSITION_SIZE_FRACTION,
        )?;
        let entry_window_days =
            optional_setting_usize(settings, "ENTRY_WINDOW_DAYS", DEFAULT_ENTRY_WINDOW_DAYS)?;
        let allocation_mode = setting_str(settings, "ALLOCATION_MODE")
            .map(AllocationMode::parse)
            .transpose()?
            .unwrap_or(AllocationMode::Constrained);
        let settlement_timing = setting_str(settings, "SETTLEMENT_TIMING")
            .map(SettlementTiming::parse)
            .transpose()?
            .unwrap_or(SettlementTiming::NextDay);
        let malformed_signals = setting_str(settings, "MALFORMED_SIGNALS")
            .map(MalformedSignalPolicy::parse)
            .transpose()?
            .unwrap_or(MalformedSignalPolicy::Reject);
        let costs = TradeCosts {
            fee_rate: optional_setting_f64(settings, "TRADE_FEE_RATE", 0.0)?,
            tax_rate: optional_setting_f64(settings, "TRADE_TAX_RATE", 0.0)?,
            slippage_rate: optional_setting_f64(settings, "TRADE_SLIPPAGE_RATE", 0.0)?,
        };
        let risk_free_rate =
            optional_setting_f64(settings, "RISK_FREE_RATE", DEFAULT_RISK_FREE_RATE)?;

        let config = Self {
            initial_capital,
            max_positions,
            position_size_fraction,
            entry_window_days,
            allocation_mode,
            settlement_timing,
            costs,
            malformed_signals,
            risk_free_rate,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(SimulationError::InvalidInitialCapital(self.initial_capital));
        }
        if self.max_positions == 0 {
            return Err(SimulationError::InvalidMaxPositions(self.max_positions));
        }
        if !self.position_size_fraction.is_finite()
            || self.position_size_fraction <= 0.0
            || self.position_size_fraction > 1.0
        {
            return Err(SimulationError::InvalidPositionSizeFraction(
                self.position_size_fraction,
            ));
        }
        if self.entry_window_days == 0 {
            return Err(SimulationError::InvalidEntryWindow(self.entry_window_days));
        }
        self.costs.validate()
    }

    /// Compact label used in logs and reports.
    pub fn label(&self) -> String {
        let mode = match self.allocation_mode {
            AllocationMode::Constrained => format!("max{}", self.max_positions),
            AllocationMode::Unconstrained => "unconstrained".to_string(),
        };
        format!(
            "capital={} size={}% {} window={}d",
            self.initial_capital,
            self.position_size_fraction * 100.0,
            mode,
            self.entry_window_days
        )
    }
}

pub(crate) fn setting_str<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(settings: &HashMap<String, String>, key: &str, default: f64) -> Result<f64> {
    let Some(raw) = setting_str(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .replace('_', "")
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    Ok(value)
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize> {
    let Some(raw) = setting_str(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!(
            "Setting {} must be a non-negative number (value: {})",
            key,
            raw
        ));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    Ok(value as usize)
}

/// Parse a comma or whitespace separated list, optionally wrapped in brackets.
pub(crate) fn setting_list(settings: &HashMap<String, String>, key: &str) -> Option<Vec<String>> {
    let raw = setting_str(settings, key)?;
    let trimmed = raw.trim_matches(|c| c == '[' || c == ']');
    let values: Vec<String> = trimmed
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|part| part.trim().trim_matches('"'))
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

pub fn parse_date(raw: &str, label: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "{} must be a date in YYYY-MM-DD format (value: {})",
            label,
            raw
        )
    })
}

/// Parse `KEY=VALUE` overrides passed on the command line.
pub fn parse_overrides(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Setting override must look like KEY=VALUE (value: {})", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Setting override has an empty key: {}", pair));
        }
        overrides.insert(key.to_ascii_uppercase(), value.trim().to_string());
    }
    Ok(overrides)
}
