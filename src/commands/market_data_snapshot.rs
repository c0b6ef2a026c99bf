use crate::data_context::MarketData;
use crate::run_status::RunStatus;
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::info;
use std::collections::HashMap;
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Create it with `import-market-data` before running this command.",
        path.display()
    ))
}

/// Load a snapshot, apply CLI setting overrides and an optional date window.
pub fn load_market_data(
    path: &Path,
    overrides: &HashMap<String, String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    status: &RunStatus,
) -> Result<MarketData> {
    ensure_market_data_file(path)?;
    info!("Using market data snapshot from {}", path.display());
    let data = MarketData::load_from_file(path, status)?
        .restrict_to_date_range(start_date, end_date)?;
    Ok(data.with_settings(overrides))
}
