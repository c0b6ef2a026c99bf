use crate::data_context::MarketData;
use anyhow::Result;
use log::info;
use std::path::Path;

pub fn run(
    bars: &Path,
    signals: &Path,
    references: Option<&Path>,
    settings: Option<&Path>,
    output_path: &Path,
) -> Result<()> {
    info!(
        "Importing market data from {} and {}",
        bars.display(),
        signals.display()
    );

    let market_data = MarketData::import_json(bars, signals, references, settings)?;
    if let Some((start, end)) = market_data.date_range() {
        info!(
            "{} instruments, {} signals, bars from {} to {}",
            market_data.all_series().len(),
            market_data.signals().len(),
            start,
            end
        );
    }

    market_data.save_to_file(output_path)?;
    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );

    Ok(())
}
