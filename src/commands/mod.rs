pub mod backtest;
pub mod import_market_data;
pub mod market_data_snapshot;
pub mod simulate;
