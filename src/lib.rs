pub mod allocator;
pub mod backtester;
pub mod commands;
pub mod config;
pub mod data_context;
pub mod engine;
pub mod entry;
pub mod errors;
pub mod exits;
pub mod grid;
pub mod indicators;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod price_series;
pub mod run_status;
pub mod trading_rules;
