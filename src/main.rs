use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use pattern_backtest::commands::{
    backtest::{self, BacktestOptions},
    import_market_data,
    simulate::{self, SimulateOptions},
};
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "pattern-backtest")]
#[command(about = "Backtest chart-pattern signals with a shared compounding capital pool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a market data snapshot from JSON bars, signals and reference series
    ImportMarketData {
        /// JSON array of daily price bars
        #[arg(long, value_name = "PATH")]
        bars: PathBuf,
        /// JSON array of pattern signals
        #[arg(long, value_name = "PATH")]
        signals: PathBuf,
        /// JSON array of external trailing reference points
        #[arg(long, value_name = "PATH")]
        references: Option<PathBuf>,
        /// JSON object of simulation and grid settings
        #[arg(long, value_name = "PATH")]
        settings: Option<PathBuf>,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Run the pattern x exit-policy grid and rank the results
    Backtest {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Write the batch report as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Directory for one ledger JSON file per run
        #[arg(long = "ledger-dir", value_name = "DIR")]
        ledger_dir: Option<PathBuf>,
        /// Comma separated list of patterns to include (defaults to all)
        #[arg(long, value_delimiter = ',')]
        patterns: Vec<String>,
        /// Worker threads (defaults to the number of logical CPUs)
        #[arg(long)]
        threads: Option<usize>,
        /// Ignore bars and signals before this date (YYYY-MM-DD)
        #[arg(long = "start-date", value_name = "DATE")]
        start_date: Option<String>,
        /// Ignore bars and signals after this date (YYYY-MM-DD)
        #[arg(long = "end-date", value_name = "DATE")]
        end_date: Option<String>,
        /// Override a snapshot setting, e.g. --set MAX_POSITIONS=5
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Run a single pattern with one exit policy
    Simulate {
        /// Path to the market data snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Pattern name as it appears in the signal set
        #[arg(long)]
        pattern: String,
        /// Exit policy: fixed or trailing
        #[arg(long = "exit", default_value = "fixed")]
        exit: String,
        /// Profit target in multiples of the initial risk (fixed)
        #[arg(long = "r-multiple")]
        r_multiple: Option<f64>,
        /// Close after this many trading days (fixed, omit for no limit)
        #[arg(long = "time-exit")]
        time_exit: Option<usize>,
        /// Trailing activation level in multiples of the initial risk
        #[arg(long = "trigger-r")]
        trigger_r: Option<f64>,
        /// Trailing reference, e.g. ma20, ma50 or a named series
        #[arg(long)]
        reference: Option<String>,
        /// Raise the stop to the entry price when trailing activates
        #[arg(long)]
        breakeven: bool,
        /// Raise the stop one R for every R gained above the trigger
        #[arg(long)]
        ladder: bool,
        /// Write the run result as JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
        /// Override a snapshot setting, e.g. --set ALLOCATION_MODE=unconstrained
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

fn main() -> Result<()> {
    let Cli { command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting pattern-backtest. Simulated results only, not investment advice.");

    match command {
        Commands::ImportMarketData {
            bars,
            signals,
            references,
            settings,
            output,
        } => {
            let output_path = resolve_market_data_path(output);
            import_market_data::run(
                &bars,
                &signals,
                references.as_deref(),
                settings.as_deref(),
                &output_path,
            )?;
        }
        Commands::Backtest {
            data_file,
            output,
            ledger_dir,
            patterns,
            threads,
            start_date,
            end_date,
            set,
        } => {
            let market_data_path = resolve_market_data_path(data_file);
            backtest::run(&BacktestOptions {
                market_data_path: &market_data_path,
                output: output.as_deref(),
                ledger_dir: ledger_dir.as_deref(),
                patterns: &patterns,
                threads,
                start_date: start_date.as_deref(),
                end_date: end_date.as_deref(),
                overrides: &set,
            })?;
        }
        Commands::Simulate {
            data_file,
            pattern,
            exit,
            r_multiple,
            time_exit,
            trigger_r,
            reference,
            breakeven,
            ladder,
            output,
            set,
        } => {
            let market_data_path = resolve_market_data_path(data_file);
            simulate::run(&SimulateOptions {
                market_data_path: &market_data_path,
                pattern: &pattern,
                exit_mode: &exit,
                r_multiple,
                time_exit,
                trigger_r,
                reference: reference.as_deref(),
                breakeven,
                ladder,
                output: output.as_deref(),
                overrides: &set,
            })?;
        }
    }

    Ok(())
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
