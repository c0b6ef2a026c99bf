use crate::indicators::NamedReferences;
use crate::models::{PriceBar, ReferencePoint, Signal};
use crate::price_series::{group_bars_by_instrument, PriceSeries};
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use chrono::prelude::*;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_ALLOWED_SETTINGS: [&str; 16] = [
    "ALLOCATION_MODE",
    "ENTRY_WINDOW_DAYS",
    "GRID_PATTERNS",
    "GRID_R_MULTIPLES",
    "GRID_TIME_EXIT_DAYS",
    "GRID_TRAILING_REFERENCES",
    "GRID_TRIGGER_R_MULTIPLES",
    "INITIAL_CAPITAL",
    "MALFORMED_SIGNALS",
    "MAX_POSITIONS",
    "POSITION_SIZE_FRACTION",
    "RISK_FREE_RATE",
    "SETTLEMENT_TIMING",
    "TRADE_FEE_RATE",
    "TRADE_SLIPPAGE_RATE",
    "TRADE_TAX_RATE",
];

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    bars: Vec<PriceBar>,
    signals: Vec<Signal>,
    references: Vec<ReferencePoint>,
    settings: HashMap<String, String>,
}

fn scrub_snapshot_settings(settings: &HashMap<String, String>) -> HashMap<String, String> {
    let mut scrubbed = HashMap::new();
    for (key, value) in settings {
        if SNAPSHOT_ALLOWED_SETTINGS.contains(&key.as_str()) {
            scrubbed.insert(key.clone(), value.clone());
        } else {
            warn!("Ignoring unrecognized setting {}", key);
        }
    }
    scrubbed
}

/// Everything a batch of strategy runs reads. Immutable once loaded and cheap to clone.
#[derive(Clone)]
pub struct MarketData {
    series: Arc<BTreeMap<String, PriceSeries>>,
    signals: Arc<Vec<Signal>>,
    references: Arc<HashMap<String, NamedReferences>>,
    settings: Arc<HashMap<String, String>>,
}

impl MarketData {
    pub fn from_parts(
        bars: Vec<PriceBar>,
        mut signals: Vec<Signal>,
        references: Vec<ReferencePoint>,
        settings: HashMap<String, String>,
    ) -> Result<Self> {
        if bars.is_empty() {
            return Err(anyhow!("Market data has no price bars"));
        }
        let series = group_bars_by_instrument(bars);
        if series.is_empty() {
            return Err(anyhow!("Market data has no usable price bars"));
        }

        for signal in &mut signals {
            signal.pattern = signal.pattern.trim().to_ascii_lowercase();
        }
        signals.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut grouped_references: HashMap<String, NamedReferences> = HashMap::new();
        for point in references {
            grouped_references
                .entry(point.instrument_id.clone())
                .or_default()
                .entry(point.name.to_ascii_lowercase())
                .or_default()
                .push(point);
        }

        Ok(Self {
            series: Arc::new(series),
            signals: Arc::new(signals),
            references: Arc::new(grouped_references),
            settings: Arc::new(scrub_snapshot_settings(&settings)),
        })
    }

    /// Build market data from JSON arrays of bars, signals and (optionally)
    /// reference points, plus an optional JSON object of settings.
    pub fn import_json(
        bars_path: &Path,
        signals_path: &Path,
        references_path: Option<&Path>,
        settings_path: Option<&Path>,
    ) -> Result<Self> {
        let bars: Vec<PriceBar> = read_json(bars_path, "price bars")?;
        let signals: Vec<Signal> = read_json(signals_path, "signals")?;
        let references: Vec<ReferencePoint> = match references_path {
            Some(path) => read_json(path, "reference series")?,
            None => Vec::new(),
        };
        let settings = match settings_path {
            Some(path) => settings_from_json(read_json(path, "settings")?)?,
            None => HashMap::new(),
        };

        info!(
            "Imported {} bars, {} signals and {} reference points",
            bars.len(),
            signals.len(),
            references.len()
        );
        Self::from_parts(bars, signals, references, settings)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!(
            "Loading market data snapshot from {}",
            path.display()
        ));
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        status.set_phase("Reconstructing market data snapshot");
        let data = Self::from_parts(
            snapshot.bars,
            snapshot.signals,
            snapshot.references,
            snapshot.settings,
        )?;
        info!(
            "Loaded snapshot generated at {}: {} instruments, {} signals",
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S"),
            data.series.len(),
            data.signals.len()
        );
        Ok(data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            bars: self
                .series
                .values()
                .flat_map(|series| series.bars().iter().cloned())
                .collect(),
            signals: self.signals.as_ref().clone(),
            references: self.reference_points(),
            settings: self.settings.as_ref().clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    fn reference_points(&self) -> Vec<ReferencePoint> {
        let mut points: Vec<ReferencePoint> = self
            .references
            .values()
            .flat_map(|named| named.values().flatten().cloned())
            .collect();
        points.sort_by(|a, b| {
            (a.instrument_id.as_str(), a.name.as_str(), a.date)
                .cmp(&(b.instrument_id.as_str(), b.name.as_str(), b.date))
        });
        points
    }

    pub fn series(&self, instrument_id: &str) -> Option<&PriceSeries> {
        self.series.get(instrument_id)
    }

    pub fn all_series(&self) -> &BTreeMap<String, PriceSeries> {
        &self.series
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Signals of one pattern, in (signal_date, instrument, pattern) order.
    /// Pattern names are stored lowercase and matched case-insensitively.
    pub fn signals_for_pattern<'a>(&'a self, pattern: &'a str) -> impl Iterator<Item = &'a Signal> + 'a {
        let pattern = pattern.trim();
        self.signals
            .iter()
            .filter(move |s| s.pattern.eq_ignore_ascii_case(pattern))
    }

    pub fn patterns(&self) -> BTreeSet<String> {
        self.signals.iter().map(|s| s.pattern.clone()).collect()
    }

    pub fn references_for(&self, instrument_id: &str) -> Option<&NamedReferences> {
        self.references.get(instrument_id)
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn setting_value(&self, setting_key: &str) -> Option<&str> {
        self.settings
            .get(setting_key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Returns a copy whose settings are overlaid with `overrides`.
    pub fn with_settings(&self, overrides: &HashMap<String, String>) -> Self {
        if overrides.is_empty() {
            return self.clone();
        }
        let mut settings = self.settings.as_ref().clone();
        for (key, value) in overrides {
            settings.insert(key.clone(), value.clone());
        }
        Self {
            series: Arc::clone(&self.series),
            signals: Arc::clone(&self.signals),
            references: Arc::clone(&self.references),
            settings: Arc::new(scrub_snapshot_settings(&settings)),
        }
    }

    /// First and last bar date across all instruments.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let start = self.series.values().filter_map(|s| s.first()).map(|b| b.date).min()?;
        let end = self.series.values().filter_map(|s| s.last()).map(|b| b.date).max()?;
        Some((start, end))
    }

    pub fn restrict_to_date_range(
        self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Self> {
        if start_date.is_none() && end_date.is_none() {
            return Ok(self);
        }

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(anyhow!(
                    "Invalid market data date range: {} is after {}",
                    start,
                    end
                ));
            }
        }

        let in_range = |date: NaiveDate| {
            start_date.map_or(true, |start| date >= start) && end_date.map_or(true, |end| date <= end)
        };

        let series: BTreeMap<String, PriceSeries> = self
            .series
            .iter()
            .map(|(id, series)| (id.clone(), series.restricted(start_date, end_date)))
            .filter(|(_, series)| !series.is_empty())
            .collect();
        if series.is_empty() {
            return Err(anyhow!(
                "No price data remains after restricting to {}",
                describe_range(start_date, end_date)
            ));
        }

        let signals: Vec<Signal> = self
            .signals
            .iter()
            .filter(|signal| in_range(signal.signal_date))
            .cloned()
            .collect();

        let references: HashMap<String, NamedReferences> = self
            .references
            .iter()
            .map(|(id, named)| {
                let filtered = named
                    .iter()
                    .map(|(name, points)| {
                        let points = points.iter().filter(|p| in_range(p.date)).cloned().collect();
                        (name.clone(), points)
                    })
                    .collect();
                (id.clone(), filtered)
            })
            .collect();

        info!(
            "Restricted market data to {}: {} instruments, {} signals",
            describe_range(start_date, end_date),
            series.len(),
            signals.len()
        );

        Ok(Self {
            series: Arc::new(series),
            signals: Arc::new(signals),
            references: Arc::new(references),
            settings: self.settings,
        })
    }
}

fn describe_range(start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> String {
    match (start_date, end_date) {
        (Some(start), Some(end)) => {
            format!("{} - {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
        }
        (Some(start), None) => format!("{} onward", start.format("%Y-%m-%d")),
        (None, Some(end)) => format!("through {}", end.format("%Y-%m-%d")),
        _ => "entire dataset".to_string(),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} file {}", label, path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {} from {}", label, path.display()))
}

/// Settings files are flat JSON objects; numbers, booleans and arrays are stored as text.
fn settings_from_json(value: Value) -> Result<HashMap<String, String>> {
    let Value::Object(map) = value else {
        return Err(anyhow!("Settings file must contain a JSON object"));
    };
    let mut settings = HashMap::new();
    for (key, value) in map {
        let text = match value {
            Value::String(text) => text,
            Value::Null => continue,
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_string(),
        };
        settings.insert(key.to_ascii_uppercase(), text);
    }
    Ok(settings)
}
