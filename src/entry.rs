use crate::models::Signal;
use crate::price_series::PriceSeries;
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResolution {
    /// Filled at the signal's entry price on the bar at `entry_index`.
    Triggered {
        entry_index: usize,
        entry_date: NaiveDate,
    },
    /// No bar inside the window reached the entry price.
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub signal: Signal,
    pub resolution: EntryResolution,
}

impl Candidate {
    pub fn is_triggered(&self) -> bool {
        matches!(self.resolution, EntryResolution::Triggered { .. })
    }

    pub fn entry_date(&self) -> Option<NaiveDate> {
        match self.resolution {
            EntryResolution::Triggered { entry_date, .. } => Some(entry_date),
            EntryResolution::Expired => None,
        }
    }
}

/// Scan up to `window_days` bars strictly after the signal date for the first
/// bar whose high reaches the entry price. Limit-order semantics: the fill is
/// always at the signal's entry price, never at the bar's high.
///
/// A missing series, or one that ends inside the window, simply has fewer
/// bars to check.
pub fn resolve(signal: &Signal, series: Option<&PriceSeries>, window_days: usize) -> Candidate {
    let resolution = series
        .and_then(|series| {
            let start = series.first_index_after(signal.signal_date);
            series
                .bars_after_date(signal.signal_date, window_days)
                .iter()
                .position(|bar| bar.high >= signal.entry_price)
                .map(|offset| {
                    let entry_index = start + offset;
                    EntryResolution::Triggered {
                        entry_index,
                        entry_date: series.bars()[entry_index].date,
                    }
                })
        })
        .unwrap_or(EntryResolution::Expired);

    Candidate {
        signal: signal.clone(),
        resolution,
    }
}
