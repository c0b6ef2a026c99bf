use crate::models::PriceBar;
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Date-ordered bars of one instrument with bounds-checked lookahead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    instrument_id: String,
    bars: Vec<PriceBar>,
}

impl PriceSeries {
    /// Sorts by date and keeps the last bar seen for a duplicated date.
    pub fn new(instrument_id: impl Into<String>, mut bars: Vec<PriceBar>) -> Self {
        let instrument_id = instrument_id.into();
        bars.sort_by(|a, b| a.date.cmp(&b.date));
        let before = bars.len();
        let mut deduped: Vec<PriceBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }
        if deduped.len() != before {
            warn!(
                "{}: dropped {} duplicate bar(s)",
                instrument_id,
                before - deduped.len()
            );
        }
        Self {
            instrument_id,
            bars: deduped,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PriceBar> {
        self.bars.get(index)
    }

    pub fn first(&self) -> Option<&PriceBar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.bars.binary_search_by(|bar| bar.date.cmp(&date)).ok()
    }

    /// Index of the first bar dated strictly after `date` (may equal `len()`).
    pub fn first_index_after(&self, date: NaiveDate) -> usize {
        self.bars.partition_point(|bar| bar.date <= date)
    }

    /// Up to `count` bars dated strictly after `date`.
    pub fn bars_after_date(&self, date: NaiveDate, count: usize) -> &[PriceBar] {
        let start = self.first_index_after(date);
        self.slice_from(start, count)
    }

    /// Up to `count` bars following position `index`, clipped to the end of the data.
    pub fn bars_after_index(&self, index: usize, count: usize) -> &[PriceBar] {
        self.slice_from(index.saturating_add(1), count)
    }

    fn slice_from(&self, start: usize, count: usize) -> &[PriceBar] {
        let start = start.min(self.bars.len());
        let end = start.saturating_add(count).min(self.bars.len());
        &self.bars[start..end]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    /// Bars whose date falls in `[start, end]`; either bound may be open.
    pub fn restricted(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let bars = self
            .bars
            .iter()
            .filter(|bar| start.map_or(true, |s| bar.date >= s))
            .filter(|bar| end.map_or(true, |e| bar.date <= e))
            .cloned()
            .collect();
        Self {
            instrument_id: self.instrument_id.clone(),
            bars,
        }
    }
}

fn is_usable(bar: &PriceBar) -> bool {
    [bar.open, bar.high, bar.low, bar.close]
        .iter()
        .all(|v| v.is_finite())
        && bar.high >= bar.low
}

/// Groups raw bars into per-instrument series. Bars with non-finite or inverted prices are dropped.
pub fn group_bars_by_instrument(bars: Vec<PriceBar>) -> BTreeMap<String, PriceSeries> {
    let mut grouped: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
    let mut rejected = 0usize;

    for bar in bars {
        if !is_usable(&bar) {
            rejected += 1;
            continue;
        }
        grouped.entry(bar.instrument_id.clone()).or_default().push(bar);
    }

    if rejected > 0 {
        warn!("Dropped {} unusable price bar(s)", rejected);
    }

    grouped
        .into_iter()
        .map(|(instrument_id, bars)| {
            let series = PriceSeries::new(instrument_id.clone(), bars);
            (instrument_id, series)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    fn bar(id: &str, offset: i64, close: f64) -> PriceBar {
        PriceBar {
            instrument_id: id.to_string(),
            date: day(offset),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn groups_sorts_and_dedups() {
        let bars = vec![
            bar("AAA", 2, 12.0),
            bar("BBB", 0, 50.0),
            bar("AAA", 0, 10.0),
            bar("AAA", 2, 13.0),
            bar("AAA", 1, 11.0),
        ];
        let grouped = group_bars_by_instrument(bars);
        assert_eq!(grouped.len(), 2);

        let aaa = &grouped["AAA"];
        assert_eq!(aaa.len(), 3);
        assert_eq!(aaa.closes(), vec![10.0, 11.0, 13.0]);
    }

    #[test]
    fn drops_unusable_bars() {
        let mut broken = bar("AAA", 1, 10.0);
        broken.high = f64::NAN;
        let grouped = group_bars_by_instrument(vec![bar("AAA", 0, 10.0), broken]);
        assert_eq!(grouped["AAA"].len(), 1);
    }

    #[test]
    fn lookahead_is_clipped_to_available_data() {
        let series = PriceSeries::new("AAA", (0..5).map(|i| bar("AAA", i * 2, 10.0)).collect());

        assert_eq!(series.first_index_after(day(2)), 2);
        assert_eq!(series.first_index_after(day(3)), 2);
        assert_eq!(series.bars_after_date(day(3), 10).len(), 3);
        assert_eq!(series.bars_after_date(day(8), 10).len(), 0);
        assert_eq!(series.bars_after_date(day(-5), 2).len(), 2);
        assert_eq!(series.bars_after_index(3, 30).len(), 1);
        assert!(series.bars_after_index(usize::MAX, 30).is_empty());
        assert_eq!(series.index_of(day(4)), Some(2));
        assert_eq!(series.index_of(day(5)), None);
    }

    #[test]
    fn restricts_to_date_range() {
        let series = PriceSeries::new("AAA", (0..10).map(|i| bar("AAA", i, 10.0)).collect());
        let restricted = series.restricted(Some(day(3)), Some(day(5)));
        assert_eq!(restricted.len(), 3);
        assert_eq!(restricted.first().map(|b| b.date), Some(day(3)));
        assert_eq!(series.restricted(None, None).len(), 10);
    }
}
