use crate::models::{ReferencePoint, TrailingReference};
use crate::price_series::PriceSeries;
use log::warn;
use std::collections::HashMap;

/// Simple moving average aligned to `prices`; `None` until a full window is available.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    let mut window_sum = 0.0;
    for (i, price) in prices.iter().enumerate() {
        window_sum += price;
        if i >= period {
            window_sum -= prices[i - period];
        }
        if i + 1 >= period {
            sma_values.push(Some(window_sum / period as f64));
        } else {
            sma_values.push(None);
        }
    }

    sma_values
}

/// Externally supplied reference values for one instrument, keyed by series name.
pub type NamedReferences = HashMap<String, Vec<ReferencePoint>>;

/// Reference values aligned bar-for-bar with `series`.
///
/// Moving averages are computed from closes. Named series are looked up in
/// `named` and matched by date; days without a value (or a missing series) are `None`.
pub fn reference_values(
    series: &PriceSeries,
    reference: &TrailingReference,
    named: Option<&NamedReferences>,
) -> Vec<Option<f64>> {
    match reference {
        TrailingReference::MovingAverage(period) => calculate_sma(&series.closes(), *period),
        TrailingReference::Named(name) => {
            let Some(points) = named.and_then(|refs| refs.get(name)) else {
                warn!(
                    "{}: reference series '{}' is missing; trailing stop will hold its initial level",
                    series.instrument_id(),
                    name
                );
                return vec![None; series.len()];
            };
            let by_date: HashMap<_, _> = points
                .iter()
                .filter(|p| p.value.is_finite())
                .map(|p| (p.date, p.value))
                .collect();
            series
                .bars()
                .iter()
                .map(|bar| by_date.get(&bar.date).copied())
                .collect()
        }
    }
}
