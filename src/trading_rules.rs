use crate::config::TradeCosts;

pub const PRICE_EPSILON: f64 = 1e-6;

/// Profit target `r_multiple` risk units above the entry.
pub fn r_multiple_target(entry_price: f64, stop_price: f64, r_multiple: f64) -> f64 {
    entry_price + (entry_price - stop_price) * r_multiple
}

/// Price that activates a trailing stop.
pub fn trailing_trigger_price(entry_price: f64, stop_price: f64, trigger_r_multiple: f64) -> f64 {
    r_multiple_target(entry_price, stop_price, trigger_r_multiple)
}

/// Raise `current_stop` to `candidate` when it is defined, finite and higher.
/// The stop never loosens.
pub fn ratchet_stop(current_stop: f64, candidate: Option<f64>) -> f64 {
    match candidate {
        Some(value) if value.is_finite() && value > current_stop => value,
        _ => current_stop,
    }
}

/// Ladder level for a triggered trade: one full R of stop per full R the
/// day's high sits above the trigger level.
pub fn ladder_stop(
    entry_price: f64,
    stop_price: f64,
    trigger_r_multiple: f64,
    high: f64,
) -> Option<f64> {
    let risk = entry_price - stop_price;
    if risk <= 0.0 {
        return None;
    }
    let r_above_trigger = (high - entry_price) / risk - trigger_r_multiple;
    if r_above_trigger <= 0.0 || !r_above_trigger.is_finite() {
        return None;
    }
    Some(entry_price + r_above_trigger.floor() * risk)
}

/// Realized return of a round trip after slippage, fees and exit tax.
pub fn net_pnl_pct(entry_price: f64, exit_price: f64, costs: &TradeCosts) -> f64 {
    if costs.is_zero() {
        return (exit_price - entry_price) / entry_price;
    }
    let cost = entry_price * (1.0 + costs.slippage_rate) * (1.0 + costs.fee_rate);
    let proceeds =
        exit_price * (1.0 - costs.slippage_rate) * (1.0 - costs.fee_rate - costs.tax_rate);
    proceeds / cost - 1.0
}

#[derive(Debug, PartialEq)]
pub enum PositionSizingOutcome {
    Sized { position_size: f64 },
    AtCapacity,
    InsufficientCash { required: f64 },
}

pub struct PositionSizingParams {
    pub equity: f64,
    pub available_cash: f64,
    pub position_size_fraction: f64,
    pub open_positions: usize,
    pub max_positions: usize,
}

/// Compounding position size: a fixed fraction of current equity, admitted only
/// while a slot is free and the cash covers it.
pub fn determine_position_size(params: PositionSizingParams) -> PositionSizingOutcome {
    let PositionSizingParams {
        equity,
        available_cash,
        position_size_fraction,
        open_positions,
        max_positions,
    } = params;

    if open_positions >= max_positions {
        return PositionSizingOutcome::AtCapacity;
    }

    let position_size = equity.max(0.0) * position_size_fraction;
    if !position_size.is_finite() || position_size > available_cash + PRICE_EPSILON {
        return PositionSizingOutcome::InsufficientCash {
            required: position_size,
        };
    }

    PositionSizingOutcome::Sized {
        position_size: position_size.min(available_cash.max(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_scale_with_risk() {
        assert!((r_multiple_target(100.0, 90.0, 2.0) - 120.0).abs() < 1e-9);
        assert!((trailing_trigger_price(100.0, 90.0, 1.5) - 115.0).abs() < 1e-9);
    }

    #[test]
    fn test_ratchet_never_loosens() {
        assert_eq!(ratchet_stop(105.0, Some(110.0)), 110.0);
        assert_eq!(ratchet_stop(110.0, Some(107.0)), 110.0);
        assert_eq!(ratchet_stop(110.0, None), 110.0);
        assert_eq!(ratchet_stop(110.0, Some(f64::NAN)), 110.0);
    }

    #[test]
    fn test_ladder_steps_in_whole_r() {
        // Trigger at 2R (120). High at 4.5R (145) is 2.5R above: stop at entry + 2R.
        let stop = ladder_stop(100.0, 90.0, 2.0, 145.0).unwrap();
        assert!((stop - 120.0).abs() < 1e-9);
        // Less than one full R above trigger still yields entry (0 R).
        let stop = ladder_stop(100.0, 90.0, 2.0, 125.0).unwrap();
        assert!((stop - 100.0).abs() < 1e-9);
        assert!(ladder_stop(100.0, 90.0, 2.0, 118.0).is_none());
    }

    #[test]
    fn test_pnl_with_and_without_costs() {
        let zero = TradeCosts::default();
        assert!((net_pnl_pct(100.0, 110.0, &zero) - 0.10).abs() < 1e-12);

        let costs = TradeCosts {
            fee_rate: 0.001,
            tax_rate: 0.003,
            slippage_rate: 0.0,
        };
        let expected = 110.0 * (1.0 - 0.004) / (100.0 * 1.001) - 1.0;
        assert!((net_pnl_pct(100.0, 110.0, &costs) - expected).abs() < 1e-12);
        assert!(net_pnl_pct(100.0, 100.0, &costs) < 0.0);
    }

    #[test]
    fn test_position_size_compounds_with_equity() {
        let outcome = determine_position_size(PositionSizingParams {
            equity: 1_500_000.0,
            available_cash: 1_500_000.0,
            position_size_fraction: 0.10,
            open_positions: 0,
            max_positions: 10,
        });
        assert_eq!(
            outcome,
            PositionSizingOutcome::Sized {
                position_size: 150_000.0
            }
        );
    }

    #[test]
    fn test_position_size_checks_capacity_before_cash() {
        let outcome = determine_position_size(PositionSizingParams {
            equity: 1_000_000.0,
            available_cash: 0.0,
            position_size_fraction: 0.10,
            open_positions: 10,
            max_positions: 10,
        });
        assert_eq!(outcome, PositionSizingOutcome::AtCapacity);

        let outcome = determine_position_size(PositionSizingParams {
            equity: 1_000_000.0,
            available_cash: 50_000.0,
            position_size_fraction: 0.10,
            open_positions: 9,
            max_positions: 10,
        });
        assert_eq!(
            outcome,
            PositionSizingOutcome::InsufficientCash {
                required: 100_000.0
            }
        );
    }
}
