use crate::models::*;
use chrono::NaiveDate;
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashSet};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

pub struct PerformanceCalculator;

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

impl PerformanceCalculator {
    /// Calendar span covered by a ledger: first entry to last exit.
    pub fn ledger_span(ledger: &[LedgerEntry]) -> Option<(NaiveDate, NaiveDate)> {
        let start = ledger.iter().map(|e| e.trade.entry_date).min()?;
        let end = ledger.iter().map(|e| e.trade.exit_date).max()?;
        Some((start, end))
    }

    fn resolve_span(
        ledger: &[LedgerEntry],
        span: Option<(NaiveDate, NaiveDate)>,
    ) -> Option<(NaiveDate, NaiveDate)> {
        match (span, Self::ledger_span(ledger)) {
            (Some((s, e)), Some((ls, le))) => Some((s.min(ls), e.max(le))),
            (Some(span), None) => Some(span),
            (None, ledger_span) => ledger_span,
        }
    }

    /// Daily equity over the calendar span, realizing each trade's profit on its exit date.
    pub fn equity_curve(
        ledger: &[LedgerEntry],
        initial_capital: f64,
        span: Option<(NaiveDate, NaiveDate)>,
    ) -> Vec<EquityPoint> {
        let Some((start, end)) = Self::resolve_span(ledger, span) else {
            return Vec::new();
        };

        let mut profit_by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for entry in ledger {
            *profit_by_date.entry(entry.trade.exit_date).or_insert(0.0) += entry.profit;
        }

        let mut curve = Vec::new();
        let mut equity = initial_capital;
        let mut realized = profit_by_date.into_iter().peekable();
        let mut date = start;
        while date <= end {
            while let Some((_, profit)) = realized.next_if(|(exit_date, _)| *exit_date <= date) {
                equity += profit;
            }
            curve.push(EquityPoint { date, equity });
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        curve
    }

    pub fn summarize(
        ledger: &[LedgerEntry],
        initial_capital: f64,
        span: Option<(NaiveDate, NaiveDate)>,
        risk_free_rate: f64,
    ) -> StrategyPerformance {
        let total_trades = ledger.len();
        if total_trades == 0 {
            return StrategyPerformance {
                final_equity: initial_capital,
                ..Default::default()
            };
        }

        let pnl_percents: Vec<f64> = ledger.iter().map(|e| e.trade.pnl_pct * 100.0).collect();
        let winning: Vec<f64> = pnl_percents.iter().copied().filter(|p| *p > 0.0).collect();
        let losing: Vec<f64> = pnl_percents.iter().copied().filter(|p| *p <= 0.0).collect();
        let winning_trades = winning.len();
        let losing_trades = losing.len();

        let total_profit: f64 = ledger.iter().map(|e| e.profit).sum();
        let final_equity = initial_capital + total_profit;
        let total_return = if initial_capital > 0.0 {
            final_equity / initial_capital - 1.0
        } else {
            0.0
        };

        let resolved_span = Self::resolve_span(ledger, span);
        let curve = Self::equity_curve(ledger, initial_capital, resolved_span);
        let annualized_return = resolved_span
            .map(|(start, end)| {
                Self::calculate_annualized_return(initial_capital, final_equity, start, end)
            })
            .unwrap_or(0.0);
        let sharpe_ratio = Self::calculate_sharpe_ratio(&curve, risk_free_rate);
        let drawdown = Self::calculate_max_drawdown(&curve);
        let calmar_ratio =
            Self::calculate_calmar_ratio(annualized_return, drawdown.max_drawdown_percent);

        let (max_win_streak, max_loss_streak) = Self::streaks(ledger);
        let mut exit_reasons = ExitReasonCounts::default();
        for entry in ledger {
            exit_reasons.record(entry.trade.exit_reason);
        }
        let holding: Vec<f64> = ledger
            .iter()
            .map(|e| e.trade.holding_days as f64)
            .collect();

        StrategyPerformance {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate: winning_trades as f64 / total_trades as f64,
            total_profit,
            final_equity,
            total_return,
            annualized_return,
            sharpe_ratio,
            calmar_ratio,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_percent: drawdown.max_drawdown_percent,
            avg_holding_days: Self::average(&holding),
            avg_trade_pnl_percent: Self::average(&pnl_percents),
            avg_winning_pnl_percent: Self::average(&winning),
            avg_losing_pnl_percent: Self::average(&losing),
            best_trade_pnl_percent: pnl_percents.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_trade_pnl_percent: pnl_percents.iter().copied().fold(f64::INFINITY, f64::min),
            max_win_streak,
            max_loss_streak,
            total_instruments: ledger
                .iter()
                .map(|e| e.trade.instrument_id.as_str())
                .collect::<HashSet<_>>()
                .len(),
            exit_reasons,
            span_start: resolved_span.map(|(s, _)| s),
            span_end: resolved_span.map(|(_, e)| e),
        }
    }

    fn calculate_annualized_return(
        initial_capital: f64,
        final_equity: f64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> f64 {
        if initial_capital <= 0.0 || !final_equity.is_finite() {
            return 0.0;
        }

        let days = (end_date - start_date).num_days();
        if days <= 0 {
            return 0.0;
        }

        let total_return_ratio = final_equity / initial_capital;
        if total_return_ratio <= 0.0 {
            return -1.0;
        }

        total_return_ratio.powf(DAYS_PER_YEAR / days as f64) - 1.0
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;

        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Longest runs of consecutive wins and losses, in ledger order.
    fn streaks(ledger: &[LedgerEntry]) -> (usize, usize) {
        let mut max_win = 0;
        let mut max_loss = 0;
        let mut current_win = 0;
        let mut current_loss = 0;
        for entry in ledger {
            if entry.trade.is_win() {
                current_win += 1;
                current_loss = 0;
            } else {
                current_loss += 1;
                current_win = 0;
            }
            max_win = max_win.max(current_win);
            max_loss = max_loss.max(current_loss);
        }
        (max_win, max_loss)
    }

    /// Annualized Sharpe ratio of daily equity-curve returns.
    pub fn calculate_sharpe_ratio(curve: &[EquityPoint], risk_free_rate: f64) -> f64 {
        if curve.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = curve
            .windows(2)
            .map(|window| {
                let prev_value = window[0].equity;
                let curr_value = window[1].equity;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.clone().mean();
        let std_dev = returns.std_dev();

        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }

        (mean_return - risk_free_rate / TRADING_DAYS_PER_YEAR) / std_dev
            * TRADING_DAYS_PER_YEAR.sqrt()
    }

    fn calculate_calmar_ratio(annualized_return: f64, max_drawdown_percent: f64) -> f64 {
        if !annualized_return.is_finite() || !max_drawdown_percent.is_finite() {
            return 0.0;
        }

        let drawdown_ratio = (max_drawdown_percent / 100.0).abs();
        if drawdown_ratio <= f64::EPSILON {
            return 0.0;
        }

        annualized_return / drawdown_ratio
    }

    fn calculate_max_drawdown(curve: &[EquityPoint]) -> DrawdownInfo {
        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;
        let Some(first) = curve.first() else {
            return DrawdownInfo {
                max_drawdown,
                max_drawdown_percent,
            };
        };
        let mut peak_value = first.equity;

        for point in curve {
            if point.equity > peak_value {
                peak_value = point.equity;
                continue;
            }
            let drawdown = peak_value - point.equity;
            let drawdown_percent = if peak_value > 0.0 {
                (drawdown / peak_value) * 100.0
            } else {
                0.0
            };
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
            if drawdown_percent > max_drawdown_percent {
                max_drawdown_percent = drawdown_percent;
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }
}
