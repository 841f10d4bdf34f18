//! Run summary metrics computed from a finished equity curve and trade
//! ledger. Pure functions, no engine access.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{BacktestSummary, ClosedTrade, EquityPoint, RangeDiff, RangeSummary};

/// Summarise one finished run. Calendar days drive annualisation, floored at
/// one day so single-day ranges stay finite.
pub fn compute_summary(
    tie_breaker: &str,
    initial_cash: f64,
    equity_curve: &[EquityPoint],
    closed_trades: &[ClosedTrade],
    from_date: NaiveDate,
    to_date: NaiveDate,
) -> BacktestSummary {
    let total_days = (to_date - from_date).num_days().max(1);

    let final_value = equity_curve
        .last()
        .map(|p| p.total_value)
        .unwrap_or(initial_cash);

    let cagr = if final_value > 0.0 && initial_cash > 0.0 {
        (final_value / initial_cash).powf(365.0 / total_days as f64) - 1.0
    } else {
        -1.0
    };

    // Drawdown peak seeds at initial cash so an immediate drop counts.
    let mut peak = initial_cash;
    let mut max_drawdown: f64 = 0.0;
    for point in equity_curve {
        if point.total_value > peak {
            peak = point.total_value;
        }
        if peak > 0.0 {
            let drawdown = (peak - point.total_value) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }

    let num_trades = closed_trades.len();
    let wins = closed_trades.iter().filter(|t| t.pnl > 0.0).count();
    let win_rate = if num_trades > 0 {
        wins as f64 / num_trades as f64
    } else {
        0.0
    };
    let avg_hold_days = if num_trades > 0 {
        closed_trades.iter().map(|t| t.hold_days as f64).sum::<f64>() / num_trades as f64
    } else {
        0.0
    };

    let gross_profit: f64 = closed_trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let gross_loss: f64 = closed_trades
        .iter()
        .filter(|t| t.pnl <= 0.0)
        .map(|t| t.pnl)
        .sum::<f64>()
        .abs();
    let profit_factor = if gross_loss > 0.0 {
        Some(gross_profit / gross_loss)
    } else if gross_profit > 0.0 {
        None // unbounded: wins without a single loss
    } else {
        Some(0.0)
    };

    let invested_fractions: Vec<f64> = equity_curve
        .iter()
        .filter(|p| p.total_value > 0.0)
        .map(|p| p.open_positions_value / p.total_value)
        .collect();
    let avg_invested_pct = if invested_fractions.is_empty() {
        0.0
    } else {
        invested_fractions.iter().sum::<f64>() / invested_fractions.len() as f64
    };

    BacktestSummary {
        id: Uuid::new_v4().to_string(),
        tie_breaker: tie_breaker.to_string(),
        from_date,
        to_date,
        initial_cash,
        final_value,
        cagr,
        max_drawdown,
        win_rate,
        avg_hold_days,
        num_trades,
        profit_factor,
        avg_invested_pct,
    }
}

/// Pair a worst-case and best-case run into one record with per-field
/// best-minus-worst deltas. A profit-factor diff is only meaningful when
/// both sides are finite.
pub fn build_range_summary(worst: BacktestSummary, best: BacktestSummary) -> RangeSummary {
    let profit_factor = match (best.profit_factor, worst.profit_factor) {
        (Some(b), Some(w)) => Some(b - w),
        _ => None,
    };
    let best_minus_worst = RangeDiff {
        final_value: best.final_value - worst.final_value,
        cagr: best.cagr - worst.cagr,
        max_drawdown: best.max_drawdown - worst.max_drawdown,
        win_rate: best.win_rate - worst.win_rate,
        avg_hold_days: best.avg_hold_days - worst.avg_hold_days,
        num_trades: best.num_trades as i64 - worst.num_trades as i64,
        profit_factor,
        avg_invested_pct: best.avg_invested_pct - worst.avg_invested_pct,
    };
    RangeSummary {
        worst,
        best,
        best_minus_worst,
    }
}
