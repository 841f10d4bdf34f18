//! Stateless touch predicates: pure functions of (candle, threshold) that
//! decide whether a daily bar triggered an event. Everything above the
//! engine builds on these.

use crate::config::TieBreak;
use crate::models::{Candle, ExitReason};

/// Pullback fill rule: the day's range must bracket the entry price.
pub fn entry_touched(candle: &Candle, entry: f64) -> bool {
    candle.low <= entry && entry <= candle.high
}

/// Breakout fill rule. One-sided on purpose: a gap above the entry (low >
/// entry) is still a valid fill, so only the high matters.
pub fn breakout_entry_touched(candle: &Candle, entry: f64) -> bool {
    candle.high >= entry
}

/// Close-confirmation rule, stricter than the intraday touch: the bar must
/// close at or above the breakout level, filtering out intraday spikes.
/// Strategies use this when confirming a breakout week.
pub fn close_confirm_touched(candle: &Candle, entry: f64) -> bool {
    candle.close >= entry
}

pub fn stop_loss_touched(candle: &Candle, sl: f64) -> bool {
    candle.low <= sl
}

pub fn take_profit_touched(candle: &Candle, tp: f64) -> bool {
    candle.high >= tp
}

/// Resolve a bar that touches both stop-loss and take-profit. Daily data
/// cannot tell which fired first, so the configured bias decides: worst
/// assumes the stop, best assumes the target.
pub fn resolve_same_day(tie_break: TieBreak, sl: f64, tp: f64) -> (ExitReason, f64) {
    match tie_break {
        TieBreak::Worst => (ExitReason::StopLoss, sl),
        TieBreak::Best => (ExitReason::TakeProfit, tp),
    }
}
