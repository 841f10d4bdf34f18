use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One trading day of one symbol. Immutable once produced; every touch
/// predicate and exit decision reads from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Reduce,
    Sell,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit => "TP",
            ExitReason::Reduce => "REDUCE",
            ExitReason::Sell => "SELL",
        }
    }
}

/// A live position. Created only by a successful entry attempt; quantity and
/// cost basis shrink together on partial reductions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: i64,
    pub cost: f64,
}

/// Immutable record of one exit event. Append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub reason: ExitReason,
    pub quantity: i64,
    pub return_pct: f64,
    pub pnl: f64,
    pub hold_days: i64,
}

/// One equity-curve sample, recorded exactly once per settled day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub total_value: f64,
    pub cash: f64,
    pub open_positions_value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    #[default]
    Pullback,
    Breakout,
}

/// A queued buy signal waiting for a fill. Lives for exactly one calendar
/// week; the replay driver discards unfilled entries at week end.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub symbol: String,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub sizing_fraction: f64,
    pub entry_mode: EntryMode,
    pub earliest_entry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Hold,
    Reduce,
    Sell,
}

/// One line of a weekly plan as produced by a strategy implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: Action,
    pub buy_zone_low: f64,
    pub buy_zone_high: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_target_pct: f64,
    #[serde(default)]
    pub entry_type: EntryMode,
    /// Explicit fill price. Zero in legacy plan files; the driver falls back
    /// to the zone midpoint in that case.
    #[serde(default)]
    pub entry_price: f64,
    /// First allowed fill date (Monday of T+1 for breakout signals).
    #[serde(default)]
    pub earliest_entry_date: Option<NaiveDate>,
}

impl Recommendation {
    /// Explicit entry price, or the buy-zone midpoint for legacy plans
    /// serialized before entry_price existed.
    pub fn effective_entry_price(&self) -> f64 {
        if self.entry_price > 0.0 {
            self.entry_price
        } else {
            (self.buy_zone_low + self.buy_zone_high) / 2.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPlan {
    pub generated_at: String,
    pub strategy_id: String,
    pub strategy_version: String,
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// What the driver tells the strategy about currently held positions, so
/// manual-exit strategies can emit REDUCE/SELL for symbols the engine holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldPosition {
    pub quantity: i64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    pub positions: HashMap<String, HeldPosition>,
}

impl PortfolioState {
    pub fn is_held(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }
}

/// Flat summary record of one simulation run. Field names are stable; they
/// feed summary.json and the sweep table directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub id: String,
    pub tie_breaker: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub initial_cash: f64,
    pub final_value: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub avg_hold_days: f64,
    pub num_trades: usize,
    /// None means unbounded (gross profit with zero gross loss); serialized
    /// as null, matching the report contract.
    pub profit_factor: Option<f64>,
    pub avg_invested_pct: f64,
}

/// Per-field best-minus-worst deltas for a range run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeDiff {
    pub final_value: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub avg_hold_days: f64,
    pub num_trades: i64,
    pub profit_factor: Option<f64>,
    pub avg_invested_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeSummary {
    pub worst: BacktestSummary,
    pub best: BacktestSummary,
    pub best_minus_worst: RangeDiff,
}

/// Everything one simulation run produces.
#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub summary: BacktestSummary,
    pub equity_curve: Vec<EquityPoint>,
    pub closed_trades: Vec<ClosedTrade>,
}
