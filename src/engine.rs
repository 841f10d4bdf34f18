//! Position lifecycle engine: entries, exits, daily settlement and the
//! equity curve. One engine instance per simulation run.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::debug;

use crate::config::{ExitMode, SimulationConfig, TieBreak};
use crate::models::{
    Candle, ClosedTrade, EntryMode, EquityPoint, ExitReason, HeldPosition, OpenPosition,
    PortfolioState,
};
use crate::touch::{
    breakout_entry_touched, entry_touched, resolve_same_day, stop_loss_touched,
    take_profit_touched,
};

/// Result of one entry attempt. Skips are expected control flow, not errors;
/// the reason string feeds debug logs only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Filled,
    Skipped { reason: &'static str },
}

impl EntryOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, EntryOutcome::Filled)
    }
}

/// Everything needed to attempt one fill against one candle.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub symbol: String,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Fraction of current equity to deploy. Zero or negative falls back to
    /// the legacy flat order size, then to a skip.
    pub sizing_fraction: f64,
    pub entry_mode: EntryMode,
    /// First allowed fill date (Monday after a breakout confirmation week).
    pub earliest_entry_date: Option<NaiveDate>,
}

pub struct BacktestEngine {
    tie_break: TieBreak,
    exit_mode: ExitMode,
    order_size: Option<f64>,
    pub initial_cash: f64,
    pub cash: f64,
    pub open_positions: Vec<OpenPosition>,
    pub closed_trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    last_close: HashMap<String, f64>,
}

impl BacktestEngine {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            tie_break: config.tie_break,
            exit_mode: config.exit_mode,
            order_size: config.order_size,
            initial_cash: config.initial_cash,
            cash: config.initial_cash,
            open_positions: Vec::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            last_close: HashMap::new(),
        }
    }

    /// Cash plus open positions marked to the last seen close. Positions
    /// whose symbol has no recorded close yet are valued at entry price.
    pub fn current_equity(&self) -> f64 {
        let open_value: f64 = self
            .open_positions
            .iter()
            .map(|p| p.quantity as f64 * self.last_close.get(&p.symbol).copied().unwrap_or(p.entry_price))
            .sum();
        self.cash + open_value
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.open_positions.iter().any(|p| p.symbol == symbol)
    }

    /// Holdings view handed to strategies ahead of plan generation.
    pub fn portfolio_snapshot(&self) -> PortfolioState {
        let positions = self
            .open_positions
            .iter()
            .map(|p| {
                (
                    p.symbol.clone(),
                    HeldPosition {
                        quantity: p.quantity,
                        entry_price: p.entry_price,
                    },
                )
            })
            .collect();
        PortfolioState { positions }
    }

    /// Attempt to open a position against today's candle.
    ///
    /// The last-close cache is updated before any gate runs, so a rejected
    /// attempt still refreshes the mark for equity valuation. No exit check
    /// happens on the entry candle; settle_day skips positions entered today.
    pub fn try_enter(&mut self, request: &EntryRequest, candle: &Candle) -> EntryOutcome {
        self.last_close.insert(request.symbol.clone(), candle.close);

        // T+1 gate for breakout signals. Pullback entries are never gated.
        if request.entry_mode == EntryMode::Breakout {
            if let Some(earliest) = request.earliest_entry_date {
                if candle.date < earliest {
                    return EntryOutcome::Skipped {
                        reason: "before earliest entry date",
                    };
                }
            }
        }

        let triggered = match request.entry_mode {
            EntryMode::Breakout => breakout_entry_touched(candle, request.entry_price),
            EntryMode::Pullback => entry_touched(candle, request.entry_price),
        };
        if !triggered {
            return EntryOutcome::Skipped {
                reason: "entry not touched",
            };
        }

        let trade_value = if request.sizing_fraction > 0.0 {
            self.current_equity() * request.sizing_fraction
        } else if let Some(order_size) = self.order_size {
            order_size
        } else {
            return EntryOutcome::Skipped {
                reason: "no sizing information",
            };
        };

        let quantity = (trade_value / request.entry_price).floor() as i64;
        if quantity <= 0 {
            return EntryOutcome::Skipped {
                reason: "quantity rounds to zero",
            };
        }

        let cost = quantity as f64 * request.entry_price;
        if cost > self.cash {
            return EntryOutcome::Skipped {
                reason: "insufficient cash",
            };
        }

        self.cash -= cost;
        self.open_positions.push(OpenPosition {
            symbol: request.symbol.clone(),
            entry_date: candle.date,
            entry_price: request.entry_price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            quantity,
            cost,
        });
        debug!(
            "filled {} qty {} at {} on {}",
            request.symbol, quantity, request.entry_price, candle.date
        );
        EntryOutcome::Filled
    }

    /// Close an entire position at the given market price. Returns false
    /// when the symbol is not held.
    pub fn force_exit_at_market(
        &mut self,
        symbol: &str,
        current_date: NaiveDate,
        market_price: f64,
        reason: ExitReason,
    ) -> bool {
        let Some(index) = self.open_positions.iter().position(|p| p.symbol == symbol) else {
            return false;
        };
        let position = self.open_positions.remove(index);
        let proceeds = position.quantity as f64 * market_price;
        self.cash += proceeds;
        self.record_exit(&position, current_date, market_price, reason, position.quantity, proceeds - position.cost);
        true
    }

    /// Sell a fraction of a position at market price, shrinking quantity and
    /// cost basis together. Returns false when the symbol is not held or the
    /// sellable quantity floors to zero.
    pub fn reduce_position(
        &mut self,
        symbol: &str,
        current_date: NaiveDate,
        market_price: f64,
        reduction_fraction: f64,
    ) -> bool {
        let Some(index) = self.open_positions.iter().position(|p| p.symbol == symbol) else {
            return false;
        };
        let position = &mut self.open_positions[index];
        let quantity_to_sell =
            ((position.quantity as f64 * reduction_fraction).floor() as i64).min(position.quantity);
        if quantity_to_sell <= 0 {
            return false;
        }

        let proceeds = quantity_to_sell as f64 * market_price;
        let cost_of_sold = position.cost / position.quantity as f64 * quantity_to_sell as f64;
        position.quantity -= quantity_to_sell;
        position.cost -= cost_of_sold;
        let emptied = position.quantity == 0;
        let snapshot = position.clone();
        self.cash += proceeds;
        self.record_exit(
            &snapshot,
            current_date,
            market_price,
            ExitReason::Reduce,
            quantity_to_sell,
            proceeds - cost_of_sold,
        );
        if emptied {
            self.open_positions.remove(index);
        }
        true
    }

    fn record_exit(
        &mut self,
        position: &OpenPosition,
        exit_date: NaiveDate,
        exit_price: f64,
        reason: ExitReason,
        quantity: i64,
        pnl: f64,
    ) {
        let return_pct = (exit_price - position.entry_price) / position.entry_price * 100.0;
        let hold_days = (exit_date - position.entry_date).num_days();
        debug!(
            "exit {} qty {} at {} on {} ({})",
            position.symbol,
            quantity,
            exit_price,
            exit_date,
            reason.as_str()
        );
        self.closed_trades.push(ClosedTrade {
            symbol: position.symbol.clone(),
            entry_date: position.entry_date,
            entry_price: position.entry_price,
            exit_date,
            exit_price,
            reason,
            quantity,
            return_pct,
            pnl,
            hold_days,
        });
    }

    /// End-of-day settlement: stop/target checks (automatic mode only) and
    /// exactly one equity-curve sample, even on days with no candles.
    ///
    /// Positions entered today are skipped, so an entry can never exit on
    /// its own fill day. Positions without a candle today carry over.
    pub fn settle_day(&mut self, candles_by_symbol: &HashMap<String, Candle>, current_date: NaiveDate) {
        for (symbol, candle) in candles_by_symbol {
            self.last_close.insert(symbol.clone(), candle.close);
        }

        if self.exit_mode == ExitMode::TpSlOnly {
            let mut still_open = Vec::with_capacity(self.open_positions.len());
            let positions = std::mem::take(&mut self.open_positions);
            for position in positions {
                if position.entry_date >= current_date {
                    still_open.push(position);
                    continue;
                }
                let Some(candle) = candles_by_symbol.get(&position.symbol) else {
                    still_open.push(position);
                    continue;
                };

                let hit_sl = stop_loss_touched(candle, position.stop_loss);
                let hit_tp = take_profit_touched(candle, position.take_profit);
                let (reason, exit_price) = if hit_sl && hit_tp {
                    resolve_same_day(self.tie_break, position.stop_loss, position.take_profit)
                } else if hit_tp {
                    (ExitReason::TakeProfit, position.take_profit)
                } else if hit_sl {
                    (ExitReason::StopLoss, position.stop_loss)
                } else {
                    still_open.push(position);
                    continue;
                };

                let proceeds = position.quantity as f64 * exit_price;
                self.cash += proceeds;
                self.record_exit(
                    &position,
                    current_date,
                    exit_price,
                    reason,
                    position.quantity,
                    proceeds - position.cost,
                );
            }
            self.open_positions = still_open;
        }

        let open_value: f64 = self
            .open_positions
            .iter()
            .map(|p| p.quantity as f64 * self.last_close.get(&p.symbol).copied().unwrap_or(p.entry_price))
            .sum();
        self.equity_curve.push(EquityPoint {
            date: current_date,
            total_value: self.cash + open_value,
            cash: self.cash,
            open_positions_value: open_value,
        });
    }
}
