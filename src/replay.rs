//! Weekly replay driver: walks the Monday grid over the requested range,
//! asks the strategy for a plan from pre-Monday data only, queues entries
//! and manual exit orders, then simulates Monday through Friday day by day.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use log::{debug, warn};

use crate::config::{ExitMode, ReplayParams, SimulationConfig};
use crate::dataset::MarketDataSet;
use crate::engine::{BacktestEngine, EntryRequest};
use crate::metrics::compute_summary;
use crate::models::{Action, BacktestRun, Candle, ExitReason, PendingEntry};
use crate::strategy::{RiskConfig, Strategy};

/// Mondays of every calendar week that overlaps the inclusive range. A
/// mid-week start date still yields that week's Monday, so the first week
/// is simulated from the start date onward.
pub fn week_starts(from_date: NaiveDate, to_date: NaiveDate) -> Vec<NaiveDate> {
    let first_monday =
        from_date - Duration::days(from_date.weekday().num_days_from_monday() as i64);
    let mut weeks = Vec::new();
    let mut current = first_monday;
    while current <= to_date {
        weeks.push(current);
        current += Duration::weeks(1);
    }
    weeks
}

/// A REDUCE/SELL recommendation for a held symbol, waiting for the next
/// candle of that symbol. Applied at that candle's close.
#[derive(Debug, Clone)]
struct ExitOrder {
    symbol: String,
    action: Action,
}

pub struct ReplayDriver {
    config: SimulationConfig,
    params: ReplayParams,
}

impl ReplayDriver {
    pub fn new(config: SimulationConfig, params: ReplayParams) -> Self {
        Self { config, params }
    }

    pub fn run(
        &self,
        dataset: &MarketDataSet,
        strategy: &dyn Strategy,
        risk: &RiskConfig,
    ) -> BacktestRun {
        let mut engine = BacktestEngine::new(&self.config);
        let weeks = week_starts(self.params.from_date, self.params.to_date);
        debug!(
            "simulating {} weeks ({} to {}) tie_break={}",
            weeks.len(),
            self.params.from_date,
            self.params.to_date,
            self.config.tie_break.label()
        );

        // Unfilled entries expire at week end; a fresh plan arrives Monday.
        let mut pending_entries: Vec<PendingEntry> = Vec::new();

        for (week_index, week_start) in weeks.iter().copied().enumerate() {
            let week_end = week_start + Duration::days(4);

            let slice = dataset.slice_before(week_start);
            if slice.is_empty() {
                warn!("no market data before {}, skipping week", week_start);
                pending_entries.clear();
                continue;
            }

            let portfolio = engine.portfolio_snapshot();
            let plan = match strategy.generate_weekly_plan(&slice, &portfolio, risk) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!("plan generation failed for week {}: {}", week_start, e);
                    pending_entries.clear();
                    continue;
                }
            };
            debug!(
                "week {} ({}): {} recommendations",
                week_index + 1,
                week_start,
                plan.recommendations.len()
            );

            let mut exit_orders: Vec<ExitOrder> = Vec::new();
            if self.config.exit_mode.is_manual() {
                for rec in &plan.recommendations {
                    if matches!(rec.action, Action::Reduce | Action::Sell)
                        && engine.is_open(&rec.symbol)
                    {
                        exit_orders.push(ExitOrder {
                            symbol: rec.symbol.clone(),
                            action: rec.action,
                        });
                    }
                }
            }

            let mut queued_this_week = 0usize;
            for rec in &plan.recommendations {
                if queued_this_week >= self.params.trades_per_week {
                    break;
                }
                if rec.action != Action::Buy
                    || engine.is_open(&rec.symbol)
                    || pending_entries.iter().any(|p| p.symbol == rec.symbol)
                    || !dataset.has_symbol(&rec.symbol)
                    || rec.buy_zone_low <= 0.0
                    || rec.stop_loss <= 0.0
                    || rec.take_profit <= 0.0
                {
                    continue;
                }
                pending_entries.push(PendingEntry {
                    symbol: rec.symbol.clone(),
                    entry_price: rec.effective_entry_price(),
                    stop_loss: rec.stop_loss,
                    take_profit: rec.take_profit,
                    sizing_fraction: rec.position_target_pct,
                    entry_mode: rec.entry_type,
                    earliest_entry_date: rec.earliest_entry_date,
                });
                queued_this_week += 1;
            }

            let sim_start = week_start.max(self.params.from_date);
            let sim_end = week_end.min(self.params.to_date);
            let mut current_day = sim_start;
            while current_day <= sim_end {
                if matches!(current_day.weekday(), Weekday::Sat | Weekday::Sun) {
                    current_day += Duration::days(1);
                    continue;
                }

                let candles_today = self.candles_today(
                    dataset,
                    &engine,
                    &pending_entries,
                    &exit_orders,
                    current_day,
                );

                self.apply_exit_orders(&mut engine, &mut exit_orders, &candles_today, current_day);

                pending_entries.retain(|pending| {
                    let Some(candle) = candles_today.get(&pending.symbol) else {
                        return true;
                    };
                    let request = EntryRequest {
                        symbol: pending.symbol.clone(),
                        entry_price: pending.entry_price,
                        stop_loss: pending.stop_loss,
                        take_profit: pending.take_profit,
                        sizing_fraction: pending.sizing_fraction,
                        entry_mode: pending.entry_mode,
                        earliest_entry_date: pending.earliest_entry_date,
                    };
                    !engine.try_enter(&request, candle).is_filled()
                });

                engine.settle_day(&candles_today, current_day);
                current_day += Duration::days(1);
            }

            pending_entries.clear();
        }

        let summary = compute_summary(
            self.config.tie_break.label(),
            self.config.initial_cash,
            &engine.equity_curve,
            &engine.closed_trades,
            self.params.from_date,
            self.params.to_date,
        );
        BacktestRun {
            summary,
            equity_curve: engine.equity_curve,
            closed_trades: engine.closed_trades,
        }
    }

    /// Candles for every symbol the engine cares about today: pending
    /// entries, open positions and queued exit orders.
    fn candles_today(
        &self,
        dataset: &MarketDataSet,
        engine: &BacktestEngine,
        pending_entries: &[PendingEntry],
        exit_orders: &[ExitOrder],
        current_day: NaiveDate,
    ) -> HashMap<String, Candle> {
        let mut candles = HashMap::new();
        let symbols = pending_entries
            .iter()
            .map(|p| p.symbol.as_str())
            .chain(engine.open_positions.iter().map(|p| p.symbol.as_str()))
            .chain(exit_orders.iter().map(|o| o.symbol.as_str()));
        for symbol in symbols {
            if candles.contains_key(symbol) {
                continue;
            }
            if let Some(candle) = dataset.candle_on(symbol, current_day) {
                candles.insert(symbol.to_string(), candle.clone());
            }
        }
        candles
    }

    /// Apply queued REDUCE/SELL orders against today's closes. In 3-action
    /// mode REDUCE escalates to a full exit; in 4-action mode it sells the
    /// configured fraction. Orders without a candle today wait.
    fn apply_exit_orders(
        &self,
        engine: &mut BacktestEngine,
        exit_orders: &mut Vec<ExitOrder>,
        candles_today: &HashMap<String, Candle>,
        current_day: NaiveDate,
    ) {
        exit_orders.retain(|order| {
            let Some(candle) = candles_today.get(&order.symbol) else {
                return true;
            };
            let applied = match order.action {
                Action::Reduce if self.config.exit_mode == ExitMode::Manual4Action => {
                    engine.reduce_position(
                        &order.symbol,
                        current_day,
                        candle.close,
                        self.params.reduce_fraction,
                    )
                }
                // 3-action has no partial sells; REDUCE means get out.
                Action::Reduce | Action::Sell => engine.force_exit_at_market(
                    &order.symbol,
                    current_day,
                    candle.close,
                    ExitReason::Sell,
                ),
                _ => false,
            };
            if !applied {
                debug!("exit order for {} had no effect", order.symbol);
            }
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExitMode, TieBreak};
    use crate::models::{EntryMode, PortfolioState, Recommendation, WeeklyPlan};
    use crate::provider::PreloadedProvider;
    use anyhow::Result;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn week_starts_begin_on_monday_of_first_week() {
        // 2024-01-01 is a Monday.
        let weeks = week_starts(date(2024, 1, 1), date(2024, 1, 20));
        assert_eq!(weeks, vec![date(2024, 1, 1), date(2024, 1, 8), date(2024, 1, 15)]);
    }

    #[test]
    fn midweek_start_includes_that_weeks_monday() {
        // Wednesday 2024-01-03 belongs to the week of Monday 2024-01-01.
        let weeks = week_starts(date(2024, 1, 3), date(2024, 1, 10));
        assert_eq!(weeks[0], date(2024, 1, 1));
        assert_eq!(weeks.len(), 2);
    }

    #[test]
    fn inverted_range_yields_no_weeks() {
        assert!(week_starts(date(2024, 2, 1), date(2024, 1, 1)).is_empty());
    }

    #[test]
    fn weeks_are_seven_days_apart() {
        let weeks = week_starts(date(2024, 3, 7), date(2024, 5, 1));
        for pair in weeks.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::weeks(1));
        }
    }

    // -- driver scenarios ---------------------------------------------------

    fn candle(symbol: &str, d: NaiveDate, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            date: d,
            open: close,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    fn weekdays(from: NaiveDate, count: usize) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        let mut current = from;
        while days.len() < count {
            if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                days.push(current);
            }
            current += Duration::days(1);
        }
        days
    }

    fn dataset_from(candles: HashMap<String, Vec<Candle>>) -> MarketDataSet {
        let symbols: Vec<String> = candles.keys().cloned().collect();
        let provider = PreloadedProvider::new(candles);
        MarketDataSet::prefetch(&provider, &symbols, date(2024, 1, 1), date(2024, 12, 31)).unwrap()
    }

    struct FixedPlanStrategy {
        recommendations: Vec<Recommendation>,
    }

    impl Strategy for FixedPlanStrategy {
        fn id(&self) -> &str {
            "fixed"
        }

        fn version(&self) -> &str {
            "1"
        }

        fn generate_weekly_plan(
            &self,
            _market_data: &crate::dataset::MarketSlice<'_>,
            _portfolio: &PortfolioState,
            _risk: &RiskConfig,
        ) -> Result<WeeklyPlan> {
            Ok(WeeklyPlan {
                generated_at: "2024-01-05T00:00:00Z".to_string(),
                strategy_id: "fixed".to_string(),
                strategy_version: "1".to_string(),
                recommendations: self.recommendations.clone(),
                notes: vec![],
            })
        }
    }

    fn buy(symbol: &str, entry: f64, sl: f64, tp: f64) -> Recommendation {
        Recommendation {
            symbol: symbol.to_string(),
            action: Action::Buy,
            buy_zone_low: entry - 5.0,
            buy_zone_high: entry + 5.0,
            stop_loss: sl,
            take_profit: tp,
            position_target_pct: 0.10,
            entry_type: EntryMode::Pullback,
            entry_price: entry,
            earliest_entry_date: None,
        }
    }

    fn driver(tie: TieBreak, exit_mode: ExitMode, from: NaiveDate, to: NaiveDate) -> ReplayDriver {
        let config = SimulationConfig::new(10_000_000.0, tie, exit_mode).unwrap();
        let params = ReplayParams::new(from, to).unwrap();
        ReplayDriver::new(config, params)
    }

    #[test]
    fn pending_entry_expires_at_week_end() {
        // Week 1 never touches the entry; week 2 would, but the plan also
        // re-recommends the symbol, so a fill in week 2 proves requeueing,
        // not carryover. Use a plan that only recommends in week 1 via
        // a one-shot strategy.
        struct OneShot {
            used: std::sync::atomic::AtomicBool,
        }
        impl Strategy for OneShot {
            fn id(&self) -> &str {
                "oneshot"
            }
            fn version(&self) -> &str {
                "1"
            }
            fn generate_weekly_plan(
                &self,
                _m: &crate::dataset::MarketSlice<'_>,
                _p: &PortfolioState,
                _r: &RiskConfig,
            ) -> Result<WeeklyPlan> {
                let recommendations = if self.used.swap(true, std::sync::atomic::Ordering::SeqCst)
                {
                    vec![]
                } else {
                    vec![buy("HPG", 100.0, 90.0, 120.0)]
                };
                Ok(WeeklyPlan {
                    generated_at: String::new(),
                    strategy_id: "oneshot".to_string(),
                    strategy_version: "1".to_string(),
                    recommendations,
                    notes: vec![],
                })
            }
        }

        // History so week 1 has a slice; prices far above entry in week 1,
        // touching entry only in week 2.
        let mut candles = vec![candle("HPG", date(2024, 1, 5), 110.0, 115.0, 112.0)];
        for d in weekdays(date(2024, 1, 8), 5) {
            candles.push(candle("HPG", d, 110.0, 115.0, 112.0));
        }
        for d in weekdays(date(2024, 1, 15), 5) {
            candles.push(candle("HPG", d, 98.0, 103.0, 101.0));
        }
        let mut map = HashMap::new();
        map.insert("HPG".to_string(), candles);
        let ds = dataset_from(map);

        let strategy = OneShot {
            used: std::sync::atomic::AtomicBool::new(false),
        };
        let run = driver(TieBreak::Worst, ExitMode::TpSlOnly, date(2024, 1, 8), date(2024, 1, 19))
            .run(&ds, &strategy, &RiskConfig::default());

        // The entry from week 1 expired; week 2 had no recommendation.
        assert_eq!(run.closed_trades.len(), 0);
        assert_eq!(run.summary.num_trades, 0);
        assert!((run.summary.final_value - 10_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn trades_per_week_caps_new_entries() {
        let symbols = ["AAA", "BBB", "CCC", "DDD", "EEE"];
        let mut map = HashMap::new();
        for symbol in symbols {
            let mut series = vec![candle(symbol, date(2024, 1, 5), 98.0, 103.0, 101.0)];
            for d in weekdays(date(2024, 1, 8), 5) {
                series.push(candle(symbol, d, 98.0, 103.0, 101.0));
            }
            map.insert(symbol.to_string(), series);
        }
        let ds = dataset_from(map);

        let strategy = FixedPlanStrategy {
            recommendations: symbols.iter().map(|s| buy(s, 100.0, 90.0, 120.0)).collect(),
        };
        let config =
            SimulationConfig::new(10_000_000.0, TieBreak::Worst, ExitMode::TpSlOnly).unwrap();
        let params = ReplayParams::new(date(2024, 1, 8), date(2024, 1, 12))
            .unwrap()
            .with_trades_per_week(2);
        let run = ReplayDriver::new(config, params).run(&ds, &strategy, &RiskConfig::default());

        // All five touch their entry, but only two were queued. First fill
        // takes 10% of 10M; the second sizes off equity marked at 101.
        assert!(run.summary.avg_invested_pct > 0.0);
        let final_cash = run.equity_curve.last().unwrap().cash;
        assert!((final_cash - (10_000_000.0 - 1_000_000.0 - 1_001_000.0)).abs() < 1e-6);
        assert!((run.equity_curve.last().unwrap().open_positions_value - 20_010.0 * 101.0).abs() < 1e-6);
    }

    #[test]
    fn manual_sell_signal_closes_position_at_close() {
        let mut series = vec![candle("HPG", date(2024, 1, 5), 98.0, 103.0, 101.0)];
        for d in weekdays(date(2024, 1, 8), 5) {
            series.push(candle("HPG", d, 98.0, 103.0, 101.0));
        }
        for d in weekdays(date(2024, 1, 15), 5) {
            series.push(candle("HPG", d, 108.0, 112.0, 110.0));
        }
        let mut map = HashMap::new();
        map.insert("HPG".to_string(), series);
        let ds = dataset_from(map);

        struct BuyThenSell;
        impl Strategy for BuyThenSell {
            fn id(&self) -> &str {
                "buy-then-sell"
            }
            fn version(&self) -> &str {
                "1"
            }
            fn generate_weekly_plan(
                &self,
                _m: &crate::dataset::MarketSlice<'_>,
                portfolio: &PortfolioState,
                _r: &RiskConfig,
            ) -> Result<WeeklyPlan> {
                let mut rec = buy("HPG", 100.0, 90.0, 120.0);
                if portfolio.is_held("HPG") {
                    rec.action = Action::Sell;
                }
                Ok(WeeklyPlan {
                    generated_at: String::new(),
                    strategy_id: "buy-then-sell".to_string(),
                    strategy_version: "1".to_string(),
                    recommendations: vec![rec],
                    notes: vec![],
                })
            }
        }

        let run = driver(
            TieBreak::Worst,
            ExitMode::Manual3Action,
            date(2024, 1, 8),
            date(2024, 1, 19),
        )
        .run(&ds, &BuyThenSell, &RiskConfig::default());

        assert_eq!(run.closed_trades.len(), 1);
        let trade = &run.closed_trades[0];
        assert_eq!(trade.reason, ExitReason::Sell);
        // Sold at Monday's close of week 2.
        assert_eq!(trade.exit_date, date(2024, 1, 15));
        assert_eq!(trade.exit_price, 110.0);
    }

    #[test]
    fn manual4_reduce_sells_half() {
        let mut series = vec![candle("HPG", date(2024, 1, 5), 98.0, 103.0, 101.0)];
        for d in weekdays(date(2024, 1, 8), 5) {
            series.push(candle("HPG", d, 98.0, 103.0, 101.0));
        }
        for d in weekdays(date(2024, 1, 15), 5) {
            series.push(candle("HPG", d, 108.0, 112.0, 110.0));
        }
        let mut map = HashMap::new();
        map.insert("HPG".to_string(), series);
        let ds = dataset_from(map);

        struct BuyThenReduce;
        impl Strategy for BuyThenReduce {
            fn id(&self) -> &str {
                "buy-then-reduce"
            }
            fn version(&self) -> &str {
                "1"
            }
            fn generate_weekly_plan(
                &self,
                _m: &crate::dataset::MarketSlice<'_>,
                portfolio: &PortfolioState,
                _r: &RiskConfig,
            ) -> Result<WeeklyPlan> {
                let mut rec = buy("HPG", 100.0, 90.0, 120.0);
                if portfolio.is_held("HPG") {
                    rec.action = Action::Reduce;
                }
                Ok(WeeklyPlan {
                    generated_at: String::new(),
                    strategy_id: "buy-then-reduce".to_string(),
                    strategy_version: "1".to_string(),
                    recommendations: vec![rec],
                    notes: vec![],
                })
            }
        }

        let run = driver(
            TieBreak::Worst,
            ExitMode::Manual4Action,
            date(2024, 1, 8),
            date(2024, 1, 19),
        )
        .run(&ds, &BuyThenReduce, &RiskConfig::default());

        assert_eq!(run.closed_trades.len(), 1);
        let trade = &run.closed_trades[0];
        assert_eq!(trade.reason, ExitReason::Reduce);
        assert_eq!(trade.quantity, 5_000);
        // Half stays on the book.
        assert_eq!(
            run.equity_curve.last().unwrap().open_positions_value,
            5_000.0 * 110.0
        );
    }

    #[test]
    fn failed_plan_week_is_skipped_and_recovery_continues() {
        struct FlakyStrategy {
            calls: std::sync::atomic::AtomicUsize,
        }
        impl Strategy for FlakyStrategy {
            fn id(&self) -> &str {
                "flaky"
            }
            fn version(&self) -> &str {
                "1"
            }
            fn generate_weekly_plan(
                &self,
                _m: &crate::dataset::MarketSlice<'_>,
                _p: &PortfolioState,
                _r: &RiskConfig,
            ) -> Result<WeeklyPlan> {
                let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if call == 0 {
                    anyhow::bail!("upstream data gap");
                }
                Ok(WeeklyPlan {
                    generated_at: String::new(),
                    strategy_id: "flaky".to_string(),
                    strategy_version: "1".to_string(),
                    recommendations: vec![buy("HPG", 100.0, 90.0, 120.0)],
                    notes: vec![],
                })
            }
        }

        let mut series = vec![candle("HPG", date(2024, 1, 5), 98.0, 103.0, 101.0)];
        for d in weekdays(date(2024, 1, 8), 10) {
            series.push(candle("HPG", d, 98.0, 103.0, 101.0));
        }
        let mut map = HashMap::new();
        map.insert("HPG".to_string(), series);
        let ds = dataset_from(map);

        let strategy = FlakyStrategy {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let run = driver(TieBreak::Worst, ExitMode::TpSlOnly, date(2024, 1, 8), date(2024, 1, 19))
            .run(&ds, &strategy, &RiskConfig::default());

        // Week 1 failed, week 2 filled.
        assert_eq!(run.equity_curve.last().unwrap().open_positions_value, 10_000.0 * 101.0);
    }

    #[test]
    fn equity_curve_covers_only_trading_days_in_range() {
        let mut series = vec![candle("HPG", date(2024, 1, 5), 98.0, 103.0, 101.0)];
        for d in weekdays(date(2024, 1, 8), 5) {
            series.push(candle("HPG", d, 98.0, 103.0, 101.0));
        }
        let mut map = HashMap::new();
        map.insert("HPG".to_string(), series);
        let ds = dataset_from(map);

        let strategy = FixedPlanStrategy {
            recommendations: vec![],
        };
        // Wednesday to Friday of one week.
        let run = driver(TieBreak::Worst, ExitMode::TpSlOnly, date(2024, 1, 10), date(2024, 1, 12))
            .run(&ds, &strategy, &RiskConfig::default());
        assert_eq!(run.equity_curve.len(), 3);
        assert_eq!(run.equity_curve[0].date, date(2024, 1, 10));
        assert_eq!(run.equity_curve[2].date, date(2024, 1, 12));
    }
}
