//! Pre-fetched market data for one simulation run. Fetched once up front
//! (including warmup history for indicator-style strategies), then served
//! read-only to the replay driver and strategies.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};
use log::{info, warn};

use crate::models::Candle;
use crate::provider::PriceProvider;

/// Weeks of history fetched before the simulation start so strategies have
/// enough context on the first Monday.
pub const WARMUP_WEEKS: i64 = 52;

/// Strategy view of history: symbol to candles, strictly before some date.
pub type MarketSlice<'a> = HashMap<&'a str, &'a [Candle]>;

pub struct MarketDataSet {
    series: HashMap<String, Vec<Candle>>,
    date_index: HashMap<String, HashMap<NaiveDate, usize>>,
}

impl MarketDataSet {
    /// Fetch daily history for every symbol in the universe. Symbols that
    /// fail or come back empty are skipped with a warning; the fetch is
    /// fatal only when nothing usable remains.
    pub fn prefetch(
        provider: &dyn PriceProvider,
        symbols: &[String],
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<Self> {
        let history_start = from_date - Duration::weeks(WARMUP_WEEKS);
        info!(
            "fetching daily history for {} symbols ({} to {})",
            symbols.len(),
            history_start,
            to_date
        );

        let mut series = HashMap::new();
        for symbol in symbols {
            let candles = match provider.get_daily_history(symbol, history_start, to_date) {
                Ok(candles) => candles,
                Err(e) => {
                    warn!("get_daily_history failed for {}: {}", symbol, e);
                    continue;
                }
            };
            if candles.is_empty() {
                warn!("no history for {}", symbol);
                continue;
            }
            let mut candles = candles;
            candles.sort_by_key(|c| c.date);
            series.insert(symbol.clone(), candles);
        }

        info!("data fetched for {}/{} symbols", series.len(), symbols.len());
        if series.is_empty() {
            return Err(anyhow!(
                "no usable history for any of the {} universe symbols",
                symbols.len()
            ));
        }

        let date_index = series
            .iter()
            .map(|(symbol, candles)| {
                let index = candles
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.date, i))
                    .collect();
                (symbol.clone(), index)
            })
            .collect();

        Ok(Self { series, date_index })
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// The candle for one symbol on one exact date, if it traded that day.
    pub fn candle_on(&self, symbol: &str, date: NaiveDate) -> Option<&Candle> {
        let index = self.date_index.get(symbol)?.get(&date)?;
        self.series.get(symbol).map(|s| &s[*index])
    }

    /// All history strictly before `cutoff`, per symbol. Symbols with no
    /// candle before the cutoff are omitted entirely. This is the only view
    /// handed to strategies, which enforces the no-lookahead rule.
    pub fn slice_before(&self, cutoff: NaiveDate) -> MarketSlice<'_> {
        let mut slice = HashMap::new();
        for (symbol, candles) in &self.series {
            let end = candles.partition_point(|c| c.date < cutoff);
            if end > 0 {
                slice.insert(symbol.as_str(), &candles[..end]);
            }
        }
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PreloadedProvider;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candle(symbol: &str, d: NaiveDate) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            date: d,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 0.0,
        }
    }

    fn dataset(map: &[(&str, &[NaiveDate])]) -> MarketDataSet {
        let candles = map
            .iter()
            .map(|(symbol, dates)| {
                (
                    symbol.to_string(),
                    dates.iter().map(|d| candle(symbol, *d)).collect(),
                )
            })
            .collect();
        let provider = PreloadedProvider::new(candles);
        let symbols: Vec<String> = map.iter().map(|(s, _)| s.to_string()).collect();
        MarketDataSet::prefetch(&provider, &symbols, date(2024, 1, 1), date(2024, 12, 31)).unwrap()
    }

    #[test]
    fn slice_before_is_strict() {
        let ds = dataset(&[(
            "HPG",
            &[date(2024, 1, 8), date(2024, 1, 9), date(2024, 1, 15)],
        )]);
        let slice = ds.slice_before(date(2024, 1, 15));
        assert_eq!(slice["HPG"].len(), 2);
        assert!(slice["HPG"].iter().all(|c| c.date < date(2024, 1, 15)));
    }

    #[test]
    fn slice_omits_symbols_without_earlier_data() {
        let ds = dataset(&[
            ("HPG", &[date(2024, 1, 8)][..]),
            ("VCB", &[date(2024, 2, 5)][..]),
        ]);
        let slice = ds.slice_before(date(2024, 1, 15));
        assert!(slice.contains_key("HPG"));
        assert!(!slice.contains_key("VCB"));
    }

    #[test]
    fn candle_on_requires_exact_trading_day() {
        let ds = dataset(&[("HPG", &[date(2024, 1, 8), date(2024, 1, 10)])]);
        assert!(ds.candle_on("HPG", date(2024, 1, 8)).is_some());
        assert!(ds.candle_on("HPG", date(2024, 1, 9)).is_none());
        assert!(ds.candle_on("VCB", date(2024, 1, 8)).is_none());
    }

    #[test]
    fn prefetch_skips_missing_symbols_but_keeps_the_rest() {
        let mut candles = HashMap::new();
        candles.insert("HPG".to_string(), vec![candle("HPG", date(2024, 1, 8))]);
        let provider = PreloadedProvider::new(candles);
        let symbols = vec!["HPG".to_string(), "GONE".to_string()];
        let ds =
            MarketDataSet::prefetch(&provider, &symbols, date(2024, 1, 1), date(2024, 12, 31))
                .unwrap();
        assert!(ds.has_symbol("HPG"));
        assert!(!ds.has_symbol("GONE"));
    }

    #[test]
    fn prefetch_fails_when_no_symbol_has_data() {
        let provider = PreloadedProvider::new(HashMap::new());
        let symbols = vec!["HPG".to_string()];
        assert!(
            MarketDataSet::prefetch(&provider, &symbols, date(2024, 1, 1), date(2024, 12, 31))
                .is_err()
        );
    }
}
