//! Price data sources. Simulation code only talks to the trait; concrete
//! implementations serve preloaded data or delegate along a fallback chain.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::warn;

use crate::models::Candle;

pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Daily candles for one symbol over an inclusive date range, sorted
    /// ascending by date.
    fn get_daily_history(&self, symbol: &str, from: NaiveDate, to: NaiveDate)
        -> Result<Vec<Candle>>;

    /// Latest known close per symbol. Symbols with no data are absent from
    /// the map, not errors.
    fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>>;
}

/// Serves a dataset held entirely in memory. Used by the sweep (fetch once,
/// share across workers), by the CLI after loading a JSON dataset file, and
/// by tests.
pub struct PreloadedProvider {
    candles: HashMap<String, Vec<Candle>>,
}

impl PreloadedProvider {
    pub fn new(mut candles: HashMap<String, Vec<Candle>>) -> Self {
        for series in candles.values_mut() {
            series.sort_by_key(|c| c.date);
        }
        Self { candles }
    }

    /// Load a `symbol → [candle]` JSON map from disk.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read dataset file {}: {}", path.display(), e))?;
        let candles: HashMap<String, Vec<Candle>> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("failed to parse dataset file {}: {}", path.display(), e))?;
        Ok(Self::new(candles))
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.candles.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl PriceProvider for PreloadedProvider {
    fn name(&self) -> &str {
        "preloaded"
    }

    fn get_daily_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let series = self
            .candles
            .get(symbol)
            .ok_or_else(|| anyhow!("no data for symbol {}", symbol))?;
        Ok(series
            .iter()
            .filter(|c| c.date >= from && c.date <= to)
            .cloned()
            .collect())
    }

    fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            if let Some(last) = self.candles.get(symbol).and_then(|s| s.last()) {
                prices.insert(symbol.clone(), last.close);
            }
        }
        Ok(prices)
    }
}

/// Outcome of one provider attempt inside a chain fetch. Built once per
/// call and returned to the caller; nothing in the chain is mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHealth {
    pub provider: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Ordered fallback chain over providers. Each fetch walks the list until
/// one succeeds with non-empty data and reports every attempt it made.
pub struct ChainProvider {
    providers: Vec<Box<dyn PriceProvider>>,
}

impl ChainProvider {
    pub fn new(providers: Vec<Box<dyn PriceProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(anyhow!("provider chain requires at least one provider"));
        }
        Ok(Self { providers })
    }

    /// Fetch history plus the attempt record for each provider consulted.
    pub fn history_with_health(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> (Result<Vec<Candle>>, Vec<ProviderHealth>) {
        let mut attempts = Vec::new();
        for provider in &self.providers {
            match provider.get_daily_history(symbol, from, to) {
                Ok(candles) if !candles.is_empty() => {
                    attempts.push(ProviderHealth {
                        provider: provider.name().to_string(),
                        succeeded: true,
                        error: None,
                    });
                    return (Ok(candles), attempts);
                }
                Ok(_) => {
                    attempts.push(ProviderHealth {
                        provider: provider.name().to_string(),
                        succeeded: false,
                        error: Some("empty history".to_string()),
                    });
                }
                Err(e) => {
                    warn!("provider {} failed for {}: {}", provider.name(), symbol, e);
                    attempts.push(ProviderHealth {
                        provider: provider.name().to_string(),
                        succeeded: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        (
            Err(anyhow!("all providers failed for symbol {}", symbol)),
            attempts,
        )
    }
}

impl PriceProvider for ChainProvider {
    fn name(&self) -> &str {
        "chain"
    }

    fn get_daily_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        self.history_with_health(symbol, from, to).0
    }

    fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        for provider in &self.providers {
            match provider.get_last_prices(symbols) {
                Ok(prices) if !prices.is_empty() => return Ok(prices),
                Ok(_) => continue,
                Err(e) => {
                    warn!("provider {} failed for last prices: {}", provider.name(), e);
                }
            }
        }
        Ok(HashMap::new())
    }
}
