use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Assumption used when a single bar touches both stop-loss and take-profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Stop-loss fired first (conservative default).
    Worst,
    /// Take-profit fired first (optimistic bound).
    Best,
}

impl TieBreak {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "worst" => Ok(Self::Worst),
            "best" => Ok(Self::Best),
            other => Err(anyhow!(
                "tie-breaker must be 'worst' or 'best' (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Worst => "worst",
            Self::Best => "best",
        }
    }
}

/// How positions leave the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    /// Automatic stop/target checks during daily settlement.
    TpSlOnly,
    /// BUY/HOLD/SELL plans; exits only through explicit SELL signals.
    Manual3Action,
    /// BUY/HOLD/REDUCE/SELL plans; REDUCE sells half, SELL closes fully.
    Manual4Action,
}

impl ExitMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tpsl_only" => Ok(Self::TpSlOnly),
            "3action" => Ok(Self::Manual3Action),
            "4action" => Ok(Self::Manual4Action),
            other => Err(anyhow!(
                "exit mode must be 'tpsl_only', '3action' or '4action' (value: {})",
                other
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TpSlOnly => "tpsl_only",
            Self::Manual3Action => "3action",
            Self::Manual4Action => "4action",
        }
    }

    pub fn is_manual(self) -> bool {
        !matches!(self, Self::TpSlOnly)
    }
}

/// Whether weekly plans are regenerated or a static plan file is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Plan,
    Generate,
}

impl PlanMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Self::Plan),
            "generate" => Ok(Self::Generate),
            other => Err(anyhow!(
                "mode must be 'plan' or 'generate' (value: {})",
                other
            )),
        }
    }
}

/// Engine-level configuration for one simulation run. Validated before any
/// simulation starts; an engine instance is never shared across runs.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub initial_cash: f64,
    /// Legacy flat order size in currency. None means equity-fraction sizing
    /// from each recommendation's position_target_pct.
    pub order_size: Option<f64>,
    pub tie_break: TieBreak,
    pub exit_mode: ExitMode,
}

impl SimulationConfig {
    pub fn new(initial_cash: f64, tie_break: TieBreak, exit_mode: ExitMode) -> Result<Self> {
        if !initial_cash.is_finite() || initial_cash <= 0.0 {
            return Err(anyhow!(
                "initial cash must be a positive number (value: {})",
                initial_cash
            ));
        }
        Ok(Self {
            initial_cash,
            order_size: None,
            tie_break,
            exit_mode,
        })
    }

    pub fn with_order_size(mut self, order_size: Option<f64>) -> Self {
        self.order_size = order_size.filter(|v| *v > 0.0);
        self
    }
}

/// Driver-level parameters for one replay over a date range.
#[derive(Debug, Clone)]
pub struct ReplayParams {
    pub from_date: chrono::NaiveDate,
    pub to_date: chrono::NaiveDate,
    /// Cap on new pending entries queued per week.
    pub trades_per_week: usize,
    /// Fraction sold on a REDUCE signal in 4-action mode.
    pub reduce_fraction: f64,
}

impl ReplayParams {
    pub fn new(from_date: chrono::NaiveDate, to_date: chrono::NaiveDate) -> Result<Self> {
        if to_date < from_date {
            return Err(anyhow!(
                "to-date {} precedes from-date {}",
                to_date,
                from_date
            ));
        }
        Ok(Self {
            from_date,
            to_date,
            trades_per_week: 4,
            reduce_fraction: 0.5,
        })
    }

    pub fn with_trades_per_week(mut self, cap: usize) -> Self {
        self.trades_per_week = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_break_parse_rejects_unknown_policy() {
        assert!(TieBreak::parse("worst").is_ok());
        assert!(TieBreak::parse(" Best ").is_ok());
        assert!(TieBreak::parse("50_50").is_err());
    }

    #[test]
    fn exit_mode_parse_rejects_unknown_mode() {
        assert_eq!(ExitMode::parse("tpsl_only").unwrap(), ExitMode::TpSlOnly);
        assert_eq!(ExitMode::parse("3action").unwrap(), ExitMode::Manual3Action);
        assert_eq!(ExitMode::parse("4action").unwrap(), ExitMode::Manual4Action);
        assert!(ExitMode::parse("5action").is_err());
    }

    #[test]
    fn simulation_config_requires_positive_cash() {
        assert!(SimulationConfig::new(0.0, TieBreak::Worst, ExitMode::TpSlOnly).is_err());
        assert!(SimulationConfig::new(-1.0, TieBreak::Worst, ExitMode::TpSlOnly).is_err());
        assert!(SimulationConfig::new(1_000_000.0, TieBreak::Worst, ExitMode::TpSlOnly).is_ok());
    }

    #[test]
    fn order_size_filter_drops_non_positive_values() {
        let config = SimulationConfig::new(1_000_000.0, TieBreak::Worst, ExitMode::TpSlOnly)
            .unwrap()
            .with_order_size(Some(0.0));
        assert!(config.order_size.is_none());
    }

    #[test]
    fn replay_params_reject_inverted_range() {
        let from = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let to = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(ReplayParams::new(from, to).is_err());
    }
}
