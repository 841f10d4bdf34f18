//! Strategy seam. The replay driver only knows this trait; anything that
//! can turn sliced history into a weekly plan qualifies.

use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::MarketSlice;
use crate::models::{PortfolioState, WeeklyPlan};

/// Risk parameters passed through to the strategy on every plan call.
/// Explicit argument, never ambient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Suggested fraction of equity per position. Advisory input for the
    /// strategy when it composes recommendations; the driver itself only
    /// sizes off what each recommendation carries.
    pub position_target_pct: f64,
    pub max_open_positions: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            position_target_pct: 0.10,
            max_open_positions: 10,
        }
    }
}

pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;
    fn version(&self) -> &str;

    /// Produce the plan for the week starting right after `market_data`
    /// ends. The slice never contains candles from the plan week itself.
    fn generate_weekly_plan(
        &self,
        market_data: &MarketSlice<'_>,
        portfolio: &PortfolioState,
        risk: &RiskConfig,
    ) -> Result<WeeklyPlan>;
}

/// Replays one fixed plan for every simulated week. Backs `--mode plan`,
/// where a hand-written or exported weekly_plan.json is tested against
/// history without any strategy computation.
pub struct StaticPlanStrategy {
    plan: WeeklyPlan,
}

impl StaticPlanStrategy {
    pub fn new(plan: WeeklyPlan) -> Self {
        Self { plan }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read plan file {}: {}", path.display(), e))?;
        let plan: WeeklyPlan = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("failed to parse plan file {}: {}", path.display(), e))?;
        Ok(Self::new(plan))
    }
}

impl Strategy for StaticPlanStrategy {
    fn id(&self) -> &str {
        &self.plan.strategy_id
    }

    fn version(&self) -> &str {
        &self.plan.strategy_version
    }

    fn generate_weekly_plan(
        &self,
        _market_data: &MarketSlice<'_>,
        _portfolio: &PortfolioState,
        _risk: &RiskConfig,
    ) -> Result<WeeklyPlan> {
        Ok(self.plan.clone())
    }
}
