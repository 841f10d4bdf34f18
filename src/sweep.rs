//! Parameter sweep: run a grid of simulation settings against one shared
//! pre-fetched dataset, one engine per combination, on worker threads.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::config::{ReplayParams, SimulationConfig, TieBreak};
use crate::dataset::MarketDataSet;
use crate::models::BacktestSummary;
use crate::replay::ReplayDriver;
use crate::strategy::{RiskConfig, Strategy};

#[derive(Debug, Clone, Copy)]
pub struct SweepCombo {
    pub tie_break: TieBreak,
    pub trades_per_week: usize,
}

#[derive(Debug, Clone)]
pub struct SweepResult {
    pub combo: SweepCombo,
    pub summary: BacktestSummary,
}

/// Cartesian product of tie-break policies and weekly entry caps.
pub fn build_grid(tie_breaks: &[TieBreak], trades_per_week: &[usize]) -> Vec<SweepCombo> {
    let mut grid = Vec::with_capacity(tie_breaks.len() * trades_per_week.len());
    for &tie_break in tie_breaks {
        for &cap in trades_per_week {
            grid.push(SweepCombo {
                tie_break,
                trades_per_week: cap,
            });
        }
    }
    grid
}

struct SweepTask {
    index: usize,
    combo: SweepCombo,
}

struct SweepResultMsg {
    index: usize,
    combo: SweepCombo,
    summary: BacktestSummary,
}

/// Run every combination against the shared dataset. Each worker builds an
/// independent engine and driver, so runs never share mutable state.
pub fn run_sweep(
    dataset: Arc<MarketDataSet>,
    strategy: Arc<dyn Strategy>,
    risk: RiskConfig,
    base: &SimulationConfig,
    params: &ReplayParams,
    combos: Vec<SweepCombo>,
) -> Result<Vec<SweepResult>> {
    let total = combos.len();
    if total == 0 {
        return Err(anyhow!("sweep grid is empty"));
    }

    let num_workers = std::cmp::min(total, std::cmp::max(1, num_cpus::get()));
    info!("running {} sweep combinations on {} worker threads", total, num_workers);

    let (task_tx, task_rx): (Sender<SweepTask>, Receiver<SweepTask>) = bounded(total);
    let (result_tx, result_rx): (Sender<SweepResultMsg>, Receiver<SweepResultMsg>) = bounded(total);

    let mut handles = Vec::new();
    for _ in 0..num_workers {
        let rx = task_rx.clone();
        let result_tx = result_tx.clone();
        let dataset = dataset.clone();
        let strategy = strategy.clone();
        let risk = risk.clone();
        let base = base.clone();
        let params = params.clone();

        let handle = thread::spawn(move || {
            while let Ok(task) = rx.recv() {
                let mut config = base.clone();
                config.tie_break = task.combo.tie_break;
                let run_params = params
                    .clone()
                    .with_trades_per_week(task.combo.trades_per_week);
                let driver = ReplayDriver::new(config, run_params);
                let run = driver.run(&dataset, strategy.as_ref(), &risk);
                let message = SweepResultMsg {
                    index: task.index,
                    combo: task.combo,
                    summary: run.summary,
                };
                if result_tx.send(message).is_err() {
                    break;
                }
            }
        });
        handles.push(handle);
    }
    drop(result_tx);

    for (index, combo) in combos.into_iter().enumerate() {
        task_tx.send(SweepTask { index, combo })?;
    }
    drop(task_tx);

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} combos {elapsed_precise}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut results: Vec<Option<SweepResult>> = (0..total).map(|_| None).collect();
    while let Ok(message) = result_rx.recv() {
        results[message.index] = Some(SweepResult {
            combo: message.combo,
            summary: message.summary,
        });
        progress.inc(1);
    }
    progress.finish_and_clear();

    for handle in handles {
        let _ = handle.join();
    }

    let mut results: Vec<SweepResult> = results
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("sweep worker dropped a combination"))?;
    sort_results(&mut results);
    Ok(results)
}

/// Ranking order for the comparison table: CAGR descending, then max
/// drawdown ascending, then profit factor descending with unbounded
/// (no-loss) runs ranked above any finite factor.
pub fn sort_results(results: &mut [SweepResult]) {
    results.sort_by(|a, b| {
        b.summary
            .cagr
            .total_cmp(&a.summary.cagr)
            .then_with(|| a.summary.max_drawdown.total_cmp(&b.summary.max_drawdown))
            .then_with(|| compare_profit_factor(&b.summary, &a.summary))
    });
}

fn compare_profit_factor(a: &BacktestSummary, b: &BacktestSummary) -> Ordering {
    match (a.profit_factor, b.profit_factor) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.total_cmp(&y),
    }
}
