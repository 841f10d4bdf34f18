//! Report writer. Every run produces one timestamped directory containing
//! summary.json plus per-scenario equity_curve and trades CSVs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::info;

use crate::models::{BacktestSummary, ClosedTrade, EquityPoint, RangeSummary};

/// Create a unique timestamped subdirectory under `base_dir`.
pub fn make_output_dir(base_dir: &Path) -> Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let output_dir = base_dir.join(timestamp);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create report directory {}", output_dir.display()))?;
    info!("report directory: {}", output_dir.display());
    Ok(output_dir)
}

fn labelled(stem: &str, label: &str) -> String {
    if label.is_empty() {
        format!("{}.csv", stem)
    } else {
        format!("{}_{}.csv", stem, label)
    }
}

pub fn write_summary(output_dir: &Path, summary: &BacktestSummary) -> Result<()> {
    write_summary_json(output_dir, serde_json::to_string_pretty(summary)?)
}

/// Range runs nest both scenarios plus the best-minus-worst diff under one
/// summary.json, never two files.
pub fn write_range_summary(output_dir: &Path, summary: &RangeSummary) -> Result<()> {
    write_summary_json(output_dir, serde_json::to_string_pretty(summary)?)
}

fn write_summary_json(output_dir: &Path, payload: String) -> Result<()> {
    let path = output_dir.join("summary.json");
    fs::write(&path, payload)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}

pub fn write_equity_curve(
    output_dir: &Path,
    equity_curve: &[EquityPoint],
    label: &str,
) -> Result<()> {
    let path = output_dir.join(labelled("equity_curve", label));
    let mut file = fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writeln!(file, "date,total_value,cash,open_positions_value")?;
    for point in equity_curve {
        writeln!(
            file,
            "{},{},{},{}",
            point.date, point.total_value, point.cash, point.open_positions_value
        )?;
    }
    info!("wrote {} ({} rows)", path.display(), equity_curve.len());
    Ok(())
}

pub fn write_trades(output_dir: &Path, closed_trades: &[ClosedTrade], label: &str) -> Result<()> {
    let path = output_dir.join(labelled("trades", label));
    let mut file = fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writeln!(
        file,
        "symbol,entry_date,entry_price,exit_date,exit_price,reason,return_pct,pnl"
    )?;
    for trade in closed_trades {
        writeln!(
            file,
            "{},{},{},{},{},{},{},{}",
            trade.symbol,
            trade.entry_date,
            trade.entry_price,
            trade.exit_date,
            trade.exit_price,
            trade.reason.as_str(),
            trade.return_pct,
            trade.pnl
        )?;
    }
    info!("wrote {} ({} trades)", path.display(), closed_trades.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{build_range_summary, compute_summary};
    use crate::models::ExitReason;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vnswing-report-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn summary(tie: &str) -> BacktestSummary {
        compute_summary(
            tie,
            1_000_000.0,
            &[EquityPoint {
                date: date(2024, 1, 8),
                total_value: 1_100_000.0,
                cash: 600_000.0,
                open_positions_value: 500_000.0,
            }],
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
        )
    }

    #[test]
    fn summary_json_round_trips() {
        let dir = temp_dir("summary");
        write_summary(&dir, &summary("worst")).unwrap();
        let raw = fs::read_to_string(dir.join("summary.json")).unwrap();
        let parsed: BacktestSummary = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.tie_breaker, "worst");
        assert_eq!(parsed.final_value, 1_100_000.0);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn range_summary_nests_both_scenarios() {
        let dir = temp_dir("range");
        let range = build_range_summary(summary("worst"), summary("best"));
        write_range_summary(&dir, &range).unwrap();
        let raw = fs::read_to_string(dir.join("summary.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("worst").is_some());
        assert!(value.get("best").is_some());
        assert!(value.get("best_minus_worst").is_some());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn equity_curve_csv_has_header_and_labelled_name() {
        let dir = temp_dir("curve");
        let points = [EquityPoint {
            date: date(2024, 1, 8),
            total_value: 1_000_000.0,
            cash: 400_000.0,
            open_positions_value: 600_000.0,
        }];
        write_equity_curve(&dir, &points, "worst").unwrap();
        let raw = fs::read_to_string(dir.join("equity_curve_worst.csv")).unwrap();
        let mut lines = raw.lines();
        assert_eq!(
            lines.next().unwrap(),
            "date,total_value,cash,open_positions_value"
        );
        assert!(lines.next().unwrap().starts_with("2024-01-08,1000000"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn trades_csv_uses_stable_reason_strings() {
        let dir = temp_dir("trades");
        let trades = [ClosedTrade {
            symbol: "HPG".to_string(),
            entry_date: date(2024, 1, 8),
            entry_price: 100.0,
            exit_date: date(2024, 1, 16),
            exit_price: 120.0,
            reason: ExitReason::TakeProfit,
            quantity: 10_000,
            return_pct: 20.0,
            pnl: 200_000.0,
            hold_days: 8,
        }];
        write_trades(&dir, &trades, "").unwrap();
        let raw = fs::read_to_string(dir.join("trades.csv")).unwrap();
        assert!(raw.contains("HPG,2024-01-08,100,2024-01-16,120,TP,20,200000"));
        fs::remove_dir_all(dir).unwrap();
    }
}
