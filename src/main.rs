use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::info;

use vnswing::config::{ExitMode, PlanMode, ReplayParams, SimulationConfig, TieBreak};
use vnswing::dataset::MarketDataSet;
use vnswing::metrics::build_range_summary;
use vnswing::models::BacktestRun;
use vnswing::provider::PreloadedProvider;
use vnswing::replay::ReplayDriver;
use vnswing::report::{
    make_output_dir, write_equity_curve, write_range_summary, write_summary, write_trades,
};
use vnswing::strategy::{RiskConfig, StaticPlanStrategy, Strategy};
use vnswing::sweep::{build_grid, run_sweep, SweepResult};

#[derive(Parser)]
#[command(name = "vnswing")]
#[command(about = "Weekly swing-trading backtester for Vietnamese equities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a weekly plan over a historical date range
    Backtest {
        /// Start date, inclusive (YYYY-MM-DD)
        #[arg(long = "from")]
        from_date: NaiveDate,
        /// End date, inclusive (YYYY-MM-DD)
        #[arg(long = "to")]
        to_date: NaiveDate,
        /// Starting cash in VND
        #[arg(long, default_value_t = 20_000_000.0)]
        initial_cash: f64,
        /// Fixed VND per trade. Omit to size from each recommendation's
        /// position target
        #[arg(long)]
        order_size: Option<f64>,
        /// Max new positions opened per week
        #[arg(long, default_value_t = 4)]
        trades_per_week: usize,
        /// Same-day SL+TP tie-breaker: worst (SL first) or best (TP first)
        #[arg(long, default_value = "worst")]
        tie_breaker: String,
        /// Exit mode: tpsl_only, 3action or 4action
        #[arg(long, default_value = "tpsl_only")]
        exit_mode: String,
        /// plan: reuse the plan file every week. generate requires embedding
        /// a strategy through the library API
        #[arg(long, default_value = "plan")]
        mode: String,
        /// Weekly plan JSON used in plan mode
        #[arg(long, default_value = "data/weekly_plan.json")]
        plan_file: PathBuf,
        /// JSON dataset file (symbol to candle list)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Run both worst and best tie-breakers and write a range summary
        #[arg(long)]
        run_range: bool,
        /// Base directory for report output
        #[arg(long, default_value = "reports")]
        output: PathBuf,
    },
    /// Run a grid of tie-break and trades-per-week combinations
    Sweep {
        /// Start date, inclusive (YYYY-MM-DD)
        #[arg(long = "from")]
        from_date: NaiveDate,
        /// End date, inclusive (YYYY-MM-DD)
        #[arg(long = "to")]
        to_date: NaiveDate,
        /// Starting cash in VND
        #[arg(long, default_value_t = 20_000_000.0)]
        initial_cash: f64,
        /// Exit mode applied to every combination
        #[arg(long, default_value = "tpsl_only")]
        exit_mode: String,
        /// Weekly entry caps to sweep
        #[arg(long, value_delimiter = ',', default_values_t = vec![2, 4, 6])]
        trades_per_week: Vec<usize>,
        /// Weekly plan JSON replayed for every week
        #[arg(long, default_value = "data/weekly_plan.json")]
        plan_file: PathBuf,
        /// JSON dataset file (symbol to candle list)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Backtest {
            from_date,
            to_date,
            initial_cash,
            order_size,
            trades_per_week,
            tie_breaker,
            exit_mode,
            mode,
            plan_file,
            data_file,
            run_range,
            output,
        } => run_backtest(
            from_date,
            to_date,
            initial_cash,
            order_size,
            trades_per_week,
            &tie_breaker,
            &exit_mode,
            &mode,
            &plan_file,
            &data_file,
            run_range,
            &output,
        ),
        Commands::Sweep {
            from_date,
            to_date,
            initial_cash,
            exit_mode,
            trades_per_week,
            plan_file,
            data_file,
        } => run_sweep_command(
            from_date,
            to_date,
            initial_cash,
            &exit_mode,
            trades_per_week,
            &plan_file,
            &data_file,
        ),
    }
}

fn load_dataset(
    data_file: &PathBuf,
    from_date: NaiveDate,
    to_date: NaiveDate,
) -> Result<MarketDataSet> {
    let provider = PreloadedProvider::from_file(data_file)?;
    let symbols = provider.symbols();
    MarketDataSet::prefetch(&provider, &symbols, from_date, to_date)
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    from_date: NaiveDate,
    to_date: NaiveDate,
    initial_cash: f64,
    order_size: Option<f64>,
    trades_per_week: usize,
    tie_breaker: &str,
    exit_mode: &str,
    mode: &str,
    plan_file: &PathBuf,
    data_file: &PathBuf,
    run_range: bool,
    output: &PathBuf,
) -> Result<()> {
    // All string settings parse before any data is fetched.
    let tie_break = TieBreak::parse(tie_breaker)?;
    let exit_mode = ExitMode::parse(exit_mode)?;
    let plan_mode = PlanMode::parse(mode)?;
    if plan_mode == PlanMode::Generate {
        return Err(anyhow!(
            "generate mode requires embedding a strategy through the library API; use --mode plan"
        ));
    }

    let dataset = load_dataset(data_file, from_date, to_date)?;
    let strategy = StaticPlanStrategy::load(plan_file)?;
    info!("plan mode: loaded {}", plan_file.display());
    let risk = RiskConfig::default();

    let params = ReplayParams::new(from_date, to_date)?.with_trades_per_week(trades_per_week);
    let output_dir = make_output_dir(output)?;

    let run_one = |tie_break: TieBreak| -> Result<BacktestRun> {
        info!("--- running backtest: tie_break={} ---", tie_break.label());
        let config = SimulationConfig::new(initial_cash, tie_break, exit_mode)?
            .with_order_size(order_size);
        let driver = ReplayDriver::new(config, params.clone());
        Ok(driver.run(&dataset, &strategy, &risk))
    };

    if run_range {
        let worst = run_one(TieBreak::Worst)?;
        let best = run_one(TieBreak::Best)?;
        write_equity_curve(&output_dir, &worst.equity_curve, "worst")?;
        write_trades(&output_dir, &worst.closed_trades, "worst")?;
        write_equity_curve(&output_dir, &best.equity_curve, "best")?;
        write_trades(&output_dir, &best.closed_trades, "best")?;
        let range = build_range_summary(worst.summary, best.summary);
        write_range_summary(&output_dir, &range)?;
    } else {
        let run = run_one(tie_break)?;
        write_equity_curve(&output_dir, &run.equity_curve, "")?;
        write_trades(&output_dir, &run.closed_trades, "")?;
        write_summary(&output_dir, &run.summary)?;
    }

    println!("Backtest complete. Results written to: {}", output_dir.display());
    Ok(())
}

fn run_sweep_command(
    from_date: NaiveDate,
    to_date: NaiveDate,
    initial_cash: f64,
    exit_mode: &str,
    trades_per_week: Vec<usize>,
    plan_file: &PathBuf,
    data_file: &PathBuf,
) -> Result<()> {
    let exit_mode = ExitMode::parse(exit_mode)?;
    let dataset = Arc::new(load_dataset(data_file, from_date, to_date)?);
    let strategy: Arc<dyn Strategy> = Arc::new(StaticPlanStrategy::load(plan_file)?);

    let base = SimulationConfig::new(initial_cash, TieBreak::Worst, exit_mode)?;
    let params = ReplayParams::new(from_date, to_date)?;
    let combos = build_grid(&[TieBreak::Worst, TieBreak::Best], &trades_per_week);

    let results = run_sweep(
        dataset,
        strategy,
        RiskConfig::default(),
        &base,
        &params,
        combos,
    )?;
    print_sweep_table(&results);
    Ok(())
}

fn print_sweep_table(results: &[SweepResult]) {
    println!(
        "{:<6} {:>6} {:>10} {:>8} {:>9} {:>8} {:>8}",
        "tie", "week", "cagr", "max_dd", "win_rate", "trades", "pf"
    );
    for result in results {
        let profit_factor = match result.summary.profit_factor {
            Some(pf) => format!("{:.2}", pf),
            None => "inf".to_string(),
        };
        println!(
            "{:<6} {:>6} {:>9.2}% {:>7.2}% {:>8.2}% {:>8} {:>8}",
            result.combo.tie_break.label(),
            result.combo.trades_per_week,
            result.summary.cagr * 100.0,
            result.summary.max_drawdown * 100.0,
            result.summary.win_rate * 100.0,
            result.summary.num_trades,
            profit_factor
        );
    }
}
