//! Freelance Auto-Bidder CLI
//!
//! With no arguments, runs the poll loop until Ctrl-C or the stop file.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use freelance_bidder::executor::BidSubmitter;
use freelance_bidder::notifier::{notifier_from_config, TelegramBot};
use freelance_bidder::services::{
    spawn_shutdown_watcher, BidPipeline, MessageDrafter, PollLoop, PollLoopConfig,
};
use freelance_bidder::types::{BidRecord, BidStatus};
use freelance_bidder::{Config, Database, FreelancerClient, GeminiClient, StaticRateTable};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "autobidder")]
#[command(about = "Bids on new freelance projects with AI-drafted pitches")]
#[command(version)]
struct Cli {
    /// Print recent bid records and exit
    #[arg(long, conflicts_with = "cost")]
    view: bool,

    /// Record the outsourcing cost of a won project and exit
    #[arg(long, num_args = 2, value_names = ["PROJECT_ID", "COST"])]
    cost: Option<Vec<String>>,

    /// Records shown by --view
    #[arg(long, default_value = "20")]
    limit: i64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    if cli.view {
        init_console_logging(cli.verbose);
        return view_bids(&config, cli.limit).await;
    }
    if let Some(args) = &cli.cost {
        init_console_logging(cli.verbose);
        return record_cost(&config, args).await;
    }

    // Dropping the guard flushes the file writer, so it outlives the bidder
    let _log_guard = init_bidder_logging(cli.verbose, &config.log_file)?;
    run_bidder(config).await
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn init_console_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false)
        .compact()
        .init();
}

/// Appender that writes to exactly `log_file`, creating it if missing
fn log_file_appender(log_file: &str) -> Result<RollingFileAppender> {
    let path = Path::new(log_file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid log file path {}", log_file))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", log_file))
}

/// Log to stdout and append to the log file the control service tails
fn init_bidder_logging(verbose: bool, log_file: &str) -> Result<WorkerGuard> {
    let appender = log_file_appender(log_file)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(fmt::layer().with_target(false).compact())
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    Ok(guard)
}

async fn run_bidder(config: Config) -> Result<()> {
    let (_, bidder_id) = config.require_bidding_credentials()?;

    let db = Arc::new(Database::new(&config.database_path).await?);
    let client = FreelancerClient::from_config(&config)?;
    let generator = GeminiClient::from_config(&config)?;
    let notifier = notifier_from_config(&config);

    info!("Bidder ID: {}", bidder_id);
    info!("Model: {}", config.gemini_model);
    info!(
        "Telegram notifications: {}",
        if config.telegram_enabled() { "ENABLED" } else { "DISABLED" }
    );

    let drafter = MessageDrafter::new(db.clone(), Arc::new(generator));
    let submitter = BidSubmitter::new(Arc::new(client.clone()), db.clone(), notifier, bidder_id);
    let pipeline = Arc::new(BidPipeline::new(drafter, submitter));

    let stop_file = PathBuf::from(&config.stop_file);
    let loop_config = PollLoopConfig {
        fetch_limit: config.fetch_limit,
        stop_file: Some(stop_file.clone()),
        ..Default::default()
    };

    let mut poll_loop = PollLoop::new(
        loop_config,
        Arc::new(client),
        pipeline,
        db,
        Arc::new(StaticRateTable::default()),
    );

    let shutdown = CancellationToken::new();
    spawn_shutdown_watcher(Some(stop_file), shutdown.clone());

    poll_loop.run(shutdown).await
}

async fn view_bids(config: &Config, limit: i64) -> Result<()> {
    let db = Database::new(&config.database_path).await?;
    let bids = db.list_bids(Some(limit)).await?;

    println!("\n{}", "=".repeat(70));
    println!("  RECENT BIDS ({})", bids.len());
    println!("{}\n", "=".repeat(70));

    if bids.is_empty() {
        println!("No bids recorded yet.");
        return Ok(());
    }

    for bid in &bids {
        print_bid(bid);
    }
    Ok(())
}

fn print_bid(bid: &BidRecord) {
    let status = match bid.status {
        BidStatus::Won => bid.status.as_str().to_uppercase().green().bold(),
        BidStatus::Applied => bid.status.as_str().to_uppercase().yellow(),
    };
    let applied = bid
        .applied_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{} {} | {} {} | {} | {}",
        format!("[{}]", bid.project_id).cyan(),
        status,
        bid.bid_amount,
        bid.currency_code,
        applied,
        bid.title
    );

    if let Some(profit) = bid.profit {
        let cost = bid.outsource_cost.unwrap_or_default();
        let profit_text = format!("{}", profit);
        let profit_text = if profit >= Decimal::ZERO {
            profit_text.green()
        } else {
            profit_text.red()
        };
        println!("    cost {} | profit {}", cost, profit_text);
    }
    if bid.reply_count > 0 {
        println!("    replies: {}", bid.reply_count);
    }
}

async fn record_cost(config: &Config, args: &[String]) -> Result<()> {
    let [id_arg, cost_arg] = args else {
        anyhow::bail!("--cost takes <PROJECT_ID> <COST>");
    };
    let project_id: i64 = id_arg
        .parse()
        .with_context(|| format!("Invalid project id: {}", id_arg))?;
    let cost = Decimal::from_str(cost_arg).with_context(|| format!("Invalid cost: {}", cost_arg))?;

    let db = Database::new(&config.database_path).await?;
    let Some(bid) = db.record_outsource_cost(project_id, cost).await? else {
        println!("{}", format!("No bid recorded for project {}", project_id).red());
        return Ok(());
    };

    let profit = bid.profit.unwrap_or_default();
    println!(
        "{} Project {} | Bid {} {} | Cost {} | Profit {}",
        "WIN RECORDED".green().bold(),
        project_id,
        bid.bid_amount,
        bid.currency_code,
        cost,
        profit
    );

    if let Some(bot) = TelegramBot::from_config(config) {
        let message = format!("WIN UPDATED → ID {} | Cost ${} | Profit ${}", project_id, cost, profit);
        if let Err(e) = bot.send(&message).await {
            warn!("Telegram notification failed: {:#}", e);
        }
    }

    Ok(())
}
