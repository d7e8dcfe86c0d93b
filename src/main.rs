//! TON NFT Royalty Sales Bot
//!
//! Main entry point. Loads configuration, wires the TonAPI / Getgems
//! clients, the watermark store and the notification sinks into a
//! `SaleScanner`, then polls until SIGINT/SIGTERM.
//!
//! Usage:
//!   royalty-sales-bot                      # .env in the working directory
//!   royalty-sales-bot --config bot.toml    # TOML settings, env overrides
//!   royalty-sales-bot --once --dry-run     # one cycle, log instead of send
//!
//! Created: 2026-03-06

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use royalty_sales_bot::chain::{RateLimiter, TonApiClient};
use royalty_sales_bot::config::Config;
use royalty_sales_bot::enrichment::{GetgemsClient, HttpEnrichment};
use royalty_sales_bot::notify::{DiscordNotifier, FanoutNotifier, LogNotifier, Notifier, TelegramNotifier};
use royalty_sales_bot::watermark::FileWatermarkStore;
use royalty_sales_bot::{SaleScanner, Scheduler};

/// Watches TON royalty addresses and announces completed NFT sales
#[derive(Parser)]
#[command(name = "royalty-sales-bot")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment file to load instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,

    /// Log notifications instead of delivering them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load env before logging so RUST_LOG / LOG_FORMAT from the file apply
    let env_source = match &args.env_file {
        Some(path) => {
            dotenv::from_path(path).with_context(|| format!("Failed to load env file {}", path.display()))?;
            Some(path.display().to_string())
        }
        None => dotenv::dotenv().ok().map(|p| p.display().to_string()),
    };

    init_logging();

    info!("===========================================");
    info!("   TON NFT Royalty Sales Bot");
    info!("===========================================");
    if let Some(source) = env_source {
        info!("Environment loaded from {}", source);
    }

    let result = run(args).await;
    if let Err(e) = &result {
        error!("Fatal: {:#}", e);
    }
    result
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).context("Invalid configuration")?;
    if let Some(path) = &args.config {
        info!("Config file: {}", path.display());
    }
    info!("Royalty addresses: {}", config.monitored.royalty_addresses.len());
    for address in &config.monitored.royalty_addresses {
        info!("  - {}", address.to_friendly(true));
    }
    info!("Monitored collections: {}", config.monitored.collections.len());
    info!("Poll interval: {}s | tx limit: {}", config.poll_interval.as_secs(), config.scan.tx_limit);
    info!("Watermarks: {}", config.watermark_dir.display());

    let notifier = build_notifier(config.http_timeout, args.dry_run)?;

    let limiter = Arc::new(RateLimiter::new(config.request_interval));
    let tonapi = TonApiClient::new(
        &config.tonapi_base_url,
        config.tonapi_token.clone(),
        config.http_timeout,
        Arc::clone(&limiter),
    )
    .context("Failed to build TonAPI client")?;
    if tonapi.has_token() {
        info!("TonAPI: {} (authenticated)", config.tonapi_base_url);
    } else {
        warn!("TONAPI_TOKEN not set, anonymous TonAPI access is heavily rate limited");
    }

    let getgems = GetgemsClient::new(&config.getgems_api_url, config.http_timeout)
        .context("Failed to build Getgems client")?
        .with_limiter(Arc::new(RateLimiter::new(config.request_interval)));

    let watermarks = FileWatermarkStore::new(&config.watermark_dir)
        .with_context(|| format!("Failed to open watermark dir {}", config.watermark_dir.display()))?;

    let scanner = SaleScanner::new(
        Arc::new(tonapi.clone()),
        Arc::new(HttpEnrichment::new(tonapi, getgems)),
        notifier,
        Arc::new(watermarks),
        Arc::new(config.monitored.clone()),
        config.scan.clone(),
    );
    let scheduler = Scheduler::new(Arc::new(scanner), config.poll_interval, config.concurrent_scans);

    if args.once {
        scheduler.run_once().await.context("Scan cycle panicked")?;
        return Ok(());
    }

    // SIGINT/SIGTERM flip the shutdown flag; the scheduler stops at its next await
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
    let signals_handle = signals.handle();
    let signal_task = tokio::spawn(async move {
        if let Some(sig) = signals.next().await {
            info!("Received signal {}, shutting down", sig);
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await;

    signals_handle.close();
    let _ = signal_task.await;
    info!("Bye");
    Ok(())
}

fn build_notifier(timeout: Duration, dry_run: bool) -> Result<Arc<dyn Notifier>> {
    if dry_run {
        info!("Dry run: notifications are logged, not delivered");
        return Ok(Arc::new(LogNotifier));
    }

    let mut sinks: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(telegram) = TelegramNotifier::from_env(timeout).context("Failed to build Telegram client")? {
        info!("Telegram notifications enabled");
        sinks.push(Arc::new(telegram));
    }
    if let Some(discord) = DiscordNotifier::from_env(timeout).context("Failed to build Discord client")? {
        info!("Discord notifications enabled");
        sinks.push(Arc::new(discord));
    }

    match sinks.len() {
        0 => bail!("No notification sink configured: set BOT_TOKEN + NOTIFY_CHAT and/or DISCORD_WEBHOOK, or use --dry-run"),
        1 => Ok(sinks.remove(0)),
        _ => Ok(Arc::new(FanoutNotifier::new(sinks))),
    }
}
