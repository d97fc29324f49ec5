use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{debug, error, info, warn};
use serde::Deserialize;
use tokio::sync::Mutex;

mod consumer;
mod helpers;
mod integrations;
mod message_handlers;
mod storage;


use consumer::{Consumer, Event, EventHandler, EventKind, EventSource};
use helpers::*;
use integrations::{HttpTitleResolver, ReplySink, TelegramClient, TitleResolver};
use message_handlers::Processor;
use storage::{take, Page, PageStore, Selector, SqliteStore, Take};

const DEFAULT_DB_PATH: &str = "data/sqlite/database.db";
const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 100;
const DEFAULT_POLL_TIMEOUT_SECS: u32 = 30;
const DEFAULT_IDLE_DELAY_MS: u64 = 1000;
const DEFAULT_RETRY_DELAY_MS: u64 = 3000;
const DEFAULT_TITLE_TIMEOUT_SECS: u64 = 10;
const LAST_PAGES_LIMIT: usize = 5;
const MAX_MESSAGE_LEN: usize = 4096;
const MAX_TITLE_BODY_BYTES: usize = 256 * 1024;
const EPOCH_DATE: &str = "1970-01-01";

#[derive(Debug, Clone)]
struct Config {
    token: String,
    db_path: PathBuf,
    api_url: Option<String>,
    batch_size: usize,
    poll_timeout_seconds: u32,
    idle_delay: Duration,
    retry_delay: Duration,
    title_timeout: Duration,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    token: Option<String>,
    db_path: Option<PathBuf>,
    api_url: Option<String>,
    batch_size: Option<usize>,
    poll_timeout_seconds: Option<u32>,
    idle_delay_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    title_timeout_seconds: Option<u64>,
}

#[derive(Parser, Debug, Default)]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Token for access to the telegram bot.
    #[arg(long = "tg-bot-token", env = "READLATER_BOT_TOKEN")]
    token: Option<String>,
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
    }

    let store = SqliteStore::open(&config.db_path).context("can't connect to storage")?;
    store.init().await.context("can't init storage")?;

    let telegram = TelegramClient::new(&config)?;
    telegram
        .check_connection()
        .await
        .context("can't reach telegram")?;

    let titles = HttpTitleResolver::new(config.title_timeout)?;
    let processor = Processor::new(store, telegram.clone(), titles);
    let mut consumer = Consumer::new(telegram, processor, config.batch_size)
        .with_delays(config.idle_delay, config.retry_delay);

    info!("service started");

    tokio::select! {
        _ = consumer.start() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("service stopped");
        }
    }

    Ok(())
}
