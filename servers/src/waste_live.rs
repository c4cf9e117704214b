use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::signal;

use green_common::ingestors::{ConnectionStatus, PollingConfig, PollingFeed};
use green_common::loggers;

#[derive(Parser, Debug)]
#[clap(about = "Follow the Green Track waste log live", version)]
struct Args {
    /// Subscriber channel URL.
    #[clap(long, env = "GREEN_WS_URL", default_value = "ws://127.0.0.1:4003/ws")]
    url: String,

    /// Server base URL used for polling when the live channel stays silent.
    #[clap(long, env = "GREEN_HTTP_BASE")]
    http_base: Option<String>,

    /// Seconds without a live event before polling starts.
    #[clap(long, default_value_t = 10)]
    fallback_after_secs: u64,

    /// Seconds between polls.
    #[clap(long, default_value_t = 15)]
    poll_every_secs: u64,

    /// Logging level (trace, debug, info, warn, error).
    #[clap(long, env = "GREEN_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    loggers::setup_console_logging(&args.log_level)?;

    let mut feed_config = PollingConfig::new(args.url.clone(), args.http_base.clone());
    feed_config.first_event_timeout = Duration::from_secs(args.fallback_after_secs);
    feed_config.poll_interval = Duration::from_secs(args.poll_every_secs);

    let (feed, mut entries) = PollingFeed::start(feed_config)?;
    let mut state = feed.state();
    println!("Following {} (Ctrl+C to stop)", args.url);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            entry = entries.recv() => match entry {
                Some(entry) => println!(
                    "{}  {:?}  {} at {}  ({:?})  id={}",
                    entry
                        .timestamp
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    entry.material_type,
                    entry.quantity,
                    entry.site,
                    entry.disposal_method,
                    entry.id
                ),
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                let phase = match current.status {
                    ConnectionStatus::Connecting => "connecting".to_string(),
                    ConnectionStatus::Connected => "connected".to_string(),
                    ConnectionStatus::Disconnected { retry_in } => {
                        format!("disconnected, retrying in {} ms", retry_in.as_millis())
                    }
                    ConnectionStatus::Closed => "closed".to_string(),
                };
                let updated = current
                    .last_updated
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("[{}] last updated {}", phase, updated);
            }
        }
    }

    feed.close().await;
    println!("Stopped.");
    Ok(())
}
