//! Polymarket WebSocket Smoke Test CLI
//!
//! Commands:
//! - `market`: Subscribe to the market channel and collect raw messages
//! - `user`: Subscribe to the user channel (requires credentials)
//! - `rtds`: Subscribe to a Real-Time Data Stream topic
//! - `raw`: Connect to any ws:// or wss:// endpoint with an optional subscribe message
//!
//! # Usage
//! ```bash
//! # Market channel
//! pm_ws market --asset-id <ASSET_ID> --out data/ws_market_raw.jsonl --limit 500
//!
//! # User channel (requires env vars)
//! POLY_API_KEY=... POLY_API_SECRET=... POLY_API_PASSPHRASE=...
//! pm_ws user --market-id <MARKET_ID> --limit 200
//!
//! # RTDS crypto prices
//! pm_ws rtds --topic crypto_prices --type update
//!
//! # Any endpoint
//! pm_ws raw --url ws://127.0.0.1:9001/feed --subscribe '{"op":"sub"}'
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use polymarket_ws::{
    Connection, ConnectionConfig, RtdsSubscribe, SubscribeRequest, WsAuth, CLOB_WSS_ENDPOINT,
    CLOB_WSS_USER_ENDPOINT, RTDS_WSS_ENDPOINT,
};

#[derive(Parser)]
#[command(name = "pm_ws")]
#[command(about = "Polymarket WebSocket transport smoke test CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Override the keepalive ping interval in seconds
    #[arg(long, global = true)]
    ping_interval: Option<u64>,

    /// Maximum reconnect backoff in seconds
    #[arg(long, default_value = "60", global = true)]
    max_backoff: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to market channel and collect messages
    Market {
        /// Asset ID(s) (token_id) to subscribe to. Can specify multiple times.
        #[arg(long, required = true)]
        asset_id: Vec<String>,

        /// Output file path for raw JSONL (default: timestamped file)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum messages to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "500")]
        limit: u64,

        /// Enable feature-flagged messages (best_bid_ask, new_market, etc.)
        #[arg(long, default_value = "true")]
        enable_features: bool,
    },

    /// Subscribe to user channel (requires POLY_API_KEY, POLY_API_SECRET, POLY_API_PASSPHRASE)
    User {
        /// Market ID(s) (condition_id) to subscribe to
        #[arg(long, required = true)]
        market_id: Vec<String>,

        /// Output file path for raw JSONL (default: timestamped file)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum messages to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "200")]
        limit: u64,
    },

    /// Subscribe to a Real-Time Data Stream topic
    Rtds {
        /// Topic name, e.g. crypto_prices
        #[arg(long)]
        topic: String,

        /// Message type filter ("*" for all)
        #[arg(long = "type", default_value = "*")]
        message_type: String,

        /// Output file path for raw JSONL (default: timestamped file)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum messages to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "500")]
        limit: u64,
    },

    /// Connect to an arbitrary endpoint
    Raw {
        /// ws:// or wss:// URL
        #[arg(long)]
        url: String,

        /// Message replayed after every (re)connect
        #[arg(long)]
        subscribe: Option<String>,

        /// Output file path for raw JSONL (default: timestamped file)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum messages to collect (0 = unlimited until Ctrl+C)
        #[arg(long, default_value = "100")]
        limit: u64,
    },
}

/// Per-run message counters
#[derive(Debug, Default)]
struct CollectStats {
    total_messages: u64,
    non_json: u64,
    type_counts: HashMap<String, u64>,
    last_message_type: Option<String>,
}

impl CollectStats {
    fn record(&mut self, payload: &str) {
        self.total_messages += 1;

        let event_type = match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(value) => event_type_of(&value),
            Err(_) => {
                self.non_json += 1;
                "_non_json".to_string()
            }
        };

        *self.type_counts.entry(event_type.clone()).or_insert(0) += 1;
        self.last_message_type = Some(event_type);
    }
}

/// `event_type` (CLOB), `topic` (RTDS), or the first element's type for snapshot arrays
fn event_type_of(value: &serde_json::Value) -> String {
    if let Some(first) = value.as_array().and_then(|arr| arr.first()) {
        return format!("[{}]", event_type_of(first));
    }
    value
        .get("event_type")
        .or_else(|| value.get("topic"))
        .and_then(|v| v.as_str())
        .unwrap_or("_no_type")
        .to_string()
}

/// Generate timestamped output filename
fn generate_output_filename(prefix: &str, extension: &str) -> String {
    let now = Utc::now();
    format!("data/{}_{}.{}", prefix, now.format("%Y%m%d_%H%M%S"), extension)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let tune = |config: ConnectionConfig| {
        let initial = config.initial_backoff;
        let config = config.with_backoff(initial, Duration::from_secs(cli.max_backoff));
        match cli.ping_interval {
            Some(secs) => config.with_ping_interval(Duration::from_secs(secs)),
            None => config,
        }
    };

    match cli.command {
        Commands::Market { ref asset_id, ref out, limit, enable_features } => {
            info!("=== Market Channel Smoke Test ===");
            info!("Endpoint: {}", CLOB_WSS_ENDPOINT);
            info!("Asset IDs: {} token(s)", asset_id.len());
            for (i, id) in asset_id.iter().enumerate() {
                info!("  [{}]: {}", i, id);
            }

            let subscription =
                SubscribeRequest::market(asset_id.clone(), enable_features).to_message()?;
            debug!("Subscribe request: {}", subscription);

            let out = out.clone().unwrap_or_else(|| generate_output_filename("ws_market", "jsonl").into());
            run_collect(tune(ConnectionConfig::market()), Some(subscription), &out, limit).await
        }
        Commands::User { ref market_id, ref out, limit } => {
            info!("=== User Channel Smoke Test ===");
            info!("Endpoint: {}", CLOB_WSS_USER_ENDPOINT);
            info!("Market IDs: {:?}", market_id);

            let auth = match WsAuth::from_env() {
                Some(auth) => auth,
                None => {
                    error!("Missing credentials. Set environment variables:");
                    error!("  POLY_API_KEY");
                    error!("  POLY_API_SECRET");
                    error!("  POLY_API_PASSPHRASE");
                    anyhow::bail!("Missing credentials");
                }
            };
            if !auth.is_valid() {
                error!("Invalid credentials - one or more fields are empty");
                anyhow::bail!("Invalid credentials");
            }
            info!("Credentials loaded: {:?}", auth);

            // Don't log the request: it carries credentials
            let subscription = SubscribeRequest::user(auth, market_id.clone()).to_message()?;

            let out = out.clone().unwrap_or_else(|| generate_output_filename("ws_user", "jsonl").into());
            run_collect(tune(ConnectionConfig::user()), Some(subscription), &out, limit).await
        }
        Commands::Rtds { ref topic, ref message_type, ref out, limit } => {
            info!("=== RTDS Smoke Test ===");
            info!("Endpoint: {}", RTDS_WSS_ENDPOINT);
            info!("Topic: {} (type: {})", topic, message_type);

            let subscription = RtdsSubscribe::topic(topic.as_str(), message_type.as_str()).to_message()?;
            debug!("Subscribe request: {}", subscription);

            let out = out.clone().unwrap_or_else(|| generate_output_filename("ws_rtds", "jsonl").into());
            run_collect(tune(ConnectionConfig::rtds()), Some(subscription), &out, limit).await
        }
        Commands::Raw { ref url, ref subscribe, ref out, limit } => {
            info!("=== Raw Endpoint Smoke Test ===");
            info!("Endpoint: {}", url);

            let config = ConnectionConfig::from_url(url)
                .with_context(|| format!("Invalid endpoint '{}'", url))?;

            let out = out.clone().unwrap_or_else(|| generate_output_filename("ws_raw", "jsonl").into());
            run_collect(tune(config), subscribe.clone(), &out, limit).await
        }
    }
}

/// Drain the connection into a JSONL file until `limit` messages or Ctrl+C
async fn run_collect(
    config: ConnectionConfig,
    subscription: Option<String>,
    out: &Path,
    limit: u64,
) -> Result<()> {
    info!("Output: {}", out.display());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Ping interval: {:?}", config.ping_interval);
    info!("Press Ctrl+C to stop");
    info!("");

    // Ensure output directory exists
    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(out).await.context("Failed to create output file")?;

    let conn = Connection::new(config).context("Failed to set up connection")?;
    if let Some(subscription) = subscription {
        conn.set_subscription(subscription);
    }
    let mut stream = conn.stream().context("Outward stream already taken")?;
    conn.start();

    let mut stats = CollectStats::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if limit > 0 && stats.total_messages >= limit {
            info!("Reached message limit: {}", limit);
            break;
        }

        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            payload = stream.recv() => {
                let Some(payload) = payload else {
                    warn!("Stream ended unexpectedly");
                    break;
                };

                // Write raw to file (JSONL format)
                file.write_all(payload.as_bytes()).await?;
                file.write_all(b"\n").await?;

                stats.record(&payload);
                if stats.total_messages % 100 == 0 {
                    debug!(
                        "Collected {} messages, connected: {}",
                        stats.total_messages,
                        conn.is_connected()
                    );
                }
            }
        }
    }

    file.flush().await?;
    conn.close().await;

    // Print summary
    info!("");
    info!("=== Summary ===");
    info!("Total messages: {}", stats.total_messages);
    info!("Non-JSON payloads: {}", stats.non_json);
    info!("Last message type: {:?}", stats.last_message_type);
    info!("");
    info!("Message type distribution:");
    let mut types: Vec<_> = stats.type_counts.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1));
    for (msg_type, count) in types {
        info!("  {}: {}", msg_type, count);
    }
    info!("");
    info!("Output written to: {}", out.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_filename_generation() {
        let filename = generate_output_filename("test", "jsonl");
        assert!(filename.starts_with("data/test_"));
        assert!(filename.ends_with(".jsonl"));
    }

    #[test]
    fn test_stats_record_types() {
        let mut stats = CollectStats::default();
        stats.record(r#"{"event_type":"book","asset_id":"1"}"#);
        stats.record(r#"[{"event_type":"book"}]"#);
        stats.record(r#"{"topic":"crypto_prices","type":"update"}"#);
        stats.record("PONG");

        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.non_json, 1);
        assert_eq!(stats.type_counts["book"], 1);
        assert_eq!(stats.type_counts["[book]"], 1);
        assert_eq!(stats.type_counts["crypto_prices"], 1);
        assert_eq!(stats.last_message_type.as_deref(), Some("_non_json"));
    }

    #[test]
    fn test_cli_parses_market() {
        let cli = Cli::try_parse_from(["pm_ws", "market", "--asset-id", "a", "--asset-id", "b"])
            .unwrap();
        match cli.command {
            Commands::Market { asset_id, limit, .. } => {
                assert_eq!(asset_id, vec!["a", "b"]);
                assert_eq!(limit, 500);
            }
            _ => panic!("expected market command"),
        }
    }
}
