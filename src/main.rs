//! CLI entry point for the bike-share feed relay.
//!
//! Provides subcommands for loading GBFS station metadata and live status
//! into the document store, relaying queued messages, and reading the
//! aggregate views.

use anyhow::{Context, Result};
use bikeshare_relay::{
    config::{RelayConfig, STATUS_FEED_ID},
    fetch::read_source,
    ingest::{StationIngest, StatusIngest, WatermarkStore, purge_expired},
    output::{append_records, print_json},
    parser::parse_feed,
    relay::{PipelineSink, read_messages, relay_messages},
    store::{DocumentStore, METADATA, STATIONS, STATUS, SqliteStore},
    views::{AvailabilityRow, UtilizationRow, load_availability, load_utilization},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "bikeshare_relay")]
#[command(about = "Relays a GBFS bike-share feed into a bucketed document store", long_about = None)]
struct Cli {
    /// SQLite database file (overrides RELAY_DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema
    Init,
    /// Replace station metadata from a station_information document
    RefreshStations {
        /// Path to file or URL to fetch (defaults to RELAY_STATION_FEED_URL)
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,
    },
    /// Bucket readings from a station_status document
    RefreshStatus {
        /// Path to file or URL to fetch (defaults to RELAY_STATUS_FEED_URL)
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,

        /// Ingest even if this feed version was already seen
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Relay action-tagged JSON-lines messages ("-" reads stdin)
    Relay {
        #[arg(value_name = "FILE", default_value = "-")]
        input: String,

        /// Watermark key for relayed status readings
        #[arg(long, default_value = STATUS_FEED_ID)]
        feed_id: String,
    },
    /// Latest bike availability per station
    Availability {
        /// CSV file to append rows to instead of logging JSON
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Average utilization per station over the last hour
    Utilization {
        /// CSV file to append rows to instead of logging JSON
        #[arg(short, long)]
        output: Option<String>,

        /// Evaluate the window ending at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Delete status buckets whose retention has elapsed
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bikeshare_relay.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bikeshare_relay.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = RelayConfig::from_env()?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path))?;

    match cli.command {
        Commands::Init => {
            info!(path = %config.database_path, "Database ready");
        }
        Commands::RefreshStations { source } => {
            let source = source.unwrap_or_else(|| config.station_feed_url.clone());
            let feed = parse_feed(&read_source(&source, timeout(&config)).await?)?;
            info!(
                stations = feed.stations.len(),
                last_updated = feed.last_updated,
                "Station feed parsed"
            );

            let report = StationIngest::new(store.collection(STATIONS), config.batch_size)
                .ingest_raw(feed.stations)
                .await?;
            print_json(&report)?;
        }
        Commands::RefreshStatus { source, force } => {
            let source = source.unwrap_or_else(|| config.status_feed_url.clone());
            let feed = parse_feed(&read_source(&source, timeout(&config)).await?)?;
            let (last_updated, ttl) = (feed.last_updated, feed.ttl);

            let watermarks = WatermarkStore::new(store.collection(METADATA));
            let mut pipeline = status_pipeline(&store, &config, watermarks.clone());
            if force {
                pipeline = pipeline.ingest_seen_versions();
            }

            let report = pipeline
                .ingest(STATUS_FEED_ID, feed.into_status_snapshots())
                .await?;
            if report.watermark_advanced {
                watermarks
                    .set_watermark_with_ttl(STATUS_FEED_ID, last_updated, ttl)
                    .await?;
            }
            print_json(&report)?;
        }
        Commands::Relay { input, feed_id } => {
            let (messages, rejected) = if input == "-" {
                read_messages(std::io::stdin().lock())?
            } else {
                let file = std::fs::File::open(&input)
                    .with_context(|| format!("failed to open {input}"))?;
                read_messages(BufReader::new(file))?
            };
            if rejected > 0 {
                warn!(rejected, "Some messages could not be decoded");
            }

            let sink = PipelineSink::new(
                StationIngest::new(store.collection(STATIONS), config.batch_size),
                status_pipeline(&store, &config, WatermarkStore::new(store.collection(METADATA))),
            );
            let report = relay_messages(&sink, &feed_id, messages).await?;
            print_json(&report)?;
        }
        Commands::Availability { output } => {
            let view = load_availability(&store).await?;
            match output {
                Some(path) => {
                    let written = append_records(&path, view.iter().map(AvailabilityRow::from))?;
                    info!(path = %path, written, "Availability written");
                }
                None => print_json(&view)?,
            }
        }
        Commands::Utilization { output, at } => {
            let now = at.unwrap_or_else(Utc::now);
            let view = load_utilization(&store, now).await?;
            match output {
                Some(path) => {
                    let written = append_records(&path, view.iter().map(UtilizationRow::from))?;
                    info!(path = %path, written, "Utilization written");
                }
                None => print_json(&view)?,
            }
        }
        Commands::Purge => {
            let removed = purge_expired(store.collection(STATUS).as_ref(), Utc::now()).await?;
            info!(removed, "Purge complete");
        }
    }

    Ok(())
}

fn timeout(config: &RelayConfig) -> Duration {
    Duration::from_secs(config.fetch_timeout_secs)
}

fn status_pipeline(
    store: &SqliteStore,
    config: &RelayConfig,
    watermarks: WatermarkStore,
) -> StatusIngest {
    StatusIngest::new(store.collection(STATUS), watermarks, config.batch_size)
        .with_bucket_policy(config.bucket_policy())
        .with_watermark_policy(config.watermark_policy())
}
