//! Command-line interface for the ingester.
//!
//! `check-config` validates a configuration file; `replay` runs the whole
//! pipeline over a JSON-lines capture and writes the resulting rows as
//! JSON-lines files, one per table.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, IngestError, MessageType, Result};
use crate::flow_log::FlowLog;
use crate::monitoring::StatsReporter;
use crate::platform::{PlatformDataManager, PlatformSnapshot};
use crate::receiver::Receiver;
use crate::writer::{JsonLinesSink, Sink};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

/// Decode, enrich and throttle flow-log and profile telemetry.
#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "INGESTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "INGESTER_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Feed a JSON-lines capture through the pipeline
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Capture with one `{"message_type", "vtap_id", "payload"}` object per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Platform snapshot used for enrichment (JSON or YAML)
    #[arg(short, long)]
    pub platform: Option<PathBuf>,

    /// Directory the per-table output files are written to
    #[arg(short, long, default_value = "ingester-out")]
    pub output: PathBuf,
}

/// One line of a replay capture.
#[derive(Debug, Deserialize)]
struct ReplayLine {
    message_type: String,
    vtap_id: u16,
    payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct ReplayCounts {
    lines: u64,
    ingested: u64,
    rejected: u64,
    skipped: u64,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load the configuration file if one was given, else the defaults.
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = &self.config {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                IngestError::config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            builder = builder.from_yaml(&content)?;
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging from the configuration.
    ///
    /// `INGESTER_LOG` or `RUST_LOG` override the configured level, and
    /// `--debug` overrides both.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter = if self.debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_env("INGESTER_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()))
        };

        let structured = config.logging.structured;
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(structured)
            .with_thread_ids(structured)
            .with_thread_names(structured)
            .with_line_number(structured)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| IngestError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the parsed command.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    match &cli.command {
        Command::CheckConfig => {
            println!("Configuration is valid!");
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        },
        Command::Replay(args) => replay(config, args).await,
    }
}

async fn replay(config: Config, args: &ReplayArgs) -> Result<()> {
    let snapshot_path = args
        .platform
        .clone()
        .or_else(|| config.platform.snapshot_path.clone());
    let platform = match &snapshot_path {
        Some(path) => {
            let snapshot = PlatformSnapshot::from_file(path, 1)?;
            tracing::info!(path = ?path, resources = snapshot.resource_count(), "loaded platform snapshot");
            Some(Arc::new(PlatformDataManager::new(snapshot)))
        },
        None => None,
    };

    let sink: Arc<dyn Sink> = Arc::new(JsonLinesSink::new(&args.output)?);
    let receiver = Receiver::new(config.ingester.recv_buffer_pool_size);
    let stats_interval = config.logging.stats_interval;

    let mut service = FlowLog::new(config, &receiver, platform, sink)?;
    service.start()?;

    let reporter = StatsReporter::new(service.stats_source(), stats_interval);
    let reporter_handle = if stats_interval.is_zero() {
        None
    } else {
        Some(reporter.start())
    };

    let mut counts = ReplayCounts::default();
    let interrupted = tokio::select! {
        result = feed(&args.input, &receiver, &mut counts) => {
            result?;
            false
        },
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        tracing::warn!(lines = counts.lines, "Received shutdown signal, stopping replay early");
    }

    service.shutdown(&receiver).await?;

    reporter.stop();
    if let Some(handle) = reporter_handle {
        handle.abort();
    }
    let health = reporter.report_now();
    let received = receiver.stats();
    tracing::info!(
        lines = counts.lines,
        ingested = counts.ingested,
        rejected = counts.rejected,
        skipped = counts.skipped,
        unknown_type = received.unknown_type,
        ?health,
        output = ?args.output,
        "replay finished"
    );
    Ok(())
}

async fn feed(input: &Path, receiver: &Receiver, counts: &mut ReplayCounts) -> Result<()> {
    let file = tokio::fs::File::open(input).await?;
    let mut lines = tokio::io::BufReader::new(file).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        counts.lines += 1;

        let (msg_type, vtap_id, payload) = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                counts.skipped += 1;
                tracing::warn!(line = counts.lines, "skipping replay line: {}", e);
                continue;
            },
        };

        if receiver.ingest(msg_type, vtap_id, &payload) {
            counts.ingested += 1;
        } else {
            counts.rejected += 1;
        }
    }
    Ok(())
}

/// Parse one capture line into the bytes an agent would have sent.
fn parse_line(line: &str) -> Result<(MessageType, u16, Vec<u8>)> {
    let parsed: ReplayLine = serde_json::from_str(line)?;
    let msg_type: MessageType = parsed.message_type.parse()?;
    let mut payload = serde_json::to_vec(&parsed.payload)?;
    if msg_type == MessageType::OpenTelemetryCompressed {
        payload = lz4_flex::compress_prepend_size(&payload);
    }
    Ok((msg_type, parsed.vtap_id, payload))
}
