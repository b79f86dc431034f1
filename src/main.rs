use download_list::config::{Config, ConfigError};
use download_list::events::SearchEvents;
use download_list::host::StatusSink;
use download_list::matcher::{AudioFormat, MatchCriteria, QualityPreset};
use download_list::service::{start_sequencer_service, ServiceError};
use download_list::simulator::{Catalog, CatalogError, SimulatedNetwork};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
enum CliError {
    #[error("{0} requires a value")]
    MissingValue(String),
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
    #[error("{0} is required")]
    MissingRequired(&'static str),
    #[error("{0}")]
    InvalidChoice(String),
    #[error("Invalid latency: {0}")]
    InvalidLatency(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, PartialEq)]
struct Options {
    terms_path: PathBuf,
    catalog_path: PathBuf,
    criteria: MatchCriteria,
    latency: Duration,
}

/// Prints the status area to stdout; log lines go through tracing
struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn set_status(&self, message: &str) {
        if !message.is_empty() {
            println!("{}", message);
        }
    }
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("download-list");

    let options = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            print_usage(program);
            std::process::exit(2);
        }
    };

    match run(options).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Run once over the terms file; returns false when the run did not start
async fn run(options: Options) -> Result<bool, CliError> {
    let config = Config::load()?;
    let catalog = Catalog::load(&options.catalog_path).await?;
    let raw_terms = tokio::fs::read_to_string(&options.terms_path).await?;

    let events = SearchEvents::new();
    let network = Arc::new(SimulatedNetwork::new(
        catalog,
        events.clone(),
        options.latency,
    ));
    let handle = start_sequencer_service(
        config,
        network.clone(),
        network.clone(),
        Arc::new(ConsoleStatus),
        &events,
    );

    match handle.start(raw_terms, options.criteria).await {
        Ok(count) => info!("Queued {} term(s)", count),
        Err(ServiceError::Validation(_)) => {
            handle.shutdown().await?;
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }

    let summary = handle.wait_for_completion().await?;
    handle.shutdown().await?;

    for acquisition in &summary.found {
        info!(
            "Downloaded for {}: {} from {}",
            acquisition.term, acquisition.remote_path, acquisition.peer
        );
    }
    for acquisition in &summary.failed {
        error!(
            "Download refused for {}: {} from {}",
            acquisition.term, acquisition.remote_path, acquisition.peer
        );
    }
    info!("Simulator recorded {} download(s)", network.downloads().len());

    Ok(true)
}

fn parse_args(args: &[String]) -> Result<Options, CliError> {
    let mut terms_path: Option<PathBuf> = None;
    let mut catalog_path: Option<PathBuf> = None;
    let mut format = AudioFormat::Mp3;
    let mut quality = QualityPreset::Kbps320;
    let mut latency = Duration::from_millis(500);

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| CliError::MissingValue(arg.clone()))
        };
        match arg.as_str() {
            "--terms" => terms_path = Some(PathBuf::from(value()?)),
            "--catalog" => catalog_path = Some(PathBuf::from(value()?)),
            "--format" => format = value()?.parse().map_err(CliError::InvalidChoice)?,
            "--quality" => quality = value()?.parse().map_err(CliError::InvalidChoice)?,
            "--latency-ms" => {
                let raw = value()?;
                latency = raw
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| CliError::InvalidLatency(raw))?;
            }
            other => return Err(CliError::UnknownArgument(other.to_string())),
        }
    }

    Ok(Options {
        terms_path: terms_path.ok_or(CliError::MissingRequired("--terms"))?,
        catalog_path: catalog_path.ok_or(CliError::MissingRequired("--catalog"))?,
        criteria: MatchCriteria { format, quality },
        latency,
    })
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!(
        "  {} --terms <FILE> --catalog <FILE> [--format MP3] [--quality 320kbps] [--latency-ms 500]",
        program
    );
    eprintln!();
    eprintln!("Searches each line of the terms file in turn and downloads the first");
    eprintln!("result matching the format and quality.");
    eprintln!();
    eprintln!("Formats:   MP3, FLAC, OGG, OPUS, WAV");
    eprintln!("Qualities: 320kbps, 192kbps, 128kbps, \"44.1 KHz/16 bit\", any");
}
