//! Command-line entry point for the publish/subscribe session client

use clap::{Parser, Subcommand};
use pubsub_session::config::SessionConfig;
use pubsub_session::observability::init_default_logging;
use pubsub_session::session::{LifecycleEvent, LifecycleEventKind, SessionClient, SessionOptions};
use pubsub_session::transport::mqtt::MqttTransport;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: &[&str] = &["session.toml", "config/session.toml"];

/// Publish/subscribe session client
#[derive(Parser)]
#[command(name = "pubsub-session")]
#[command(about = "Session-oriented publish/subscribe client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "PUBSUB_SESSION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe to the configured topics and log traffic until stopped
    Run,
    /// Publish a single message
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        payload: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging() {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting pubsub-session v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::Publish { topic, payload } => publish_once(config, &topic, payload).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(SessionConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(SessionConfig::load_from_file(path)?);
        }
    }

    Err(format!(
        "No configuration file found. Provide one with -c/--config or create {}",
        DEFAULT_CONFIG_PATHS[0]
    )
    .into())
}

fn start_client(config: &SessionConfig) -> SessionClient {
    SessionClient::start(
        MqttTransport::from_config(&config.session),
        SessionOptions::from(&config.session),
    )
}

async fn run_session(config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = start_client(&config);
    let events = client.events();

    client.connect(config.credentials()?).await?;

    for topic in &config.subscriptions.topics {
        client
            .subscribe(topic, |message| {
                info!(
                    topic = %message.topic,
                    bytes = message.payload.len(),
                    payload = %message.payload_str(),
                    "Message received"
                );
            })
            .await?;
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Session is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = wait_for_session_loss(events) => {
            error!("Broker session lost, shutting down...");
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("Disconnect: {}", e);
    }
    client.shutdown().await?;
    Ok(())
}

async fn wait_for_session_loss(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if event.kind == LifecycleEventKind::Disconnected => break,
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => warn!(missed, "Lifecycle event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn publish_once(
    config: SessionConfig,
    topic: &str,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = start_client(&config);

    client.connect(config.credentials()?).await?;
    client.publish(topic, payload).await?;
    client.disconnect().await?;
    client.shutdown().await?;
    Ok(())
}

fn handle_config_command(
    config: &SessionConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
