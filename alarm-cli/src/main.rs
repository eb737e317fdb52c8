use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use wakeify::logging::{self, LoggingMode};
use wakeify::AlarmConfig;
use zeroconf_client::AuthMode;

mod commands;

/// Wakeify - Spotify Connect alarm playback
///
/// Manual testing tool for the pieces an alarm run is made of: local
/// discovery, waking and logging in a receiver, the cloud device list and a
/// complete alarm run.
#[derive(Parser, Debug)]
#[command(name = "wakeify")]
#[command(about = "Spotify Connect alarm playback - manual testing tool")]
#[command(version)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long, env = "WAKEIFY_CONFIG", default_value = "data/config.json")]
    pub config: PathBuf,

    /// Log output: silent, development, debug or json (default: WAKEIFY_LOG_MODE)
    #[arg(long)]
    pub log_mode: Option<LoggingMode>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find one device on the local network by name
    Discover {
        name: String,
        /// Browse timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// List every Spotify Connect device on the local network
    DiscoverAll {
        /// Browse timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Send getInfo to a device (wakes it and shows what it reports)
    Touch { name: String },

    /// Log the account into a device with addUser
    AddUser {
        name: String,
        /// access_token or blob_client_key (default: the profile's mode)
        #[arg(long)]
        mode: Option<AuthMode>,
    },

    /// Show the cloud device list
    Devices,

    /// Run a full alarm against a configured device
    Play {
        name: String,
        /// Context URI (default: the configured one)
        #[arg(long)]
        context: Option<String>,
        /// Seconds from now until the music should start
        #[arg(long = "in", default_value = "0")]
        in_secs: u64,
        #[arg(long)]
        shuffle: bool,
    },

    /// Profile, circuit breaker and visibility of a configured device
    Status { name: String },

    /// Pause playback on a configured device
    Stop { name: String },
}

impl Command {
    /// Commands that only talk to the local network work without credentials
    fn needs_credentials(&self) -> bool {
        !matches!(
            self,
            Command::Discover { .. } | Command::DiscoverAll { .. } | Command::Touch { .. }
        )
    }
}

/// Read the config file (if any) and apply environment overrides
///
/// Local-only commands tolerate a missing file; everything else validates.
fn load_config(cli: &Cli) -> Result<AlarmConfig> {
    let strict = cli.command.needs_credentials();

    let mut config = match std::fs::read_to_string(&cli.config) {
        Ok(json) => AlarmConfig::from_json(&json)
            .with_context(|| format!("Invalid config file {}", cli.config.display()))?,
        Err(e) if !strict && e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %cli.config.display(), "No config file, using defaults");
            AlarmConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", cli.config.display()))
        }
    };

    config.apply_env().context("Invalid environment override")?;
    if strict {
        config.validate().context("Invalid configuration")?;
    } else {
        config.timings.validate().context("Invalid timings")?;
    }
    Ok(config)
}

fn init_logging(mode: Option<LoggingMode>) -> Result<()> {
    match mode {
        Some(mode) => logging::init_logging(mode)?,
        None => logging::init_logging_from_env()?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_mode)?;

    let config = load_config(&cli)?;

    match cli.command {
        Command::Discover { name, timeout } => commands::discover(&config, &name, timeout).await,
        Command::DiscoverAll { timeout } => commands::discover_all(&config, timeout).await,
        Command::Touch { name } => commands::touch(&config, &name).await,
        Command::AddUser { name, mode } => commands::add_user(config, &name, mode).await,
        Command::Devices => commands::devices(config).await,
        Command::Play {
            name,
            context,
            in_secs,
            shuffle,
        } => commands::play(config, &name, context.as_deref(), in_secs, shuffle).await,
        Command::Status { name } => commands::status(config, &name).await,
        Command::Stop { name } => commands::stop(config, &name).await,
    }
}
