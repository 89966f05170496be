//! Pitstop CLI
//!
//! Command-line interface for Pitstop - an offline-first vehicle garage.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pitstop_core::{AppContext, Config};

mod commands;
mod output;

use commands::garage::CarFields;
use output::{Output, OutputFormat};

/// Environment variable holding the log filter (e.g. `debug`)
const LOG_ENV: &str = "PITSTOP_LOG";

#[derive(Parser)]
#[command(name = "pitstop")]
#[command(about = "Pitstop - Offline-first vehicle garage")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Work offline: writes are queued for the next sync
    #[arg(long, global = true)]
    offline: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and list the garage (pulls the remote copy unless --local)
    #[command(alias = "ls", visible_alias = "load")]
    List {
        /// Only show what is stored on this device
        #[arg(long)]
        local: bool,
    },
    /// Show one car
    Show {
        /// Position in the list (1-based)
        position: usize,
    },
    /// Add a car
    Add {
        brand: String,
        model: String,
        nickname: String,
        #[command(flatten)]
        details: CarArgs,
    },
    /// Edit a car
    Edit {
        /// Position in the list (1-based)
        position: usize,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        nickname: Option<String>,
        /// Remove the photo
        #[arg(long, conflicts_with = "photo")]
        clear_photo: bool,
        #[command(flatten)]
        details: CarArgs,
    },
    /// Remove a car
    #[command(alias = "rm")]
    Remove {
        /// Position in the list (1-based)
        position: usize,
    },
    /// Replay queued changes to the remote store
    Sync,
    /// Show status (user id, pending changes, storage)
    Status,
    /// Show or change the sync user id
    User {
        #[command(subcommand)]
        command: Option<UserCommands>,
    },
    /// Manage the remote copy
    Remote {
        #[command(subcommand)]
        command: RemoteCommands,
    },
    /// Manage the image cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args)]
struct CarArgs {
    /// License plate
    #[arg(short, long)]
    plate: Option<String>,
    /// Image file (jpg, png, webp or gif)
    #[arg(long, value_name = "FILE")]
    photo: Option<PathBuf>,
    /// Latitude of the parking spot
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    lat: Option<f64>,
    /// Longitude of the parking spot
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lng: Option<f64>,
}

#[derive(Subcommand, Clone)]
enum UserCommands {
    /// Show the user id
    Show,
    /// Sync under another user id
    Set { user_id: String },
}

#[derive(Subcommand)]
enum RemoteCommands {
    /// Delete the remote garage (the local garage is kept)
    Delete {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Evict the oldest cached images
    Prune,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_backend, remote_url, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands must work even with a broken data dir
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(cli.config.as_ref(), &output)
            }
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, cli.config.as_ref(), &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(cli.config.as_ref()).context("Failed to load configuration")?;
    init_logging(&config);

    let ctx = AppContext::open(config, !cli.offline).context("Failed to open local storage")?;
    let repo = ctx.repository();
    repo.init();
    tracing::debug!(offline = cli.offline, "Repository ready");

    let result = match cli.command {
        Commands::Config { .. } => Ok(()), // Handled above
        Commands::List { local } => commands::garage::list(&repo, local, &output).await,
        Commands::Show { position } => commands::garage::show(&repo, position, &output).await,
        Commands::Add {
            brand,
            model,
            nickname,
            details,
        } => {
            let fields = details.into_fields(CarFields::default());
            commands::garage::add(&repo, brand, model, nickname, fields, &output).await
        }
        Commands::Edit {
            position,
            brand,
            model,
            nickname,
            clear_photo,
            details,
        } => {
            let fields = details.into_fields(CarFields {
                brand,
                model,
                nickname,
                clear_photo,
                ..Default::default()
            });
            commands::garage::edit(&repo, position, fields, &output).await
        }
        Commands::Remove { position } => commands::garage::remove(&repo, position, &output).await,
        Commands::Sync => commands::sync::sync(&repo, &output).await,
        Commands::Status => commands::status::show(&ctx, &repo, &output),
        Commands::User { command } => match command {
            Some(UserCommands::Show) | None => commands::user::show(&repo, &output),
            Some(UserCommands::Set { user_id }) => commands::user::set(&repo, user_id, &output),
        },
        Commands::Remote {
            command: RemoteCommands::Delete { yes },
        } => commands::remote::delete(&repo, yes, &output).await,
        Commands::Cache {
            command: CacheCommands::Prune,
        } => commands::cache::prune(&repo, &output),
    };

    // Let background remote writes land (or reach the queue) before exit
    repo.shutdown().await;

    if repo.is_pending() && !output.is_quiet() && !output.is_json() {
        match repo.remote().pending_count() {
            Ok(count) => eprintln!(
                "⚠ {} change(s) waiting to sync. Run `pitstop sync` when online.",
                count
            ),
            Err(_) => eprintln!("⚠ Could not read the sync queue. Run `pitstop status` for details."),
        }
    }

    result
}

impl CarArgs {
    fn into_fields(self, base: CarFields) -> CarFields {
        CarFields {
            plate: self.plate,
            photo: self.photo,
            lat: self.lat,
            lng: self.lng,
            ..base
        }
    }
}

/// Initialize logging
///
/// Logs go to the configured log file, or stderr. The filter comes from
/// `PITSTOP_LOG` and defaults to warnings only.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("pitstop_core=warn,pitstop_cli=warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match &config.log_file {
        Some(log_path) => {
            let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
