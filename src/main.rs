mod apple_music_rs;
mod config;
mod logging;
mod ports;
mod services;
mod spotify_rs;
#[cfg(test)]
mod test_utils;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};
use url::Url;

use crate::{
    config::Config,
    logging::init_tracing,
    services::{
        apple_music::client::AppleMusicHttpAdapter,
        spotify::client::SpotifyHttpAdapter,
        transfer::{JsonSnapshotStore, TransferEngine, TransferEntry},
    },
    spotify_rs::auth::obtain_access_token,
};

type Engine = TransferEngine<AppleMusicHttpAdapter, JsonSnapshotStore>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "LIKED_TRANSFER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. `info` or `liked_transfer=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// OTLP gRPC endpoint to export spans to
    #[arg(long, global = true, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authorize with Spotify and print an access token
    Auth,
    /// Fill the transfer queue from your Spotify liked tracks
    Load {
        /// Spotify access token; runs the interactive authorization when omitted
        #[arg(short, long, env = "SPOTIFY_ACCESS_TOKEN")]
        access_token: Option<String>,
    },
    /// Transfer every pending track to the Apple Music playlist
    Run {
        /// Destination playlist, created in your library when missing
        #[arg(short, long)]
        playlist_name: Option<String>,
    },
    /// Show progress of the transfer queue
    Status {
        /// Also list every entry
        #[arg(short, long)]
        entries: bool,
    },
    /// Put tracks that were not found or failed back into the queue
    Retry,
    /// Clear the queue and delete its snapshot
    Reset,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(
        env!("CARGO_PKG_NAME"),
        args.otlp_endpoint.as_deref(),
        &args.log_level,
    )?;

    let result = run_command(args).await;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("Failed to shut down tracer provider: {e}");
        }
    }

    result
}

async fn run_command(args: Args) -> Result<()> {
    let config_path = args.config.as_deref();

    match args.command {
        Commands::Auth => {
            let config = load_config(config_path)?;
            let token = authorize_spotify(&config).await?;
            println!("{token}");
        }
        Commands::Load { access_token } => {
            let config = load_config(config_path)?;
            let access_token = match access_token {
                Some(token) => token,
                None => authorize_spotify(&config).await?,
            };
            let engine = open_engine(&config)?;
            let source = SpotifyHttpAdapter::new(access_token);
            let added = engine.populate_from(&source).await?;
            if added == 0 {
                println!("Queue already populated: {}", engine.summary().await);
            } else {
                println!("Queued {added} tracks");
            }
        }
        Commands::Run { playlist_name } => {
            let config = load_config(config_path)?;
            let engine = Arc::new(open_engine(&config)?);
            let playlist_name =
                playlist_name.unwrap_or_else(|| config.playlist_name().to_string());

            let ctrl_c = {
                let engine = engine.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupted, stopping after the current track");
                        engine.cancel();
                    }
                })
            };

            let outcome = engine.transfer(&playlist_name).await;
            ctrl_c.abort();

            let summary = outcome.wrap_err("Transfer failed")?;
            println!("{summary}");
            println!("Queue: {}", engine.summary().await);
        }
        Commands::Status { entries } => {
            let config = load_config(config_path)?;
            let engine = open_engine(&config)?;
            println!("{}", engine.summary().await);
            if entries {
                for entry in engine.entries().await {
                    println!("{}", format_entry(&entry));
                }
            }
        }
        Commands::Retry => {
            let config = load_config(config_path)?;
            let engine = open_engine(&config)?;
            let requeued = engine.requeue_unsuccessful().await?;
            println!("Requeued {requeued} tracks");
        }
        Commands::Reset => {
            let config = load_config(config_path)?;
            // Never loads the snapshot, so a corrupt file can still be cleared.
            let store = JsonSnapshotStore::new(config.snapshot_path()?);
            tracing::info!("Resetting transfer queue at {}", store.path().display());
            let engine = Engine::new(
                Arc::new(catalog(&config)?),
                store,
                config.transfer_settings(),
            );
            engine.reset().await;
            println!("Transfer queue cleared");
        }
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                tracing::debug!("Creating default config");
                let path = Config::create_default()?;
                println!("{}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    tracing::debug!("Loading configuration");
    match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .wrap_err("Failed to load liked-transfer config")
}

fn catalog(config: &Config) -> Result<AppleMusicHttpAdapter> {
    AppleMusicHttpAdapter::new(
        config.apple_music_tokens()?,
        config.storefront().to_string(),
    )
}

fn open_engine(config: &Config) -> Result<Engine> {
    let store = JsonSnapshotStore::new(config.snapshot_path()?);
    tracing::debug!("Opening transfer queue at {}", store.path().display());
    Engine::open(
        Arc::new(catalog(config)?),
        store,
        config.transfer_settings(),
    )
}

async fn authorize_spotify(config: &Config) -> Result<String> {
    let credentials = config.spotify_credentials()?;
    obtain_access_token(&credentials, prompt_for_redirect)
        .await
        .wrap_err("Spotify authorization failed")
}

fn prompt_for_redirect(auth_url: &Url) -> std::io::Result<String> {
    let mut stderr = std::io::stderr();
    writeln!(stderr, "Open this URL in your browser and authorize access:")?;
    writeln!(stderr, "\n  {auth_url}\n")?;
    write!(stderr, "Paste the URL you were redirected to: ")?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn format_entry(entry: &TransferEntry) -> String {
    let mut line = format!(
        "{:<10} {} - {}",
        entry.status().to_string(),
        entry.source_artist(),
        entry.source_title()
    );
    if let Some(destination) = entry.destination_id() {
        line.push_str(&format!(" [{destination}]"));
    }
    line
}
