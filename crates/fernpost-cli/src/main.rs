//! fernpost CLI
//!
//! Command-line interface for fernpost - inspect, publish and recover
//! document editions in a directory-backed store.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fernpost_core::{Config, IdentityId, PersistenceError};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "fernpost")]
#[command(about = "fernpost - self-published social documents, one edition at a time")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a payload and print a summary
    Validate {
        /// Payload file
        file: PathBuf,
        /// Identity id of the owner
        #[arg(long)]
        owner: Option<String>,
        /// Also require album descriptions
        #[arg(long)]
        strict: bool,
    },
    /// Print the content fingerprint of a payload
    Fingerprint {
        /// Payload file
        file: PathBuf,
        /// Identity id of the owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Insert a payload into the store as a new edition
    Publish {
        /// Payload file
        file: PathBuf,
        /// Insert key
        #[arg(short, long)]
        key: String,
        /// Edition to insert (defaults to the one after the latest)
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        edition: Option<u64>,
        /// Identity id of the owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Fetch and parse an edition from the store
    Fetch {
        /// Request key
        key: String,
        /// Edition number
        edition: u64,
        /// Identity id of the owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Walk back from a broken edition until a usable one is found
    Rescue {
        /// Request key
        key: String,
        /// The broken edition
        #[arg(long)]
        from: u64,
        /// Skip the edition right below the broken one
        #[arg(long)]
        skip: bool,
        /// Identity id of the owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Resolve a linked resource through the store
    Resource {
        /// Resource link
        link: String,
    },
    /// Show the identities with local state
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    match run(cli.command, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.error(&e, recovery_suggestion(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, output: &Output) -> Result<()> {
    if let Commands::Config { command } = command {
        return handle_config_command(command, output);
    }

    let config = Config::load().context("Failed to load configuration")?;

    match command {
        Commands::Validate {
            file,
            owner,
            strict,
        } => {
            let owner = owner_id(owner.as_deref(), &file)?;
            commands::document::validate(&file, owner, strict, output)
        }
        Commands::Fingerprint { file, owner } => {
            let owner = owner_id(owner.as_deref(), &file)?;
            commands::document::fingerprint(&file, owner, output)
        }
        Commands::Publish {
            file,
            key,
            edition,
            owner,
        } => {
            let owner = owner_id(owner.as_deref(), &key)?;
            commands::publish::publish(&config, &file, &key, edition, owner, output).await
        }
        Commands::Fetch {
            key,
            edition,
            owner,
        } => {
            let owner = owner_id(owner.as_deref(), &key)?;
            commands::fetch::fetch(&config, &key, edition, owner, output).await
        }
        Commands::Rescue {
            key,
            from,
            skip,
            owner,
        } => {
            let owner = owner_id(owner.as_deref(), &key)?;
            commands::rescue::rescue(&config, &key, from, skip, owner, output).await
        }
        Commands::Resource { link } => commands::resource::resolve(&config, &link, output).await,
        Commands::Status => commands::status::show(&config, output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

/// Identity id from `--owner`, or one derived from `seed`
fn owner_id(owner: Option<&str>, seed: impl AsRef<std::ffi::OsStr>) -> Result<IdentityId> {
    match owner {
        Some(owner) => owner.parse().context("Invalid --owner"),
        None => Ok(IdentityId::derive(&seed.as_ref().to_string_lossy())),
    }
}

/// Hint for errors caused by local state files
fn recovery_suggestion(error: &anyhow::Error) -> Option<&'static str> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<PersistenceError>())
        .and_then(PersistenceError::recovery_suggestion)
}

/// Send logs to stderr so they never mix with command output
///
/// Silent unless `-v` is given or RUST_LOG is set.
fn init_logging(verbose: u8) {
    let env_filter = match verbose {
        0 => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => return,
        },
        1 => EnvFilter::new("fernpost_core=info,fernpost_cli=info"),
        2 => EnvFilter::new("fernpost_core=debug,fernpost_cli=debug"),
        _ => EnvFilter::new("fernpost_core=trace,fernpost_cli=trace"),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .try_init();
}
