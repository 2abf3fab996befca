//! Depot CLI - resolve, proxy and cache Maven artifacts

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;
mod util;

use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "depot")]
#[command(author = "Depot Contributors")]
#[command(version)]
#[command(about = "Artifact repository engine: resolve, proxy and cache Maven artifacts", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: <config dir>/depot/depot.yaml)
    #[arg(short, long, global = true, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,

    /// Never contact remote repositories
    #[arg(long, global = true)]
    offline: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an item and write its content
    Get {
        /// Item to fetch (repo:path)
        id: String,

        /// Output file (if not set, writes to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show the response headers only
        #[arg(long)]
        head: bool,

        /// Skip the transfer unless modified after this RFC 3339 time
        #[arg(long, value_parser = util::parse_datetime)]
        if_modified_since: Option<DateTime<Utc>>,

        /// Act as this user
        #[arg(short, long, env = "DEPOT_USER")]
        user: Option<String>,
    },

    /// Deploy a file into a local repository
    Deploy {
        /// Target (local-repo:path)
        id: String,

        /// File to upload
        file: PathBuf,

        /// Declared checksum to verify (type=value, e.g. sha1=abc...)
        #[arg(long = "checksum")]
        checksums: Vec<String>,

        /// Property to attach (key=value)
        #[arg(short = 'p', long = "property")]
        properties: Vec<String>,

        /// Act as this user
        #[arg(short, long, env = "DEPOT_USER")]
        user: Option<String>,
    },

    /// Expire cached copies so they are fetched again
    Invalidate {
        /// Repository path (remote, cache, virtual or `repo` for all remotes)
        id: String,

        /// Also expire everything below the path
        #[arg(short, long)]
        recursive: bool,
    },

    /// List a folder of a remote repository
    Ls {
        /// Remote repository key
        key: String,

        /// Folder path
        #[arg(default_value = "")]
        path: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect configured repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// List configured repositories
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the configuration
    Check,

    /// Print the effective configuration, defaults included
    Show,

    /// Print the default configuration path
    Path,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();

    if cli.debug {
        // SAFETY: We're the only thread at this point (start of main)
        unsafe { std::env::set_var("RUST_BACKTRACE", "1") };
    }
    init_tracing(cli.debug);

    let code = match run(cli) {
        Ok(()) => exit_codes::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            code
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::internal(format!("Failed to start async runtime: {}", e)))?;
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Get {
            id,
            output,
            head,
            if_modified_since,
            user,
        } => {
            commands::get::run(
                config,
                cli.offline,
                &id,
                output.as_deref(),
                head,
                if_modified_since,
                user.as_deref(),
            )
            .await
        }

        Commands::Deploy {
            id,
            file,
            checksums,
            properties,
            user,
        } => {
            commands::deploy::run(
                config,
                &id,
                &file,
                &checksums,
                &properties,
                user.as_deref(),
            )
            .await
        }

        Commands::Invalidate { id, recursive } => {
            commands::invalidate::run(config, &id, recursive).await
        }

        Commands::Ls { key, path, json } => {
            commands::ls::run(config, cli.offline, &key, &path, json).await
        }

        Commands::Repo { command } => match command {
            RepoCommands::List { json } => commands::repo::list(config, json),
        },

        Commands::Config { command } => match command {
            ConfigCommands::Check => commands::config::check(config),
            ConfigCommands::Show => commands::config::show(config),
            ConfigCommands::Path => commands::config::path(),
        },
    }
}
