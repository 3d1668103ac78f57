use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lunear::config::{AppConfig, CliOverrides};

mod cmd;

#[derive(Parser)]
#[command(name = "lunear")]
#[command(version, about = "Multi-tenant issue tracker")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a config file (defaults to ./lunear.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite file path or `file:` URL
        #[arg(long)]
        db_path: Option<String>,

        /// Permissive CORS for a separately served front-end
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations, then exit
    Init {
        #[arg(long)]
        db_path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut overrides = CliOverrides {
        verbose: cli.verbose,
        ..CliOverrides::default()
    };
    match &cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            ..
        } => {
            overrides.host = host.clone();
            overrides.port = *port;
            overrides.db_path = db_path.clone();
        }
        Commands::Init { db_path } => overrides.db_path = db_path.clone(),
    }

    let config = AppConfig::load(cli.config.as_deref(), &overrides).context("Failed to load configuration")?;
    lunear::logging::init(&config);

    match cli.command {
        Commands::Serve { dev, .. } => cmd::cmd_serve(&config, dev).await?,
        Commands::Init { .. } => cmd::cmd_init(&config)?,
    }
    Ok(())
}
