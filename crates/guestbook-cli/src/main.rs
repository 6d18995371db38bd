//! Guestbook CLI - host for the live-refresh subsystem
//!
//! Runs the real-time hub next to the guestbook database, or inspects
//! the configuration it would use.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "guestbook")]
#[command(author = "Guestbook Contributors")]
#[command(version)]
#[command(about = "Live refresh for the Guestbook web application", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where configuration comes from.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Settings file (missing file means defaults)
    #[arg(short, long, default_value = guestbook_core::SETTINGS_FILE)]
    pub settings: PathBuf,

    /// Connection string, overrides settings and environment
    #[arg(short, long)]
    pub connection: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the real-time hub and watch the database
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Address to listen on (overrides settings)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Watch the database and print notifications without a server
    Watch {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Show the resolved configuration
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Serve { config, listen } => commands::serve(&config, listen).await,
        Commands::Watch { config } => commands::watch(&config).await,
        Commands::Check { config } => commands::check(&config),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
