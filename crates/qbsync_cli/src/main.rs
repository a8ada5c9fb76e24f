//! qbsync CLI
//!
//! Command-line tools for running and testing a QuickBooks Web Connector
//! sync service.
//!
//! # Commands
//!
//! - `qwc` - Generate the `.qwc` file the Web Connector imports
//! - `simulate` - Run a full sync cycle against an in-process server
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::qwc::Profile;
use commands::simulate::{OutputFormat, SimulateOptions};
use qbsync_protocol::Phase;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// qbsync command-line tools.
#[derive(Parser)]
#[command(name = "qbsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a Web Connector configuration file
    Qwc {
        /// Deployment profile
        #[arg(short, long, value_enum, default_value_t = Profile::Development)]
        profile: Profile,

        /// Base URL of the sync server (overrides the profile's)
        #[arg(long)]
        server_url: Option<String>,

        /// Web Connector user name (overrides the profile's)
        #[arg(short, long)]
        username: Option<String>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a complete sync cycle against an in-process server
    Simulate {
        /// Items in the simulated company file
        #[arg(long, default_value = "3")]
        items: usize,

        /// Customers in the simulated company file
        #[arg(long, default_value = "2")]
        customers: usize,

        /// Sales receipts in the simulated company file
        #[arg(long, default_value = "4")]
        receipts: usize,

        /// Invoices in the simulated company file; non-zero also queries them
        #[arg(long, default_value = "0")]
        invoices: usize,

        /// Make QuickBooks reject this phase (company, items, customers, sales)
        #[arg(long)]
        fail_phase: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Qwc {
            profile,
            server_url,
            username,
            output,
        } => {
            commands::qwc::run(
                profile,
                server_url.as_deref(),
                username.as_deref(),
                output.as_deref(),
            )?;
        }
        Commands::Simulate {
            items,
            customers,
            receipts,
            invoices,
            fail_phase,
            format,
        } => {
            let fail_phase = fail_phase.map(|name| name.parse::<Phase>()).transpose()?;
            commands::simulate::run(&SimulateOptions {
                items,
                customers,
                receipts,
                invoices,
                fail_phase,
                format,
            })?;
        }
        Commands::Version => {
            println!("qbsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Web Connector protocol namespace {}", qbsync_protocol::QBWC_NS);
        }
    }

    Ok(())
}
