//! Flow test CLI - scripted testing for message-passing flow graphs
//!
//! Drives a daemon-hosted flow graph through scripted test cases and
//! reports check outcomes.

use clap::Parser;
use commands::Commands;
use flowtest::{cli, commands, common, daemon};

#[derive(Parser)]
#[command(name = "flow-test", about = "Scripted test runner for flow graphs")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Daemon => {
            common::logging::init_daemon();
            daemon::run().await
        }
        command => {
            common::logging::init_cli();
            cli::dispatch(command).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
