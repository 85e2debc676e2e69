//! opgate CLI - Command-line interface
//!
//! Drives the operation executor against a simulated radio and manages the
//! configuration file.

mod commands;
mod error;
mod radio;
mod runner;

use clap::{Parser, Subcommand};
use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "opgate")]
#[command(version = opgate::VERSION)]
#[command(about = "Admission-controlled execution of hardware operations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run operations against a simulated half-duplex radio
    Simulate(SimulateArgs),

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate(args) => commands::simulate::run(args).await,
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
