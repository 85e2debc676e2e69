//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init`.

use clap::Subcommand;
use opgate::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective configuration (file values over defaults)
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(),
        ConfigCommands::Show => run_show(),
        ConfigCommands::Init { force } => run_init(force),
    }
}

fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

fn run_show() -> Result<(), CliError> {
    let path = config_file_path();
    let config = ConfigFile::load()?;

    println!("Configuration Settings");
    println!("======================");
    if path.exists() {
        println!("(from {})", path.display());
    } else {
        println!("(defaults, {} not found)", path.display());
    }
    println!();
    println!("[executor]");
    println!(
        "  max_concurrent_operations = {}",
        config.executor.max_concurrent_operations
    );
    match config.executor.operation_timeout {
        Some(timeout) => println!("  operation_timeout_ms      = {}", timeout.as_millis()),
        None => println!("  operation_timeout_ms      = 0 (wait indefinitely)"),
    }
    println!(
        "  success_status            = {}",
        config.executor.success_status
    );
    println!();
    println!("[logging]");
    println!(
        "  directory                 = {}",
        config.logging.directory.display()
    );
    println!("  file                      = {}", config.logging.file);

    Ok(())
}

fn run_init(force: bool) -> Result<(), CliError> {
    let path = if force {
        let path = config_file_path();
        ConfigFile::default().save_to(&path)?;
        path
    } else {
        let path = config_file_path();
        if path.exists() {
            println!("Config file already exists: {}", path.display());
            println!("Use --force to overwrite it with defaults.");
            return Ok(());
        }
        ConfigFile::ensure_exists()?
    };

    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
