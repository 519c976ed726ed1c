//! appbase entry point.
//!
//! # Responsibility
//! - Load configuration and apply command-line overrides.
//! - Prepare the database before anything serves traffic, and exit non-zero
//!   when it cannot be brought to the latest schema version.

use appbase_core::{
    default_log_level, global_registry, init, init_logging, init_stderr_logging, AppConfig,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "appbase", version, about = "Prepare and migrate the application database")]
struct Cli {
    /// Path to JSON configuration file (defaults are used when omitted)
    #[arg(short, long, env = "APPBASE_CONFIG")]
    config: Option<PathBuf>,

    /// Database driver id (overrides config file)
    #[arg(long, env = "APPBASE_DB_DRIVER")]
    driver: Option<String>,

    /// Database path or DSN (overrides config file)
    #[arg(long, env = "APPBASE_DB_ADDRESS")]
    address: Option<String>,

    /// Log verbosity: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// Absolute directory for rotating log files (stderr when omitted)
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Connect, create base tables, and migrate to the latest schema version
    Init,

    /// List the database drivers compiled into this binary
    Drivers,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=app_exit module=cli status=error error={}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let level = cli.log_level.as_deref().unwrap_or(default_log_level());
    match cli.log_dir.as_deref() {
        Some(log_dir) => init_logging(level, log_dir)?,
        None => init_stderr_logging(level)?,
    }

    match cli.command.unwrap_or(Command::Init) {
        Command::Drivers => {
            for driver_id in global_registry()?.driver_ids() {
                println!("{driver_id}");
            }
            Ok(())
        }
        Command::Init => {
            let config = load_config(&cli)?;
            let accessor = init(&config.database)?;
            let driver = global_registry()?.lookup(accessor.driver_name())?;
            let version = driver.schema_version(&accessor)?;
            info!(
                "event=app_ready module=cli status=ok driver={} schema_version={}",
                accessor.driver_name(),
                version
            );
            println!("driver={} schema_version={}", accessor.driver_name(), version);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("event=config_load module=cli status=start path={}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    if let Some(driver) = &cli.driver {
        config.database.driver = driver.clone();
    }
    if let Some(address) = &cli.address {
        config.database.address = address.clone();
    }
    config.validate()?;
    Ok(config)
}
