//! Kiln - isolated build environments
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::{Cli, Commands};
use kiln::config::ConfigManager;
use kiln::error::KilnResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("kiln=warn"),
        1 => EnvFilter::new("kiln=info"),
        _ => EnvFilter::new("kiln=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    // Commands that need no config loading
    match cli.command {
        Commands::Init(args) => return kiln::cli::commands::init(args).await,
        Commands::Completions(args) => return kiln::cli::commands::completions(args),
        _ => {}
    }

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        debug!("Local config discovery disabled (--no-local)");
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| kiln::error::KilnError::io("getting current directory", e))?;
        let found = ConfigManager::find_local_config(&cwd);
        if let Some(ref path) = found {
            debug!("Found local config: {}", path.display());
        }
        found
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    // Ensure state directories exist
    ConfigManager::ensure_state_dirs().await?;

    // Dispatch to command
    match cli.command {
        Commands::Init(_) | Commands::Completions(_) => unreachable!("handled above"),
        Commands::Launch(args) => kiln::cli::commands::launch(args, &config).await,
        Commands::Exec(args) => kiln::cli::commands::exec(args, &config).await,
        Commands::Push(args) => kiln::cli::commands::push(args, &config).await,
        Commands::Pull(args) => kiln::cli::commands::pull(args, &config).await,
        Commands::List(args) => kiln::cli::commands::list(args, &config).await,
        Commands::Destroy(args) => kiln::cli::commands::destroy(args, &config).await,
        Commands::Clean(args) => kiln::cli::commands::clean(args, &config).await,
        Commands::Status => kiln::cli::commands::status(&config).await,
        Commands::Config(args) => kiln::cli::commands::config(args, &config).await,
    }
}
