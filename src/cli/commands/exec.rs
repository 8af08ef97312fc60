//! Exec command - run a command in a running environment

use crate::backend::create_executor;
use crate::cli::args::ExecArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::session::SessionManager;
use tracing::debug;

/// Execute the exec command
pub async fn execute(args: ExecArgs, config: &Config) -> KilnResult<()> {
    let sessions = SessionManager::new(ConfigManager::sessions_dir());
    if sessions.get(&args.name).await?.is_none() {
        return Err(KilnError::SessionNotFound(args.name.clone()));
    }

    let executor = create_executor(config)?;
    if !executor.is_running(&args.name).await? {
        return Err(KilnError::InstanceNotFound(args.name.clone()));
    }

    debug!("Executing in {}: {:?}", args.name, args.command);
    let output = executor
        .execute(
            &args.name,
            &args.command,
            false,
            config.session.execute_timeout(),
        )
        .await?;

    if output.exit_code != 0 {
        return Err(KilnError::CommandNonZero {
            instance: args.name,
            exit_code: output.exit_code,
            stderr: String::new(),
        });
    }

    Ok(())
}
