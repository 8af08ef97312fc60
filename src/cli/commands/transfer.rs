//! Push and pull commands - move files in and out of an environment

use crate::backend::create_executor;
use crate::cli::args::{PullArgs, PushArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::session::SessionManager;
use crate::ui::{self, UiContext};

/// Execute the push command
pub async fn push(args: PushArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect();
    require_session(&args.name).await?;

    if !args.local.exists() {
        return Err(KilnError::PathNotFound(args.local.clone()));
    }

    let executor = create_executor(config)?;
    executor
        .push_file(&args.name, &args.local, &args.remote)
        .await?;

    ui::step_ok(
        &ctx,
        &format!("Pushed {} to {}:{}", args.local.display(), args.name, args.remote),
    );
    Ok(())
}

/// Execute the pull command
pub async fn pull(args: PullArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect();
    require_session(&args.name).await?;

    let executor = create_executor(config)?;
    executor
        .pull_file(&args.name, &args.remote, &args.local)
        .await?;

    ui::step_ok(
        &ctx,
        &format!("Pulled {}:{} to {}", args.name, args.remote, args.local.display()),
    );
    Ok(())
}

async fn require_session(name: &str) -> KilnResult<()> {
    let sessions = SessionManager::new(ConfigManager::sessions_dir());
    if sessions.get(name).await?.is_none() {
        return Err(KilnError::SessionNotFound(name.to_string()));
    }
    Ok(())
}
