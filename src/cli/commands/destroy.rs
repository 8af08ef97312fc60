//! Destroy command - tear down a working environment

use crate::backend::create_executor;
use crate::cli::args::DestroyArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::session::SessionManager;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the destroy command
pub async fn execute(args: DestroyArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);
    let sessions = SessionManager::new(ConfigManager::sessions_dir());

    if sessions.get(&args.name).await?.is_none() {
        return Err(KilnError::SessionNotFound(args.name.clone()));
    }

    let confirmed = ui::confirm(
        &ctx,
        &format!("Destroy environment {}?", args.name),
        true,
    )
    .await?;
    if !confirmed {
        ui::step_info(&ctx, "Aborted");
        return Ok(());
    }

    let executor = create_executor(config)?;
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Destroying {}...", args.name));

    if let Err(e) = executor.destroy(&args.name).await {
        spinner.stop_error(&format!("Failed to destroy {}: {}", args.name, e));
        return Err(e);
    }
    sessions.delete(&args.name).await?;

    spinner.stop(&format!("Destroyed {}", args.name));
    Ok(())
}
