//! Status command - check backend health and cache state

use crate::backend::create_executor;
use crate::base::BaseInstanceCache;
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use crate::session::SessionManager;
use crate::ui::{self, UiContext};

/// Execute the status command
pub async fn execute(config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Kiln Status");

    let executor = create_executor(config)?;

    ui::key_value(&ctx, "Backend", executor.backend_name());
    match executor.is_available().await {
        Ok(true) => match executor.ensure_ready().await {
            Ok(()) => ui::key_value_status(&ctx, "Daemon", "ready", true),
            Err(e) => ui::key_value_status(&ctx, "Daemon", &e.to_string(), false),
        },
        Ok(false) => ui::key_value_status(&ctx, "Daemon", "not installed", false),
        Err(e) => ui::key_value_status(&ctx, "Daemon", &e.to_string(), false),
    }

    let base = config.base.to_specification();
    match base {
        Ok(spec) => {
            ui::key_value(&ctx, "Base image", &spec.image());
            ui::key_value(&ctx, "Cache key", &spec.cache_key());
        }
        Err(e) => ui::key_value_status(&ctx, "Base spec", &e.to_string(), false),
    }

    let bases = BaseInstanceCache::new(ConfigManager::bases_dir())
        .list()
        .await?;
    let complete = bases.iter().filter(|r| r.setup_complete).count();
    ui::key_value(
        &ctx,
        "Cached bases",
        &format!("{} ({} complete)", bases.len(), complete),
    );

    let sessions = SessionManager::new(ConfigManager::sessions_dir())
        .list()
        .await?;
    ui::key_value(&ctx, "Environments", &sessions.len().to_string());
    ui::key_value(
        &ctx,
        "State dir",
        &ConfigManager::state_dir().display().to_string(),
    );

    ui::outro_success(&ctx, "Status check complete");
    Ok(())
}
