//! Init command - create project-local .kiln.toml

use crate::cli::args::InitArgs;
use crate::config::LOCAL_CONFIG_NAME;
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Template for project-local config
const INIT_TEMPLATE: &str = r#"# Kiln project configuration
# Settings here override your global config (~/.config/kiln/config.toml)

[base]
family = "ubuntu"
release = "24.04"
packages = ["build-essential", "git", "curl"]
# Extra setup commands run in order after package installation:
# setup = [["bash", "-c", "corepack enable"]]

# [backend]
# kind = "lxd"          # or "multipass"
# lxd_project = "kiln"

# [provision]
# expiry_days = 90      # rebuild bases unrefreshed for this long
"#;

/// Execute the init command
pub async fn execute(args: InitArgs) -> KilnResult<()> {
    let ctx = UiContext::detect();

    let target_dir = match args.path {
        Some(ref p) => p.clone(),
        None => {
            std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e))?
        }
    };

    let config_path = target_dir.join(LOCAL_CONFIG_NAME);

    if config_path.exists() && !args.force {
        return Err(KilnError::User(format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }

    ensure_dir(&target_dir).await?;

    fs::write(&config_path, INIT_TEMPLATE)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", config_path.display()), e))?;

    ui::step_ok(
        &ctx,
        &format!("Created project config at {}", config_path.display()),
    );

    Ok(())
}

async fn ensure_dir(dir: &Path) -> KilnResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| KilnError::io(format!("creating directory {}", dir.display()), e))?;
    }
    Ok(())
}
