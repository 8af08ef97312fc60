//! List command - show environments and cached bases

use crate::base::BaseInstanceCache;
use crate::cli::args::{ListArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use crate::session::{Session, SessionManager, SessionStatus};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the list command
pub async fn execute(args: ListArgs, config: &Config) -> KilnResult<()> {
    let sessions = SessionManager::new(ConfigManager::sessions_dir())
        .list()
        .await?;

    match args.format {
        OutputFormat::Json => print_json(&sessions, args.bases, config).await?,
        OutputFormat::Table => {
            print_sessions_table(&sessions);
            if args.bases {
                print_bases_table(config).await?;
            }
        }
    }

    Ok(())
}

fn print_sessions_table(sessions: &[Session]) {
    let ctx = UiContext::detect();

    if sessions.is_empty() {
        ui::step_info(&ctx, "No environments");
        return;
    }

    println!(
        "{:<20} {:<14} {:<17} {:<17}",
        style("NAME").bold(),
        style("STATUS").bold(),
        style("CREATED").bold(),
        style("DESTROY AFTER").bold()
    );
    println!("{}", "-".repeat(68));

    for session in sessions {
        let status_styled = match session.status {
            SessionStatus::Ready => style("ready").green(),
            SessionStatus::Provisioning => style("provisioning").yellow(),
            SessionStatus::Stopped => style("stopped").dim(),
            SessionStatus::Failed => style("failed").red(),
        };

        let created = session.created_at.format("%Y-%m-%d %H:%M").to_string();
        let destroy_after = session
            .destroy_after
            .map_or_else(|| "-".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string());

        println!(
            "{:<20} {:<14} {:<17} {:<17}",
            session.name, status_styled, created, destroy_after
        );
    }

    println!();
    println!("{} environment(s)", sessions.len());
}

async fn print_bases_table(config: &Config) -> KilnResult<()> {
    let records = BaseInstanceCache::new(ConfigManager::bases_dir())
        .list()
        .await?;

    println!();
    if records.is_empty() {
        let ctx = UiContext::detect();
        ui::step_info(&ctx, "No cached bases");
        return Ok(());
    }

    println!(
        "{:<40} {:<16} {:<10} {:<8}",
        style("BASE").bold(),
        style("TAG").bold(),
        style("SETUP").bold(),
        style("AGE").bold()
    );
    println!("{}", "-".repeat(74));

    let expiry_days = config.provision.expiry_days;
    for record in records {
        let age_days = (chrono::Utc::now() - record.created_at).num_days();
        let setup = if record.setup_complete {
            style("complete").green()
        } else if record.is_abandoned() {
            style("abandoned").red()
        } else {
            style("building").yellow()
        };
        let age = if record.is_older_than_days(expiry_days) {
            style(format!("{age_days}d")).red()
        } else {
            style(format!("{age_days}d")).dim()
        };

        println!(
            "{:<40} {:<16} {:<10} {:<8}",
            record.instance_name,
            record.compatibility_tag.to_string(),
            setup,
            age
        );
    }

    Ok(())
}

async fn print_json(sessions: &[Session], include_bases: bool, _config: &Config) -> KilnResult<()> {
    if include_bases {
        let bases = BaseInstanceCache::new(ConfigManager::bases_dir())
            .list()
            .await?;
        let combined = serde_json::json!({
            "environments": sessions,
            "bases": bases,
        });
        println!("{}", serde_json::to_string_pretty(&combined)?);
    } else {
        println!("{}", serde_json::to_string_pretty(sessions)?);
    }
    Ok(())
}
