//! Clean command - reap deferred teardowns, expired bases, stale records

use crate::backend::create_executor;
use crate::cli::args::CleanArgs;
use crate::config::Config;
use crate::error::KilnResult;
use crate::provision::ProviderContext;
use crate::ui::{self, UiContext};
use tracing::warn;

/// Execute the clean command
pub async fn execute(args: CleanArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect().with_auto_yes(args.yes);
    let executor = create_executor(config)?;
    let context = ProviderContext::new(config.clone());

    ui::intro(&ctx, "Kiln Clean");

    // Working instances whose deferred teardown is due.
    let due = context.sessions.due_for_teardown().await?;
    for session in &due {
        if args.dry_run {
            ui::step_info(&ctx, &format!("Would destroy {} (teardown due)", session.name));
            continue;
        }
        match executor.destroy(&session.name).await {
            Ok(()) => {
                context.sessions.delete(&session.name).await?;
                ui::step_ok(&ctx, &format!("Destroyed {} (teardown due)", session.name));
            }
            Err(e) => {
                // Best-effort: skip and leave the record for the next run.
                warn!("Failed to destroy {}: {}", session.name, e);
                ui::step_warn(&ctx, &format!("Could not destroy {}: {e}", session.name));
            }
        }
    }

    // Base instances past expiry, abandoned mid-setup, or (with --all) all.
    let expiry_days = config.provision.expiry_days;
    let records = context.cache.list().await?;
    let mut removed_bases = 0;
    for record in records {
        let stale = args.all || record.is_abandoned() || record.is_older_than_days(expiry_days);
        if !stale {
            continue;
        }

        if args.dry_run {
            ui::step_info(
                &ctx,
                &format!("Would destroy base {}", record.instance_name),
            );
            continue;
        }

        if args.all {
            let confirmed = ui::confirm(
                &ctx,
                &format!("Destroy base {}?", record.instance_name),
                true,
            )
            .await?;
            if !confirmed {
                continue;
            }
        }

        match executor.destroy(&record.instance_name).await {
            Ok(()) => {
                context.cache.invalidate(&record.cache_key).await?;
                removed_bases += 1;
                ui::step_ok(&ctx, &format!("Destroyed base {}", record.instance_name));
            }
            Err(e) => {
                warn!("Failed to destroy base {}: {}", record.instance_name, e);
                ui::step_warn(
                    &ctx,
                    &format!("Could not destroy base {}: {e}", record.instance_name),
                );
            }
        }
    }

    // Old stopped/failed session records.
    let cleaned = if args.dry_run {
        0
    } else {
        context
            .sessions
            .cleanup(config.session.auto_cleanup_hours)
            .await?
    };

    if args.dry_run {
        ui::outro_success(&ctx, "Dry run complete");
    } else {
        ui::outro_success(&ctx, &format!(
            "Cleaned: {} environment(s), {} base(s), {} stale record(s)",
            due.len(),
            removed_bases,
            cleaned
        ));
    }

    Ok(())
}
