//! Launch command - provision and enter a build environment

use crate::cli::args::{LaunchArgs, ShutdownMode};
use crate::cli::commands::build_provisioner;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::provision::ShutdownPolicy;
use crate::ui::{self, UiContext};
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Execute the launch command
pub async fn execute(args: LaunchArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let (executor, provisioner) = build_provisioner(config)?;

    let pb = ui::provision_spinner(&ctx, "Preparing build environment...");

    pb.set_message(format!("Checking {}...", executor.backend_name()));
    executor.ensure_ready().await?;

    let spec = resolve_spec(&args, config)?;
    let name = args.name.clone().unwrap_or_else(generate_instance_name);
    debug!(
        "Launching {} from {} (key {})",
        name,
        spec.image(),
        spec.cache_key()
    );

    // Destroying an idle environment right after provisioning it would make
    // the launch pointless; with no command to run, keep it and let the
    // user tear down with `kiln destroy`.
    let mut policy = shutdown_policy(&args);
    if args.command.is_empty() && matches!(args.shutdown, ShutdownMode::Destroy) {
        policy = ShutdownPolicy::Keep;
    }

    pb.set_message(format!("Provisioning base for {}...", spec.image()));
    let env = match provisioner.launched_environment(&spec, &name, policy).await {
        Ok(env) => env,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e);
        }
    };

    // Mounts apply to the working clone only, never the shared base.
    for mount in &args.mount {
        let (host, target) = parse_mount(mount)?;
        pb.set_message(format!("Mounting {}...", host.display()));
        env.instance().mount(&host, &target).await?;
    }

    pb.finish_and_clear();

    if args.command.is_empty() {
        info!("Environment {} ready", name);
        println!(
            "{} Environment {} ready ({})",
            style("✓").green(),
            style(&name).cyan(),
            executor.backend_name()
        );
        println!("  Run with:     kiln exec {name} -- <command>");
        println!("  Destroy with: kiln destroy {name}");

        if matches!(args.shutdown, ShutdownMode::Destroy) {
            ui::step_info(&ctx, "No command given; leaving environment running");
        }
        env.shutdown().await;
        return Ok(());
    }

    info!("Running command in {}: {:?}", name, args.command);
    let result = env.instance().execute(&args.command, false).await;

    // Teardown runs on every exit path, including command failure.
    let instance_name = env.instance().name().to_string();
    env.shutdown().await;

    let output = result?;
    if output.exit_code != 0 {
        println!(
            "{} Command exited with code {}",
            style("!").yellow(),
            output.exit_code
        );
        return Err(KilnError::CommandNonZero {
            instance: instance_name,
            exit_code: output.exit_code,
            stderr: String::new(),
        });
    }

    Ok(())
}

fn resolve_spec(
    args: &LaunchArgs,
    config: &Config,
) -> KilnResult<crate::base::BaseSpecification> {
    let mut base = config.base.clone();
    if let Some(ref family) = args.family {
        base.family = family.clone();
    }
    if let Some(ref release) = args.release {
        base.release = release.clone();
    }
    if !args.packages.is_empty() {
        base.packages = args.packages.clone();
    }
    base.to_specification()
}

fn shutdown_policy(args: &LaunchArgs) -> ShutdownPolicy {
    match args.shutdown {
        ShutdownMode::Destroy => ShutdownPolicy::Destroy,
        ShutdownMode::Defer => ShutdownPolicy::Defer(Duration::from_secs(args.shutdown_delay)),
        ShutdownMode::Keep => ShutdownPolicy::Keep,
    }
}

fn parse_mount(mount: &str) -> KilnResult<(PathBuf, String)> {
    let (host, target) = mount
        .split_once(':')
        .ok_or_else(|| KilnError::User(format!("invalid mount '{mount}', expected host:target")))?;
    let host = PathBuf::from(host)
        .canonicalize()
        .map_err(|e| KilnError::io(format!("resolving mount source {host}"), e))?;
    Ok((host, target.to_string()))
}

fn generate_instance_name() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("kiln-{}", timestamp % 100_000)
}
