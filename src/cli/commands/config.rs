//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use tokio::fs;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config) -> KilnResult<()> {
    let manager = ConfigManager::new();

    match args.action {
        None | Some(ConfigAction::Show) => show_config(config),
        Some(ConfigAction::Path) => show_path(&manager),
        Some(ConfigAction::Set { key, value, local }) => {
            if local {
                set_local_value(&key, &value).await?;
            } else {
                set_value(&manager, config, &key, &value).await?;
            }
        }
    }

    Ok(())
}

fn show_config(config: &Config) {
    let toml =
        toml::to_string_pretty(config).unwrap_or_else(|_| "Error serializing config".to_string());
    println!("{toml}");
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = value.to_string(),

        ["backend", "kind"] => config.backend.kind = value.to_string(),
        ["backend", "lxd_project"] => config.backend.lxd_project = Some(value.to_string()),

        ["base", "family"] => config.base.family = value.to_string(),
        ["base", "release"] => config.base.release = value.to_string(),
        ["base", "packages"] => {
            config.base.packages = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        ["provision", "expiry_days"] => config.provision.expiry_days = parse_u32(value)?,
        ["provision", "lock_timeout_secs"] => {
            config.provision.lock_timeout_secs = parse_u64(value)?;
        }
        ["provision", "setup_attempts"] => config.provision.setup_attempts = parse_u32(value)?,
        ["provision", "attempt_timeout_secs"] => {
            config.provision.attempt_timeout_secs = parse_u64(value)?;
        }
        ["provision", "operation_deadline_secs"] => {
            config.provision.operation_deadline_secs = parse_u64(value)?;
        }
        ["provision", "overall_deadline_secs"] => {
            config.provision.overall_deadline_secs = parse_u64(value)?;
        }

        ["session", "execute_timeout_secs"] => {
            config.session.execute_timeout_secs = parse_u64(value)?;
        }
        ["session", "auto_cleanup_hours"] => {
            config.session.auto_cleanup_hours = parse_u32(value)?;
        }

        _ => {
            ui::step_error(&ctx, &format!("Unknown config key: {key}"));
            print_valid_keys();
            return Ok(());
        }
    }

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {key} = {value}"));

    Ok(())
}

async fn set_local_value(key: &str, value: &str) -> KilnResult<()> {
    let ctx = UiContext::detect();

    let cwd = std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e))?;
    let local_path = cwd.join(LOCAL_CONFIG_NAME);

    validate_config_key(key)?;

    // Load existing local config or start with an empty TOML table
    let mut doc: toml::Value = if local_path.exists() {
        let content = fs::read_to_string(&local_path)
            .await
            .map_err(|e| KilnError::io(format!("reading {}", local_path.display()), e))?;
        content
            .parse()
            .map_err(|e: toml::de::Error| KilnError::ConfigInvalid {
                path: local_path.clone(),
                reason: e.to_string(),
            })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut doc, key, value)?;

    // Write back only the keys the user has explicitly set
    let content = toml::to_string_pretty(&doc)?;
    fs::write(&local_path, content)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", local_path.display()), e))?;

    ui::step_ok(
        &ctx,
        &format!("Set {key} = {value} in {}", local_path.display()),
    );

    Ok(())
}

/// Validate that a config key is one we recognise.
fn validate_config_key(key: &str) -> KilnResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "log_format"]
        | ["backend", "kind" | "lxd_project"]
        | ["base", "family" | "release" | "packages"]
        | ["provision", "expiry_days" | "lock_timeout_secs" | "setup_attempts"
            | "attempt_timeout_secs" | "operation_deadline_secs" | "overall_deadline_secs"]
        | ["session", "execute_timeout_secs" | "auto_cleanup_hours"] => Ok(()),
        _ => Err(KilnError::User(format!("Unknown config key: {key}"))),
    }
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed.
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> KilnResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = doc;

    for &part in &parts[..parts.len() - 1] {
        current = current
            .as_table_mut()
            .ok_or_else(|| KilnError::User(format!("Expected table at key: {part}")))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let leaf = parts.last().copied().unwrap_or(key);
    let table = current
        .as_table_mut()
        .ok_or_else(|| KilnError::User(format!("Expected table for key: {key}")))?;

    let toml_value = if key.ends_with("packages") {
        let items: Vec<toml::Value> = value
            .split(',')
            .map(|s| toml::Value::String(s.trim().to_string()))
            .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
            .collect();
        toml::Value::Array(items)
    } else if value == "true" || value == "false" {
        toml::Value::Boolean(value == "true")
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    };

    table.insert(leaf.to_string(), toml_value);
    Ok(())
}

fn parse_u32(value: &str) -> KilnResult<u32> {
    value
        .parse()
        .map_err(|_| KilnError::User(format!("Invalid number: {value}")))
}

fn parse_u64(value: &str) -> KilnResult<u64> {
    value
        .parse()
        .map_err(|_| KilnError::User(format!("Invalid number: {value}")))
}

fn print_valid_keys() {
    let keys = [
        "general.log_format",
        "backend.kind",
        "backend.lxd_project",
        "base.family",
        "base.release",
        "base.packages",
        "provision.expiry_days",
        "provision.lock_timeout_secs",
        "provision.setup_attempts",
        "provision.attempt_timeout_secs",
        "provision.operation_deadline_secs",
        "provision.overall_deadline_secs",
        "session.execute_timeout_secs",
        "session.auto_cleanup_hours",
    ];

    eprintln!("Valid keys:");
    for key in keys {
        eprintln!("  {key}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_known_keys() {
        assert!(validate_config_key("base.release").is_ok());
        assert!(validate_config_key("provision.expiry_days").is_ok());
        assert!(validate_config_key("nope.nope").is_err());
    }

    #[test]
    fn set_toml_value_creates_tables() {
        let mut doc = toml::Value::Table(toml::map::Map::new());
        set_toml_value(&mut doc, "base.release", "22.04").unwrap();
        assert_eq!(
            doc["base"]["release"].as_str(),
            Some("22.04")
        );
    }

    #[test]
    fn set_toml_value_packages_as_array() {
        let mut doc = toml::Value::Table(toml::map::Map::new());
        set_toml_value(&mut doc, "base.packages", "gcc, make").unwrap();
        let arr = doc["base"]["packages"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0].as_str(), Some("gcc"));
    }

    #[test]
    fn set_toml_value_numbers() {
        let mut doc = toml::Value::Table(toml::map::Map::new());
        set_toml_value(&mut doc, "provision.expiry_days", "30").unwrap();
        assert_eq!(doc["provision"]["expiry_days"].as_integer(), Some(30));
    }
}
