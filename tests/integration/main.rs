//! Integration tests for Kiln

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn kiln(state: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("kiln");
        // Isolate state and config from the host machine.
        cmd.env("KILN_STATE_DIR", state.path().join("state"));
        cmd.env("KILN_CONFIG", state.path().join("config.toml"));
        cmd.arg("--no-local");
        cmd
    }

    #[test]
    fn help_displays() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("isolated build environments"));
    }

    #[test]
    fn version_displays() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }

    #[test]
    fn status_runs() {
        // Status reports even when no backend is installed.
        let state = TempDir::new().unwrap();
        kiln(&state)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Kiln Status"));
    }

    #[test]
    fn list_empty() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("No environments").or(predicate::str::contains("NAME")));
    }

    #[test]
    fn list_json_empty() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn config_path() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[backend]"));
    }

    #[test]
    fn exec_missing_session() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["exec", "nonexistent", "--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Session not found"));
    }

    #[test]
    fn destroy_missing_session() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["destroy", "nonexistent", "--yes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Session not found"));
    }

    #[test]
    fn push_missing_session() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["push", "nonexistent", "Cargo.toml", "/tmp/x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Session not found"));
    }

    #[test]
    fn init_creates_local_config() {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        kiln(&state)
            .args(["init", "--path"])
            .arg(project.path())
            .assert()
            .success();

        let config_path = project.path().join(".kiln.toml");
        assert!(config_path.exists());
        let content = std::fs::read_to_string(config_path).unwrap();
        assert!(content.contains("[base]"));
    }

    #[test]
    fn init_refuses_overwrite() {
        let state = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join(".kiln.toml"), "").unwrap();

        kiln(&state)
            .args(["init", "--path"])
            .arg(project.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn clean_dry_run_empty() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["clean", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run complete"));
    }

    #[test]
    fn completions_generate() {
        let state = TempDir::new().unwrap();
        kiln(&state)
            .args(["completions", "bash"])
            .assert()
            .success()
            .stdout(predicate::str::contains("kiln"));
    }
}
