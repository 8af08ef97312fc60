//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - isolated build environments
///
/// Provisions, reuses, and tears down container/VM build environments,
/// caching fully set-up base instances so repeat launches are cheap clones.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .kiln.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a build environment, optionally running a command in it
    Launch(LaunchArgs),

    /// Execute a command in a running environment
    Exec(ExecArgs),

    /// Push a file into a running environment
    Push(PushArgs),

    /// Pull a file out of a running environment
    Pull(PullArgs),

    /// List environments and cached bases
    List(ListArgs),

    /// Destroy a running environment
    Destroy(DestroyArgs),

    /// Reap deferred teardowns and expired base instances
    Clean(CleanArgs),

    /// Check backend health and cache state
    Status,

    /// Initialize a project-local .kiln.toml config
    Init(InitArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// What to do with the environment when the launch command finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShutdownMode {
    /// Destroy the environment immediately
    Destroy,
    /// Keep it running; destroy after --shutdown-delay (kiln clean reaps it)
    Defer,
    /// Leave it running indefinitely
    Keep,
}

/// Arguments for the launch command
#[derive(Parser, Debug)]
pub struct LaunchArgs {
    /// Environment name (auto-generated if not provided)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Distribution family (overrides config)
    #[arg(long)]
    pub family: Option<String>,

    /// Release name, e.g. 24.04 (overrides config)
    #[arg(long)]
    pub release: Option<String>,

    /// Packages to install during base setup (overrides config)
    #[arg(long, value_delimiter = ',')]
    pub packages: Vec<String>,

    /// Mount host directories into the environment (host:target)
    #[arg(long)]
    pub mount: Vec<String>,

    /// Shutdown behavior once the command finishes
    #[arg(long, value_enum, default_value = "destroy")]
    pub shutdown: ShutdownMode,

    /// Teardown delay in seconds for --shutdown defer
    #[arg(long, default_value = "3600")]
    pub shutdown_delay: u64,

    /// Command to run in the environment (interactive use: launch, then exec)
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for the exec command
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Environment name
    pub name: String,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the push command
#[derive(Parser, Debug)]
pub struct PushArgs {
    /// Environment name
    pub name: String,

    /// Host file to push
    pub local: PathBuf,

    /// Destination path inside the environment
    pub remote: String,
}

/// Arguments for the pull command
#[derive(Parser, Debug)]
pub struct PullArgs {
    /// Environment name
    pub name: String,

    /// Source path inside the environment
    pub remote: String,

    /// Host destination path
    pub local: PathBuf,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Also list cached base instances
    #[arg(short, long)]
    pub bases: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the destroy command
#[derive(Parser, Debug)]
pub struct DestroyArgs {
    /// Environment name
    pub name: String,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the clean command
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Also destroy all cached base instances
    #[arg(long)]
    pub all: bool,

    /// Show what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing .kiln.toml
    #[arg(short, long)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., base.release)
        key: String,
        /// Value to set
        value: String,
        /// Write to project-local .kiln.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_launch() {
        let cli = Cli::parse_from(["kiln", "launch", "--name", "build-1", "--", "make"]);
        match cli.command {
            Commands::Launch(args) => {
                assert_eq!(args.name.as_deref(), Some("build-1"));
                assert_eq!(args.command, vec!["make"]);
                assert_eq!(args.shutdown, ShutdownMode::Destroy);
            }
            _ => panic!("expected Launch command"),
        }
    }

    #[test]
    fn cli_parses_launch_shutdown_modes() {
        let cli = Cli::parse_from([
            "kiln",
            "launch",
            "--shutdown",
            "defer",
            "--shutdown-delay",
            "600",
        ]);
        match cli.command {
            Commands::Launch(args) => {
                assert_eq!(args.shutdown, ShutdownMode::Defer);
                assert_eq!(args.shutdown_delay, 600);
            }
            _ => panic!("expected Launch command"),
        }
    }

    #[test]
    fn cli_parses_launch_packages() {
        let cli = Cli::parse_from(["kiln", "launch", "--packages", "gcc,make"]);
        match cli.command {
            Commands::Launch(args) => {
                assert_eq!(args.packages, vec!["gcc", "make"]);
            }
            _ => panic!("expected Launch command"),
        }
    }

    #[test]
    fn cli_parses_exec() {
        let cli = Cli::parse_from(["kiln", "exec", "build-1", "--", "cargo", "test"]);
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.name, "build-1");
                assert_eq!(args.command, vec!["cargo", "test"]);
            }
            _ => panic!("expected Exec command"),
        }
    }

    #[test]
    fn cli_exec_requires_command() {
        assert!(Cli::try_parse_from(["kiln", "exec", "build-1"]).is_err());
    }

    #[test]
    fn cli_parses_push_pull() {
        let cli = Cli::parse_from(["kiln", "push", "build-1", "./a.tar", "/tmp/a.tar"]);
        match cli.command {
            Commands::Push(args) => {
                assert_eq!(args.name, "build-1");
                assert_eq!(args.remote, "/tmp/a.tar");
            }
            _ => panic!("expected Push command"),
        }

        let cli = Cli::parse_from(["kiln", "pull", "build-1", "/out/bin", "./bin"]);
        assert!(matches!(cli.command, Commands::Pull(_)));
    }

    #[test]
    fn cli_parses_clean_flags() {
        let cli = Cli::parse_from(["kiln", "clean", "--all", "--dry-run"]);
        match cli.command {
            Commands::Clean(args) => {
                assert!(args.all);
                assert!(args.dry_run);
                assert!(!args.yes);
            }
            _ => panic!("expected Clean command"),
        }
    }

    #[test]
    fn cli_parses_status() {
        let cli = Cli::parse_from(["kiln", "status"]);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn cli_parses_init_force() {
        let cli = Cli::parse_from(["kiln", "init", "--force"]);
        match cli.command {
            Commands::Init(args) => assert!(args.force),
            _ => panic!("expected Init command"),
        }
    }

    #[test]
    fn cli_no_local_flag() {
        let cli = Cli::parse_from(["kiln", "--no-local", "status"]);
        assert!(cli.no_local);
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["kiln", "status"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["kiln", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
    }
}
