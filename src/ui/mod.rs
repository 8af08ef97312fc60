//! UI module for consistent CLI output
//!
//! Uses `cliclack` for interactive prompts and spinners with automatic
//! fallback to plain output in CI/non-interactive environments, and
//! `indicatif` for the long-running provisioning spinner.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro_error, outro_success, step_error, step_info,
    step_ok, step_warn,
};
pub use progress::{provision_spinner, TaskSpinner};
pub use prompts::confirm;
