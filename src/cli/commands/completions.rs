//! Completions command - generate shell completions

use crate::cli::args::{Cli, CompletionsArgs};
use crate::error::KilnResult;
use clap::CommandFactory;

/// Execute the completions command
pub fn execute(args: CompletionsArgs) -> KilnResult<()> {
    let mut command = Cli::command();
    clap_complete::generate(args.shell, &mut command, "kiln", &mut std::io::stdout());
    Ok(())
}
