//! CLI command implementations

pub mod clean;
pub mod completions;
pub mod config;
pub mod destroy;
pub mod exec;
pub mod init;
pub mod launch;
pub mod list;
pub mod status;
pub mod transfer;

pub use clean::execute as clean;
pub use completions::execute as completions;
pub use config::execute as config;
pub use destroy::execute as destroy;
pub use exec::execute as exec;
pub use init::execute as init;
pub use launch::execute as launch;
pub use list::execute as list;
pub use status::execute as status;
pub use transfer::{pull, push};

use crate::backend::{create_executor, Executor};
use crate::config::Config;
use crate::error::KilnResult;
use crate::provision::{ProviderContext, Provisioner};
use std::sync::Arc;

/// Build the executor and provisioner a command needs from config
pub(crate) fn build_provisioner(config: &Config) -> KilnResult<(Arc<dyn Executor>, Provisioner)> {
    let executor = create_executor(config)?;
    let context = ProviderContext::new(config.clone());
    let provisioner = Provisioner::new(context, Arc::clone(&executor));
    Ok((executor, provisioner))
}
