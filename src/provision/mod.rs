//! Provisioning engine module
//!
//! Orchestrates the full sequence: consult the base cache, take the
//! provisioning lock, build or reuse the base, clone it into the caller's
//! working instance, and scope teardown to the session.

mod context;
mod engine;
mod environment;

pub use context::ProviderContext;
pub use engine::Provisioner;
pub use environment::{LaunchedEnvironment, ShutdownPolicy, WorkingInstance};
