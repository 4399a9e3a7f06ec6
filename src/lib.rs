//! # opsguard
//!
//! Command authorization and execution safety layer for a single-host
//! operations dashboard.
//!
//! Every privileged operation an HTTP caller can trigger (restarting a
//! process, running a git action in a project, deleting a directory) passes
//! through this crate first:
//!
//! - **Sanitizers**: raw input becomes a typed canonical value or is rejected
//! - **Path confinement**: filesystem paths must resolve under allowed roots
//! - **Command policy**: only registered (command, action) pairs may run
//! - **Rate limiting**: fixed-window counters throttle destructive routes
//! - **Safe execution**: one shell line, every argument single-quoted,
//!   timeout with process-group kill
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use opsguard::{CommandPolicy, ExecOptions, SafeExecutor};
//!
//! #[tokio::main]
//! async fn main() -> opsguard::Result<()> {
//!     opsguard::logging::try_init().ok();
//!
//!     let executor = SafeExecutor::new(Arc::new(CommandPolicy::default()));
//!     let app = opsguard::security::sanitize_app_name("billing-api")?;
//!
//!     let output = executor
//!         .execute("pm2", "restart", &[app.into()], &ExecOptions::new())
//!         .await?;
//!     println!("{}", output.output_trimmed());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod security;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use error::{GuardError, Result};
pub use execution::{ExecOptions, ExecutionOutput, SafeArg, SafeExecutor};
pub use security::{
    CommandPolicy, ConfinedPath, PathPolicy, RateLimitConfig, RateLimiter, ValidationError,
    Validator,
};
