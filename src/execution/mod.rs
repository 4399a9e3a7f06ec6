//! Safe command execution.
//!
//! This module is the only place opsguard spawns processes:
//! - Policy check of (command, action) before anything runs
//! - One shell line with every argument individually single-quoted
//! - Timeout with process-group kill
//! - Failure classification into [`crate::GuardError`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use opsguard::execution::{ExecOptions, SafeExecutor};
//! use opsguard::security::{sanitize_app_name, CommandPolicy};
//!
//! # async fn run() -> opsguard::Result<()> {
//! let executor = SafeExecutor::new(Arc::new(CommandPolicy::default()));
//! let app = sanitize_app_name("billing-api")?;
//!
//! let output = executor
//!     .execute(
//!         "pm2",
//!         "restart",
//!         &[app.into()],
//!         &ExecOptions::new().timeout(Duration::from_secs(60)),
//!     )
//!     .await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

mod command;
mod executor;
mod result;

pub use command::{quote_arg, ExecOptions, SafeArg, SafeCommand};
pub use executor::{SafeExecutor, DEFAULT_SHELL, DEFAULT_TIMEOUT};
pub use result::ExecutionOutput;
