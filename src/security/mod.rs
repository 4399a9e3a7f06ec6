//! Security module for opsguard.
//!
//! Everything that stands between untrusted request input and a privileged
//! operation lives here.
//!
//! ## Features
//!
//! - **Sanitizers**: map raw strings into identifiers, ports, DNS names and SQL identifiers
//! - **Path confinement**: resolve paths and require them under allowed roots
//! - **Command policy**: static allow-list of base commands and their sub-actions
//! - **Rate limiting**: per-key fixed-window counters for destructive operations
//!
//! ## Example
//!
//! ```rust
//! use opsguard::security::{sanitize_app_name, CommandPolicy, RateLimiter};
//!
//! let name = sanitize_app_name("billing api").unwrap();
//! assert_eq!(name.as_str(), "billingapi");
//!
//! let policy = CommandPolicy::default();
//! assert!(policy.is_action_allowed("pm2", "restart"));
//! assert!(!policy.is_action_allowed("pm2", "kill"));
//!
//! let limiter = RateLimiter::default();
//! assert!(limiter.check("destructive:127.0.0.1").is_ok());
//! ```

pub mod paths;
pub mod policy;
pub mod rate_limit;
pub mod validation;

// Re-export commonly used types
pub use paths::{ConfinedPath, PathPolicy};
pub use policy::CommandPolicy;
pub use rate_limit::{
    rate_limit_middleware, spawn_sweeper, InMemoryStore, RateLimitConfig, RateLimitStats,
    RateLimitStore, RateLimiter, MAX_WINDOW,
};
pub use validation::{
    sanitize_app_name, sanitize_domain_label, sanitize_for_display, sanitize_identifier,
    sanitize_port, sanitize_project_id, sanitize_sql_identifier, Canonical, DomainName,
    FieldKind, Identifier, Port, SqlIdentifier, ValidationError, Validator,
    DEFAULT_RESERVED_PORTS, MAX_APP_NAME_LEN, MAX_PROJECT_ID_LEN, MAX_SQL_IDENTIFIER_LEN,
};
