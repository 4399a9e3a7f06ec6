//! HTTP layer for opsguard.
//!
//! A thin consumer of [`crate::security`] and [`crate::execution`]: every
//! route with inputs is wrapped in [`validate_request`], and every route that
//! changes host state is also wrapped in the rate limiter.
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check
//! - `GET /api/v1/` - API information
//!
//! ### Operations (rate limited)
//! - `POST /api/v1/apps/{name}/{action}` - `pm2 <action> <name>`
//! - `POST /api/v1/containers/{name}/{action}` - `docker <action> <name>`
//! - `POST /api/v1/projects/{id}/git/{action}` - `git <action>` in the project directory
//! - `DELETE /api/v1/projects/{id}` - Remove a project directory
//! - `POST /api/v1/dns/records` - Canonicalize a DNS record name
//!
//! ### Checks
//! - `POST /api/v1/ports/check` - Report whether a port is free on loopback
//!
//! ## Example
//!
//! ```no_run
//! use opsguard::api::serve_with_state;
//! use opsguard::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let state = config.build_state()?;
//!     serve_with_state(config.to_server_config()?, state).await?;
//!     Ok(())
//! }
//! ```

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod types;

// Re-export commonly used types
pub use handlers::AppState;
pub use middleware::{validate_request, Rejection, Sanitized, ValidationRules};
pub use router::{create_router_with_state, serve_with_state, ServerConfig};
pub use types::{
    ActionResponse, DnsRecordRequest, DnsRecordResponse, ErrorResponse, PortCheckRequest,
    PortCheckResponse,
};
