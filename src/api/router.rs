//! API router configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    api_info, app_action, check_port, container_action, create_dns_record, delete_project,
    health, project_git, AppState,
};
use super::middleware::{validate_request, ValidationRules};
use crate::error::GuardError;
use crate::security::{rate_limit_middleware, FieldKind};

/// Longest accepted sub-action name.
const MAX_ACTION_LEN: usize = 32;

/// Create the API router with custom state.
pub fn create_router_with_state(state: AppState) -> Router {
    let validator = Arc::clone(&state.validator);
    let action = FieldKind::Identifier(MAX_ACTION_LEN);

    let named_actions = Arc::new(
        ValidationRules::new(Arc::clone(&validator))
            .param("name", FieldKind::AppName)
            .param("action", action),
    );
    let project_rules = Arc::new(
        ValidationRules::new(Arc::clone(&validator))
            .param("id", FieldKind::ProjectId)
            .param("action", action),
    );
    let port_rules =
        Arc::new(ValidationRules::new(Arc::clone(&validator)).body_field("port", FieldKind::Port));
    let dns_rules =
        Arc::new(ValidationRules::new(validator).body_field("name", FieldKind::Domain));

    // Routes that change host state.
    let destructive = Router::new()
        .route("/apps/{name}/{action}", post(app_action))
        .route("/containers/{name}/{action}", post(container_action))
        .route_layer(middleware::from_fn_with_state(
            named_actions,
            validate_request,
        ))
        .merge(
            Router::new()
                .route("/projects/{id}/git/{action}", post(project_git))
                .route("/projects/{id}", delete(delete_project))
                .route_layer(middleware::from_fn_with_state(
                    project_rules,
                    validate_request,
                )),
        )
        .merge(
            Router::new()
                .route("/dns/records", post(create_dns_record))
                .route_layer(middleware::from_fn_with_state(dns_rules, validate_request)),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            rate_limit_middleware,
        ));

    // API v1 routes
    let api_v1 = Router::new()
        .route("/", get(api_info))
        .merge(
            Router::new()
                .route("/ports/check", post(check_port))
                .route_layer(middleware::from_fn_with_state(port_rules, validate_request)),
        )
        .merge(destructive);

    // Build main router
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Stop accepting connections on Ctrl-C and drain in-flight requests.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            graceful_shutdown: true,
        }
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 8400)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Start the API server with custom state.
///
/// Spawns the rate-limit sweeper for the lifetime of the server.
pub async fn serve_with_state(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let sweeper = state.limiter.spawn_sweeper();
    let router = create_router_with_state(state);

    tracing::info!("Starting opsguard API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GuardError::Io)?;

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    let result = if config.graceful_shutdown {
        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal())
            .await
    } else {
        axum::serve(listener, service).await
    };

    sweeper.abort();
    result.map_err(GuardError::Io)?;

    tracing::info!("opsguard API server stopped");
    Ok(())
}
