//! REST API handlers.
//!
//! Handlers only ever see canonical values: route parameters come from the
//! [`Sanitized`] extension and JSON bodies have already been rewritten by
//! [`validate_request`](super::middleware::validate_request).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    Extension, Json,
};

use super::middleware::Sanitized;
use super::types::{
    ActionResponse, DnsRecordRequest, DnsRecordResponse, PortCheckRequest, PortCheckResponse,
};
use crate::error::{GuardError, Result};
use crate::execution::{ExecOptions, SafeExecutor};
use crate::security::{ConfinedPath, Identifier, RateLimiter, ValidationError, Validator};

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub validator: Arc<Validator>,
    pub executor: Arc<SafeExecutor>,
    pub limiter: Arc<RateLimiter>,
    /// Directory holding one sub-directory per project.
    pub projects_root: PathBuf,
}

impl AppState {
    pub fn new(
        validator: Validator,
        executor: SafeExecutor,
        limiter: RateLimiter,
        projects_root: PathBuf,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            executor: Arc::new(executor),
            limiter: Arc::new(limiter),
            projects_root,
        }
    }

    /// Resolve a project id to its directory, which must exist.
    async fn project_dir(&self, id: &Identifier) -> Result<ConfinedPath> {
        let dir = self
            .validator
            .paths()
            .confine_child(&self.projects_root, id.as_str())?;

        match tokio::fs::metadata(dir.as_path()).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(GuardError::NotFound("project")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GuardError::NotFound("project"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn required<'a, T: ?Sized>(input: Option<&'a T>) -> Result<&'a T> {
    input.ok_or(GuardError::Validation(ValidationError::Empty))
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let limits = state.limiter.stats();
    Json(serde_json::json!({
        "name": "opsguard",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "rate_limit": {
            "enabled": limits.enabled,
            "max_requests": limits.max_requests,
            "window_secs": limits.window_secs,
            "tracked_keys": limits.tracked_keys,
        }
    }))
}

async fn run_action(
    state: &AppState,
    command: &str,
    input: &Sanitized,
) -> Result<Json<ActionResponse>> {
    let name = required(input.identifier("name"))?;
    let action = required(input.identifier("action"))?;

    let output = state
        .executor
        .execute(
            command,
            action.as_str(),
            &[name.clone().into()],
            &ExecOptions::new(),
        )
        .await?;

    tracing::info!(command, action = %action, target = %name, "action completed");
    Ok(Json(ActionResponse::new(
        command,
        action.as_str(),
        name.as_str(),
        &output,
    )))
}

/// Run `pm2 <action> <name>`.
pub async fn app_action(
    State(state): State<AppState>,
    Extension(input): Extension<Sanitized>,
) -> Result<Json<ActionResponse>> {
    run_action(&state, "pm2", &input).await
}

/// Run `docker <action> <name>`.
pub async fn container_action(
    State(state): State<AppState>,
    Extension(input): Extension<Sanitized>,
) -> Result<Json<ActionResponse>> {
    run_action(&state, "docker", &input).await
}

/// Run `git <action>` inside a project directory.
pub async fn project_git(
    State(state): State<AppState>,
    Extension(input): Extension<Sanitized>,
) -> Result<Json<ActionResponse>> {
    let id = required(input.identifier("id"))?;
    let action = required(input.identifier("action"))?;
    let dir = state.project_dir(id).await?;

    let output = state
        .executor
        .execute("git", action.as_str(), &[], &ExecOptions::new().working_dir(dir))
        .await?;

    tracing::info!(action = %action, project = %id, "git action completed");
    Ok(Json(ActionResponse::new(
        "git",
        action.as_str(),
        id.as_str(),
        &output,
    )))
}

/// Remove a project directory.
pub async fn delete_project(
    State(state): State<AppState>,
    Extension(input): Extension<Sanitized>,
) -> Result<StatusCode> {
    let id = required(input.identifier("id"))?;
    let dir = state.project_dir(id).await?;

    // Only strict descendants of an allowed root may be removed.
    if dir.is_root() {
        tracing::warn!(project = %id, "refusing to delete an allowed root");
        return Err(GuardError::PathNotAllowed);
    }

    tokio::fs::remove_dir_all(dir.as_path()).await?;

    tracing::info!(project = %id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Report whether a port can be bound on loopback.
pub async fn check_port(Json(req): Json<PortCheckRequest>) -> Json<PortCheckResponse> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, req.port));
    let available = tokio::net::TcpListener::bind(addr).await.is_ok();

    tracing::debug!(port = req.port, available, "port checked");
    Json(PortCheckResponse {
        port: req.port,
        available,
    })
}

/// Canonicalize a DNS record name.
pub async fn create_dns_record(
    Extension(input): Extension<Sanitized>,
    Json(req): Json<DnsRecordRequest>,
) -> Result<(StatusCode, Json<DnsRecordResponse>)> {
    let name = required(input.domain("name"))?;

    tracing::info!(record = %name, "dns record accepted");
    Ok((
        StatusCode::CREATED,
        Json(DnsRecordResponse {
            fqdn: format!("{}.", name),
            labels: name.label_count(),
            name: req.name,
        }),
    ))
}
