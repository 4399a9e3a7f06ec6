//! Request validation middleware.
//!
//! [`ValidationRules`] declares which route parameters and JSON body fields a
//! route accepts and the [`FieldKind`] each must be mapped into.
//! [`validate_request`] runs every declared, present field through the
//! [`Validator`] before the handler is called:
//!
//! - body fields are replaced by their canonical value in the JSON body itself
//! - route parameters are published as a [`Sanitized`] request extension
//!
//! The first failure short-circuits with `400` and the handler never runs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use super::types::ErrorResponse;
use crate::error::GuardError;
use crate::security::{
    Canonical, ConfinedPath, DomainName, FieldKind, Identifier, Port, ValidationError, Validator,
};

/// Largest JSON body the middleware will buffer.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Field declarations for one group of routes.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    validator: Arc<Validator>,
    params: Vec<(&'static str, FieldKind)>,
    body: Vec<(&'static str, FieldKind)>,
    body_limit: usize,
}

impl ValidationRules {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self {
            validator,
            params: Vec::new(),
            body: Vec::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Declare a route parameter.
    pub fn param(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.params.push((name, kind));
        self
    }

    /// Declare a top-level JSON body field.
    pub fn body_field(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.body.push((name, kind));
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    fn sanitize(
        &self,
        field: &'static str,
        kind: FieldKind,
        raw: &str,
    ) -> Result<Canonical, Rejection> {
        self.validator
            .apply(kind, raw)
            .map_err(|error| Rejection::Field { field, error })
    }

    async fn apply(&self, request: Request) -> Result<Request, Rejection> {
        let (mut parts, body) = request.into_parts();
        let mut sanitized = parts
            .extensions
            .remove::<Sanitized>()
            .unwrap_or_default();

        if !self.params.is_empty() {
            let params = RawPathParams::from_request_parts(&mut parts, &())
                .await
                .map_err(|_| Rejection::Body("route parameters could not be decoded"))?;
            for (name, raw) in params.iter() {
                if let Some(&(field, kind)) = self.params.iter().find(|(f, _)| *f == name) {
                    let canonical = self.sanitize(field, kind, raw)?;
                    sanitized.insert(field, canonical);
                }
            }
        }

        let body = if self.body.is_empty() {
            body
        } else {
            let bytes = to_bytes(body, self.body_limit)
                .await
                .map_err(|_| Rejection::Body("request body is unreadable or too large"))?;
            let mut json: Value = serde_json::from_slice(&bytes)
                .map_err(|_| Rejection::Body("request body must be JSON"))?;
            let object = json
                .as_object_mut()
                .ok_or(Rejection::Body("request body must be a JSON object"))?;

            for &(field, kind) in &self.body {
                let Some(value) = object.get_mut(field) else {
                    continue;
                };
                let raw = match &*value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => {
                        return Err(Rejection::Field {
                            field,
                            error: ValidationError::UnsupportedType.into(),
                        })
                    }
                };
                let canonical = self.sanitize(field, kind, &raw)?;
                *value = canonical.to_json();
                sanitized.insert(field, canonical);
            }

            let rewritten = serde_json::to_vec(&json)
                .map_err(|_| Rejection::Body("request body must be JSON"))?;
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::from(rewritten)
        };

        parts.extensions.insert(sanitized);
        Ok(Request::from_parts(parts, body))
    }
}

/// Canonical values of the fields [`validate_request`] accepted.
#[derive(Debug, Clone, Default)]
pub struct Sanitized {
    fields: HashMap<&'static str, Canonical>,
}

impl Sanitized {
    fn insert(&mut self, field: &'static str, value: Canonical) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&Canonical> {
        self.fields.get(field)
    }

    pub fn identifier(&self, field: &str) -> Option<&Identifier> {
        match self.get(field)? {
            Canonical::Identifier(id) => Some(id),
            _ => None,
        }
    }

    pub fn port(&self, field: &str) -> Option<Port> {
        match self.get(field)? {
            Canonical::Port(port) => Some(*port),
            _ => None,
        }
    }

    pub fn domain(&self, field: &str) -> Option<&DomainName> {
        match self.get(field)? {
            Canonical::Domain(name) => Some(name),
            _ => None,
        }
    }

    pub fn path(&self, field: &str) -> Option<&ConfinedPath> {
        match self.get(field)? {
            Canonical::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Why [`validate_request`] refused a request.
#[derive(Debug)]
pub enum Rejection {
    /// A declared field failed its sanitizer.
    Field {
        field: &'static str,
        error: GuardError,
    },
    /// The route parameters or body could not be decoded.
    Body(&'static str),
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Self::Field {
                field,
                error: GuardError::Validation(reason),
            } => {
                tracing::debug!(field, %reason, "input rejected");
                let body = ErrorResponse::new(
                    "VALIDATION_ERROR",
                    format!("invalid {}: {}", field, reason),
                );
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::Field { field, error } => {
                tracing::debug!(field, error = %error, "input rejected");
                error.into_response()
            }
            Self::Body(reason) => {
                tracing::debug!(reason, "request body rejected");
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::bad_request(reason))).into_response()
            }
        }
    }
}

/// Validation middleware for axum.
///
/// Install with `route_layer` so route parameters are already matched.
pub async fn validate_request(
    State(rules): State<Arc<ValidationRules>>,
    request: Request,
    next: Next,
) -> Response {
    match rules.apply(request).await {
        Ok(request) => next.run(request).await,
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::post, Extension, Router};
    use tower::ServiceExt;

    use crate::security::PathPolicy;

    fn validator(root: &std::path::Path) -> Arc<Validator> {
        let paths = PathPolicy::new([root]).unwrap();
        Arc::new(Validator::new([22, 80, 443], paths))
    }

    fn router(rules: ValidationRules) -> Router {
        Router::new()
            .route(
                "/apps/{name}",
                post(
                    |Extension(sanitized): Extension<Sanitized>, body: String| async move {
                        let name = sanitized
                            .identifier("name")
                            .map(|id| id.to_string())
                            .unwrap_or_default();
                        format!("{}|{}", name, body)
                    },
                ),
            )
            .route_layer(middleware::from_fn_with_state(
                Arc::new(rules),
                validate_request,
            ))
    }

    fn post_json(uri: &str, body: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn test_param_is_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).param("name", FieldKind::AppName);

        let response = router(rules)
            .oneshot(post_json("/apps/my%20app", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "myapp|{}");
    }

    #[tokio::test]
    async fn test_body_field_rewritten_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path()))
            .param("name", FieldKind::AppName)
            .body_field("port", FieldKind::Port)
            .body_field("domain", FieldKind::Domain);

        let response = router(rules)
            .oneshot(post_json(
                "/apps/api",
                r#"{"port":" 8500 ","domain":"API.Example.com","note":"kept"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        let (name, body) = text.split_once('|').unwrap();
        assert_eq!(name, "api");
        let json: Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["port"], 8500);
        assert_eq!(json["domain"], "api.example.com");
        assert_eq!(json["note"], "kept");
    }

    #[tokio::test]
    async fn test_rejection_names_field_and_skips_handler() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).body_field("port", FieldKind::Port);

        let response = router(rules)
            .oneshot(post_json("/apps/api", r#"{"port":"80"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert!(json["message"].as_str().unwrap().contains("invalid port"));
    }

    #[tokio::test]
    async fn test_param_that_strips_to_empty_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).param("name", FieldKind::AppName);

        let response = router(rules)
            .oneshot(post_json("/apps/%24%3B%26", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_undecodable_param_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).param("name", FieldKind::AppName);

        let response = router(rules)
            .oneshot(post_json("/apps/%FF", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_unsupported_body_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).body_field("port", FieldKind::Port);

        let response = router(rules)
            .oneshot(post_json("/apps/api", r#"{"port":[8500]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_object_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).body_field("port", FieldKind::Port);

        let response = router(rules)
            .oneshot(post_json("/apps/api", "not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_absent_body_field_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).body_field("port", FieldKind::Port);

        let response = router(rules)
            .oneshot(post_json("/apps/api", r#"{"other":1}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_path_field_outside_roots_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ValidationRules::new(validator(dir.path())).body_field("dir", FieldKind::Path);

        let response = router(rules)
            .oneshot(post_json("/apps/api", r#"{"dir":"/etc"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["code"], "PATH_NOT_ALLOWED");
        assert!(!json["message"].as_str().unwrap().contains("/etc"));
    }
}
