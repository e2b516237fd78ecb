//! Administrative endpoints for granting and revoking visitor access.
//!
//! Every route here sits behind `require_admin`, which checks the
//! `x-visitors-admin-token` header against the configured token. When no token
//! is configured the routes answer `404`.

use axum::{
    extract::{Extension, Path, Request},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    middleware::VisitorState,
    model::{expiry_from, validate_link_target, NewVisitor, Visitor},
};

pub const ADMIN_TOKEN_HEADER: &str = "x-visitors-admin-token";

/// Shared secret for the admin routes, kept only as its SHA-256 digest.
/// `None` disables them.
#[derive(Clone, Default)]
pub struct AdminToken(Option<Vec<u8>>);

impl AdminToken {
    #[must_use]
    pub fn new(token: Option<SecretString>) -> Self {
        Self(
            token
                .filter(|token| !token.expose_secret().is_empty())
                .map(|token| hash_admin_token(token.expose_secret())),
        )
    }

    /// Digests have a fixed length, so the comparison does not depend on how
    /// much of the presented token matches.
    fn matches(&self, presented: &str) -> Option<bool> {
        self.0
            .as_ref()
            .map(|digest| *digest == hash_admin_token(presented))
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AdminToken")
            .field(&self.0.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn hash_admin_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub async fn require_admin(
    Extension(admin): Extension<Arc<AdminToken>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let presented = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    match admin.matches(presented) {
        None => StatusCode::NOT_FOUND.into_response(),
        Some(false) => StatusCode::UNAUTHORIZED.into_response(),
        Some(true) => next.run(request).await,
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateVisitorRequest {
    #[serde(flatten)]
    pub visitor: NewVisitor,
    /// Path or URL the returned link should point at, `/` when omitted.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateVisitorResponse {
    pub visitor: Visitor,
    pub link: String,
}

#[utoipa::path(
    post,
    path = "/v1/visitors",
    request_body = CreateVisitorRequest,
    responses(
        (status = 201, description = "Visitor created", body = CreateVisitorResponse),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Missing or wrong admin token")
    ),
    tag = "admin"
)]
pub async fn create(
    state: Extension<VisitorState>,
    payload: Option<Json<CreateVisitorRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let new = match request.visitor.normalized().and_then(|new| {
        new.with_default_expiry(state.config().token_expiry(), OffsetDateTime::now_utc())
    }) {
        Ok(new) => new,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    // nothing is stored unless the link can be built
    let path = request.path.unwrap_or_else(|| "/".to_string());
    if let Err(err) = validate_link_target(&path) {
        return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
    }

    let visitor = match state.store().create(new).await {
        Ok(visitor) => visitor,
        Err(err) => {
            error!("Failed to create visitor: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let link = match visitor.tokenise_with_key(&path, state.config().querystring_key()) {
        Ok(link) => link,
        Err(err) => {
            error!("Failed to tokenise link for visitor {}: {err}", visitor.uuid);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!("Created visitor {} with scope {}", visitor.uuid, visitor.scope);

    (
        StatusCode::CREATED,
        Json(CreateVisitorResponse { visitor, link }),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/v1/visitors/{uuid}",
    params(("uuid" = Uuid, Path, description = "Visitor token")),
    responses(
        (status = 200, description = "Visitor found", body = Visitor),
        (status = 404, description = "Unknown visitor")
    ),
    tag = "admin"
)]
pub async fn get(state: Extension<VisitorState>, Path(uuid): Path<Uuid>) -> impl IntoResponse {
    visitor_response(state.store().get(uuid).await, "fetch")
}

#[utoipa::path(
    post,
    path = "/v1/visitors/{uuid}/deactivate",
    params(("uuid" = Uuid, Path, description = "Visitor token")),
    responses(
        (status = 200, description = "Visitor deactivated", body = Visitor),
        (status = 404, description = "Unknown visitor")
    ),
    tag = "admin"
)]
pub async fn deactivate(
    state: Extension<VisitorState>,
    Path(uuid): Path<Uuid>,
) -> impl IntoResponse {
    visitor_response(state.store().deactivate(uuid).await, "deactivate")
}

#[utoipa::path(
    post,
    path = "/v1/visitors/{uuid}/reactivate",
    params(("uuid" = Uuid, Path, description = "Visitor token")),
    responses(
        (status = 200, description = "Visitor reactivated with a fresh expiry", body = Visitor),
        (status = 400, description = "Configured token expiry is out of range"),
        (status = 404, description = "Unknown visitor")
    ),
    tag = "admin"
)]
pub async fn reactivate(
    state: Extension<VisitorState>,
    Path(uuid): Path<Uuid>,
) -> impl IntoResponse {
    let expires_at = match expiry_from(OffsetDateTime::now_utc(), state.config().token_expiry()) {
        Ok(expires_at) => expires_at,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    visitor_response(
        state.store().reactivate(uuid, expires_at).await,
        "reactivate",
    )
}

fn visitor_response(result: anyhow::Result<Option<Visitor>>, action: &str) -> Response {
    match result {
        Ok(Some(visitor)) => (StatusCode::OK, Json(visitor)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to {action} visitor: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
