//! Visitor-only routes.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use tower_sessions::Session;
use tracing::{debug, error};

use crate::{
    middleware::{VisitorContext, VisitorState},
    model::Visitor,
    store::VisitorLog,
};

/// The visitor behind the current request. Rejects with `403` when the request
/// is not visitor-authenticated.
#[derive(Clone, Debug)]
pub struct CurrentVisitor(pub Visitor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentVisitor
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<VisitorContext>()
            .and_then(VisitorContext::visitor)
            .cloned()
            .map(CurrentVisitor)
            .ok_or(StatusCode::FORBIDDEN)
    }
}

/// Which visitor scopes a guarded route accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisitorScope {
    Any,
    Named(String),
}

impl VisitorScope {
    /// `"*"` accepts every scope.
    #[must_use]
    pub fn parse(scope: &str) -> Self {
        match scope.trim() {
            "*" => Self::Any,
            named => Self::Named(named.to_string()),
        }
    }

    #[must_use]
    pub fn allows(&self, visitor: &Visitor) -> bool {
        match self {
            Self::Any => true,
            Self::Named(scope) => visitor.scope == *scope,
        }
    }
}

#[derive(Clone)]
pub struct VisitorGuard {
    state: VisitorState,
    scope: VisitorScope,
}

impl VisitorGuard {
    #[must_use]
    pub fn new(state: VisitorState, scope: VisitorScope) -> Self {
        Self { state, scope }
    }
}

/// Let visitors with a matching scope through and log every request served.
///
/// Use with `axum::middleware::from_fn_with_state(VisitorGuard::new(..), require_visitor)`.
pub async fn require_visitor(
    State(guard): State<VisitorGuard>,
    session: Option<Session>,
    request: Request,
    next: Next,
) -> Response {
    let Some(visitor) = request
        .extensions()
        .get::<VisitorContext>()
        .and_then(VisitorContext::visitor)
        .cloned()
    else {
        return StatusCode::FORBIDDEN.into_response();
    };

    if !guard.scope.allows(&visitor) {
        debug!(
            "Visitor {} with scope {} refused by {:?}",
            visitor.uuid, visitor.scope, guard.scope
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    let mut log = VisitorLog {
        visitor_uuid: visitor.uuid,
        session_id: session.and_then(|session| session.id()).map(|id| id.to_string()),
        http_method: request.method().to_string(),
        request_path: request.uri().path().to_string(),
        query_string: request.uri().query().unwrap_or_default().to_string(),
        remote_addr: extract_client_ip(request.headers()),
        user_agent: header_value(request.headers(), "user-agent"),
        referer: header_value(request.headers(), "referer"),
        status_code: 0,
        timestamp: OffsetDateTime::now_utc(),
    };

    let response = next.run(request).await;

    log.status_code = response.status().as_u16();
    if let Err(err) = guard.state.store().log_visit(log).await {
        error!("Failed to record visitor log: {err:#}");
    }

    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Client IP from common proxy headers.
fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|value| !value.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewVisitor;
    use axum::http::HeaderValue;

    fn visitor(scope: &str) -> Visitor {
        Visitor::from_new(
            NewVisitor::new("fred@example.com", scope),
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn wildcard_scope_allows_everyone() {
        let scope = VisitorScope::parse("*");
        assert_eq!(scope, VisitorScope::Any);
        assert!(scope.allows(&visitor("foo")));
        assert!(scope.allows(&visitor("bar")));
    }

    #[test]
    fn named_scope_must_match() {
        let scope = VisitorScope::parse("foo");
        assert!(scope.allows(&visitor("foo")));
        assert!(!scope.allows(&visitor("bar")));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers), Some("10.0.0.2".to_string()));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.7".to_string()));
    }
}
