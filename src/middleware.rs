//! Request resolver and session synchronizer.
//!
//! Flow Overview:
//! - The resolver reads the visitor token from the query string, loads the
//!   visitor and annotates the request with a `VisitorContext`.
//! - The session synchronizer stashes an authenticated visitor in the session,
//!   taking one visit off a limited visitor the first time a session sees it.
//! - Requests without a token fall back to the visitor stored in the session;
//!   stale session entries are removed.
//!
//! Every failure is a silent deny: the request simply stays anonymous.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Uri},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::{convert::Infallible, sync::Arc};
use time::OffsetDateTime;
use tower_sessions::{Expiry, Session};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::{
    config::VisitorConfig,
    model::{Visitor, VisitorSessionData},
    store::VisitorStore,
};

/// Store and settings shared by the visitor middleware.
#[derive(Clone)]
pub struct VisitorState {
    store: Arc<dyn VisitorStore>,
    config: Arc<VisitorConfig>,
}

impl VisitorState {
    #[must_use]
    pub fn new(store: Arc<dyn VisitorStore>, config: VisitorConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn VisitorStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &VisitorConfig {
        &self.config
    }
}

/// Visitor identity attached to each request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisitorContext {
    visitor: Option<Visitor>,
}

impl VisitorContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated(visitor: Visitor) -> Self {
        Self {
            visitor: Some(visitor),
        }
    }

    #[must_use]
    pub fn is_visitor(&self) -> bool {
        self.visitor.is_some()
    }

    #[must_use]
    pub fn visitor(&self) -> Option<&Visitor> {
        self.visitor.as_ref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for VisitorContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<VisitorContext>()
            .cloned()
            .unwrap_or_default())
    }
}

fn extract_token(uri: &Uri, key: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolve the visitor named by the token in `uri`, if it may be admitted.
/// Only the path is recorded on the span; the query carries the token.
#[instrument(skip_all, fields(path = %uri.path()))]
pub async fn resolve_visitor(
    store: &dyn VisitorStore,
    config: &VisitorConfig,
    uri: &Uri,
) -> VisitorContext {
    let Some(token) = extract_token(uri, config.querystring_key()) else {
        return VisitorContext::anonymous();
    };
    let Ok(uuid) = Uuid::parse_str(&token) else {
        debug!("Ignoring malformed visitor token");
        return VisitorContext::anonymous();
    };

    match store.get(uuid).await {
        Ok(Some(visitor)) => match visitor.validate(OffsetDateTime::now_utc()) {
            Ok(()) => VisitorContext::authenticated(visitor),
            Err(reason) => {
                debug!("Visitor {uuid} refused: {reason}");
                VisitorContext::anonymous()
            }
        },
        Ok(None) => {
            debug!("Visitor {uuid} not found");
            VisitorContext::anonymous()
        }
        Err(err) => {
            error!("Failed to lookup visitor: {err:#}");
            VisitorContext::anonymous()
        }
    }
}

/// Reconcile the request's visitor with the one stored in `session`.
#[instrument(skip_all)]
pub async fn synchronize_session(
    store: &dyn VisitorStore,
    config: &VisitorConfig,
    session: &Session,
    context: VisitorContext,
) -> VisitorContext {
    let key = config.session_key();

    if let Some(visitor) = context.visitor() {
        return stash_visitor(store, config, session, visitor).await;
    }

    let stored = match session.get_value(key).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return context,
        Err(err) => {
            error!("Failed to read visitor session data: {err}");
            return context;
        }
    };

    match restore_visitor(store, stored).await {
        Ok(Some(visitor)) => VisitorContext::authenticated(visitor),
        Ok(None) => {
            debug!("Clearing stale visitor session data");
            if let Err(err) = session.remove_value(key).await {
                error!("Failed to clear visitor session data: {err}");
            }
            context
        }
        Err(err) => {
            error!("Failed to restore visitor from session: {err:#}");
            context
        }
    }
}

async fn stash_visitor(
    store: &dyn VisitorStore,
    config: &VisitorConfig,
    session: &Session,
    visitor: &Visitor,
) -> VisitorContext {
    let key = config.session_key();

    // A session pays for a visit once; later token hits in the same session
    // reuse it. This read also loads the session record, so a failing session
    // backend denies before anything is charged.
    let already_counted = match session.get_value(key).await {
        Ok(Some(stored)) => serde_json::from_value::<VisitorSessionData>(stored)
            .is_ok_and(|data| data.uuid == visitor.uuid),
        Ok(None) => false,
        Err(err) => {
            error!("Failed to read visitor session data: {err}");
            return VisitorContext::anonymous();
        }
    };

    let visitor = if already_counted {
        visitor.clone()
    } else {
        match store.consume_visit(visitor.uuid).await {
            Ok(Some(visitor)) => visitor,
            Ok(None) => {
                debug!("Visitor {} has no visits remaining", visitor.uuid);
                return VisitorContext::anonymous();
            }
            Err(err) => {
                error!("Failed to record visit: {err:#}");
                return VisitorContext::anonymous();
            }
        }
    };

    // The record is already loaded, so only serialization can fail here. The
    // visit is paid either way; this request is still admitted.
    if let Err(err) = session.insert(key, visitor.session_data()).await {
        error!(
            "Visit charged for visitor {} but session data was not stored: {err}",
            visitor.uuid
        );
    }
    session.set_expiry(Some(Expiry::OnInactivity(config.session_expiry())));

    VisitorContext::authenticated(visitor)
}

/// `Ok(None)` means the stored data no longer names a usable visitor.
async fn restore_visitor(
    store: &dyn VisitorStore,
    stored: Value,
) -> anyhow::Result<Option<Visitor>> {
    let Ok(data) = serde_json::from_value::<VisitorSessionData>(stored) else {
        return Ok(None);
    };
    let now = OffsetDateTime::now_utc();
    Ok(store
        .get(data.uuid)
        .await?
        .filter(|visitor| visitor.is_valid(now)))
}

/// Attach a `VisitorContext` from the query string token.
pub async fn visitor_request_middleware(
    State(state): State<VisitorState>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = resolve_visitor(state.store(), state.config(), request.uri()).await;
    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Reconcile the `VisitorContext` with the session. Must run inside the
/// session layer and after `visitor_request_middleware`.
pub async fn visitor_session_middleware(
    State(state): State<VisitorState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Response {
    let context = request
        .extensions()
        .get::<VisitorContext>()
        .cloned()
        .unwrap_or_default();
    let context = synchronize_session(state.store(), state.config(), &session, context).await;
    request.extensions_mut().insert(context);
    next.run(request).await
}
