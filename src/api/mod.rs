use crate::{
    config::VisitorConfig,
    guard::{require_visitor, VisitorGuard, VisitorScope},
    middleware::{visitor_request_middleware, visitor_session_middleware, VisitorState},
    store::{MemoryVisitorStore, PgVisitorStore, VisitorStore},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, SessionStore};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;

pub mod handlers;
pub mod openapi;

use handlers::{admin, health, visitor, AdminToken};

/// Build the application router with the visitor middleware in place.
///
/// Layers run outermost first: request id, tracing, session, request
/// resolver, session synchronizer.
pub fn router<Store>(state: VisitorState, admin_token: AdminToken, session_store: Store) -> Router
where
    Store: SessionStore + Clone,
{
    let admin_routes = Router::new()
        .route("/v1/visitors", post(admin::create))
        .route("/v1/visitors/:uuid", get(admin::get))
        .route("/v1/visitors/:uuid/deactivate", post(admin::deactivate))
        .route("/v1/visitors/:uuid/reactivate", post(admin::reactivate))
        .route_layer(from_fn(admin::require_admin));

    let visit_routes = Router::new()
        .route("/v1/visit", get(visitor::visit))
        .route_layer(from_fn_with_state(
            VisitorGuard::new(state.clone(), VisitorScope::Any),
            require_visitor,
        ));

    let routes = Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/openapi.json", get(openapi::openapi))
        .route("/v1/visitor", get(visitor::current))
        .merge(visit_routes)
        .merge(admin_routes)
        .layer(Extension(Arc::new(admin_token)));

    with_visitor_layers(routes, state, session_store).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    )
}

/// Wrap `routes` in the session layer, the request resolver and the session
/// synchronizer, in that order. Use this to mount visitor-aware routes of
/// your own, guarded with `require_visitor` where needed.
pub fn with_visitor_layers<Store>(
    routes: Router,
    state: VisitorState,
    session_store: Store,
) -> Router
where
    Store: SessionStore + Clone,
{
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(state.config().session_cookie_secure())
        .with_expiry(Expiry::OnInactivity(state.config().session_expiry()));

    routes.layer(
        ServiceBuilder::new()
            .layer(session_layer)
            .layer(from_fn_with_state(
                state.clone(),
                visitor_request_middleware,
            ))
            .layer(from_fn_with_state(
                state.clone(),
                visitor_session_middleware,
            ))
            .layer(Extension(state)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to start the server
pub async fn new(
    port: u16,
    dsn: Option<SecretString>,
    config: VisitorConfig,
    admin_token: AdminToken,
) -> Result<()> {
    let store: Arc<dyn VisitorStore> = match dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn.expose_secret())
                .await
                .context("Failed to connect to database")?;
            Arc::new(PgVisitorStore::new(pool))
        }
        None => {
            warn!("No database configured, visitors are kept in memory");
            Arc::new(MemoryVisitorStore::new())
        }
    };

    let app = router(
        VisitorState::new(store, config),
        admin_token,
        MemoryStore::default(),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
