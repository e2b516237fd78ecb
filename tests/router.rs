//! End-to-end checks of the visitor middleware through the HTTP router.

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
    Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tower_sessions::MemoryStore;
use visitors::{
    api::{
        handlers::{visitor::visit, AdminToken, ADMIN_TOKEN_HEADER},
        router, with_visitor_layers,
    },
    require_visitor, MemoryVisitorStore, NewVisitor, Visitor, VisitorConfig, VisitorGuard,
    VisitorScope, VisitorState, VisitorStore,
};

const ADMIN_TOKEN: &str = "s3cret";

struct TestApp {
    store: Arc<MemoryVisitorStore>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with_admin(AdminToken::new(Some(SecretString::from(
            ADMIN_TOKEN.to_string(),
        ))))
    }

    fn with_admin(admin: AdminToken) -> Self {
        Self::with_config(VisitorConfig::new(), admin)
    }

    fn with_config(config: VisitorConfig, admin: AdminToken) -> Self {
        let store = Arc::new(MemoryVisitorStore::new());
        let state = VisitorState::new(store.clone(), config.with_session_cookie_secure(false));
        Self {
            store,
            router: router(state, admin, MemoryStore::default()),
        }
    }

    /// Only `/bar`, guarded for visitors in `scope`.
    fn scoped(scope: &str) -> Self {
        let store = Arc::new(MemoryVisitorStore::new());
        let state = VisitorState::new(
            store.clone(),
            VisitorConfig::new().with_session_cookie_secure(false),
        );
        let routes = Router::new().route("/bar", get(visit)).route_layer(from_fn_with_state(
            VisitorGuard::new(state.clone(), VisitorScope::parse(scope)),
            require_visitor,
        ));
        Self {
            store,
            router: with_visitor_layers(routes, state, MemoryStore::default()),
        }
    }

    async fn visitor(&self, new: NewVisitor) -> Result<Visitor> {
        self.store.create(new).await
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Result<Response> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty())?).await
    }

    async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> Result<Response> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(ADMIN_TOKEN_HEADER, ADMIN_TOKEN);
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&body)?)
            }
            None => Body::empty(),
        };
        self.send(builder.body(body)?).await
    }
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn session_cookie(response: &Response) -> Result<String> {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .context("missing set-cookie header")?
        .to_str()?;
    Ok(set_cookie
        .split(';')
        .next()
        .unwrap_or_default()
        .to_string())
}

fn fred() -> NewVisitor {
    NewVisitor::new("fred@example.com", "foo")
}

#[tokio::test]
async fn request_without_token_is_not_a_visitor() -> Result<()> {
    let app = TestApp::new();
    let response = app.get("/v1/visitor", None).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn token_authenticates_request() -> Result<()> {
    let app = TestApp::new();
    let visitor = app.visitor(fred()).await?;

    let response = app.get(&visitor.tokenise("/v1/visitor")?, None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["uuid"], json!(visitor.uuid.to_string()));
    assert_eq!(body["scope"], json!("foo"));
    Ok(())
}

#[tokio::test]
async fn session_keeps_visitor_and_counts_one_visit() -> Result<()> {
    let app = TestApp::new();
    let visitor = app.visitor(fred().with_visits_remaining(2)).await?;
    let link = visitor.tokenise("/v1/visitor")?;

    let first = app.get(&link, None).await?;
    assert_eq!(first.status(), StatusCode::OK);
    let cookie = session_cookie(&first)?;

    let second = app.get("/v1/visitor", Some(&cookie)).await?;
    assert_eq!(second.status(), StatusCode::OK);

    let third = app.get(&link, Some(&cookie)).await?;
    assert_eq!(third.status(), StatusCode::OK);

    let stored = app.store.get(visitor.uuid).await?;
    assert_eq!(stored.and_then(|v| v.visits_remaining), Some(1));
    Ok(())
}

#[tokio::test]
async fn exhausted_token_is_refused() -> Result<()> {
    let app = TestApp::new();
    let visitor = app.visitor(fred().with_visits_remaining(1)).await?;
    let link = visitor.tokenise("/v1/visitor")?;

    assert_eq!(app.get(&link, None).await?.status(), StatusCode::OK);
    assert_eq!(app.get(&link, None).await?.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn deactivated_visitor_loses_session() -> Result<()> {
    let app = TestApp::new();
    let visitor = app.visitor(fred()).await?;

    let first = app.get(&visitor.tokenise("/v1/visitor")?, None).await?;
    let cookie = session_cookie(&first)?;

    app.store.deactivate(visitor.uuid).await?;

    let second = app.get("/v1/visitor", Some(&cookie)).await?;
    assert_eq!(second.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn guarded_route_requires_visitor_and_logs() -> Result<()> {
    let app = TestApp::new();
    let visitor = app.visitor(fred()).await?;

    let refused = app.get("/v1/visit", None).await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    assert!(app.store.logs().await.is_empty());

    let admitted = app.get(&visitor.tokenise("/v1/visit?ref=mail")?, None).await?;
    assert_eq!(admitted.status(), StatusCode::OK);
    let body = json_body(admitted).await?;
    assert_eq!(body["message"], json!("Welcome, fred@example.com"));

    let logs = app.store.logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].visitor_uuid, visitor.uuid);
    assert_eq!(logs[0].request_path, "/v1/visit");
    assert!(logs[0].query_string.starts_with("ref=mail"));
    assert_eq!(logs[0].status_code, 200);
    Ok(())
}

#[tokio::test]
async fn guarded_route_refuses_other_scope_without_logging() -> Result<()> {
    let app = TestApp::scoped("bar");
    let foo = app.visitor(fred()).await?;

    let refused = app.get(&foo.tokenise("/bar")?, None).await?;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    assert!(app.store.logs().await.is_empty());

    let bar = app
        .visitor(NewVisitor::new("barney@example.com", "bar"))
        .await?;
    let admitted = app.get(&bar.tokenise("/bar")?, None).await?;
    assert_eq!(admitted.status(), StatusCode::OK);

    let logs = app.store.logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].visitor_uuid, bar.uuid);
    Ok(())
}

#[tokio::test]
async fn admin_creates_and_deactivates_visitor() -> Result<()> {
    let app = TestApp::new();

    let created = app
        .admin(
            Method::POST,
            "/v1/visitors",
            Some(json!({
                "email": " Fred@Example.com ",
                "scope": "foo",
                "visits_remaining": 3,
                "path": "/v1/visitor"
            })),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await?;
    assert_eq!(body["visitor"]["email"], json!("fred@example.com"));
    assert_eq!(body["visitor"]["visits_remaining"], json!(3));
    assert!(!body["visitor"]["expires_at"].is_null());

    let uuid = body["visitor"]["uuid"]
        .as_str()
        .context("missing uuid")?
        .to_string();
    let link = body["link"].as_str().context("missing link")?.to_string();
    assert_eq!(link, format!("/v1/visitor?vuid={uuid}"));

    let deactivated = app
        .admin(Method::POST, &format!("/v1/visitors/{uuid}/deactivate"), None)
        .await?;
    assert_eq!(deactivated.status(), StatusCode::OK);
    assert_eq!(json_body(deactivated).await?["is_active"], json!(false));

    assert_eq!(app.get(&link, None).await?.status(), StatusCode::NO_CONTENT);

    let reactivated = app
        .admin(Method::POST, &format!("/v1/visitors/{uuid}/reactivate"), None)
        .await?;
    assert_eq!(reactivated.status(), StatusCode::OK);
    assert_eq!(app.get(&link, None).await?.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn admin_rejects_bad_payload() -> Result<()> {
    let app = TestApp::new();
    let response = app
        .admin(
            Method::POST,
            "/v1/visitors",
            Some(json!({ "email": "not-an-email", "scope": "foo" })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn admin_rejects_bad_link_without_storing() -> Result<()> {
    let app = TestApp::new();
    let response = app
        .admin(
            Method::POST,
            "/v1/visitors",
            Some(json!({
                "email": "fred@example.com",
                "scope": "foo",
                "path": "http://[::1"
            })),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.visitor_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn admin_handles_longest_token_expiry() -> Result<()> {
    let app = TestApp::with_config(
        VisitorConfig::new().with_token_expiry_seconds(i64::MAX),
        AdminToken::new(Some(SecretString::from(ADMIN_TOKEN.to_string()))),
    );

    let created = app
        .admin(
            Method::POST,
            "/v1/visitors",
            Some(json!({ "email": "fred@example.com", "scope": "foo" })),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await?;
    assert!(!body["visitor"]["expires_at"].is_null());
    let uuid = body["visitor"]["uuid"]
        .as_str()
        .context("missing uuid")?
        .to_string();

    let reactivated = app
        .admin(Method::POST, &format!("/v1/visitors/{uuid}/reactivate"), None)
        .await?;
    assert_eq!(reactivated.status(), StatusCode::OK);
    assert_eq!(app.store.visitor_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn admin_unknown_visitor_is_not_found() -> Result<()> {
    let app = TestApp::new();
    let response = app
        .admin(
            Method::GET,
            &format!("/v1/visitors/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn admin_requires_token() -> Result<()> {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/visitors")
        .header(ADMIN_TOKEN_HEADER, "wrong")
        .body(Body::empty())?;
    assert_eq!(app.send(request).await?.status(), StatusCode::UNAUTHORIZED);

    let disabled = TestApp::with_admin(AdminToken::default());
    let response = disabled.admin(Method::POST, "/v1/visitors", None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn health_reports_store() -> Result<()> {
    let app = TestApp::new();
    let response = app.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-app"));
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await?;
    assert_eq!(body["store"], json!("ok"));
    assert_eq!(body["name"], json!("visitors"));
    Ok(())
}

#[tokio::test]
async fn openapi_document_lists_routes() -> Result<()> {
    let app = TestApp::new();
    let response = app.get("/openapi.json", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert!(body["paths"]["/v1/visitors"].is_object());
    assert!(body["paths"]["/v1/visitor"].is_object());
    Ok(())
}

#[tokio::test]
async fn openapi_health_is_a_single_object() -> Result<()> {
    let app = TestApp::new();
    let body = json_body(app.get("/openapi.json", None).await?).await?;
    let responses = &body["paths"]["/health"]["get"]["responses"];
    for status in ["200", "503"] {
        let schema = &responses[status]["content"]["application/json"]["schema"];
        assert_ne!(schema["type"], json!("array"), "{status}: {schema}");
        assert_eq!(schema["$ref"], json!("#/components/schemas/Health"), "{status}");
    }
    Ok(())
}
