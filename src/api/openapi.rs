use axum::response::{IntoResponse, Json};
use utoipa::OpenApi;

use super::handlers::{admin, health, visitor};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        visitor::current,
        visitor::visit,
        admin::create,
        admin::get,
        admin::deactivate,
        admin::reactivate,
    ),
    tags(
        (name = "health", description = "Service health"),
        (name = "visitor", description = "Visitor-facing endpoints"),
        (name = "admin", description = "Grant and revoke visitor access"),
    )
)]
pub struct ApiDoc;

pub async fn openapi() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
