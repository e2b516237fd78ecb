//! Endpoints served to visitors themselves.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{guard::CurrentVisitor, middleware::VisitorContext, model::Visitor};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Welcome {
    pub message: String,
    pub visitor: Visitor,
}

#[utoipa::path(
    get,
    path = "/v1/visitor",
    responses(
        (status = 200, description = "Request is visitor-authenticated", body = Visitor),
        (status = 204, description = "No visitor on this request")
    ),
    tag = "visitor"
)]
pub async fn current(context: VisitorContext) -> impl IntoResponse {
    match context.visitor() {
        Some(visitor) => (StatusCode::OK, Json(visitor.clone())).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/visit",
    responses(
        (status = 200, description = "Visitor admitted", body = Welcome),
        (status = 403, description = "Not a visitor")
    ),
    tag = "visitor"
)]
pub async fn visit(CurrentVisitor(visitor): CurrentVisitor) -> impl IntoResponse {
    let name = visitor.full_name();
    let message = if name.is_empty() {
        format!("Welcome, {}", visitor.email)
    } else {
        format!("Welcome, {name}")
    };
    Json(Welcome { message, visitor })
}
