//! # Visitors
//!
//! Token based visitor access for axum applications. A `Visitor` is a
//! time and visit limited grant identified by an opaque UUID token that
//! travels in a URL query parameter (`?vuid=...`).
//!
//! ## Middleware
//!
//! - `visitor_request_middleware` resolves the token into a `VisitorContext`
//!   request extension.
//! - `visitor_session_middleware` stashes the visitor in the `tower-sessions`
//!   session so later requests without a token stay authenticated, takes one
//!   visit off limited visitors per session, and clears stale session data.
//!
//! Refusals are silent: a request that fails validation is simply not a
//! visitor. Routes that require a visitor use `CurrentVisitor` or the
//! `require_visitor` guard.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod middleware;
pub mod model;
pub mod store;

pub use config::{VisitorConfig, MAX_EXPIRY_SECONDS, VISITOR_QUERYSTRING_KEY, VISITOR_SESSION_KEY};
pub use error::VisitorError;
pub use guard::{require_visitor, CurrentVisitor, VisitorGuard, VisitorScope};
pub use middleware::{
    resolve_visitor, synchronize_session, visitor_request_middleware,
    visitor_session_middleware, VisitorContext, VisitorState,
};
pub use model::{validate_link_target, NewVisitor, Visitor, VisitorSessionData};
pub use store::{MemoryVisitorStore, PgVisitorStore, VisitorLog, VisitorStore};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
