//! Persistence for visitors and their visit logs.

use anyhow::Result;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{NewVisitor, Visitor};

mod memory;
mod postgres;

pub use memory::{MemoryVisitorStore, MAX_RETAINED_LOGS};
pub use postgres::PgVisitorStore;

/// One request served to a visitor.
#[derive(Clone, Debug, PartialEq)]
pub struct VisitorLog {
    pub visitor_uuid: Uuid,
    pub session_id: Option<String>,
    pub http_method: String,
    pub request_path: String,
    pub query_string: String,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub status_code: u16,
    pub timestamp: OffsetDateTime,
}

#[async_trait]
pub trait VisitorStore: Send + Sync {
    async fn create(&self, new: NewVisitor) -> Result<Visitor>;

    async fn get(&self, uuid: Uuid) -> Result<Option<Visitor>>;

    async fn deactivate(&self, uuid: Uuid) -> Result<Option<Visitor>>;

    /// Reactivate a visitor and replace its expiry.
    async fn reactivate(
        &self,
        uuid: Uuid,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<Option<Visitor>>;

    /// Take one visit off a limited visitor.
    ///
    /// Unlimited visitors come back unchanged. Returns `None` when the visitor
    /// does not exist or its counter is already at zero; the counter never
    /// goes negative.
    async fn consume_visit(&self, uuid: Uuid) -> Result<Option<Visitor>>;

    async fn log_visit(&self, log: VisitorLog) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}
