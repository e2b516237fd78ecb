use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{VisitorLog, VisitorStore};
use crate::model::{NewVisitor, Visitor};

/// Visit log rows kept by default; older rows are dropped first.
pub const MAX_RETAINED_LOGS: usize = 10_000;

/// In-process store, used when no database is configured.
#[derive(Debug)]
pub struct MemoryVisitorStore {
    visitors: Mutex<HashMap<Uuid, Visitor>>,
    logs: Mutex<VecDeque<VisitorLog>>,
    log_capacity: usize,
}

impl Default for MemoryVisitorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryVisitorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            logs: Mutex::new(VecDeque::new()),
            log_capacity: MAX_RETAINED_LOGS,
        }
    }

    /// Keep at most `capacity` visit log rows.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Put a visitor in place as-is, bypassing creation defaults.
    pub async fn insert(&self, visitor: Visitor) {
        self.visitors.lock().await.insert(visitor.uuid, visitor);
    }

    pub async fn logs(&self) -> Vec<VisitorLog> {
        self.logs.lock().await.iter().cloned().collect()
    }

    pub async fn visitor_count(&self) -> usize {
        self.visitors.lock().await.len()
    }

    async fn update<F>(&self, uuid: Uuid, apply: F) -> Option<Visitor>
    where
        F: FnOnce(&mut Visitor) + Send,
    {
        let mut visitors = self.visitors.lock().await;
        let visitor = visitors.get_mut(&uuid)?;
        apply(visitor);
        visitor.last_updated_at = OffsetDateTime::now_utc();
        Some(visitor.clone())
    }
}

#[async_trait]
impl VisitorStore for MemoryVisitorStore {
    async fn create(&self, new: NewVisitor) -> Result<Visitor> {
        let visitor = Visitor::from_new(new, OffsetDateTime::now_utc());
        self.insert(visitor.clone()).await;
        Ok(visitor)
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<Visitor>> {
        Ok(self.visitors.lock().await.get(&uuid).cloned())
    }

    async fn deactivate(&self, uuid: Uuid) -> Result<Option<Visitor>> {
        Ok(self.update(uuid, |visitor| visitor.is_active = false).await)
    }

    async fn reactivate(
        &self,
        uuid: Uuid,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<Option<Visitor>> {
        Ok(self
            .update(uuid, |visitor| {
                visitor.is_active = true;
                visitor.expires_at = expires_at;
            })
            .await)
    }

    async fn consume_visit(&self, uuid: Uuid) -> Result<Option<Visitor>> {
        let mut visitors = self.visitors.lock().await;
        let Some(visitor) = visitors.get_mut(&uuid) else {
            return Ok(None);
        };
        match visitor.visits_remaining {
            None => Ok(Some(visitor.clone())),
            Some(remaining) if remaining > 0 => {
                visitor.visits_remaining = Some(remaining - 1);
                visitor.last_updated_at = OffsetDateTime::now_utc();
                Ok(Some(visitor.clone()))
            }
            Some(_) => Ok(None),
        }
    }

    async fn log_visit(&self, log: VisitorLog) -> Result<()> {
        let mut logs = self.logs.lock().await;
        while logs.len() >= self.log_capacity.max(1) {
            logs.pop_front();
        }
        logs.push_back(log);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
