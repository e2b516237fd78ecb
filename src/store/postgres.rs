use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

use super::{VisitorLog, VisitorStore};
use crate::model::{NewVisitor, Visitor};

const VISITOR_COLUMNS: &str = "uuid, email, first_name, last_name, scope, context, \
     visits_remaining, is_active, created_at, last_updated_at, expires_at";

#[derive(Clone, Debug)]
pub struct PgVisitorStore {
    pool: PgPool,
}

impl PgVisitorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_visitor(
        &self,
        query: &str,
        operation: &'static str,
        uuid: Uuid,
    ) -> Result<Option<Visitor>> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to {operation} visitor {uuid}"))?;

        row.as_ref().map(visitor_from_row).transpose()
    }
}

fn visitor_from_row(row: &PgRow) -> Result<Visitor> {
    Ok(Visitor {
        uuid: row.try_get("uuid")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        scope: row.try_get("scope")?,
        context: row.try_get("context")?,
        visits_remaining: row.try_get("visits_remaining")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl VisitorStore for PgVisitorStore {
    async fn create(&self, new: NewVisitor) -> Result<Visitor> {
        let visitor = Visitor::from_new(new, OffsetDateTime::now_utc());

        let query = format!(
            r"
            INSERT INTO visitors
                (uuid, email, first_name, last_name, scope, context, visits_remaining,
                 is_active, created_at, last_updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {VISITOR_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(visitor.uuid)
            .bind(&visitor.email)
            .bind(&visitor.first_name)
            .bind(&visitor.last_name)
            .bind(&visitor.scope)
            .bind(&visitor.context)
            .bind(visitor.visits_remaining)
            .bind(visitor.is_active)
            .bind(visitor.created_at)
            .bind(visitor.last_updated_at)
            .bind(visitor.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert visitor")?;

        visitor_from_row(&row)
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<Visitor>> {
        let query = format!("SELECT {VISITOR_COLUMNS} FROM visitors WHERE uuid = $1");
        self.fetch_visitor(&query, "SELECT", uuid).await
    }

    async fn deactivate(&self, uuid: Uuid) -> Result<Option<Visitor>> {
        let query = format!(
            "UPDATE visitors SET is_active = FALSE, last_updated_at = NOW() \
             WHERE uuid = $1 RETURNING {VISITOR_COLUMNS}"
        );
        self.fetch_visitor(&query, "UPDATE", uuid).await
    }

    async fn reactivate(
        &self,
        uuid: Uuid,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<Option<Visitor>> {
        let query = format!(
            "UPDATE visitors SET is_active = TRUE, expires_at = $2, last_updated_at = NOW() \
             WHERE uuid = $1 RETURNING {VISITOR_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(uuid)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to reactivate visitor {uuid}"))?;

        row.as_ref().map(visitor_from_row).transpose()
    }

    async fn consume_visit(&self, uuid: Uuid) -> Result<Option<Visitor>> {
        // A single conditional update keeps concurrent requests from driving
        // the counter below zero.
        let query = format!(
            r"
            UPDATE visitors
            SET visits_remaining = CASE
                    WHEN visits_remaining IS NULL THEN NULL
                    ELSE visits_remaining - 1
                END,
                last_updated_at = NOW()
            WHERE uuid = $1 AND (visits_remaining IS NULL OR visits_remaining > 0)
            RETURNING {VISITOR_COLUMNS}
            "
        );
        self.fetch_visitor(&query, "UPDATE", uuid).await
    }

    async fn log_visit(&self, log: VisitorLog) -> Result<()> {
        let query = r"
            INSERT INTO visitor_logs
                (visitor_uuid, session_id, http_method, request_path, query_string,
                 remote_addr, user_agent, referer, status_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(log.visitor_uuid)
            .bind(log.session_id)
            .bind(log.http_method)
            .bind(log.request_path)
            .bind(log.query_string)
            .bind(log.remote_addr)
            .bind(log.user_agent)
            .bind(log.referer)
            .bind(i32::from(log.status_code))
            .bind(log.timestamp)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert visitor log")?;

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;

        let ping_span =
            tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}
