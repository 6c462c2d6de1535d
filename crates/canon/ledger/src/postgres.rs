//! PostgreSQL durable archive.
//!
//! Appends take a transaction-scoped advisory lock keyed by pointer, so
//! writers to different chains never block each other.

use crate::error::{LedgerError, LedgerResult};
use crate::model::{LedgerEvent, LedgerEventType, LedgerHead};
use crate::traits::LedgerStore;
use async_trait::async_trait;
use canon_types::TenantId;
use canon_whynot::DenialRecord;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Acquire, Row};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> LedgerResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> LedgerResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> LedgerResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS canon_ledger_events (
                event_id TEXT PRIMARY KEY,
                pointer TEXT NOT NULL,
                seq BIGINT NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                tenant_id TEXT NOT NULL,
                action_id TEXT NOT NULL,
                stable_key TEXT NOT NULL,
                event_type TEXT NOT NULL,
                decision_id TEXT,
                payload JSONB NOT NULL,
                prev_hash TEXT,
                hash TEXT NOT NULL,
                UNIQUE (pointer, seq)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS canon_ledger_events_tenant_ts
                ON canon_ledger_events (tenant_id, ts DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS canon_denials (
                why_not_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

fn to_i64(value: u64) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::Backend(format!("value {value} exceeds i64")))
}

fn row_to_event(row: PgRow) -> LedgerResult<LedgerEvent> {
    let seq: i64 = row
        .try_get("seq")
        .map_err(|e| LedgerError::Backend(e.to_string()))?;
    let event_type: String = row
        .try_get("event_type")
        .map_err(|e| LedgerError::Backend(e.to_string()))?;
    let tenant_id: String = row
        .try_get("tenant_id")
        .map_err(|e| LedgerError::Backend(e.to_string()))?;

    Ok(LedgerEvent {
        id: row
            .try_get("event_id")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        ts: row
            .try_get::<DateTime<Utc>, _>("ts")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        tenant_id: TenantId::new(tenant_id),
        action_id: row
            .try_get("action_id")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        stable_key: row
            .try_get("stable_key")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        pointer: row
            .try_get("pointer")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        event_type: LedgerEventType::parse(&event_type)
            .ok_or_else(|| LedgerError::Backend(format!("unknown event type {event_type}")))?,
        decision_id: row
            .try_get("decision_id")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        seq: u64::try_from(seq).map_err(|_| LedgerError::Backend(format!("negative seq {seq}")))?,
        prev_hash: row
            .try_get("prev_hash")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        hash: row
            .try_get("hash")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
        payload: row
            .try_get::<Value, _>("payload")
            .map_err(|e| LedgerError::Backend(e.to_string()))?,
    })
}

const EVENT_COLUMNS: &str = "event_id, pointer, seq, ts, tenant_id, action_id, stable_key, event_type, decision_id, payload, prev_hash, hash";

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn append(&self, event: &LedgerEvent) -> LedgerResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;
        let conn = tx
            .acquire()
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&event.pointer)
            .execute(&mut *conn)
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        let tail = sqlx::query(
            "SELECT seq, hash FROM canon_ledger_events WHERE pointer = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(&event.pointer)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;

        let (tail_seq, tail_hash) = match tail {
            Some(row) => {
                let seq: i64 = row
                    .try_get("seq")
                    .map_err(|e| LedgerError::Backend(e.to_string()))?;
                let hash: String = row
                    .try_get("hash")
                    .map_err(|e| LedgerError::Backend(e.to_string()))?;
                (seq, Some(hash))
            }
            None => (0, None),
        };
        if to_i64(event.seq)? != tail_seq + 1 || event.prev_hash != tail_hash {
            return Err(LedgerError::Conflict(format!(
                "{} seq {} does not extend tail {tail_seq}",
                event.pointer, event.seq
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO canon_ledger_events
                (event_id, pointer, seq, ts, tenant_id, action_id, stable_key, event_type, decision_id, payload, prev_hash, hash)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&event.id)
        .bind(&event.pointer)
        .bind(to_i64(event.seq)?)
        .bind(event.ts)
        .bind(event.tenant_id.as_str())
        .bind(&event.action_id)
        .bind(&event.stable_key)
        .bind(event.event_type.as_str())
        .bind(&event.decision_id)
        .bind(&event.payload)
        .bind(&event.prev_hash)
        .bind(&event.hash)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e.as_database_error().and_then(|d| d.code()) {
            Some(code) if code == UNIQUE_VIOLATION => LedgerError::Conflict(format!(
                "{} seq {} already exists",
                event.pointer, event.seq
            )),
            _ => LedgerError::Backend(e.to_string()),
        })?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))
    }

    async fn tail(&self, pointer: &str) -> LedgerResult<Option<LedgerHead>> {
        let row = sqlx::query(
            "SELECT seq, hash FROM canon_ledger_events WHERE pointer = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(pointer)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;

        row.map(|row| {
            let seq: i64 = row
                .try_get("seq")
                .map_err(|e| LedgerError::Backend(e.to_string()))?;
            Ok(LedgerHead {
                seq: u64::try_from(seq)
                    .map_err(|_| LedgerError::Backend(format!("negative seq {seq}")))?,
                hash: row
                    .try_get("hash")
                    .map_err(|e| LedgerError::Backend(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn events(&self, pointer: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM canon_ledger_events WHERE pointer = $1 ORDER BY seq ASC"
        ))
        .bind(pointer)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn recent(&self, tenant: &TenantId, limit: usize) -> LedgerResult<Vec<LedgerEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM canon_ledger_events WHERE tenant_id = $1 ORDER BY ts DESC, seq DESC LIMIT $2"
        ))
        .bind(tenant.as_str())
        .bind(to_i64(limit as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;
        rows.into_iter().map(row_to_event).collect()
    }

    async fn pointers(&self) -> LedgerResult<Vec<(TenantId, String)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT tenant_id, pointer FROM canon_ledger_events WHERE seq = 1 ORDER BY pointer",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let tenant: String = row
                    .try_get("tenant_id")
                    .map_err(|e| LedgerError::Backend(e.to_string()))?;
                let pointer: String = row
                    .try_get("pointer")
                    .map_err(|e| LedgerError::Backend(e.to_string()))?;
                Ok((TenantId::new(tenant), pointer))
            })
            .collect()
    }

    async fn put_denial(&self, record: &DenialRecord) -> LedgerResult<()> {
        let body = serde_json::to_value(record)?;
        sqlx::query(
            r#"
            INSERT INTO canon_denials (why_not_id, tenant_id, record, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (why_not_id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(record.tenant_id.as_str())
        .bind(body)
        .bind(record.ts)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_denial(&self, why_not_id: &str) -> LedgerResult<Option<DenialRecord>> {
        let row = sqlx::query("SELECT record FROM canon_denials WHERE why_not_id = $1")
            .bind(why_not_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;

        row.map(|row| {
            let record: Value = row
                .try_get("record")
                .map_err(|e| LedgerError::Backend(e.to_string()))?;
            serde_json::from_value(record).map_err(LedgerError::from)
        })
        .transpose()
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Backend(e.to_string()))?;
        Ok(())
    }
}
