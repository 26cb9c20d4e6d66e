//! # Lock Repository
//!
//! Per-order editing leases, one row per order in `order_locks`.
//!
//! ## Atomic Acquisition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  INSERT INTO order_locks (...) VALUES (...)                             │
//! │  ON CONFLICT(order_id) DO UPDATE SET ...                                │
//! │  WHERE existing.expires_at <= now                                       │
//! │     OR existing holder == requesting holder                             │
//! │                                                                         │
//! │  rows_affected == 1  → granted (fresh row, expired row taken over,      │
//! │                        or own lease re-acquired)                        │
//! │  rows_affected == 0  → a live lease of another holder exists            │
//! │                                                                         │
//! │  Two terminals racing for order 42 hit the primary key; SQLite          │
//! │  serializes the writes so exactly one statement changes the row.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock times are Unix milliseconds so expiry compares inside SQL.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::from_millis;
use crate::error::DbResult;
use depot_core::{LockHolder, OrderLock, SessionId};

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    order_id: i64,
    user_id: String,
    session_id: String,
    holder_name: String,
    created_at_ms: i64,
    expires_at_ms: i64,
}

impl TryFrom<LockRow> for OrderLock {
    type Error = crate::error::DbError;

    fn try_from(row: LockRow) -> DbResult<Self> {
        Ok(OrderLock {
            order_id: row.order_id,
            holder: LockHolder::new(row.user_id, SessionId::from_string(row.session_id)),
            holder_name: row.holder_name,
            created_at: from_millis("OrderLock", row.created_at_ms)?,
            expires_at: from_millis("OrderLock", row.expires_at_ms)?,
        })
    }
}

const LOCK_COLUMNS: &str =
    "order_id, user_id, session_id, holder_name, created_at_ms, expires_at_ms";

/// Repository for order locks.
///
/// Callers pass `now` explicitly so expiry is decided by one clock reading
/// per operation.
#[derive(Debug, Clone)]
pub struct LockRepository {
    pool: SqlitePool,
}

impl LockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LockRepository { pool }
    }

    /// Tries to take the lease on `order_id` for `ttl`.
    ///
    /// ## Returns
    /// * `Ok(true)` - Lease granted (or re-acquired by the same holder)
    /// * `Ok(false)` - Another holder has a live lease
    pub async fn try_acquire(
        &self,
        order_id: i64,
        holder: &LockHolder,
        holder_name: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DbResult<bool> {
        let now_ms = now.timestamp_millis();
        let expires_ms = (now + ttl).timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO order_locks (
                order_id, user_id, session_id, holder_name, created_at_ms, expires_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(order_id) DO UPDATE SET
                user_id       = excluded.user_id,
                session_id    = excluded.session_id,
                holder_name   = excluded.holder_name,
                created_at_ms = excluded.created_at_ms,
                expires_at_ms = MAX(order_locks.expires_at_ms, excluded.expires_at_ms)
            WHERE order_locks.expires_at_ms <= excluded.created_at_ms
               OR (order_locks.user_id = excluded.user_id
                   AND order_locks.session_id = excluded.session_id)
            "#,
        )
        .bind(order_id)
        .bind(&holder.user_id)
        .bind(holder.session.as_str())
        .bind(holder_name)
        .bind(now_ms)
        .bind(expires_ms)
        .execute(&self.pool)
        .await?;

        let granted = result.rows_affected() == 1;
        debug!(order_id, user_id = %holder.user_id, granted, "Lock acquire");
        Ok(granted)
    }

    /// Pushes the expiry of the holder's lease to at least `now + ttl`.
    ///
    /// Returns `false` if the holder no longer owns the row.
    pub async fn renew(
        &self,
        order_id: i64,
        holder: &LockHolder,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE order_locks SET expires_at_ms = MAX(expires_at_ms, ?4)
            WHERE order_id = ?1 AND user_id = ?2 AND session_id = ?3
            "#,
        )
        .bind(order_id)
        .bind(&holder.user_id)
        .bind(holder.session.as_str())
        .bind((now + ttl).timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes the holder's lease. A lease of another holder is left alone.
    ///
    /// Returns `true` if a row was removed.
    pub async fn release(&self, order_id: i64, holder: &LockHolder) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM order_locks WHERE order_id = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(order_id)
        .bind(&holder.user_id)
        .bind(holder.session.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes every lease held by one session (terminal shutdown).
    pub async fn release_session(&self, holder: &LockHolder) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM order_locks WHERE user_id = ?1 AND session_id = ?2")
                .bind(&holder.user_id)
                .bind(holder.session.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// The lock row for an order, expired or not.
    pub async fn get(&self, order_id: i64) -> DbResult<Option<OrderLock>> {
        let sql = format!("SELECT {LOCK_COLUMNS} FROM order_locks WHERE order_id = ?1");
        let row = sqlx::query_as::<_, LockRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(OrderLock::try_from).transpose()
    }

    /// Leases still live at `now`, by order id.
    pub async fn list_active(&self, now: DateTime<Utc>) -> DbResult<Vec<OrderLock>> {
        let sql = format!(
            "SELECT {LOCK_COLUMNS} FROM order_locks WHERE expires_at_ms > ?1 ORDER BY order_id"
        );
        sqlx::query_as::<_, LockRow>(&sql)
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(OrderLock::try_from)
            .collect()
    }

    /// Removes every lease expired at `now`. Returns how many were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM order_locks WHERE expires_at_ms <= ?1")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
