//! # Schema Migrations
//!
//! SQL files under `migrations/sqlite/` at the workspace root, embedded at
//! compile time and applied on startup.
//!
//! ```text
//! Database::new(config)
//!      │
//!      ▼
//! _sqlx_migrations ──► which versions are applied?
//!      │
//!      └── 001_initial_schema.sql   catalog, warehouse stock, clients,
//!                                   orders, payments, vouchers,
//!                                   order_locks, stock_movements
//! ```
//!
//! New schema goes in a new `NNN_description.sql`; an applied file is
//! never edited. Every terminal pointing at the same store runs the same
//! migrator, and applying twice is a no-op.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let (total, applied) = migration_status(pool).await?;
    if applied >= total {
        debug!(version = total, "Schema up to date");
        return Ok(());
    }

    info!(from = applied, to = total, "Migrating schema");
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// `(embedded, applied)` migration counts.
///
/// A fresh store without the bookkeeping table reports zero applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied: i64 = if tables > 0 {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?
    } else {
        0
    };

    Ok((MIGRATOR.migrations.len(), usize::try_from(applied).unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_fresh_store_reports_nothing_applied() {
        let db = Database::new(DbConfig::in_memory().run_migrations(false))
            .await
            .unwrap();
        let (total, applied) = migration_status(db.pool()).await.unwrap();
        assert!(total >= 1);
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn test_running_twice_is_a_no_op() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        run_migrations(db.pool()).await.unwrap();

        let (total, applied) = migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);

        for table in ["order_locks", "stock_movements", "warehouse_stock"] {
            let found: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
            assert_eq!(found, 1, "missing table {table}");
        }
    }
}
