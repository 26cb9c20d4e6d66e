//! # Voucher Repository
//!
//! Return vouchers ("vales") issued to clients.
//!
//! Redemption happens in the settlement transaction with a compare-and-set
//! on `remaining_cents`; this repository only issues and reads vouchers.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use depot_core::{Money, Voucher, VoucherStatus};

#[derive(Debug, sqlx::FromRow)]
struct VoucherRow {
    id: String,
    client_id: String,
    face_value_cents: i64,
    remaining_cents: i64,
    status: VoucherStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<VoucherRow> for Voucher {
    fn from(row: VoucherRow) -> Self {
        Voucher {
            id: row.id,
            client_id: row.client_id,
            face_value: Money::from_cents(row.face_value_cents),
            remaining: Money::from_cents(row.remaining_cents),
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const VOUCHER_COLUMNS: &str =
    "id, client_id, face_value_cents, remaining_cents, status, created_at, updated_at";

/// Repository for vouchers.
#[derive(Debug, Clone)]
pub struct VoucherRepository {
    pool: SqlitePool,
}

impl VoucherRepository {
    pub fn new(pool: SqlitePool) -> Self {
        VoucherRepository { pool }
    }

    /// Issues a new enabled voucher worth `face_value` to a client.
    pub async fn issue(&self, client_id: &str, face_value: Money) -> DbResult<Voucher> {
        let now = Utc::now();
        let voucher = Voucher {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            face_value,
            remaining: face_value,
            status: VoucherStatus::Enabled,
            created_at: now,
            updated_at: now,
        };

        debug!(id = %voucher.id, client_id = %client_id, face_value = %face_value, "Issuing voucher");

        sqlx::query(
            r#"
            INSERT INTO vouchers (
                id, client_id, face_value_cents, remaining_cents, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&voucher.id)
        .bind(&voucher.client_id)
        .bind(voucher.face_value.cents())
        .bind(voucher.remaining.cents())
        .bind(voucher.status)
        .bind(voucher.created_at)
        .bind(voucher.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(voucher)
    }

    /// Gets a voucher by its ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Voucher>> {
        let sql = format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE id = ?1");
        let row = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Voucher::from))
    }

    /// Redeemable vouchers of a client, oldest first.
    pub async fn list_enabled(&self, client_id: &str) -> DbResult<Vec<Voucher>> {
        let sql = format!(
            "SELECT {VOUCHER_COLUMNS} FROM vouchers \
             WHERE client_id = ?1 AND status = 'enabled' AND remaining_cents > 0 \
             ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, VoucherRow>(&sql)
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Voucher::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use depot_core::{Client, PriceTier};

    #[tokio::test]
    async fn test_issue_and_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.clients()
            .insert(&Client {
                id: "c-1".to_string(),
                name: "Walk-in regular".to_string(),
                credit_limit: Money::zero(),
                balance: Money::zero(),
                default_price_tier: PriceTier::RETAIL,
            })
            .await
            .unwrap();

        let repo = db.vouchers();
        let issued = repo.issue("c-1", Money::from_cents(3000)).await.unwrap();

        let loaded = repo.get(&issued.id).await.unwrap().unwrap();
        assert_eq!(loaded.remaining.cents(), 3000);
        assert_eq!(loaded.status, VoucherStatus::Enabled);
        assert!(loaded.is_redeemable());

        assert_eq!(repo.list_enabled("c-1").await.unwrap().len(), 1);
        assert!(repo.list_enabled("c-2").await.unwrap().is_empty());
        assert!(repo.get("missing").await.unwrap().is_none());
    }
}
