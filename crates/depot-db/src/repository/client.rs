//! # Client Repository
//!
//! Clients, their credit limits and outstanding balances.
//!
//! The balance only moves inside the settlement transaction (see
//! [`SettlementRepository`](super::settlement::SettlementRepository)); this
//! repository reads it and manages the client record itself.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use depot_core::{Client, Money, PriceTier};

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: String,
    name: String,
    credit_limit_cents: i64,
    balance_cents: i64,
    default_price_tier: i64,
}

impl TryFrom<ClientRow> for Client {
    type Error = DbError;

    fn try_from(row: ClientRow) -> DbResult<Self> {
        let tier = u8::try_from(row.default_price_tier)
            .ok()
            .and_then(|t| PriceTier::new(t).ok())
            .ok_or_else(|| {
                DbError::corrupt("Client", format!("price tier {}", row.default_price_tier))
            })?;

        Ok(Client {
            id: row.id,
            name: row.name,
            credit_limit: Money::from_cents(row.credit_limit_cents),
            balance: Money::from_cents(row.balance_cents),
            default_price_tier: tier,
        })
    }
}

/// Repository for clients.
#[derive(Debug, Clone)]
pub struct ClientRepository {
    pool: SqlitePool,
}

impl ClientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ClientRepository { pool }
    }

    /// Gets a client by its ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<Client>> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT id, name, credit_limit_cents, balance_cents, default_price_tier \
             FROM clients WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Client::try_from).transpose()
    }

    /// Inserts a client.
    pub async fn insert(&self, client: &Client) -> DbResult<()> {
        debug!(id = %client.id, name = %client.name, "Inserting client");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO clients (
                id, name, credit_limit_cents, balance_cents, default_price_tier,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(client.credit_limit.cents())
        .bind(client.balance.cents())
        .bind(i64::from(client.default_price_tier.number()))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Changes a client's credit limit.
    pub async fn set_credit_limit(&self, id: &str, limit: Money) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE clients SET credit_limit_cents = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(limit.cents())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Client", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn acme() -> Client {
        Client {
            id: "c-acme".to_string(),
            name: "Acme Hardware".to_string(),
            credit_limit: Money::from_cents(100_000),
            balance: Money::from_cents(25_000),
            default_price_tier: PriceTier::new(3).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_and_update_limit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.clients();
        repo.insert(&acme()).await.unwrap();

        assert_eq!(repo.get("c-acme").await.unwrap().unwrap(), acme());
        assert!(repo.get("nobody").await.unwrap().is_none());

        repo.set_credit_limit("c-acme", Money::from_cents(5_000)).await.unwrap();
        let client = repo.get("c-acme").await.unwrap().unwrap();
        assert_eq!(client.credit_limit.cents(), 5_000);

        assert!(matches!(
            repo.set_credit_limit("nobody", Money::zero()).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
