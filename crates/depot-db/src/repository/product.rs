//! # Product Repository
//!
//! Catalog reads the engine needs while building and settling orders.
//!
//! ## Key Operations
//! - Product snapshot (code, name, five price tiers, cost, aggregate stock)
//! - Current stock lookups, always read fresh before a stock check
//! - Per-warehouse holdings for the Warehouse Allocator
//! - Stock movement audit trail
//!
//! ## Stock Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  products.stock_milli            aggregate, what the builder checks    │
//! │       ▲                                                                 │
//! │       │ decremented together in the settlement transaction             │
//! │       ▼                                                                 │
//! │  warehouse_stock.quantity_milli  one row per (warehouse, product)      │
//! │                                                                         │
//! │  MAIN  │ Rice 25kg │ 40                                                │
//! │  NORTH │ Rice 25kg │ 12                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use depot_core::{CatalogProduct, Money, Quantity, WarehouseStock};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    code: String,
    name: String,
    stock_milli: i64,
    price_tier_1: i64,
    price_tier_2: i64,
    price_tier_3: i64,
    price_tier_4: i64,
    price_tier_5: i64,
    cost_cents: i64,
}

impl From<ProductRow> for CatalogProduct {
    fn from(row: ProductRow) -> Self {
        CatalogProduct {
            id: row.id,
            code: row.code,
            name: row.name,
            stock: Quantity::from_milli(row.stock_milli),
            price_tiers: [
                Money::from_cents(row.price_tier_1),
                Money::from_cents(row.price_tier_2),
                Money::from_cents(row.price_tier_3),
                Money::from_cents(row.price_tier_4),
                Money::from_cents(row.price_tier_5),
            ],
            cost: Money::from_cents(row.cost_cents),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WarehouseStockRow {
    warehouse_id: String,
    warehouse_name: String,
    product_id: String,
    quantity_milli: i64,
}

impl From<WarehouseStockRow> for WarehouseStock {
    fn from(row: WarehouseStockRow) -> Self {
        WarehouseStock {
            warehouse_id: row.warehouse_id,
            warehouse_name: row.warehouse_name,
            product_id: row.product_id,
            quantity: Quantity::from_milli(row.quantity_milli),
        }
    }
}

/// One entry of the inventory audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,
    /// `None` when the order was settled without a warehouse distribution.
    pub warehouse_id: Option<String>,
    pub quantity: Quantity,
    pub kind: String,
    pub order_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct StockMovementRow {
    id: String,
    product_id: String,
    warehouse_id: Option<String>,
    quantity_milli: i64,
    kind: String,
    order_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl From<StockMovementRow> for StockMovement {
    fn from(row: StockMovementRow) -> Self {
        StockMovement {
            id: row.id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            quantity: Quantity::from_milli(row.quantity_milli),
            kind: row.kind,
            order_id: row.order_id,
            created_at: row.created_at,
        }
    }
}

const PRODUCT_COLUMNS: &str = "id, code, name, stock_milli, \
     price_tier_1, price_tier_2, price_tier_3, price_tier_4, price_tier_5, cost_cents";

// =============================================================================
// Repository
// =============================================================================

/// Repository for catalog and warehouse stock.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let product = repo.get("p-rice").await?;
/// let stocks = repo.warehouse_stock("p-rice").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets an active product by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(CatalogProduct))` - Product found
    /// * `Ok(None)` - Product not found or inactive
    pub async fn get(&self, id: &str) -> DbResult<Option<CatalogProduct>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1 AND is_active = 1");
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(CatalogProduct::from))
    }

    /// Gets an active product by its catalog code (what the scanner reads).
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<CatalogProduct>> {
        let sql =
            format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?1 AND is_active = 1");
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(CatalogProduct::from))
    }

    /// Searches active products by code prefix or name fragment.
    pub async fn search(&self, query: &str, limit: u32) -> DbResult<Vec<CatalogProduct>> {
        let query = query.trim();
        debug!(query = %query, limit = %limit, "Searching products");

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 AND (code LIKE ?1 || '%' OR name LIKE '%' || ?1 || '%') \
             ORDER BY name LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(CatalogProduct::from).collect())
    }

    /// Current aggregate stock of a product.
    ///
    /// Read immediately before every stock check so the check never uses a
    /// figure cached when the line was first added.
    pub async fn current_stock(&self, id: &str) -> DbResult<Quantity> {
        let milli: Option<i64> =
            sqlx::query_scalar("SELECT stock_milli FROM products WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        milli
            .map(Quantity::from_milli)
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Per-warehouse holdings of a product, largest first.
    pub async fn warehouse_stock(&self, product_id: &str) -> DbResult<Vec<WarehouseStock>> {
        let rows = sqlx::query_as::<_, WarehouseStockRow>(
            r#"
            SELECT ws.warehouse_id, w.name AS warehouse_name, ws.product_id, ws.quantity_milli
            FROM warehouse_stock ws
            INNER JOIN warehouses w ON w.id = ws.warehouse_id
            WHERE ws.product_id = ?1
            ORDER BY ws.quantity_milli DESC, ws.warehouse_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WarehouseStock::from).collect())
    }

    /// Audit trail of a product, oldest first.
    pub async fn movements(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovementRow>(
            r#"
            SELECT id, product_id, warehouse_id, quantity_milli, kind, order_id, created_at
            FROM stock_movements
            WHERE product_id = ?1
            ORDER BY created_at, warehouse_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StockMovement::from).collect())
    }

    // -------------------------------------------------------------------------
    // Catalog maintenance (seeding, back office)
    // -------------------------------------------------------------------------

    /// Inserts a product.
    pub async fn insert(&self, product: &CatalogProduct) -> DbResult<()> {
        debug!(id = %product.id, code = %product.code, "Inserting product");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO products (
                id, code, name, stock_milli,
                price_tier_1, price_tier_2, price_tier_3, price_tier_4, price_tier_5,
                cost_cents, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.code)
        .bind(&product.name)
        .bind(product.stock.milli())
        .bind(product.price_tiers[0].cents())
        .bind(product.price_tiers[1].cents())
        .bind(product.price_tiers[2].cents())
        .bind(product.price_tiers[3].cents())
        .bind(product.price_tiers[4].cents())
        .bind(product.cost.cents())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("code", &product.code),
            other => other,
        })?;

        Ok(())
    }

    /// Inserts a warehouse.
    pub async fn insert_warehouse(&self, id: &str, name: &str) -> DbResult<()> {
        sqlx::query("INSERT INTO warehouses (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sets a warehouse's holding of a product.
    ///
    /// Does not touch the aggregate; callers keep the two in step.
    pub async fn set_warehouse_stock(
        &self,
        warehouse_id: &str,
        product_id: &str,
        quantity: Quantity,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouse_stock (warehouse_id, product_id, quantity_milli)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(warehouse_id, product_id) DO UPDATE SET quantity_milli = excluded.quantity_milli
            "#,
        )
        .bind(warehouse_id)
        .bind(product_id)
        .bind(quantity.milli())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrites a product's aggregate stock.
    pub async fn set_stock(&self, id: &str, quantity: Quantity) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE products SET stock_milli = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(quantity.milli())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Counts active products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn rice() -> CatalogProduct {
        CatalogProduct {
            id: "p-rice".to_string(),
            code: "RICE-25".to_string(),
            name: "Rice 25kg".to_string(),
            stock: Quantity::from_units(52),
            price_tiers: [
                Money::from_cents(3500),
                Money::from_cents(3400),
                Money::from_cents(3300),
                Money::from_cents(3200),
                Money::from_cents(3100),
            ],
            cost: Money::from_cents(2800),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        repo.insert(&rice()).await.unwrap();

        let product = repo.get("p-rice").await.unwrap().unwrap();
        assert_eq!(product, rice());
        assert_eq!(repo.get_by_code(" RICE-25 ").await.unwrap().unwrap().id, "p-rice");
        assert!(repo.get("missing").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        repo.insert(&rice()).await.unwrap();

        let mut copy = rice();
        copy.id = "p-rice-2".to_string();
        let err = repo.insert(&copy).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_current_stock_and_search() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        repo.insert(&rice()).await.unwrap();

        assert_eq!(repo.current_stock("p-rice").await.unwrap(), Quantity::from_units(52));
        repo.set_stock("p-rice", Quantity::from_units(3)).await.unwrap();
        assert_eq!(repo.current_stock("p-rice").await.unwrap(), Quantity::from_units(3));

        assert!(matches!(
            repo.current_stock("missing").await,
            Err(DbError::NotFound { .. })
        ));

        assert_eq!(repo.search("RICE", 10).await.unwrap().len(), 1);
        assert_eq!(repo.search("25kg", 10).await.unwrap().len(), 1);
        assert!(repo.search("beans", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_warehouse_stock_largest_first() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.products();
        repo.insert(&rice()).await.unwrap();
        repo.insert_warehouse("MAIN", "Main store").await.unwrap();
        repo.insert_warehouse("NORTH", "North yard").await.unwrap();
        repo.set_warehouse_stock("NORTH", "p-rice", Quantity::from_units(12)).await.unwrap();
        repo.set_warehouse_stock("MAIN", "p-rice", Quantity::from_units(40)).await.unwrap();

        let stocks = repo.warehouse_stock("p-rice").await.unwrap();
        assert_eq!(stocks.len(), 2);
        assert_eq!(stocks[0].warehouse_id, "MAIN");
        assert_eq!(stocks[0].warehouse_name, "Main store");
        assert_eq!(stocks[1].quantity, Quantity::from_units(12));

        // upsert overwrites
        repo.set_warehouse_stock("NORTH", "p-rice", Quantity::from_units(1)).await.unwrap();
        let stocks = repo.warehouse_stock("p-rice").await.unwrap();
        assert_eq!(stocks[1].quantity, Quantity::from_units(1));
    }
}
