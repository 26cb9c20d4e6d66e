//! # Order Repository
//!
//! Persistence for orders, their lines and payments.
//!
//! ## Identity Swap
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tab holds Order { id: Local("draft:9f2c…"), status: Draft }           │
//! │       │                                                                 │
//! │       │  save(&order)                                                   │
//! │       ▼                                                                 │
//! │  INSERT INTO orders ...        → rowid 42                               │
//! │  INSERT INTO order_items ...   (position 0..n)                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  returns Order { id: Stored(42), status: Saved }                        │
//! │                                                                         │
//! │  Later saves of Stored(42) rewrite the header and replace all lines    │
//! │  in one transaction.                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The header and line writers are shared with the settlement transaction
//! through the `pub(crate)` functions at the bottom of this file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use depot_core::{
    Discount, Money, Order, OrderFlags, OrderId, OrderItem, OrderStatus, Payment, PriceTier,
    Quantity, TenderMethod,
};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    client_id: Option<String>,
    status: OrderStatus,
    tender_method: Option<TenderMethod>,
    subtotal_cents: i64,
    discount_kind: String,
    discount_value: i64,
    discount_cents: i64,
    total_cents: i64,
    amount_paid_cents: i64,
    remaining_cents: i64,
    is_credit: bool,
    is_invoice: bool,
    is_quote: bool,
    is_external: bool,
    observations: Option<String>,
    driver: Option<String>,
    route: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    product_id: String,
    code_snapshot: String,
    name_snapshot: String,
    quantity_milli: i64,
    price_tier: Option<i64>,
    unit_price_cents: i64,
    total_cents: i64,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = DbError;

    fn try_from(row: OrderItemRow) -> DbResult<Self> {
        let price_tier = row
            .price_tier
            .map(|t| {
                u8::try_from(t)
                    .ok()
                    .and_then(|t| PriceTier::new(t).ok())
                    .ok_or_else(|| DbError::corrupt("OrderItem", format!("price tier {t}")))
            })
            .transpose()?;

        Ok(OrderItem {
            id: row.id,
            product_id: row.product_id,
            product_code: row.code_snapshot,
            product_name: row.name_snapshot,
            quantity: Quantity::from_milli(row.quantity_milli),
            price_tier,
            unit_price: Money::from_cents(row.unit_price_cents),
            total: Money::from_cents(row.total_cents),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    order_id: i64,
    method: TenderMethod,
    amount_cents: i64,
    tendered_cents: Option<i64>,
    change_cents: Option<i64>,
    reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            order_id: row.order_id,
            method: row.method,
            amount: Money::from_cents(row.amount_cents),
            tendered: row.tendered_cents.map(Money::from_cents),
            change: row.change_cents.map(Money::from_cents),
            reference: row.reference,
            created_at: row.created_at,
        }
    }
}

/// A row of the "open orders" picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderSummary {
    pub id: i64,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub remaining_cents: i64,
    pub item_count: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

fn discount_columns(discount: Discount) -> (&'static str, i64) {
    match discount {
        Discount::None => ("none", 0),
        Discount::Amount(amount) => ("amount", amount.cents()),
        Discount::Percent(bps) => ("percent", i64::from(bps)),
    }
}

fn discount_from_columns(kind: &str, value: i64) -> DbResult<Discount> {
    match kind {
        "none" => Ok(Discount::None),
        "amount" => Ok(Discount::Amount(Money::from_cents(value))),
        "percent" => u32::try_from(value)
            .map(Discount::Percent)
            .map_err(|_| DbError::corrupt("Order", format!("discount {value} bps"))),
        other => Err(DbError::corrupt("Order", format!("discount kind '{other}'"))),
    }
}

const ORDER_COLUMNS: &str = "id, client_id, status, tender_method, subtotal_cents, \
     discount_kind, discount_value, discount_cents, total_cents, amount_paid_cents, \
     remaining_cents, is_credit, is_invoice, is_quote, is_external, observations, driver, \
     route, created_by, created_at";

// =============================================================================
// Repository
// =============================================================================

/// Repository for orders.
///
/// ## Usage
/// ```rust,ignore
/// let saved = db.orders().save(&draft).await?;
/// let order = db.orders().get(saved.id.stored().unwrap()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Persists an order's header and lines.
    ///
    /// ## Behavior
    /// - `Local` id: inserts, returns the order with its `Stored` id
    /// - `Stored` id: rewrites the header and replaces all lines
    /// - A `Draft` becomes `Saved`; other statuses are kept
    ///
    /// ## Errors
    /// - `NotFound` if a stored order no longer exists
    /// - `Conflict` if the stored order is already paid or cancelled, or its
    ///   status moved on since `order` was read
    pub async fn save(&self, order: &Order) -> DbResult<Order> {
        let status = if order.status == OrderStatus::Draft {
            OrderStatus::Saved
        } else {
            order.status
        };
        let mut saved = Order {
            status,
            ..order.clone()
        };

        let mut tx = self.pool.begin().await?;

        let id = match &order.id {
            OrderId::Local(_) => {
                let id = insert_header(&mut tx, &saved).await?;
                info!(order_id = id, items = order.items.len(), "Order created");
                id
            }
            OrderId::Stored(id) => {
                let current: Option<OrderStatus> =
                    sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await?;
                match current {
                    None => return Err(DbError::not_found("Order", id.to_string())),
                    Some(s) if !s.is_settleable() => {
                        return Err(DbError::conflict("Order", id.to_string(), format!("already {s}")))
                    }
                    Some(s) if s != status => {
                        return Err(DbError::conflict(
                            "Order",
                            id.to_string(),
                            format!("now {s}, was read as {status}"),
                        ))
                    }
                    Some(_) => {}
                }
                update_header(&mut tx, *id, &saved).await?;
                debug!(order_id = id, items = order.items.len(), "Order updated");
                *id
            }
        };

        replace_items(&mut tx, id, &saved.items).await?;
        tx.commit().await?;

        saved.id = OrderId::Stored(id);
        Ok(saved)
    }

    /// Loads an order with its lines (in position order) and payments.
    pub async fn get(&self, id: i64) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        let Some(row) = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT id, product_id, code_snapshot, name_snapshot, quantity_milli,
                   price_tier, unit_price_cents, total_cents
            FROM order_items
            WHERE order_id = ?1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(OrderItem::try_from)
        .collect::<DbResult<Vec<_>>>()?;

        let payments = self.payments(id).await?;

        Ok(Some(Order {
            id: OrderId::Stored(row.id),
            client_id: row.client_id,
            items,
            subtotal: Money::from_cents(row.subtotal_cents),
            discount: discount_from_columns(&row.discount_kind, row.discount_value)?,
            discount_total: Money::from_cents(row.discount_cents),
            total: Money::from_cents(row.total_cents),
            status: row.status,
            tender_method: row.tender_method,
            flags: OrderFlags {
                credit: row.is_credit,
                invoice: row.is_invoice,
                quote: row.is_quote,
                external: row.is_external,
            },
            observations: row.observations,
            driver: row.driver,
            route: row.route,
            created_by: row.created_by,
            created_at: row.created_at,
            amount_paid: Money::from_cents(row.amount_paid_cents),
            remaining_balance: Money::from_cents(row.remaining_cents),
            payments,
        }))
    }

    /// Payments recorded against an order, oldest first.
    pub async fn payments(&self, order_id: i64) -> DbResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT id, order_id, method, amount_cents, tendered_cents, change_cents,
                   reference, created_at
            FROM payments
            WHERE order_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Payment::from).collect())
    }

    /// Orders a terminal can open: saved or pending, newest first.
    pub async fn list_open(&self, limit: u32) -> DbResult<Vec<OrderSummary>> {
        let rows = sqlx::query_as::<_, OrderSummary>(
            r#"
            SELECT o.id, o.client_id, c.name AS client_name, o.status,
                   o.total_cents, o.remaining_cents,
                   (SELECT COUNT(*) FROM order_items i WHERE i.order_id = o.id) AS item_count,
                   o.created_by, o.created_at
            FROM orders o
            LEFT JOIN clients c ON c.id = o.client_id
            WHERE o.status IN ('saved', 'pending')
            ORDER BY o.id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Cancels an order that hasn't been fully paid.
    ///
    /// Stock and client balances are not touched; payments stay on record.
    pub async fn cancel(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = 'cancelled', updated_at = ?2
            WHERE id = ?1 AND status IN ('draft', 'saved', 'pending')
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.status(id).await? {
                None => Err(DbError::not_found("Order", id.to_string())),
                Some(s) => Err(DbError::conflict("Order", id.to_string(), format!("already {s}"))),
            };
        }

        info!(order_id = id, "Order cancelled");
        Ok(())
    }

    /// Deletes an order with its lines and payments.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", id.to_string()));
        }

        info!(order_id = id, "Order deleted");
        Ok(())
    }

    /// Current status of an order, `None` if it doesn't exist.
    pub async fn status(&self, id: i64) -> DbResult<Option<OrderStatus>> {
        let status = sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(status)
    }
}

// =============================================================================
// Shared writers (used inside transactions)
// =============================================================================

pub(crate) async fn insert_header(conn: &mut SqliteConnection, order: &Order) -> DbResult<i64> {
    let (discount_kind, discount_value) = discount_columns(order.discount);
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO orders (
            client_id, status, tender_method, subtotal_cents, discount_kind, discount_value,
            discount_cents, total_cents, amount_paid_cents, remaining_cents,
            is_credit, is_invoice, is_quote, is_external,
            observations, driver, route, created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
        "#,
    )
    .bind(&order.client_id)
    .bind(order.status)
    .bind(order.tender_method)
    .bind(order.subtotal.cents())
    .bind(discount_kind)
    .bind(discount_value)
    .bind(order.discount_total.cents())
    .bind(order.total.cents())
    .bind(order.amount_paid.cents())
    .bind(order.remaining_balance.cents())
    .bind(order.flags.credit)
    .bind(order.flags.invoice)
    .bind(order.flags.quote)
    .bind(order.flags.external)
    .bind(&order.observations)
    .bind(&order.driver)
    .bind(&order.route)
    .bind(&order.created_by)
    .bind(order.created_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(crate) async fn update_header(
    conn: &mut SqliteConnection,
    id: i64,
    order: &Order,
) -> DbResult<()> {
    let (discount_kind, discount_value) = discount_columns(order.discount);

    let result = sqlx::query(
        r#"
        UPDATE orders SET
            client_id = ?2, status = ?3, tender_method = ?4, subtotal_cents = ?5,
            discount_kind = ?6, discount_value = ?7, discount_cents = ?8, total_cents = ?9,
            amount_paid_cents = ?10, remaining_cents = ?11,
            is_credit = ?12, is_invoice = ?13, is_quote = ?14, is_external = ?15,
            observations = ?16, driver = ?17, route = ?18, updated_at = ?19
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(&order.client_id)
    .bind(order.status)
    .bind(order.tender_method)
    .bind(order.subtotal.cents())
    .bind(discount_kind)
    .bind(discount_value)
    .bind(order.discount_total.cents())
    .bind(order.total.cents())
    .bind(order.amount_paid.cents())
    .bind(order.remaining_balance.cents())
    .bind(order.flags.credit)
    .bind(order.flags.invoice)
    .bind(order.flags.quote)
    .bind(order.flags.external)
    .bind(&order.observations)
    .bind(&order.driver)
    .bind(&order.route)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Order", id.to_string()));
    }
    Ok(())
}

pub(crate) async fn replace_items(
    conn: &mut SqliteConnection,
    order_id: i64,
    items: &[OrderItem],
) -> DbResult<()> {
    sqlx::query("DELETE FROM order_items WHERE order_id = ?1")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items (
                id, order_id, position, product_id, code_snapshot, name_snapshot,
                quantity_milli, price_tier, unit_price_cents, total_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&item.id)
        .bind(order_id)
        .bind(position as i64)
        .bind(&item.product_id)
        .bind(&item.product_code)
        .bind(&item.product_name)
        .bind(item.quantity.milli())
        .bind(item.price_tier.map(|t| i64::from(t.number())))
        .bind(item.unit_price.cents())
        .bind(item.total.cents())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, order_id, method, amount_cents, tendered_cents, change_cents, reference, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&payment.id)
    .bind(payment.order_id)
    .bind(payment.method)
    .bind(payment.amount.cents())
    .bind(payment.tendered.map(|m| m.cents()))
    .bind(payment.change.map(|m| m.cents()))
    .bind(&payment.reference)
    .bind(payment.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use depot_core::builder::{add_item, apply_discount};
    use depot_core::{CatalogProduct, PriceChoice};

    fn beans() -> CatalogProduct {
        CatalogProduct {
            id: "p-beans".to_string(),
            code: "BEANS-1".to_string(),
            name: "Black beans 1kg".to_string(),
            stock: Quantity::from_units(100),
            price_tiers: [
                Money::from_cents(450),
                Money::from_cents(440),
                Money::from_cents(430),
                Money::from_cents(420),
                Money::from_cents(410),
            ],
            cost: Money::from_cents(300),
        }
    }

    fn draft() -> Order {
        let p = beans();
        let order = Order::new_draft("u-ana");
        let order = add_item(
            &order,
            &p,
            Quantity::from_units(3),
            PriceChoice::Tier(PriceTier::RETAIL),
            None,
        )
        .unwrap();
        let order = add_item(
            &order,
            &p,
            Quantity::from_milli(1_500),
            PriceChoice::Custom(Money::from_cents(400)),
            None,
        )
        .unwrap();
        apply_discount(&order, Discount::Percent(500)).unwrap()
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_round_trips() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let order = draft();

        let saved = repo.save(&order).await.unwrap();
        let id = saved.id.stored().unwrap();
        assert_eq!(saved.status, OrderStatus::Saved);

        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.items, order.items);
        assert_eq!(loaded.discount, Discount::Percent(500));
        assert_eq!(loaded.total, order.total);
        assert_eq!(loaded.status, OrderStatus::Saved);
        assert!(loaded.totals_consistent());
        assert!(loaded.payments.is_empty());
    }

    #[tokio::test]
    async fn test_resave_replaces_lines() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let mut saved = repo.save(&draft()).await.unwrap();
        let id = saved.id.stored().unwrap();

        saved.items.truncate(1);
        let saved = saved.recompute();
        let resaved = repo.save(&saved).await.unwrap();
        assert_eq!(resaved.id, OrderId::Stored(id));

        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.total, saved.total);
    }

    #[tokio::test]
    async fn test_list_open_and_cancel() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let first = repo.save(&draft()).await.unwrap().id.stored().unwrap();
        let second = repo.save(&draft()).await.unwrap().id.stored().unwrap();

        let open = repo.list_open(10).await.unwrap();
        assert_eq!(open.iter().map(|o| o.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(open[0].item_count, 2);

        repo.cancel(first).await.unwrap();
        assert_eq!(repo.status(first).await.unwrap(), Some(OrderStatus::Cancelled));
        assert_eq!(repo.list_open(10).await.unwrap().len(), 1);

        assert!(matches!(repo.cancel(first).await, Err(DbError::Conflict { .. })));
        assert!(matches!(repo.cancel(999).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_save_refuses_settled_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let saved = repo.save(&draft()).await.unwrap();
        let id = saved.id.stored().unwrap();
        repo.cancel(id).await.unwrap();

        assert!(matches!(repo.save(&saved).await, Err(DbError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_save_refuses_copy_read_before_status_change() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let stale = repo.save(&draft()).await.unwrap();
        let id = stale.id.stored().unwrap();

        // another terminal put it on credit
        sqlx::query("UPDATE orders SET status = 'pending' WHERE id = ?1")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        let mut edited = stale.clone();
        edited.items.truncate(1);
        let edited = edited.recompute();
        assert!(matches!(repo.save(&edited).await, Err(DbError::Conflict { .. })));

        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Pending);
        assert_eq!(loaded.items.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades_lines() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.orders();
        let id = repo.save(&draft()).await.unwrap().id.stored().unwrap();

        repo.delete(id).await.unwrap();
        assert!(repo.get(id).await.unwrap().is_none());

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_items WHERE order_id = ?1")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(orphans, 0);

        assert!(matches!(repo.delete(id).await, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_missing_stored_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut order = draft();
        order.id = OrderId::Stored(77);
        assert!(matches!(
            db.orders().save(&order).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
