//! # Settlement Repository
//!
//! Writes a computed [`SettlementPlan`] in ONE transaction.
//!
//! ## Transaction Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   1. order record   insert (local draft) / update (stored) /            │
//! │                     delete (voucher covered everything)                 │
//! │                     stored orders are compared against the status and   │
//! │                     amount paid the plan was computed from              │
//! │   2. order lines    replaced                                            │
//! │   3. payments       appended                                            │
//! │   4. client         balance_cents += delta                              │
//! │   5. voucher        compare-and-set on remaining_cents                  │
//! │   6. stock          per warehouse allocation: movement row +            │
//! │                     warehouse_stock decrement; aggregate decrement      │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any failure rolls back every step: no partial settlement is visible.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::order::{insert_header, insert_payment, replace_items, update_header};
use crate::error::{DbError, DbResult};
use depot_core::tender::VoucherRedemption;
use depot_core::{
    Money, Order, OrderId, OrderStatus, Payment, Quantity, SettlementPlan, WarehouseDistribution,
};

/// What the settlement transaction produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Store id of the kept record, `None` when the record was deleted
    /// (or never written).
    pub order_id: Option<i64>,
    pub payments: Vec<Payment>,
}

/// The settlement write path.
#[derive(Debug, Clone)]
pub struct SettlementRepository {
    pool: SqlitePool,
}

impl SettlementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettlementRepository { pool }
    }

    /// Applies `plan` for `order` (the order as it was when the plan was
    /// computed), decrementing warehouse stock per `distribution`.
    ///
    /// Products in `plan.stock_out` without an entry in `distribution` only
    /// decrement the aggregate stock.
    ///
    /// ## Errors
    /// - `Conflict` if the stored order or the voucher changed since they
    ///   were read
    /// - `NotFound` if the client, a product or a warehouse row is missing
    pub async fn apply(
        &self,
        order: &Order,
        plan: &SettlementPlan,
        distribution: &WarehouseDistribution,
    ) -> DbResult<SettlementReceipt> {
        let mut tx = self.pool.begin().await?;

        // 1-2. order record and lines
        let order_id = write_record(&mut tx, order, plan.record.as_ref()).await?;

        // 3. payments
        let payments = match order_id {
            Some(id) => {
                let now = Utc::now();
                let mut written = Vec::with_capacity(plan.payments.len());
                for draft in &plan.payments {
                    let payment = Payment {
                        id: Uuid::new_v4().to_string(),
                        order_id: id,
                        method: draft.method,
                        amount: draft.amount,
                        tendered: draft.tendered,
                        change: draft.change,
                        reference: draft.reference.clone(),
                        created_at: now,
                    };
                    insert_payment(&mut tx, &payment).await?;
                    written.push(payment);
                }
                written
            }
            None if plan.payments.is_empty() => Vec::new(),
            None => {
                return Err(DbError::Internal(
                    "settlement has payments but no order record".to_string(),
                ))
            }
        };

        // 4. client balance
        if !plan.client_balance_delta.is_zero() {
            let client_id = order.client_id.as_deref().ok_or_else(|| {
                DbError::Internal("balance change on a walk-in order".to_string())
            })?;
            adjust_balance(&mut tx, client_id, plan.client_balance_delta).await?;
        }

        // 5. voucher
        if let Some(redemption) = &plan.voucher {
            redeem_voucher(&mut tx, redemption).await?;
        }

        // 6. stock
        let movement_order = order_id.or(order.id.stored());
        for (product_id, quantity) in &plan.stock_out {
            match distribution.get(product_id) {
                Some(allocations) => {
                    for allocation in allocations.iter().filter(|a| a.quantity.is_positive()) {
                        take_from_warehouse(
                            &mut tx,
                            &allocation.warehouse_id,
                            product_id,
                            allocation.quantity,
                        )
                        .await?;
                        record_movement(
                            &mut tx,
                            product_id,
                            Some(&allocation.warehouse_id),
                            allocation.quantity,
                            movement_order,
                        )
                        .await?;
                    }
                }
                None => {
                    record_movement(&mut tx, product_id, None, *quantity, movement_order).await?
                }
            }
            take_from_aggregate(&mut tx, product_id, *quantity).await?;
        }

        tx.commit().await?;

        info!(
            order_id = ?order_id,
            status = %plan.new_status,
            paid_now = %plan.paid_now,
            balance_delta = %plan.client_balance_delta,
            products = plan.stock_out.len(),
            "Settlement committed"
        );

        Ok(SettlementReceipt { order_id, payments })
    }
}

// =============================================================================
// Transaction steps
// =============================================================================

async fn write_record(
    conn: &mut SqliteConnection,
    order: &Order,
    record: Option<&Order>,
) -> DbResult<Option<i64>> {
    if let OrderId::Stored(id) = order.id {
        ensure_unchanged(conn, id, order).await?;
    }

    match (record, &order.id) {
        (Some(record), OrderId::Local(_)) => {
            let id = insert_header(conn, record).await?;
            replace_items(conn, id, &record.items).await?;
            debug!(order_id = id, "Settled draft inserted");
            Ok(Some(id))
        }
        (Some(record), OrderId::Stored(id)) => {
            update_header(conn, *id, record).await?;
            replace_items(conn, *id, &record.items).await?;
            Ok(Some(*id))
        }
        (None, OrderId::Stored(id)) => {
            sqlx::query("DELETE FROM orders WHERE id = ?1")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            debug!(order_id = id, "Order record removed after voucher redemption");
            Ok(None)
        }
        (None, OrderId::Local(_)) => Ok(None),
    }
}

/// The stored order must still be in the state the plan was computed from.
///
/// A copy read before another terminal settled it carries the old status
/// or amount paid and is refused.
async fn ensure_unchanged(conn: &mut SqliteConnection, id: i64, order: &Order) -> DbResult<()> {
    let row: Option<(OrderStatus, i64)> =
        sqlx::query_as("SELECT status, amount_paid_cents FROM orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

    let (status, amount_paid) = row.ok_or_else(|| DbError::not_found("Order", id.to_string()))?;

    if !status.is_settleable() {
        return Err(DbError::conflict("Order", id.to_string(), format!("already {status}")));
    }
    if status != order.status {
        return Err(DbError::conflict(
            "Order",
            id.to_string(),
            format!("now {status}, was read as {}", order.status),
        ));
    }
    if amount_paid != order.amount_paid.cents() {
        return Err(DbError::conflict(
            "Order",
            id.to_string(),
            "a payment was recorded by another terminal",
        ));
    }
    Ok(())
}

async fn adjust_balance(conn: &mut SqliteConnection, client_id: &str, delta: Money) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE clients SET balance_cents = balance_cents + ?2, updated_at = ?3 WHERE id = ?1",
    )
    .bind(client_id)
    .bind(delta.cents())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Client", client_id));
    }
    debug!(client_id = %client_id, delta = %delta, "Client balance adjusted");
    Ok(())
}

async fn redeem_voucher(conn: &mut SqliteConnection, redemption: &VoucherRedemption) -> DbResult<()> {
    let voucher = &redemption.voucher;
    let expected_before = voucher.remaining + redemption.applied;

    let result = sqlx::query(
        r#"
        UPDATE vouchers SET remaining_cents = ?2, status = ?3, updated_at = ?4
        WHERE id = ?1 AND status = 'enabled' AND remaining_cents = ?5
        "#,
    )
    .bind(&voucher.id)
    .bind(voucher.remaining.cents())
    .bind(voucher.status)
    .bind(Utc::now())
    .bind(expected_before.cents())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict(
            "Voucher",
            &voucher.id,
            "balance changed since it was read",
        ));
    }
    debug!(voucher_id = %voucher.id, applied = %redemption.applied, "Voucher redeemed");
    Ok(())
}

async fn take_from_warehouse(
    conn: &mut SqliteConnection,
    warehouse_id: &str,
    product_id: &str,
    quantity: Quantity,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE warehouse_stock SET quantity_milli = quantity_milli - ?3
        WHERE warehouse_id = ?1 AND product_id = ?2
        "#,
    )
    .bind(warehouse_id)
    .bind(product_id)
    .bind(quantity.milli())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found(
            "WarehouseStock",
            format!("{warehouse_id}/{product_id}"),
        ));
    }
    Ok(())
}

async fn take_from_aggregate(
    conn: &mut SqliteConnection,
    product_id: &str,
    quantity: Quantity,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE products SET stock_milli = stock_milli - ?2, updated_at = ?3 WHERE id = ?1",
    )
    .bind(product_id)
    .bind(quantity.milli())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Product", product_id));
    }
    Ok(())
}

async fn record_movement(
    conn: &mut SqliteConnection,
    product_id: &str,
    warehouse_id: Option<&str>,
    quantity: Quantity,
    order_id: Option<i64>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (id, product_id, warehouse_id, quantity_milli, kind, order_id, created_at)
        VALUES (?1, ?2, ?3, ?4, 'out', ?5, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(product_id)
    .bind(warehouse_id)
    .bind(quantity.milli())
    .bind(order_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
