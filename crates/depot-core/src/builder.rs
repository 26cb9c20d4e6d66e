//! # Order Builder
//!
//! Pure mutations on an [`Order`]. Each takes the current order plus
//! arguments and returns a new order; the input is never modified.
//!
//! ## Stock Argument
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  available: Option<Quantity>                                            │
//! │                                                                         │
//! │  Some(q) → the product's CURRENT stock, fetched by the caller just      │
//! │            before the call. The product's total on the order must       │
//! │            stay ≤ q after the mutation.                                 │
//! │                                                                         │
//! │  None    → caller holds "sell without stock", no ceiling applies.       │
//! │                                                                         │
//! │  This layer never reads the store, so it stays synchronous.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Merge Rule
//! Adding a product that already has a line at the same resolved unit price
//! (within one cent) grows that line instead of appending a new one.

use crate::error::{CoreError, CoreResult};
use crate::money::MONEY_TOLERANCE;
use crate::order::{Discount, Order, OrderItem, PriceChoice};
use crate::quantity::Quantity;
use crate::types::CatalogProduct;
use crate::validation::{
    validate_discount_bps, validate_line_count, validate_price, validate_quantity,
};

/// Adds `quantity` of `product` at `price`.
///
/// ## User Workflow
/// ```text
/// Scan "RICE-25" (qty 2, tier 2)
///      │
///      ▼
/// add_item ← THIS FUNCTION
///      │
///      ├── line with same product and price exists? → grow that line
///      │
///      └── otherwise → append a new line
///      │
///      ▼
/// recompute totals
/// ```
pub fn add_item(
    order: &Order,
    product: &CatalogProduct,
    quantity: Quantity,
    price: PriceChoice,
    available: Option<Quantity>,
) -> CoreResult<Order> {
    order.ensure_editable()?;
    validate_quantity(quantity)?;

    let unit_price = price.resolve(product);
    validate_price(unit_price)?;

    let mut next = order.clone();
    let existing = next.items.iter().position(|item| {
        item.product_id == product.id && item.unit_price.approx_eq(unit_price, MONEY_TOLERANCE)
    });

    match existing {
        Some(index) => {
            let combined = next.items[index].quantity + quantity;
            validate_quantity(combined)?;
            next.items[index].quantity = combined;
        }
        None => {
            validate_line_count(next.items.len())?;
            next.items.push(OrderItem::new(product, quantity, price));
        }
    }

    check_stock(&next, &product.id, &product.name, available)?;
    Ok(next.recompute())
}

/// Removes the line at `index`.
pub fn remove_item(order: &Order, index: usize) -> CoreResult<Order> {
    order.ensure_editable()?;
    line(order, index)?;

    let mut next = order.clone();
    next.items.remove(index);
    Ok(next.recompute())
}

/// Sets the quantity of the line at `index`, re-validating against the
/// product's current stock. Zero removes the line.
pub fn update_quantity(
    order: &Order,
    index: usize,
    quantity: Quantity,
    available: Option<Quantity>,
) -> CoreResult<Order> {
    order.ensure_editable()?;
    let item = line(order, index)?;

    if quantity.is_zero() {
        return remove_item(order, index);
    }
    validate_quantity(quantity)?;

    let product_id = item.product_id.clone();
    let product_name = item.product_name.clone();

    let mut next = order.clone();
    next.items[index].quantity = quantity;
    check_stock(&next, &product_id, &product_name, available)?;
    Ok(next.recompute())
}

/// Changes the price of the line at `index` to a tier or a custom price.
pub fn update_price(
    order: &Order,
    index: usize,
    product: &CatalogProduct,
    price: PriceChoice,
) -> CoreResult<Order> {
    order.ensure_editable()?;
    let item = line(order, index)?;
    if item.product_id != product.id {
        return Err(CoreError::ProductMismatch {
            index,
            expected: item.product_code.clone(),
            actual: product.code.clone(),
        });
    }

    let unit_price = price.resolve(product);
    validate_price(unit_price)?;

    let mut next = order.clone();
    next.items[index].unit_price = unit_price;
    next.items[index].price_tier = price.tier();
    Ok(next.recompute())
}

/// Replaces the order-level discount.
pub fn apply_discount(order: &Order, discount: Discount) -> CoreResult<Order> {
    order.ensure_editable()?;
    match discount {
        Discount::Percent(bps) => validate_discount_bps(bps)?,
        Discount::Amount(amount) => validate_price(amount)?,
        Discount::None => {}
    }

    Ok(Order {
        discount,
        ..order.clone()
    }
    .recompute())
}

// =============================================================================
// Helpers
// =============================================================================

fn line(order: &Order, index: usize) -> CoreResult<&OrderItem> {
    order
        .items
        .get(index)
        .ok_or(CoreError::LineNotFound { index })
}

fn check_stock(
    order: &Order,
    product_id: &str,
    product_name: &str,
    available: Option<Quantity>,
) -> CoreResult<()> {
    let Some(available) = available else {
        return Ok(());
    };
    let requested = order.quantity_of(product_id);
    if requested > available {
        return Err(CoreError::InsufficientStock {
            product: product_name.to_string(),
            available,
            requested,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::{OrderStatus, PriceTier};

    fn rice() -> CatalogProduct {
        CatalogProduct {
            id: "p-rice".to_string(),
            code: "RICE-25".to_string(),
            name: "Rice 25kg".to_string(),
            stock: Quantity::from_units(10),
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

    fn tier(n: u8) -> PriceChoice {
        PriceChoice::Tier(PriceTier::new(n).unwrap())
    }

    fn units(n: i64) -> Quantity {
        Quantity::from_units(n)
    }

    #[test]
    fn test_add_same_price_merges_lines() {
        let p = rice();
        let order = Order::new_draft("u-1");
        let order = add_item(&order, &p, units(2), tier(1), Some(p.stock)).unwrap();
        let order = add_item(&order, &p, units(3), tier(1), Some(p.stock)).unwrap();

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, units(5));
        assert_eq!(order.subtotal.cents(), 17500);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_add_within_one_cent_merges() {
        let p = rice();
        let order = Order::new_draft("u-1");
        let order = add_item(&order, &p, units(1), PriceChoice::Custom(Money::from_cents(3000)), None).unwrap();
        let order = add_item(&order, &p, units(1), PriceChoice::Custom(Money::from_cents(3001)), None).unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, units(2));
    }

    #[test]
    fn test_add_different_price_appends_line() {
        let p = rice();
        let order = Order::new_draft("u-1");
        let order = add_item(&order, &p, units(2), tier(1), Some(p.stock)).unwrap();
        let order = add_item(&order, &p, units(1), tier(3), Some(p.stock)).unwrap();

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.subtotal.cents(), 2 * 3500 + 3300);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_add_rejects_combined_quantity_over_stock() {
        let p = rice();
        let order = Order::new_draft("u-1");
        let order = add_item(&order, &p, units(8), tier(1), Some(p.stock)).unwrap();
        let err = add_item(&order, &p, units(3), tier(2), Some(p.stock)).unwrap_err();

        match err {
            CoreError::InsufficientStock { available, requested, .. } => {
                assert_eq!(available, units(10));
                assert_eq!(requested, units(11));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // input untouched
        assert_eq!(order.items.len(), 1);
    }

    #[test]
    fn test_add_without_stock_ceiling() {
        let p = rice();
        let order = add_item(&Order::new_draft("u-1"), &p, units(50), tier(1), None).unwrap();
        assert_eq!(order.items[0].quantity, units(50));
    }

    #[test]
    fn test_update_quantity_revalidates_current_stock() {
        let p = rice();
        let order = add_item(&Order::new_draft("u-1"), &p, units(4), tier(1), Some(p.stock)).unwrap();

        // stock dropped to 4 since the add
        assert!(update_quantity(&order, 0, units(5), Some(units(4))).is_err());

        let order = update_quantity(&order, 0, Quantity::from_milli(4_500), Some(units(5))).unwrap();
        assert_eq!(order.items[0].total.cents(), 15750);
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_update_quantity_to_zero_removes_line() {
        let p = rice();
        let order = add_item(&Order::new_draft("u-1"), &p, units(1), tier(1), None).unwrap();
        let order = update_quantity(&order, 0, Quantity::zero(), None).unwrap();
        assert!(order.is_empty());
        assert!(order.total.is_zero());
    }

    #[test]
    fn test_update_price_and_remove() {
        let p = rice();
        let order = add_item(&Order::new_draft("u-1"), &p, units(2), tier(1), None).unwrap();
        let order = update_price(&order, 0, &p, PriceChoice::Custom(Money::from_cents(2900))).unwrap();
        assert!(order.items[0].is_custom_price());
        assert_eq!(order.total.cents(), 5800);

        assert!(matches!(remove_item(&order, 3), Err(CoreError::LineNotFound { index: 3 })));
        let order = remove_item(&order, 0).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_discount_recomputed_on_every_mutation() {
        let p = rice();
        let order = add_item(&Order::new_draft("u-1"), &p, units(2), tier(1), None).unwrap();
        let order = apply_discount(&order, Discount::Percent(1000)).unwrap();
        assert_eq!(order.discount_total.cents(), 700);
        assert_eq!(order.total.cents(), 6300);

        let order = add_item(&order, &p, units(2), tier(1), None).unwrap();
        assert_eq!(order.discount_total.cents(), 1400);
        assert!(order.totals_consistent());

        assert!(apply_discount(&order, Discount::Percent(10_001)).is_err());
    }

    #[test]
    fn test_paid_order_is_not_editable() {
        let p = rice();
        let mut order = add_item(&Order::new_draft("u-1"), &p, units(1), tier(1), None).unwrap();
        order.status = OrderStatus::Paid;
        assert!(matches!(
            add_item(&order, &p, units(1), tier(1), None),
            Err(CoreError::InvalidOrderStatus { .. })
        ));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        let p = rice();
        assert!(add_item(&Order::new_draft("u-1"), &p, Quantity::zero(), tier(1), None).is_err());
    }
}
