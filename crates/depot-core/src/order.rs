//! # Order Model
//!
//! The in-memory order a terminal tab edits, plus its line items.
//!
//! ## Totals Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  item.total     = round(item.quantity × item.unit_price)                │
//! │  subtotal       = Σ item.total                                          │
//! │  discount_total = discount.amount_for(subtotal)   (0 ≤ d ≤ subtotal)    │
//! │  total          = subtotal - discount_total                             │
//! │                                                                         │
//! │  Every Order Builder operation ends in `recompute()`, so the invariant  │
//! │  holds for every Order value a caller can observe.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::quantity::Quantity;
use crate::types::{CatalogProduct, Client, OrderId, OrderStatus, Payment, PriceTier, TenderMethod};
use crate::validation::validate_text_field;

// =============================================================================
// Price Choice
// =============================================================================

/// How a line's unit price is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PriceChoice {
    /// One of the product's five catalog prices.
    Tier(PriceTier),
    /// An explicit unit price typed by the cashier.
    Custom(Money),
}

impl PriceChoice {
    /// The client's default tier, or retail for walk-in sales.
    pub fn client_default(client: Option<&Client>) -> PriceChoice {
        PriceChoice::Tier(client.map(|c| c.default_price_tier).unwrap_or_default())
    }

    pub fn resolve(&self, product: &CatalogProduct) -> Money {
        match self {
            PriceChoice::Tier(tier) => product.price(*tier),
            PriceChoice::Custom(price) => *price,
        }
    }

    pub fn tier(&self) -> Option<PriceTier> {
        match self {
            PriceChoice::Tier(tier) => Some(*tier),
            PriceChoice::Custom(_) => None,
        }
    }
}

// =============================================================================
// Discount
// =============================================================================

/// Order-level discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Discount {
    None,
    /// Fixed amount off the subtotal.
    Amount(Money),
    /// Percentage in basis points (1000 = 10%).
    Percent(u32),
}

impl Discount {
    /// Discount for a given subtotal, clamped to `[0, subtotal]`.
    pub fn amount_for(&self, subtotal: Money) -> Money {
        let raw = match self {
            Discount::None => Money::zero(),
            Discount::Amount(amount) => *amount,
            Discount::Percent(bps) => subtotal.percentage(*bps),
        };
        raw.non_negative().min(subtotal.non_negative())
    }
}

impl Default for Discount {
    fn default() -> Self {
        Discount::None
    }
}

// =============================================================================
// Flags
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderFlags {
    /// Sold (at least partly) on client credit.
    pub credit: bool,
    /// Customer requested a formal invoice.
    pub invoice: bool,
    /// A quotation, not a commitment to buy.
    pub quote: bool,
    /// Placed from outside the store (phone, field rep).
    pub external: bool,
}

// =============================================================================
// Order Item
// =============================================================================

/// A line on an order.
///
/// Product code and name are frozen when the line is created so later
/// catalog renames don't rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub product_id: String,
    pub product_code: String,
    pub product_name: String,
    pub quantity: Quantity,
    /// `None` when the cashier typed a custom price.
    pub price_tier: Option<PriceTier>,
    pub unit_price: Money,
    pub total: Money,
}

impl OrderItem {
    pub(crate) fn new(product: &CatalogProduct, quantity: Quantity, price: PriceChoice) -> Self {
        let unit_price = price.resolve(product);
        OrderItem {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            product_code: product.code.clone(),
            product_name: product.name.clone(),
            quantity,
            price_tier: price.tier(),
            unit_price,
            total: unit_price.times(quantity),
        }
    }

    pub fn is_custom_price(&self) -> bool {
        self.price_tier.is_none()
    }

    pub(crate) fn recompute(&mut self) {
        self.total = self.unit_price.times(self.quantity);
    }
}

// =============================================================================
// Order
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: OrderId,
    /// `None` is the walk-in client.
    pub client_id: Option<String>,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub discount: Discount,
    pub discount_total: Money,
    pub total: Money,
    pub status: OrderStatus,
    pub tender_method: Option<TenderMethod>,
    pub flags: OrderFlags,
    pub observations: Option<String>,
    pub driver: Option<String>,
    pub route: Option<String>,
    /// User id of the cashier who created it.
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub amount_paid: Money,
    pub remaining_balance: Money,
    pub payments: Vec<Payment>,
}

impl Order {
    /// A fresh, empty, unsaved draft.
    pub fn new_draft(created_by: impl Into<String>) -> Self {
        Order {
            id: OrderId::new_local(),
            client_id: None,
            items: Vec::new(),
            subtotal: Money::zero(),
            discount: Discount::None,
            discount_total: Money::zero(),
            total: Money::zero(),
            status: OrderStatus::Draft,
            tender_method: None,
            flags: OrderFlags::default(),
            observations: None,
            driver: None,
            route: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            amount_paid: Money::zero(),
            remaining_balance: Money::zero(),
            payments: Vec::new(),
        }
    }

    /// Recomputes line totals and the derived order totals.
    pub fn recompute(mut self) -> Self {
        for item in &mut self.items {
            item.recompute();
        }
        self.subtotal = self.items.iter().map(|i| i.total).sum();
        self.discount_total = self.discount.amount_for(self.subtotal);
        self.total = self.subtotal - self.discount_total;
        self.remaining_balance = (self.total - self.amount_paid).non_negative();
        self
    }

    /// True when the totals invariant holds.
    ///
    /// Voucher-scaled settlement records keep their sold unit prices and are
    /// exempt from the per-line check.
    pub fn totals_consistent(&self) -> bool {
        let items_ok = self
            .items
            .iter()
            .all(|i| i.total == i.unit_price.times(i.quantity));
        let subtotal: Money = self.items.iter().map(|i| i.total).sum();
        items_ok && self.subtotal == subtotal && self.total == self.subtotal - self.discount_total
    }

    /// What still has to be paid.
    pub fn amount_owed(&self) -> Money {
        (self.total - self.amount_paid).non_negative()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total quantity of a product across all lines.
    pub fn quantity_of(&self, product_id: &str) -> Quantity {
        self.items
            .iter()
            .filter(|i| i.product_id == product_id)
            .map(|i| i.quantity)
            .sum()
    }

    /// Quantities aggregated per product, in product-id order.
    pub fn quantities_by_product(&self) -> BTreeMap<String, Quantity> {
        let mut out = BTreeMap::new();
        for item in &self.items {
            *out.entry(item.product_id.clone()).or_insert_with(Quantity::zero) += item.quantity;
        }
        out
    }

    pub(crate) fn ensure_editable(&self) -> CoreResult<()> {
        if self.status.is_editable() {
            Ok(())
        } else {
            Err(CoreError::InvalidOrderStatus {
                order_id: self.id.to_string(),
                status: self.status.to_string(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Header setters
    // -------------------------------------------------------------------------

    /// Assigns (or clears, for walk-in) the client.
    pub fn with_client(&self, client: Option<&Client>) -> CoreResult<Order> {
        self.ensure_editable()?;
        Ok(Order {
            client_id: client.map(|c| c.id.clone()),
            ..self.clone()
        })
    }

    pub fn with_flags(&self, flags: OrderFlags) -> CoreResult<Order> {
        self.ensure_editable()?;
        Ok(Order {
            flags,
            ..self.clone()
        })
    }

    pub fn with_observations(&self, text: Option<&str>) -> CoreResult<Order> {
        Ok(Order {
            observations: validate_text_field("observations", text)?,
            ..self.clone()
        })
    }

    /// Sets delivery driver and route.
    pub fn with_delivery(&self, driver: Option<&str>, route: Option<&str>) -> CoreResult<Order> {
        Ok(Order {
            driver: validate_text_field("driver", driver)?,
            route: validate_text_field("route", route)?,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discount_clamped_to_subtotal() {
        let subtotal = Money::from_cents(1000);
        assert_eq!(Discount::Amount(Money::from_cents(1500)).amount_for(subtotal), subtotal);
        assert_eq!(Discount::Amount(Money::from_cents(-5)).amount_for(subtotal), Money::zero());
        assert_eq!(Discount::Percent(2500).amount_for(subtotal).cents(), 250);
        assert_eq!(Discount::None.amount_for(subtotal), Money::zero());
    }

    #[test]
    fn test_new_draft_is_local_and_empty() {
        let order = Order::new_draft("u-1");
        assert!(!order.id.is_persisted());
        assert_eq!(order.status, OrderStatus::Draft);
        assert!(order.is_empty());
        assert!(order.totals_consistent());
    }

    #[test]
    fn test_header_setters() {
        let order = Order::new_draft("u-1")
            .with_delivery(Some(" Luis "), Some("North"))
            .unwrap()
            .with_observations(Some(""))
            .unwrap();
        assert_eq!(order.driver.as_deref(), Some("Luis"));
        assert_eq!(order.route.as_deref(), Some("North"));
        assert_eq!(order.observations, None);
    }
}
