//! # Domain Types
//!
//! Core domain types used throughout Depot POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ CatalogProduct  │   │     Client      │   │    Payment      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id, code, name │   │  credit_limit   │   │  order_id (FK)  │       │
//! │  │  stock          │   │  balance        │   │  method         │       │
//! │  │  5 price tiers  │   │  default tier   │   │  amount         │       │
//! │  │  cost           │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    OrderId      │   │  OrderStatus    │   │  TenderMethod   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Local(uuid)    │   │  Draft → Saved  │   │  Cash, Card     │       │
//! │  │  Stored(i64)    │   │  → Pending      │   │  Transfer       │       │
//! │  └─────────────────┘   │  → Paid         │   │  Credit, Mixed  │       │
//! │                        │  (Cancelled)    │   │  Voucher        │       │
//! │  ┌─────────────────┐   └─────────────────┘   └─────────────────┘       │
//! │  │    Voucher      │                                                    │
//! │  │  face_value     │   Order / OrderItem live in `order`,              │
//! │  │  remaining      │   OrderLock / LockHolder live in `lock`.          │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::quantity::Quantity;
use crate::validation::{validate_price_tier, ValidationResult};
use crate::PRICE_TIER_COUNT;

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of an order.
///
/// A freshly created draft gets a `Local` placeholder id that never leaves
/// the terminal. The first save swaps it for the store-assigned `Stored` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderId {
    Local(String),
    Stored(i64),
}

impl OrderId {
    /// Generates a new placeholder id for an unsaved draft.
    pub fn new_local() -> Self {
        OrderId::Local(uuid::Uuid::new_v4().to_string())
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, OrderId::Stored(_))
    }

    /// Returns the store id, if the order has been saved.
    pub fn stored(&self) -> Option<i64> {
        match self {
            OrderId::Stored(id) => Some(*id),
            OrderId::Local(_) => None,
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderId::Local(id) => write!(f, "draft:{}", id),
            OrderId::Stored(id) => write!(f, "#{}", id),
        }
    }
}

/// Per-process session token.
///
/// Generated once when the terminal starts and passed explicitly into every
/// lock call. Two sessions of the same user are different holders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an existing token (read back from the store).
    pub fn from_string(token: impl Into<String>) -> Self {
        SessionId(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of a persisted order.
///
/// ## State Machine
/// ```text
///   Draft ──► Saved ──► Pending ──► Paid
///     │         │          │
///     └─────────┴──────────┴──► Cancelled   (administrative delete path)
///
///   Draft/Saved can also jump straight to Paid (single full tender).
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Being built, possibly never saved.
    Draft,
    /// Persisted, no payment yet.
    Saved,
    /// Partially paid, remainder on client credit.
    Pending,
    /// Fully settled.
    Paid,
    /// Terminal dead end.
    Cancelled,
}

impl OrderStatus {
    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Draft, Saved)
                | (Draft, Pending)
                | (Draft, Paid)
                | (Saved, Saved)
                | (Saved, Pending)
                | (Saved, Paid)
                | (Pending, Pending)
                | (Pending, Paid)
                | (Draft, Cancelled)
                | (Saved, Cancelled)
                | (Pending, Cancelled)
        )
    }

    /// Items and prices may only change before any money is taken.
    pub fn is_editable(&self) -> bool {
        matches!(self, OrderStatus::Draft | OrderStatus::Saved)
    }

    /// Accepts a (further) payment.
    pub fn is_settleable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Draft | OrderStatus::Saved | OrderStatus::Pending
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Saved => "saved",
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Draft
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tender Method
// =============================================================================

/// How an order was (or is being) paid.
///
/// Stored on the order and on every Payment row.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TenderMethod {
    Cash,
    Card,
    Transfer,
    Credit,
    Mixed,
    Voucher,
}

impl TenderMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenderMethod::Cash => "cash",
            TenderMethod::Card => "card",
            TenderMethod::Transfer => "transfer",
            TenderMethod::Credit => "credit",
            TenderMethod::Mixed => "mixed",
            TenderMethod::Voucher => "voucher",
        }
    }
}

impl fmt::Display for TenderMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Price Tier
// =============================================================================

/// One of the five catalog price levels (1 = retail ... 5 = best wholesale).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceTier(u8);

impl PriceTier {
    pub const RETAIL: PriceTier = PriceTier(1);

    pub fn new(tier: u8) -> ValidationResult<Self> {
        validate_price_tier(tier)?;
        Ok(PriceTier(tier))
    }

    #[inline]
    pub const fn number(&self) -> u8 {
        self.0
    }

    /// Zero-based index into a product's tier table.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize - 1
    }
}

impl Default for PriceTier {
    fn default() -> Self {
        PriceTier::RETAIL
    }
}

// =============================================================================
// Catalog Snapshots
// =============================================================================

/// What the engine reads from the catalog for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub code: String,
    pub name: String,
    /// Aggregate stock across all warehouses.
    pub stock: Quantity,
    /// Unit prices for tiers 1 through 5.
    pub price_tiers: [Money; PRICE_TIER_COUNT],
    /// Estimated unit cost; prices below it need step-up authorization.
    pub cost: Money,
}

impl CatalogProduct {
    /// Unit price at a tier.
    pub fn price(&self, tier: PriceTier) -> Money {
        self.price_tiers[tier.index()]
    }

    pub fn is_below_cost(&self, unit_price: Money) -> bool {
        unit_price < self.cost
    }
}

/// What the engine reads from the client collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub credit_limit: Money,
    /// Outstanding credit owed by the client.
    pub balance: Money,
    pub default_price_tier: PriceTier,
}

impl Client {
    /// True if adding `credit` to the balance would pass the limit.
    pub fn exceeds_limit_with(&self, credit: Money) -> bool {
        self.balance + credit > self.credit_limit
    }

    pub fn available_credit(&self) -> Money {
        (self.credit_limit - self.balance).non_negative()
    }
}

/// A warehouse's holding of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WarehouseStock {
    pub warehouse_id: String,
    pub warehouse_name: String,
    pub product_id: String,
    pub quantity: Quantity,
}

// =============================================================================
// Payment
// =============================================================================

/// A payment towards an order.
///
/// Append-only. An order accumulates Payments until `amount_paid >= total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub order_id: i64,
    pub method: TenderMethod,
    pub amount: Money,
    /// For cash: amount the customer handed over.
    pub tendered: Option<Money>,
    /// For cash: change returned.
    pub change: Option<Money>,
    /// Card authorization code, transfer reference, etc.
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Voucher
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum VoucherStatus {
    Enabled,
    Used,
    Expired,
}

/// A store-issued return credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Voucher {
    pub id: String,
    pub client_id: String,
    pub face_value: Money,
    pub remaining: Money,
    pub status: VoucherStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Voucher {
    pub fn is_redeemable(&self) -> bool {
        self.status == VoucherStatus::Enabled && self.remaining.is_positive()
    }

    /// Returns the voucher after `amount` is taken from it.
    ///
    /// Balance only decreases; status flips to `Used` at zero.
    pub fn redeem(&self, amount: Money) -> CoreResult<Voucher> {
        if !self.is_redeemable() {
            return Err(CoreError::InvalidTender {
                reason: format!("voucher {} is not redeemable", self.id),
            });
        }
        if amount.is_negative() || amount > self.remaining {
            return Err(CoreError::InvalidTender {
                reason: format!(
                    "cannot redeem {} from voucher {} with {} remaining",
                    amount, self.id, self.remaining
                ),
            });
        }

        let remaining = self.remaining - amount;
        Ok(Voucher {
            remaining,
            status: if remaining.is_zero() {
                VoucherStatus::Used
            } else {
                VoucherStatus::Enabled
            },
            ..self.clone()
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn voucher(remaining: i64) -> Voucher {
        Voucher {
            id: "v-1".to_string(),
            client_id: "c-1".to_string(),
            face_value: Money::from_cents(5000),
            remaining: Money::from_cents(remaining),
            status: VoucherStatus::Enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_transitions() {
        use OrderStatus::*;
        assert!(Draft.can_transition_to(Saved));
        assert!(Saved.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Paid));
        assert!(Saved.can_transition_to(Cancelled));

        assert!(!Paid.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Draft));
        assert!(!Pending.can_transition_to(Saved));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }

    #[test]
    fn test_order_id() {
        let local = OrderId::new_local();
        assert!(!local.is_persisted());
        assert_eq!(local.stored(), None);

        let stored = OrderId::Stored(42);
        assert!(stored.is_persisted());
        assert_eq!(stored.to_string(), "#42");
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_price_tier_bounds() {
        assert_eq!(PriceTier::new(3).unwrap().index(), 2);
        assert!(PriceTier::new(0).is_err());
        assert!(PriceTier::new(6).is_err());
    }

    #[test]
    fn test_client_credit_limit() {
        let client = Client {
            id: "c-1".to_string(),
            name: "Abarrotes Lupita".to_string(),
            credit_limit: Money::from_cents(5000),
            balance: Money::zero(),
            default_price_tier: PriceTier::RETAIL,
        };
        assert!(!client.exceeds_limit_with(Money::from_cents(5000)));
        assert!(client.exceeds_limit_with(Money::from_cents(10000)));
        assert_eq!(client.available_credit().cents(), 5000);
    }

    #[test]
    fn test_voucher_redeem_partial_and_full() {
        let v = voucher(3000);

        let partial = v.redeem(Money::from_cents(1000)).unwrap();
        assert_eq!(partial.remaining.cents(), 2000);
        assert_eq!(partial.status, VoucherStatus::Enabled);

        let used = v.redeem(Money::from_cents(3000)).unwrap();
        assert!(used.remaining.is_zero());
        assert_eq!(used.status, VoucherStatus::Used);

        assert!(v.redeem(Money::from_cents(3001)).is_err());
        assert!(used.redeem(Money::from_cents(1)).is_err());
    }
}
