//! # Tender Arithmetic
//!
//! Turns an order plus a tender description into a [`SettlementPlan`]:
//! every amount the settlement transaction will write, computed up front
//! with no I/O.
//!
//! ## Tender Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cash / Card / Transfer  one Payment for everything owed, or for        │
//! │                          `amount` when paying down a pending order      │
//! │                                                                         │
//! │  Mixed {cash, card,      breakdown must sum to what is owed (±1 cent)   │
//! │         transfer,        one Payment per non-zero non-credit part       │
//! │         credit}          credit part → remaining balance, status        │
//! │                          pending, client balance += credit              │
//! │                                                                         │
//! │  Credit                  no Payment, remaining = owed, pending,         │
//! │                          client balance += owed                         │
//! │                                                                         │
//! │  Voucher                 vale = min(voucher.remaining, owed)            │
//! │                          cash = owed - vale                             │
//! │                          cash == 0 → no sale record is kept             │
//! │                          cash  > 0 → record scaled by cash / owed       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `pending` order being paid down owes its remaining balance. Its stock
//! already left the warehouse, and the amount paid reduces the client's
//! balance. A partial payment keeps it `pending` until the remaining
//! balance is within one cent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, MONEY_TOLERANCE};
use crate::order::{Discount, Order};
use crate::quantity::Quantity;
use crate::types::{OrderStatus, TenderMethod, Voucher};
use crate::validation::validate_tender_amount;

// =============================================================================
// Tender
// =============================================================================

/// Per-method amounts of a mixed tender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TenderBreakdown {
    pub cash: Money,
    pub card: Money,
    pub transfer: Money,
    pub credit: Money,
}

impl TenderBreakdown {
    pub fn total(&self) -> Money {
        self.cash + self.card + self.transfer + self.credit
    }

    /// Everything except the credit part.
    pub fn paid_now(&self) -> Money {
        self.cash + self.card + self.transfer
    }
}

/// What the customer pays with.
///
/// A single-method `amount` is only accepted against a pending balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Tender {
    Cash {
        tendered: Option<Money>,
        #[serde(default)]
        amount: Option<Money>,
    },
    Card {
        reference: Option<String>,
        #[serde(default)]
        amount: Option<Money>,
    },
    Transfer {
        reference: Option<String>,
        #[serde(default)]
        amount: Option<Money>,
    },
    Credit,
    Mixed { breakdown: TenderBreakdown },
    Voucher { voucher_id: String },
}

impl Tender {
    pub fn method(&self) -> TenderMethod {
        match self {
            Tender::Cash { .. } => TenderMethod::Cash,
            Tender::Card { .. } => TenderMethod::Card,
            Tender::Transfer { .. } => TenderMethod::Transfer,
            Tender::Credit => TenderMethod::Credit,
            Tender::Mixed { .. } => TenderMethod::Mixed,
            Tender::Voucher { .. } => TenderMethod::Voucher,
        }
    }

    /// The part of `owed` that goes on the client's credit.
    pub fn credit_portion(&self, owed: Money) -> Money {
        match self {
            Tender::Credit => owed,
            Tender::Mixed { breakdown } => breakdown.credit,
            _ => Money::zero(),
        }
    }

    /// Explicit amount of a single-method tender, `None` for the full owed.
    pub fn partial_amount(&self) -> Option<Money> {
        match self {
            Tender::Cash { amount, .. }
            | Tender::Card { amount, .. }
            | Tender::Transfer { amount, .. } => *amount,
            _ => None,
        }
    }

    pub fn voucher_id(&self) -> Option<&str> {
        match self {
            Tender::Voucher { voucher_id } => Some(voucher_id),
            _ => None,
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// A Payment row to insert; the store assigns id and order reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDraft {
    pub method: TenderMethod,
    pub amount: Money,
    pub tendered: Option<Money>,
    pub change: Option<Money>,
    pub reference: Option<String>,
}

impl PaymentDraft {
    fn simple(method: TenderMethod, amount: Money) -> Self {
        PaymentDraft {
            method,
            amount,
            tendered: None,
            change: None,
            reference: None,
        }
    }
}

/// The voucher's state after redemption plus the amount taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRedemption {
    pub voucher: Voucher,
    pub applied: Money,
}

/// Everything a settlement will write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    /// What was owed before this settlement.
    pub owed: Money,
    pub payments: Vec<PaymentDraft>,
    /// Sum of `payments`.
    pub paid_now: Money,
    /// Amount put on (positive) or paid off (negative) the client's balance.
    pub client_balance_delta: Money,
    /// Amount added to the client's credit by this settlement.
    pub credit_portion: Money,
    pub voucher: Option<VoucherRedemption>,
    /// The order as it should be stored. `None` means delete any stored
    /// record (voucher covered everything).
    pub record: Option<Order>,
    /// Per-product quantities leaving stock. Empty when paying down a
    /// pending order.
    pub stock_out: BTreeMap<String, Quantity>,
    pub amount_paid: Money,
    pub remaining_balance: Money,
    pub new_status: OrderStatus,
}

/// Computes the settlement of `order` with `tender`.
///
/// `voucher` must be the voucher named by a voucher tender, freshly read.
///
/// ## Errors
/// - `InvalidOrderStatus` if the order is paid or cancelled
/// - `InvalidTender` for empty orders, short cash, credit without a client,
///   unusable vouchers, credit/voucher against a pending balance, or a
///   partial amount that is not a positive part of a pending balance
/// - `TenderMismatch` when a mixed breakdown does not sum to what is owed
pub fn plan_settlement(
    order: &Order,
    tender: &Tender,
    voucher: Option<&Voucher>,
) -> CoreResult<SettlementPlan> {
    if !order.status.is_settleable() {
        return Err(CoreError::InvalidOrderStatus {
            order_id: order.id.to_string(),
            status: order.status.to_string(),
        });
    }
    if order.is_empty() {
        return Err(invalid("order has no items"));
    }

    let first_settlement = order.status != OrderStatus::Pending;
    let owed = order.amount_owed();
    let credit_portion = tender.credit_portion(owed);

    if credit_portion.is_positive() {
        if order.client_id.is_none() {
            return Err(invalid("credit requires a client, walk-in sales cannot use credit"));
        }
        if !first_settlement {
            return Err(invalid("a pending balance cannot be moved to credit again"));
        }
    }

    if let Tender::Voucher { .. } = tender {
        return plan_voucher(order, owed, voucher);
    }

    let charge = charge_for(tender, owed, first_settlement)?;

    let payments = match tender {
        Tender::Cash { tendered, .. } => {
            let mut payment = PaymentDraft::simple(TenderMethod::Cash, charge);
            if let Some(tendered) = tendered {
                if *tendered < charge {
                    return Err(invalid(&format!(
                        "cash tendered {} is less than {} charged",
                        tendered, charge
                    )));
                }
                payment.tendered = Some(*tendered);
                payment.change = Some(*tendered - charge);
            }
            vec![payment]
        }
        Tender::Card { reference, .. } | Tender::Transfer { reference, .. } => vec![PaymentDraft {
            reference: reference.clone(),
            ..PaymentDraft::simple(tender.method(), charge)
        }],
        Tender::Credit => Vec::new(),
        Tender::Mixed { breakdown } => mixed_payments(breakdown, owed)?,
        Tender::Voucher { .. } => Vec::new(),
    };

    let paid_now: Money = payments.iter().map(|p| p.amount).sum();
    let amount_paid = order.amount_paid + paid_now;
    let remaining_balance = (order.total - amount_paid).non_negative();
    let new_status = status_for(remaining_balance);

    let client_balance_delta = if first_settlement {
        credit_portion
    } else {
        -paid_now
    };

    let mut record = order.clone();
    record.status = new_status;
    record.amount_paid = amount_paid;
    record.remaining_balance = remaining_balance;
    if first_settlement {
        record.tender_method = Some(tender.method());
    }
    record.flags.credit |= credit_portion.is_positive();

    Ok(SettlementPlan {
        owed,
        payments,
        paid_now,
        client_balance_delta,
        credit_portion,
        voucher: None,
        record: Some(record),
        stock_out: if first_settlement {
            order.quantities_by_product()
        } else {
            BTreeMap::new()
        },
        amount_paid,
        remaining_balance,
        new_status,
    })
}

/// What a single-method tender charges: everything owed, or the partial
/// amount when paying down a pending balance.
fn charge_for(tender: &Tender, owed: Money, first_settlement: bool) -> CoreResult<Money> {
    let Some(amount) = tender.partial_amount() else {
        return Ok(owed);
    };
    if first_settlement {
        return Err(invalid("a partial amount only applies to a pending balance"));
    }
    if !amount.is_positive() {
        return Err(invalid("partial amount must be positive"));
    }
    if amount > owed {
        return Err(invalid(&format!(
            "partial amount {} exceeds {} owed",
            amount, owed
        )));
    }
    Ok(amount)
}

fn mixed_payments(breakdown: &TenderBreakdown, owed: Money) -> CoreResult<Vec<PaymentDraft>> {
    validate_tender_amount("cash", breakdown.cash)?;
    validate_tender_amount("card", breakdown.card)?;
    validate_tender_amount("transfer", breakdown.transfer)?;
    validate_tender_amount("credit", breakdown.credit)?;

    if !breakdown.total().approx_eq(owed, MONEY_TOLERANCE) {
        return Err(CoreError::TenderMismatch {
            owed,
            provided: breakdown.total(),
        });
    }

    Ok([
        (TenderMethod::Cash, breakdown.cash),
        (TenderMethod::Card, breakdown.card),
        (TenderMethod::Transfer, breakdown.transfer),
    ]
    .into_iter()
    .filter(|(_, amount)| amount.is_positive())
    .map(|(method, amount)| PaymentDraft::simple(method, amount))
    .collect())
}

fn plan_voucher(order: &Order, owed: Money, voucher: Option<&Voucher>) -> CoreResult<SettlementPlan> {
    let voucher = voucher.ok_or_else(|| {
        CoreError::Validation(ValidationError::Required {
            field: "voucher".to_string(),
        })
    })?;
    if order.status == OrderStatus::Pending {
        return Err(invalid("vouchers apply to new sales, not pending balances"));
    }
    if let Some(client_id) = &order.client_id {
        if &voucher.client_id != client_id {
            return Err(invalid(&format!(
                "voucher {} belongs to another client",
                voucher.id
            )));
        }
    }

    let vale = voucher.remaining.min(owed);
    let cash = (owed - vale).non_negative();
    let redeemed = voucher.redeem(vale)?;

    let (payments, record) = if cash.is_zero() {
        (Vec::new(), None)
    } else {
        let mut scaled = scale_record(order, cash, owed);
        scaled.status = OrderStatus::Paid;
        scaled.tender_method = Some(TenderMethod::Voucher);
        scaled.amount_paid = cash;
        scaled.remaining_balance = Money::zero();
        (vec![PaymentDraft::simple(TenderMethod::Cash, cash)], Some(scaled))
    };

    Ok(SettlementPlan {
        owed,
        paid_now: cash,
        payments,
        client_balance_delta: Money::zero(),
        credit_portion: Money::zero(),
        voucher: Some(VoucherRedemption {
            voucher: redeemed,
            applied: vale,
        }),
        record,
        stock_out: order.quantities_by_product(),
        amount_paid: cash,
        remaining_balance: Money::zero(),
        new_status: OrderStatus::Paid,
    })
}

/// Scales quantities and totals by `cash / owed` so the kept record shows
/// only the cash share of the sale.
///
/// Rounding residue between the scaled line totals and the scaled subtotal
/// goes on the last line. The discount absorbs the rest so `total == cash`.
///
/// Unit prices are kept as sold, so a scaled line's `total` need not equal
/// `quantity * unit_price` and the record fails
/// [`Order::totals_consistent`]. Subtotal and total still add up.
fn scale_record(order: &Order, cash: Money, owed: Money) -> Order {
    let mut scaled = order.clone();
    for item in &mut scaled.items {
        item.quantity = item.quantity.scale(cash, owed);
        item.total = item.total.scale(cash, owed);
    }

    let subtotal = order.subtotal.scale(cash, owed).max(cash);
    let lines: Money = scaled.items.iter().map(|i| i.total).sum();
    if let Some(last) = scaled.items.last_mut() {
        last.total += subtotal - lines;
    }

    scaled.subtotal = subtotal;
    scaled.discount_total = subtotal - cash;
    scaled.discount = if scaled.discount_total.is_zero() {
        Discount::None
    } else {
        Discount::Amount(scaled.discount_total)
    };
    scaled.total = cash;
    scaled
}

fn status_for(remaining: Money) -> OrderStatus {
    if remaining <= MONEY_TOLERANCE {
        OrderStatus::Paid
    } else {
        OrderStatus::Pending
    }
}

fn invalid(reason: &str) -> CoreError {
    CoreError::InvalidTender {
        reason: reason.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
