//! # Settlement Engine
//!
//! Confirms a payment: checks every gate, plans the tender arithmetic, then
//! hands the plan to the store's single settlement transaction.
//!
//! ## confirm_payment Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         confirm_payment                                 │
//! │                                                                         │
//! │  1. Authorization                                                       │
//! │     credit part > 0          → CreditSales         else PermissionDenied│
//! │     custom price line        → PriceOverride       else PermissionDenied│
//! │     custom price below cost  → step-up grant       else BelowCostPrice  │
//! │                                                                         │
//! │  2. Credit limit                                                        │
//! │     balance + credit > limit → step-up grant  else CreditLimitExceeded  │
//! │                                                                         │
//! │  3. Stock (fresh read)                                                  │
//! │     any shortfall            → SellWithoutStock else StockInsufficient  │
//! │                                                                         │
//! │  ── nothing written up to here ──────────────────────────────────────   │
//! │                                                                         │
//! │  4. plan_settlement (pure)  +  warehouse distribution                   │
//! │  5. SettlementRepository::apply  (one transaction: record, payments,   │
//! │     client balance, voucher, warehouse + aggregate stock, movements)   │
//! │  6. events: SettlementCompleted, StockChanged                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `pending` order being paid down skips the price and stock gates: its
//! lines were checked and its stock left the warehouse at first settlement.

use std::collections::BTreeMap;
use std::sync::Arc;

use depot_core::allocation::{auto_distribute, validate_allocation, AllocationRequest, WarehouseAllocator};
use depot_core::tender::plan_settlement;
use depot_core::{
    CatalogProduct, Money, Order, OrderStatus, Payment, SettlementPlan, Tender, Voucher,
    WarehouseDistribution,
};
use depot_db::{Database, DbError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::auth::{Authorizer, Capability, StepUpGrant};
use crate::error::{EngineError, EngineResult, StockShortfall};
use crate::events::{EngineEvent, EventBus};

// =============================================================================
// Request / Outcome
// =============================================================================

/// What the cashier chose on the payment screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub tender: Tender,
    /// Distribution confirmed in the allocator. Products it leaves out are
    /// auto-distributed.
    pub distribution: Option<WarehouseDistribution>,
    /// Supervisor credential for credit-limit or below-cost overrides.
    pub step_up: Option<StepUpGrant>,
}

impl SettlementRequest {
    pub fn new(tender: Tender) -> Self {
        SettlementRequest {
            tender,
            distribution: None,
            step_up: None,
        }
    }

    pub fn with_distribution(mut self, distribution: WarehouseDistribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    pub fn with_step_up(mut self, grant: StepUpGrant) -> Self {
        self.step_up = Some(grant);
        self
    }
}

/// Result of a confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// `None` when a voucher covered the whole sale and no record was kept.
    pub order_id: Option<i64>,
    pub amount_paid: Money,
    pub remaining_balance: Money,
    pub new_status: OrderStatus,
    pub payments: Vec<Payment>,
    pub voucher_remaining: Option<Money>,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Clone)]
pub struct SettlementEngine {
    db: Database,
    authorizer: Arc<dyn Authorizer>,
    events: EventBus,
    primary_warehouse: Option<String>,
}

impl SettlementEngine {
    pub fn new(
        db: Database,
        authorizer: Arc<dyn Authorizer>,
        events: EventBus,
        primary_warehouse: Option<String>,
    ) -> Self {
        SettlementEngine {
            db,
            authorizer,
            events,
            primary_warehouse,
        }
    }

    /// Settles `order` with the requested tender.
    ///
    /// ## Errors
    /// - `PermissionDenied`, `StockInsufficient`: a gate refused
    /// - `CreditLimitExceeded`, `BelowCostPrice`: retry with a step-up grant
    /// - `Validation`, `InvalidStatus`, `NotFound`: bad input, nothing written
    /// - `Conflict`: the order or voucher changed under us, nothing written
    /// - `ProcessingFailed`: the transaction failed and was rolled back
    pub async fn confirm_payment(
        &self,
        order: &Order,
        request: &SettlementRequest,
    ) -> EngineResult<SettlementOutcome> {
        if !order.status.is_settleable() {
            return Err(EngineError::InvalidStatus {
                order_id: order.id.to_string(),
                status: order.status.to_string(),
            });
        }
        if order.is_empty() {
            return Err(EngineError::Validation("order has no items".into()));
        }

        let first_settlement = order.status != OrderStatus::Pending;
        let credit = request.tender.credit_portion(order.amount_owed());
        let step_up = request
            .step_up
            .as_ref()
            .is_some_and(|grant| self.authorizer.verify_step_up(grant));

        debug!(
            order_id = %order.id,
            method = %request.tender.method(),
            owed = %order.amount_owed(),
            "Confirming payment"
        );

        // 1. authorization
        if credit.is_positive() {
            self.require(Capability::CreditSales)?;
        }
        let catalog = if first_settlement {
            self.load_catalog(order).await?
        } else {
            BTreeMap::new()
        };
        if first_settlement {
            self.check_prices(order, &catalog, step_up)?;
        }

        // 2. credit limit
        if credit.is_positive() {
            self.check_credit_limit(order, credit, step_up).await?;
        }

        // 3. stock
        if first_settlement {
            self.check_stock(order, &catalog)?;
        }

        let voucher = match request.tender.voucher_id() {
            Some(id) => Some(self.load_voucher(id).await?),
            None => None,
        };

        // 4. plan
        let plan = plan_settlement(order, &request.tender, voucher.as_ref())?;
        let distribution = self
            .distribution_for(order, &plan, request.distribution.as_ref())
            .await?;

        // 5. one transaction
        let receipt = self
            .db
            .settlement()
            .apply(order, &plan, &distribution)
            .await
            .map_err(|e| match e {
                DbError::Conflict { .. } => {
                    warn!(order_id = %order.id, error = %e, "Settlement rejected, data changed");
                    EngineError::Conflict(e.to_string())
                }
                other => {
                    error!(order_id = %order.id, error = %other, "Settlement failed, rolled back");
                    EngineError::ProcessingFailed(other.to_string())
                }
            })?;

        // 6. notify
        info!(
            order_id = ?receipt.order_id,
            status = %plan.new_status,
            paid_now = %plan.paid_now,
            remaining = %plan.remaining_balance,
            "Settlement completed"
        );
        self.events.publish(EngineEvent::SettlementCompleted {
            order_id: receipt.order_id,
            status: plan.new_status,
        });
        if !plan.stock_out.is_empty() {
            self.events.publish(EngineEvent::StockChanged {
                product_ids: plan.stock_out.keys().cloned().collect(),
            });
        }

        Ok(SettlementOutcome {
            order_id: receipt.order_id,
            amount_paid: plan.amount_paid,
            remaining_balance: plan.remaining_balance,
            new_status: plan.new_status,
            payments: receipt.payments,
            voucher_remaining: plan.voucher.map(|r| r.voucher.remaining),
        })
    }

    /// An interactive allocator loaded with current warehouse stock for
    /// every product that will leave stock when `order` settles.
    pub async fn allocator_for(&self, order: &Order) -> EngineResult<WarehouseAllocator> {
        let mut requests = Vec::new();
        if order.status != OrderStatus::Pending {
            for (product_id, quantity) in order.quantities_by_product() {
                let stocks = self.db.products().warehouse_stock(&product_id).await?;
                requests.push(AllocationRequest {
                    product_name: product_name(order, &product_id),
                    product_id,
                    quantity,
                    stocks,
                });
            }
        }
        Ok(WarehouseAllocator::new(requests, self.primary_warehouse.clone()))
    }

    // =========================================================================
    // Gates
    // =========================================================================

    fn require(&self, capability: Capability) -> EngineResult<()> {
        if self.authorizer.has_capability(&capability) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied { capability })
        }
    }

    /// Fresh catalog rows for every product on the order.
    async fn load_catalog(&self, order: &Order) -> EngineResult<BTreeMap<String, CatalogProduct>> {
        let products = self.db.products();
        let mut catalog = BTreeMap::new();
        for product_id in order.quantities_by_product().into_keys() {
            let product = products
                .get(&product_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Product", &product_id))?;
            catalog.insert(product_id, product);
        }
        Ok(catalog)
    }

    fn check_prices(
        &self,
        order: &Order,
        catalog: &BTreeMap<String, CatalogProduct>,
        step_up: bool,
    ) -> EngineResult<()> {
        for item in order.items.iter().filter(|i| i.is_custom_price()) {
            self.require(Capability::PriceOverride)?;

            let Some(product) = catalog.get(&item.product_id) else {
                continue;
            };
            if product.is_below_cost(item.unit_price) {
                if !step_up {
                    return Err(EngineError::BelowCostPrice {
                        product: item.product_name.clone(),
                        unit_price: item.unit_price,
                        cost: product.cost,
                    });
                }
                info!(product = %item.product_name, price = %item.unit_price, "Below-cost price authorized");
            }
        }
        Ok(())
    }

    async fn check_credit_limit(&self, order: &Order, credit: Money, step_up: bool) -> EngineResult<()> {
        let client_id = order
            .client_id
            .as_deref()
            .ok_or_else(|| EngineError::Validation("credit requires a client".into()))?;
        let client = self
            .db
            .clients()
            .get(client_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Client", client_id))?;

        if client.exceeds_limit_with(credit) {
            if !step_up {
                return Err(EngineError::CreditLimitExceeded {
                    client: client.name,
                    balance: client.balance,
                    credit,
                    limit: client.credit_limit,
                });
            }
            info!(client = %client.id, credit = %credit, "Credit limit override authorized");
        }
        Ok(())
    }

    fn check_stock(&self, order: &Order, catalog: &BTreeMap<String, CatalogProduct>) -> EngineResult<()> {
        let shortfalls: Vec<StockShortfall> = order
            .quantities_by_product()
            .into_iter()
            .filter_map(|(product_id, requested)| {
                let product = catalog.get(&product_id)?;
                (requested > product.stock).then(|| StockShortfall {
                    product: product.name.clone(),
                    available: product.stock,
                    requested,
                })
            })
            .collect();

        if shortfalls.is_empty() {
            return Ok(());
        }
        if !self.authorizer.has_capability(&Capability::SellWithoutStock) {
            return Err(EngineError::StockInsufficient { shortfalls });
        }
        warn!(items = shortfalls.len(), "Selling without stock");
        Ok(())
    }

    async fn load_voucher(&self, id: &str) -> EngineResult<Voucher> {
        let voucher = self
            .db
            .vouchers()
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Voucher", id))?;
        if !voucher.is_redeemable() {
            return Err(EngineError::Validation(format!(
                "voucher {} is not redeemable",
                voucher.id
            )));
        }
        Ok(voucher)
    }

    // =========================================================================
    // Distribution
    // =========================================================================

    /// Validates the supplied distribution against current warehouse stock
    /// and auto-distributes the products it leaves out.
    ///
    /// A product no warehouse combination can cover is left out; settlement
    /// then decrements only its aggregate stock.
    async fn distribution_for(
        &self,
        order: &Order,
        plan: &SettlementPlan,
        supplied: Option<&WarehouseDistribution>,
    ) -> EngineResult<WarehouseDistribution> {
        let mut distribution = WarehouseDistribution::new();

        for (product_id, quantity) in &plan.stock_out {
            let name = product_name(order, product_id);
            let stocks = self.db.products().warehouse_stock(product_id).await?;

            if let Some(allocations) = supplied.and_then(|d| d.get(product_id)) {
                validate_allocation(&name, *quantity, allocations, &stocks)?;
                distribution.insert(product_id.clone(), allocations.to_vec());
                continue;
            }

            if stocks.is_empty() {
                debug!(product = %name, "No warehouse rows, aggregate stock only");
                continue;
            }
            match auto_distribute(&name, *quantity, &stocks, self.primary_warehouse.as_deref()) {
                Ok(allocations) => distribution.insert(product_id.clone(), allocations),
                Err(e) => warn!(product = %name, error = %e, "Aggregate stock only"),
            }
        }

        Ok(distribution)
    }
}

fn product_name(order: &Order, product_id: &str) -> String {
    order
        .items
        .iter()
        .find(|i| i.product_id == product_id)
        .map(|i| i.product_name.clone())
        .unwrap_or_else(|| product_id.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::StaticAuthorizer;
    use depot_core::builder::add_item;
    use depot_core::tender::TenderBreakdown;
    use depot_core::{Allocation, Client, PriceChoice, PriceTier, Quantity, VoucherStatus};
    use depot_db::DbConfig;

    pub(crate) const SUPERVISOR_PIN: &str = "2468";

    /// In-memory store with two warehouses, four products and two clients.
    ///
    /// | product | price | cost | MAIN | NORTH |
    /// |---------|-------|------|------|-------|
    /// | p-rice  | 3500  | 2450 | 6    | 4     |
    /// | p-salt  | 120   | 84   | 100  | -     |
    /// | p-clip  | 40    | 20   | 50   | -     |
    /// | p-tape  | 50    | 30   | 20   | -     |
    pub(crate) async fn seeded_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let products = db.products();
        products.insert_warehouse("MAIN", "Main store").await.unwrap();
        products.insert_warehouse("NORTH", "North yard").await.unwrap();

        let rows: [(&str, &str, i64, i64, &[(&str, i64)]); 4] = [
            ("p-rice", "Rice 25kg", 3500, 2450, &[("MAIN", 6), ("NORTH", 4)]),
            ("p-salt", "Salt 1kg", 120, 84, &[("MAIN", 100)]),
            ("p-clip", "Paper clip", 40, 20, &[("MAIN", 50)]),
            ("p-tape", "Tape roll", 50, 30, &[("MAIN", 20)]),
        ];
        for (id, name, price, cost, split) in rows {
            products
                .insert(&CatalogProduct {
                    id: id.to_string(),
                    code: id.to_uppercase(),
                    name: name.to_string(),
                    stock: Quantity::from_units(split.iter().map(|(_, u)| u).sum()),
                    price_tiers: [Money::from_cents(price); 5],
                    cost: Money::from_cents(cost),
                })
                .await
                .unwrap();
            for (warehouse, units) in split {
                products
                    .set_warehouse_stock(warehouse, id, Quantity::from_units(*units))
                    .await
                    .unwrap();
            }
        }

        for (id, name, limit) in [("c-acme", "Acme Hardware", 500_000), ("c-small", "Small Shop", 50)] {
            db.clients()
                .insert(&Client {
                    id: id.to_string(),
                    name: name.to_string(),
                    credit_limit: Money::from_cents(limit),
                    balance: Money::zero(),
                    default_price_tier: PriceTier::RETAIL,
                })
                .await
                .unwrap();
        }
        db
    }

    pub(crate) async fn product(db: &Database, id: &str) -> CatalogProduct {
        db.products().get(id).await.unwrap().unwrap()
    }

    /// A local draft with the given (product, milli-units) lines at tier 1.
    pub(crate) async fn draft(db: &Database, client: Option<&str>, lines: &[(&str, i64)]) -> Order {
        let mut order = Order::new_draft("u-ana");
        order.client_id = client.map(str::to_string);
        for (id, milli) in lines {
            let p = product(db, id).await;
            order = add_item(
                &order,
                &p,
                Quantity::from_milli(*milli),
                PriceChoice::Tier(PriceTier::RETAIL),
                None,
            )
            .unwrap();
        }
        order
    }

    fn engine(db: &Database, auth: StaticAuthorizer) -> (SettlementEngine, EventBus) {
        let events = EventBus::new();
        let engine = SettlementEngine::new(
            db.clone(),
            Arc::new(auth.with_supervisor_pin(SUPERVISOR_PIN)),
            events.clone(),
            Some("MAIN".into()),
        );
        (engine, events)
    }

    fn cash() -> SettlementRequest {
        SettlementRequest::new(Tender::Cash { tendered: None, amount: None })
    }

    fn stock_in(stocks: &[depot_core::WarehouseStock], warehouse: &str) -> Quantity {
        stocks
            .iter()
            .find(|s| s.warehouse_id == warehouse)
            .map(|s| s.quantity)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_cash_sale_splits_stock_across_warehouses() {
        let db = seeded_db().await;
        let (engine, events) = engine(&db, StaticAuthorizer::new());
        let mut rx = events.subscribe();
        let order = draft(&db, None, &[("p-rice", 8_000)]).await;

        let outcome = engine.confirm_payment(&order, &cash()).await.unwrap();

        assert_eq!(outcome.new_status, OrderStatus::Paid);
        assert_eq!(outcome.remaining_balance, Money::zero());
        assert_eq!(outcome.amount_paid.cents(), 28_000);
        assert_eq!(outcome.payments.len(), 1);
        let id = outcome.order_id.unwrap();
        assert_eq!(db.orders().status(id).await.unwrap(), Some(OrderStatus::Paid));

        // MAIN (primary) holds 6 < 8: drained first, then spill over
        let stocks = db.products().warehouse_stock("p-rice").await.unwrap();
        assert_eq!(stock_in(&stocks, "MAIN"), Quantity::zero());
        assert_eq!(stock_in(&stocks, "NORTH"), Quantity::from_units(2));
        assert_eq!(
            db.products().current_stock("p-rice").await.unwrap(),
            Quantity::from_units(2)
        );

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::SettlementCompleted {
                order_id: Some(id),
                status: OrderStatus::Paid
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::StockChanged {
                product_ids: vec!["p-rice".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_mixed_all_cash_is_paid_with_one_payment() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let order = draft(&db, None, &[("p-clip", 1_000)]).await;
        assert_eq!(order.total.cents(), 40);

        let request = SettlementRequest::new(Tender::Mixed {
            breakdown: TenderBreakdown {
                cash: Money::from_cents(40),
                ..Default::default()
            },
        });
        let outcome = engine.confirm_payment(&order, &request).await.unwrap();

        assert_eq!(outcome.new_status, OrderStatus::Paid);
        assert_eq!(outcome.remaining_balance, Money::zero());
        assert_eq!(outcome.payments.len(), 1);
        assert_eq!(outcome.payments[0].amount.cents(), 40);
    }

    #[tokio::test]
    async fn test_mixed_breakdown_mismatch_writes_nothing() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let order = draft(&db, None, &[("p-clip", 1_000)]).await;

        let request = SettlementRequest::new(Tender::Mixed {
            breakdown: TenderBreakdown {
                cash: Money::from_cents(30),
                ..Default::default()
            },
        });
        let err = engine.confirm_payment(&order, &request).await.unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(
            db.products().current_stock("p-clip").await.unwrap(),
            Quantity::from_units(50)
        );
    }

    #[tokio::test]
    async fn test_credit_without_capability_is_denied() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let order = draft(&db, Some("c-acme"), &[("p-salt", 1_000)]).await;

        let err = engine
            .confirm_payment(&order, &SettlementRequest::new(Tender::Credit))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PermissionDenied {
                capability: Capability::CreditSales
            }
        ));
    }

    #[tokio::test]
    async fn test_credit_over_limit_pauses_for_step_up() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new().with(Capability::CreditSales));
        // 2.5 clips at 40 = 100 against a limit of 50
        let order = draft(&db, Some("c-small"), &[("p-clip", 2_500)]).await;
        assert_eq!(order.total.cents(), 100);

        let err = engine
            .confirm_payment(&order, &SettlementRequest::new(Tender::Credit))
            .await
            .unwrap_err();
        assert!(err.is_step_up());
        assert_eq!(
            db.clients().get("c-small").await.unwrap().unwrap().balance,
            Money::zero()
        );

        let wrong = SettlementRequest::new(Tender::Credit).with_step_up(StepUpGrant::new("sup", "0000"));
        assert!(engine.confirm_payment(&order, &wrong).await.unwrap_err().is_step_up());

        let approved =
            SettlementRequest::new(Tender::Credit).with_step_up(StepUpGrant::new("sup", SUPERVISOR_PIN));
        let outcome = engine.confirm_payment(&order, &approved).await.unwrap();
        assert_eq!(outcome.new_status, OrderStatus::Pending);
        assert_eq!(outcome.remaining_balance.cents(), 100);
        assert!(outcome.payments.is_empty());
        assert_eq!(
            db.clients().get("c-small").await.unwrap().unwrap().balance.cents(),
            100
        );
    }

    #[tokio::test]
    async fn test_mixed_credit_then_cash_paydown() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new().with(Capability::CreditSales));
        let order = draft(&db, Some("c-acme"), &[("p-salt", 10_000)]).await;

        let request = SettlementRequest::new(Tender::Mixed {
            breakdown: TenderBreakdown {
                cash: Money::from_cents(200),
                card: Money::from_cents(400),
                credit: Money::from_cents(600),
                ..Default::default()
            },
        });
        let first = engine.confirm_payment(&order, &request).await.unwrap();
        assert_eq!(first.new_status, OrderStatus::Pending);
        assert_eq!(first.payments.len(), 2);
        assert_eq!(first.amount_paid.cents(), 600);
        assert_eq!(first.remaining_balance.cents(), 600);
        assert_eq!(db.clients().get("c-acme").await.unwrap().unwrap().balance.cents(), 600);

        let id = first.order_id.unwrap();
        let pending = db.orders().get(id).await.unwrap().unwrap();
        let second = engine.confirm_payment(&pending, &cash()).await.unwrap();

        assert_eq!(second.order_id, Some(id));
        assert_eq!(second.new_status, OrderStatus::Paid);
        assert_eq!(second.amount_paid.cents(), 1_200);
        assert_eq!(db.clients().get("c-acme").await.unwrap().unwrap().balance, Money::zero());
        // stock left once
        assert_eq!(
            db.products().current_stock("p-salt").await.unwrap(),
            Quantity::from_units(90)
        );
    }

    #[tokio::test]
    async fn test_pending_balance_paid_down_in_parts() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new().with(Capability::CreditSales));
        let order = draft(&db, Some("c-acme"), &[("p-salt", 10_000)]).await;
        let id = engine
            .confirm_payment(&order, &SettlementRequest::new(Tender::Credit))
            .await
            .unwrap()
            .order_id
            .unwrap();

        let pending = db.orders().get(id).await.unwrap().unwrap();
        let part = SettlementRequest::new(Tender::Cash {
            tendered: None,
            amount: Some(Money::from_cents(500)),
        });
        let first = engine.confirm_payment(&pending, &part).await.unwrap();
        assert_eq!(first.new_status, OrderStatus::Pending);
        assert_eq!(first.remaining_balance.cents(), 700);
        assert_eq!(db.clients().get("c-acme").await.unwrap().unwrap().balance.cents(), 700);

        let pending = db.orders().get(id).await.unwrap().unwrap();
        let rest = SettlementRequest::new(Tender::Card {
            reference: Some("AUTH-77".into()),
            amount: Some(Money::from_cents(700)),
        });
        let second = engine.confirm_payment(&pending, &rest).await.unwrap();
        assert_eq!(second.new_status, OrderStatus::Paid);
        assert_eq!(db.clients().get("c-acme").await.unwrap().unwrap().balance, Money::zero());

        let paid = db.orders().get(id).await.unwrap().unwrap();
        assert_eq!(paid.payments.len(), 2);
        assert_eq!(
            db.products().current_stock("p-salt").await.unwrap(),
            Quantity::from_units(90)
        );
    }

    #[tokio::test]
    async fn test_saved_copy_read_before_credit_sale_is_refused() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new().with(Capability::CreditSales));
        let order = draft(&db, Some("c-acme"), &[("p-salt", 10_000)]).await;
        let stale = db.orders().save(&order).await.unwrap();
        let id = stale.id.stored().unwrap();

        let fresh = db.orders().get(id).await.unwrap().unwrap();
        engine
            .confirm_payment(&fresh, &SettlementRequest::new(Tender::Credit))
            .await
            .unwrap();

        let err = engine.confirm_payment(&stale, &cash()).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let stored = db.orders().get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert!(stored.payments.is_empty());
        assert_eq!(db.clients().get("c-acme").await.unwrap().unwrap().balance.cents(), 1_200);
        assert_eq!(
            db.products().current_stock("p-salt").await.unwrap(),
            Quantity::from_units(90)
        );
    }

    #[tokio::test]
    async fn test_stock_shortfall_needs_capability() {
        let db = seeded_db().await;
        let order = draft(&db, None, &[("p-rice", 12_000), ("p-salt", 1_000)]).await;

        let (strict, _) = engine(&db, StaticAuthorizer::new());
        match strict.confirm_payment(&order, &cash()).await.unwrap_err() {
            EngineError::StockInsufficient { shortfalls } => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].product, "Rice 25kg");
                assert_eq!(shortfalls[0].available, Quantity::from_units(10));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(db.orders().list_open(10).await.unwrap().is_empty());

        let (lenient, _) = engine(&db, StaticAuthorizer::new().with(Capability::SellWithoutStock));
        let outcome = lenient.confirm_payment(&order, &cash()).await.unwrap();
        assert_eq!(outcome.new_status, OrderStatus::Paid);

        // no warehouse combination covers 12: aggregate only
        assert_eq!(
            db.products().current_stock("p-rice").await.unwrap(),
            Quantity::from_units(-2)
        );
        let stocks = db.products().warehouse_stock("p-rice").await.unwrap();
        assert_eq!(stock_in(&stocks, "MAIN"), Quantity::from_units(6));
    }

    #[tokio::test]
    async fn test_custom_price_gates() {
        let db = seeded_db().await;
        let rice = product(&db, "p-rice").await;
        let order = add_item(
            &Order::new_draft("u-ana"),
            &rice,
            Quantity::from_units(1),
            PriceChoice::Custom(Money::from_cents(2_000)),
            None,
        )
        .unwrap();

        let (no_override, _) = engine(&db, StaticAuthorizer::new());
        assert!(matches!(
            no_override.confirm_payment(&order, &cash()).await.unwrap_err(),
            EngineError::PermissionDenied {
                capability: Capability::PriceOverride
            }
        ));

        let (with_override, _) = engine(&db, StaticAuthorizer::new().with(Capability::PriceOverride));
        let err = with_override.confirm_payment(&order, &cash()).await.unwrap_err();
        assert!(matches!(err, EngineError::BelowCostPrice { .. }));
        assert!(err.is_step_up());

        let approved = cash().with_step_up(StepUpGrant::new("sup", SUPERVISOR_PIN));
        let outcome = with_override.confirm_payment(&order, &approved).await.unwrap();
        assert_eq!(outcome.amount_paid.cents(), 2_000);
    }

    #[tokio::test]
    async fn test_voucher_covering_everything_keeps_no_record() {
        let db = seeded_db().await;
        let (engine, events) = engine(&db, StaticAuthorizer::new());
        let mut rx = events.subscribe();
        let voucher = db.vouchers().issue("c-acme", Money::from_cents(30)).await.unwrap();
        // 0.6 tape at 50 = 30
        let order = draft(&db, Some("c-acme"), &[("p-tape", 600)]).await;
        let saved = db.orders().save(&order).await.unwrap();
        let id = saved.id.stored().unwrap();

        let request = SettlementRequest::new(Tender::Voucher {
            voucher_id: voucher.id.clone(),
        });
        let outcome = engine.confirm_payment(&saved, &request).await.unwrap();

        assert_eq!(outcome.order_id, None);
        assert_eq!(outcome.new_status, OrderStatus::Paid);
        assert_eq!(outcome.voucher_remaining, Some(Money::zero()));
        assert!(outcome.payments.is_empty());
        assert!(db.orders().get(id).await.unwrap().is_none());

        let used = db.vouchers().get(&voucher.id).await.unwrap().unwrap();
        assert_eq!(used.status, VoucherStatus::Used);
        assert_eq!(
            db.products().current_stock("p-tape").await.unwrap(),
            Quantity::from_milli(19_400)
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::SettlementCompleted {
                order_id: None,
                status: OrderStatus::Paid
            }
        );
    }

    #[tokio::test]
    async fn test_partial_voucher_scales_kept_record() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let voucher = db.vouchers().issue("c-acme", Money::from_cents(20)).await.unwrap();
        let order = draft(&db, Some("c-acme"), &[("p-tape", 1_000)]).await;
        assert_eq!(order.total.cents(), 50);

        let request = SettlementRequest::new(Tender::Voucher {
            voucher_id: voucher.id.clone(),
        });
        let outcome = engine.confirm_payment(&order, &request).await.unwrap();

        assert_eq!(outcome.amount_paid.cents(), 30);
        assert_eq!(outcome.voucher_remaining, Some(Money::zero()));
        let record = db.orders().get(outcome.order_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(record.total.cents(), 30);
        assert_eq!(record.items[0].quantity, Quantity::from_milli(600));
        assert_eq!(record.items[0].total.cents(), 30);
        assert_eq!(record.payments.len(), 1);
        // the full quantity still leaves stock
        assert_eq!(
            db.products().current_stock("p-tape").await.unwrap(),
            Quantity::from_units(19)
        );
    }

    #[tokio::test]
    async fn test_used_voucher_is_rejected() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let voucher = db.vouchers().issue("c-acme", Money::zero()).await.unwrap();
        let order = draft(&db, Some("c-acme"), &[("p-tape", 1_000)]).await;

        let request = SettlementRequest::new(Tender::Voucher {
            voucher_id: voucher.id,
        });
        assert!(matches!(
            engine.confirm_payment(&order, &request).await.unwrap_err(),
            EngineError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_supplied_distribution_is_validated_then_applied() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let order = draft(&db, None, &[("p-rice", 5_000)]).await;

        let mut overdrawn = WarehouseDistribution::new();
        overdrawn.insert("p-rice", vec![Allocation::new("NORTH", Quantity::from_units(5))]);
        let err = engine
            .confirm_payment(&order, &cash().with_distribution(overdrawn))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let mut allocator = engine.allocator_for(&order).await.unwrap();
        assert_eq!(allocator.current().unwrap().product_id, "p-rice");
        allocator
            .confirm(vec![
                Allocation::new("MAIN", Quantity::from_units(2)),
                Allocation::new("NORTH", Quantity::from_units(3)),
            ])
            .unwrap();
        let distribution = allocator.finish().unwrap();

        engine
            .confirm_payment(&order, &cash().with_distribution(distribution))
            .await
            .unwrap();

        let stocks = db.products().warehouse_stock("p-rice").await.unwrap();
        assert_eq!(stock_in(&stocks, "MAIN"), Quantity::from_units(4));
        assert_eq!(stock_in(&stocks, "NORTH"), Quantity::from_units(1));
        let movements = db.products().movements("p-rice").await.unwrap();
        assert_eq!(movements.len(), 2);
    }

    #[tokio::test]
    async fn test_paid_order_cannot_settle_again() {
        let db = seeded_db().await;
        let (engine, _) = engine(&db, StaticAuthorizer::new());
        let order = draft(&db, None, &[("p-salt", 1_000)]).await;
        let outcome = engine.confirm_payment(&order, &cash()).await.unwrap();

        let paid = db.orders().get(outcome.order_id.unwrap()).await.unwrap().unwrap();
        assert!(matches!(
            engine.confirm_payment(&paid, &cash()).await.unwrap_err(),
            EngineError::InvalidStatus { .. }
        ));
    }
}
