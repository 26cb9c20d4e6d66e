//! # Warehouse Allocation
//!
//! Decides which warehouses each product's quantity is drawn from.
//!
//! ## Auto-Distribute Heuristic
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  quantity q, warehouses with stock                                      │
//! │       │                                                                 │
//! │       ├── primary warehouse holds ≥ q?   → [primary: q]                 │
//! │       │                                                                 │
//! │       ├── some warehouse holds ≥ q?      → [that one: q]                │
//! │       │                                                                 │
//! │       ├── primary + largest other ≥ q?   → [primary: all it has,        │
//! │       │                                     other: the rest]            │
//! │       │                                                                 │
//! │       ├── two largest together hold ≥ q? → [largest: all it has,        │
//! │       │                                     second: the rest]           │
//! │       │                                                                 │
//! │       └── otherwise                      → NoWarehouseCoverage          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Manual allocations are always accepted provided they sum to exactly `q`
//! and no warehouse gives more than it holds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::quantity::Quantity;
use crate::types::WarehouseStock;
use crate::validation::validate_quantity;

/// Quantity drawn from one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Allocation {
    pub warehouse_id: String,
    pub quantity: Quantity,
}

impl Allocation {
    pub fn new(warehouse_id: impl Into<String>, quantity: Quantity) -> Self {
        Allocation {
            warehouse_id: warehouse_id.into(),
            quantity,
        }
    }
}

/// Per-product allocations, keyed by product id.
///
/// Products without an entry fall back to decrementing aggregate stock only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseDistribution(BTreeMap<String, Vec<Allocation>>);

impl WarehouseDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: impl Into<String>, allocations: Vec<Allocation>) {
        self.0.insert(product_id.into(), allocations);
    }

    pub fn get(&self, product_id: &str) -> Option<&[Allocation]> {
        self.0.get(product_id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Allocation>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// =============================================================================
// Pure Functions
// =============================================================================

/// Proposes a distribution of `quantity` over `stocks`.
pub fn auto_distribute(
    product: &str,
    quantity: Quantity,
    stocks: &[WarehouseStock],
    primary: Option<&str>,
) -> CoreResult<Vec<Allocation>> {
    validate_quantity(quantity)?;

    if let Some(primary) = primary {
        if stocks
            .iter()
            .any(|s| s.warehouse_id == primary && s.quantity >= quantity)
        {
            return Ok(vec![Allocation::new(primary, quantity)]);
        }
    }

    if let Some(single) = stocks.iter().find(|s| s.quantity >= quantity) {
        return Ok(vec![Allocation::new(&single.warehouse_id, quantity)]);
    }

    let mut by_stock: Vec<&WarehouseStock> =
        stocks.iter().filter(|s| s.quantity.is_positive()).collect();
    by_stock.sort_by(|a, b| b.quantity.cmp(&a.quantity));

    let primary_stock = primary.and_then(|p| by_stock.iter().position(|s| s.warehouse_id == p));
    if let Some(index) = primary_stock {
        let first = by_stock.remove(index);
        if let Some(second) = by_stock.first() {
            if first.quantity + second.quantity >= quantity {
                return Ok(split(first, second, quantity));
            }
        }
        by_stock.insert(index, first);
    }

    if let [first, second, ..] = by_stock.as_slice() {
        if first.quantity + second.quantity >= quantity {
            return Ok(split(first, second, quantity));
        }
    }

    Err(CoreError::NoWarehouseCoverage {
        product: product.to_string(),
        requested: quantity,
    })
}

fn split(first: &WarehouseStock, second: &WarehouseStock, quantity: Quantity) -> Vec<Allocation> {
    vec![
        Allocation::new(&first.warehouse_id, first.quantity),
        Allocation::new(&second.warehouse_id, quantity - first.quantity),
    ]
}

/// Checks a (possibly hand-edited) distribution for one product.
///
/// ## Rules
/// - no negative allocation
/// - no warehouse gives more than `stocks` says it holds
///   (an unknown warehouse holds nothing)
/// - allocations sum to exactly `quantity`
pub fn validate_allocation(
    product: &str,
    quantity: Quantity,
    allocations: &[Allocation],
    stocks: &[WarehouseStock],
) -> CoreResult<()> {
    let mut per_warehouse: BTreeMap<&str, Quantity> = BTreeMap::new();
    for allocation in allocations {
        if allocation.quantity < Quantity::zero() {
            return Err(CoreError::AllocationMismatch {
                product: product.to_string(),
                expected: quantity,
                allocated: allocation.quantity,
            });
        }
        *per_warehouse
            .entry(allocation.warehouse_id.as_str())
            .or_insert_with(Quantity::zero) += allocation.quantity;
    }

    for (warehouse, requested) in &per_warehouse {
        let available = stocks
            .iter()
            .find(|s| s.warehouse_id == *warehouse)
            .map(|s| s.quantity)
            .unwrap_or_default();
        if *requested > available {
            return Err(CoreError::WarehouseOverdrawn {
                product: product.to_string(),
                warehouse: warehouse.to_string(),
                available,
                requested: *requested,
            });
        }
    }

    let allocated: Quantity = per_warehouse.values().copied().sum();
    if allocated != quantity {
        return Err(CoreError::AllocationMismatch {
            product: product.to_string(),
            expected: quantity,
            allocated,
        });
    }

    Ok(())
}

// =============================================================================
// Interactive Allocator
// =============================================================================

/// One product awaiting a distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: Quantity,
    pub stocks: Vec<WarehouseStock>,
}

/// Walks the cashier through distributing each product, one at a time.
///
/// ```text
/// new(requests) ──► current() ──► suggest() ──► confirm(edited) ──┐
///                      ▲                                           │
///                      └──────────── next product ◄────────────────┘
///                                        │
///                                   all confirmed
///                                        ▼
///                                     finish()
/// ```
#[derive(Debug, Clone)]
pub struct WarehouseAllocator {
    primary: Option<String>,
    requests: Vec<AllocationRequest>,
    next: usize,
    distribution: WarehouseDistribution,
}

impl WarehouseAllocator {
    pub fn new(requests: Vec<AllocationRequest>, primary: Option<String>) -> Self {
        WarehouseAllocator {
            primary,
            requests,
            next: 0,
            distribution: WarehouseDistribution::new(),
        }
    }

    /// The product awaiting confirmation.
    pub fn current(&self) -> Option<&AllocationRequest> {
        self.requests.get(self.next)
    }

    /// Auto-distribution for the current product.
    pub fn suggest(&self) -> CoreResult<Vec<Allocation>> {
        let request = self.current_or_done()?;
        auto_distribute(
            &request.product_name,
            request.quantity,
            &request.stocks,
            self.primary.as_deref(),
        )
    }

    /// Validates and records the distribution for the current product,
    /// then advances. Zero-quantity rows are dropped.
    pub fn confirm(&mut self, allocations: Vec<Allocation>) -> CoreResult<()> {
        let request = self.current_or_done()?;
        validate_allocation(
            &request.product_name,
            request.quantity,
            &allocations,
            &request.stocks,
        )?;

        let product_id = request.product_id.clone();
        let kept = allocations
            .into_iter()
            .filter(|a| a.quantity.is_positive())
            .collect();
        self.distribution.insert(product_id, kept);
        self.next += 1;
        Ok(())
    }

    /// Accepts the suggestion for every remaining product.
    pub fn auto_fill(&mut self) -> CoreResult<()> {
        while self.current().is_some() {
            let suggestion = self.suggest()?;
            self.confirm(suggestion)?;
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.requests.len()
    }

    /// The finished distribution; fails if products remain unconfirmed.
    pub fn finish(self) -> CoreResult<WarehouseDistribution> {
        if let Some(request) = self.current() {
            return Err(CoreError::AllocationMismatch {
                product: request.product_name.clone(),
                expected: request.quantity,
                allocated: Quantity::zero(),
            });
        }
        Ok(self.distribution)
    }

    fn current_or_done(&self) -> CoreResult<&AllocationRequest> {
        self.current().ok_or(CoreError::AllocationComplete)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
