//! # Tab Session Manager
//!
//! The open orders of one terminal, each in its own tab.
//!
//! ## Tab States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  new_tab() ──► unsaved draft ──save_active()──► persisted, no lease     │
//! │                (local id)                        (we created it)        │
//! │                                                                         │
//! │  open_order(42) ──acquire──► persisted, leased ──┐                      │
//! │                     │                            │                      │
//! │                     └─denied──► LockConflict     │                      │
//! │                                                  ▼                      │
//! │  close_tab / settle_active ──► release lease ──► closed                 │
//! │                                                                         │
//! │  Closing the last tab opens a fresh draft: never zero tabs.             │
//! │  switch_to renews the lease of the tab coming to the front.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The foreground order id is published on a `watch` channel; the lock
//! maintenance heartbeat keeps only that lease warm.

use std::fmt;
use std::sync::Arc;

use depot_core::{CoreResult, Order, OrderId};
use depot_db::Database;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::lock_manager::{AcquireOutcome, LockManager};
use crate::settlement::{SettlementEngine, SettlementOutcome, SettlementRequest};

/// Shown when a lease is held but its owner could not be read.
const UNKNOWN_HOLDER: &str = "another session";

// =============================================================================
// Tab
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(Uuid);

impl TabId {
    fn generate() -> Self {
        TabId(Uuid::new_v4())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub order: Order,
    pub active: bool,
    /// This session holds the order's lease.
    pub has_lock: bool,
    /// Local edits not yet saved.
    pub dirty: bool,
    /// A payment is being confirmed; the tab cannot close.
    pub settling: bool,
}

impl Tab {
    fn draft(created_by: &str) -> Self {
        Tab {
            id: TabId::generate(),
            order: Order::new_draft(created_by),
            active: false,
            has_lock: false,
            dirty: false,
            settling: false,
        }
    }

    /// Order id whose lease this tab holds.
    fn leased_order(&self) -> Option<i64> {
        if self.has_lock {
            self.order.id.stored()
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct TabSet {
    tabs: Vec<Tab>,
}

impl TabSet {
    fn position(&self, id: TabId) -> EngineResult<usize> {
        self.tabs
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| EngineError::not_found("Tab", id.to_string()))
    }

    fn active_index(&self) -> usize {
        self.tabs.iter().position(|t| t.active).unwrap_or(0)
    }

    fn activate(&mut self, index: usize) {
        for (i, tab) in self.tabs.iter_mut().enumerate() {
            tab.active = i == index;
        }
    }

    fn active_mut(&mut self) -> EngineResult<&mut Tab> {
        let index = self.active_index();
        self.tabs
            .get_mut(index)
            .ok_or_else(|| EngineError::Validation("no open tab".into()))
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the tabs of one terminal session.
///
/// ## Thread Safety
/// Tab state sits behind `Arc<tokio::sync::Mutex<_>>` so store round trips
/// can run while it is held. A settlement releases it for the duration of
/// the payment and marks its tab `settling` instead.
#[derive(Clone)]
pub struct TabSessionManager {
    state: Arc<Mutex<TabSet>>,
    db: Database,
    locks: LockManager,
    settlement: SettlementEngine,
    events: EventBus,
    foreground: Arc<watch::Sender<Option<i64>>>,
}

impl TabSessionManager {
    /// Starts with one empty draft tab.
    pub fn new(db: Database, locks: LockManager, settlement: SettlementEngine, events: EventBus) -> Self {
        let mut first = Tab::draft(&locks.identity().user_id);
        first.active = true;
        let (foreground, _) = watch::channel(None);

        TabSessionManager {
            state: Arc::new(Mutex::new(TabSet { tabs: vec![first] })),
            db,
            locks,
            settlement,
            events,
            foreground: Arc::new(foreground),
        }
    }

    /// Leased order id of the active tab, for the lock heartbeat.
    pub fn foreground_watch(&self) -> watch::Receiver<Option<i64>> {
        self.foreground.subscribe()
    }

    pub async fn tabs(&self) -> Vec<Tab> {
        self.state.lock().await.tabs.clone()
    }

    pub async fn active(&self) -> Tab {
        let state = self.state.lock().await;
        state.tabs[state.active_index()].clone()
    }

    /// Opens an empty draft and brings it to the front.
    pub async fn new_tab(&self) -> TabId {
        let mut state = self.state.lock().await;
        let tab = Tab::draft(&self.locks.identity().user_id);
        let id = tab.id;
        state.tabs.push(tab);
        let last = state.tabs.len() - 1;
        state.activate(last);
        self.publish_foreground(&state);
        debug!(tab = %id, "Draft tab opened");
        id
    }

    /// Opens a persisted order for editing.
    ///
    /// An order already open in a local tab is just focused. Otherwise the
    /// lease is taken first; an order held by another session is refused
    /// with the holder's name.
    pub async fn open_order(&self, order_id: i64) -> EngineResult<TabId> {
        let mut state = self.state.lock().await;

        if let Some(index) = state
            .tabs
            .iter()
            .position(|t| t.order.id == OrderId::Stored(order_id))
        {
            let id = state.tabs[index].id;
            drop(state);
            self.switch_to(id).await?;
            return Ok(id);
        }

        if let AcquireOutcome::Denied { held_by } = self.locks.acquire(order_id).await {
            let holder_name = held_by.unwrap_or_else(|| UNKNOWN_HOLDER.to_string());
            info!(order_id, holder = %holder_name, "Order is being edited elsewhere");
            return Err(EngineError::LockConflict { order_id, holder_name });
        }

        let order = match self.load_openable(order_id).await {
            Ok(order) => order,
            Err(e) => {
                self.locks.release(order_id).await;
                return Err(e);
            }
        };

        let mut tab = Tab::draft(&order.created_by);
        tab.order = order;
        tab.has_lock = true;
        let id = tab.id;
        state.tabs.push(tab);
        let last = state.tabs.len() - 1;
        state.activate(last);
        self.publish_foreground(&state);

        info!(order_id, tab = %id, "Order opened");
        Ok(id)
    }

    async fn load_openable(&self, order_id: i64) -> EngineResult<Order> {
        let order = self
            .db
            .orders()
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id.to_string()))?;
        if !order.status.is_settleable() {
            return Err(EngineError::InvalidStatus {
                order_id: order_id.to_string(),
                status: order.status.to_string(),
            });
        }
        Ok(order)
    }

    /// Brings a tab to the front and renews its lease.
    pub async fn switch_to(&self, tab: TabId) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        let index = state.position(tab)?;
        state.activate(index);

        if let Some(order_id) = state.tabs[index].leased_order() {
            self.locks.renew(order_id).await;
        }
        self.publish_foreground(&state);
        Ok(())
    }

    /// Closes a tab, releasing its lease before it disappears.
    pub async fn close_tab(&self, tab: TabId) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        let index = state.position(tab)?;
        if state.tabs[index].settling {
            return Err(EngineError::SettlementInProgress);
        }

        if let Some(order_id) = state.tabs[index].leased_order() {
            self.locks.release(order_id).await;
        }

        let closed = state.tabs.remove(index);
        if closed.dirty {
            warn!(tab = %closed.id, order_id = %closed.order.id, "Tab closed with unsaved changes");
        }

        if state.tabs.is_empty() {
            state.tabs.push(Tab::draft(&self.locks.identity().user_id));
        }
        if closed.active || !state.tabs.iter().any(|t| t.active) {
            let next = index.min(state.tabs.len() - 1);
            state.activate(next);
            if let Some(order_id) = state.tabs[next].leased_order() {
                self.locks.renew(order_id).await;
            }
        }
        self.publish_foreground(&state);

        debug!(tab = %tab, remaining = state.tabs.len(), "Tab closed");
        Ok(())
    }

    /// Applies an Order Builder operation to the active tab's order.
    pub async fn update_active<F>(&self, f: F) -> EngineResult<Order>
    where
        F: FnOnce(&Order) -> CoreResult<Order>,
    {
        let mut state = self.state.lock().await;
        let tab = state.active_mut()?;
        if tab.settling {
            return Err(EngineError::SettlementInProgress);
        }

        tab.order = f(&tab.order)?;
        tab.dirty = true;
        Ok(tab.order.clone())
    }

    /// Persists the active tab's order and returns its stored id.
    pub async fn save_active(&self) -> EngineResult<i64> {
        let mut state = self.state.lock().await;
        let tab = state.active_mut()?;
        if tab.settling {
            return Err(EngineError::SettlementInProgress);
        }
        if tab.order.is_empty() {
            return Err(EngineError::Validation("cannot save an order with no items".into()));
        }

        let saved = self.db.orders().save(&tab.order).await?;
        let order_id = saved
            .id
            .stored()
            .ok_or_else(|| EngineError::Store("saved order has no stored id".into()))?;
        tab.order = saved;
        tab.dirty = false;

        info!(order_id, "Order saved");
        self.events.publish(EngineEvent::OrderSaved { order_id });
        Ok(order_id)
    }

    /// Confirms payment for the active tab.
    ///
    /// The tab cannot close while this runs. On success the tab closes and
    /// its lease is released; on failure it stays open as it was.
    pub async fn settle_active(&self, request: &SettlementRequest) -> EngineResult<SettlementOutcome> {
        let (tab_id, order) = {
            let mut state = self.state.lock().await;
            let tab = state.active_mut()?;
            if tab.settling {
                return Err(EngineError::SettlementInProgress);
            }
            tab.settling = true;
            (tab.id, tab.order.clone())
        };

        let result = self.settlement.confirm_payment(&order, request).await;

        {
            let mut state = self.state.lock().await;
            if let Ok(index) = state.position(tab_id) {
                state.tabs[index].settling = false;
            }
        }

        let outcome = result?;
        self.close_tab(tab_id).await?;
        Ok(outcome)
    }

    /// Ends the session: releases every lease and leaves one fresh draft.
    pub async fn close_all(&self) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        if state.tabs.iter().any(|t| t.settling) {
            return Err(EngineError::SettlementInProgress);
        }

        let released = self.locks.release_all().await;
        let mut first = Tab::draft(&self.locks.identity().user_id);
        first.active = true;
        state.tabs = vec![first];
        self.publish_foreground(&state);

        info!(released, "Tab session closed");
        Ok(())
    }

    fn publish_foreground(&self, state: &TabSet) {
        let leased = state
            .tabs
            .get(state.active_index())
            .and_then(Tab::leased_order);
        self.foreground.send_replace(leased);
    }
}
