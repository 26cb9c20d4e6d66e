//! # Engine Events
//!
//! Publish/subscribe channel that tells other screens what changed.
//!
//! ```text
//! SettlementEngine ─┐
//! LockManager ──────┼──► EventBus (broadcast, 256) ──► order list screen
//! LockMaintenance ──┤                              ──► stock screen
//! TabSessionManager ┘                              ──► ...
//! ```
//!
//! A slow subscriber that falls behind gets `RecvError::Lagged` and skips
//! ahead; publishers never block.

use depot_core::OrderStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::EngineResult;

/// Buffered events per subscriber before it lags.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    OrderSaved {
        order_id: i64,
    },
    /// `order_id` is `None` when a voucher covered the whole sale and no
    /// record was kept.
    SettlementCompleted {
        order_id: Option<i64>,
        status: OrderStatus,
    },
    StockChanged {
        product_ids: Vec<String>,
    },
    LockAcquired {
        order_id: i64,
    },
    LockReleased {
        order_id: i64,
    },
    LocksSwept {
        removed: u64,
    },
}

impl EngineEvent {
    /// JSON payload for the UI bridge.
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Cloneable handle to the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err only means nobody is listening
        if self.tx.send(event).is_err() {
            debug!("Event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::LockAcquired { order_id: 3 });
        bus.publish(EngineEvent::SettlementCompleted {
            order_id: Some(3),
            status: OrderStatus::Paid,
        });

        assert_eq!(rx.recv().await.unwrap(), EngineEvent::LockAcquired { order_id: 3 });
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::SettlementCompleted { order_id: Some(3), status: OrderStatus::Paid }
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        EventBus::new().publish(EngineEvent::LocksSwept { removed: 2 });
    }

    #[test]
    fn test_json_payload_is_tagged() {
        let json = EngineEvent::StockChanged {
            product_ids: vec!["p-rice".into()],
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"stock_changed","product_ids":["p-rice"]}"#);
    }
}
