//! # Lock Manager
//!
//! Time-boxed editing leases on persisted orders, plus the background task
//! that keeps them tidy.
//!
//! ## Lease Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Editing Lease Lifecycle                          │
//! │                                                                         │
//! │  open_order(42) ──► acquire ──► Granted ──► tab opens                  │
//! │                        │                                                │
//! │                        └──► Denied { held_by: "Luis" } ──► refuse      │
//! │                                                                         │
//! │  switch_to(tab 42) ──► renew (expiry never moves backwards)            │
//! │  heartbeat (120 s) ──► renew the foreground order only                 │
//! │  close_tab(42)     ──► release (retried, then left to expire)          │
//! │  sweep (30 s)      ──► delete expired leases, publish active set       │
//! │                                                                         │
//! │  Store failure:  acquire → Denied   renew → false (next heartbeat)     │
//! │                  release → logged, local cleanup proceeds              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Acquisition is a single conditional upsert in the store, so two
//! terminals racing for the same order cannot both be granted.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use depot_core::{LockHolder, LockStatus, OrderLock};
use depot_db::Database;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::config::LockSettings;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};

// =============================================================================
// Lock Manager
// =============================================================================

/// Result of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AcquireOutcome {
    Granted,
    /// `held_by` names the other session's user when it could be read.
    Denied { held_by: Option<String> },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted)
    }
}

/// Grants, renews and releases leases for one terminal session.
#[derive(Debug, Clone)]
pub struct LockManager {
    db: Database,
    identity: Identity,
    ttl: chrono::Duration,
    release_retry: Duration,
    events: EventBus,
}

impl LockManager {
    pub fn new(db: Database, identity: Identity, settings: &LockSettings, events: EventBus) -> Self {
        LockManager {
            db,
            identity,
            ttl: settings.ttl(),
            release_retry: settings.release_retry(),
            events,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn holder(&self) -> LockHolder {
        self.identity.holder()
    }

    /// Takes the lease on `order_id`.
    ///
    /// Re-acquiring a lease this session already holds is granted. A store
    /// failure is reported as `Denied` with no holder.
    pub async fn acquire(&self, order_id: i64) -> AcquireOutcome {
        let holder = self.holder();
        let granted = self
            .db
            .locks()
            .try_acquire(order_id, &holder, &self.identity.user_name, Utc::now(), self.ttl)
            .await;

        match granted {
            Ok(true) => {
                info!(order_id, user = %self.identity.user_id, "Lock granted");
                self.events.publish(EngineEvent::LockAcquired { order_id });
                AcquireOutcome::Granted
            }
            Ok(false) => {
                let held_by = self.current_holder_name(order_id).await;
                debug!(order_id, held_by = ?held_by, "Lock denied");
                AcquireOutcome::Denied { held_by }
            }
            Err(e) => {
                warn!(order_id, error = %e, "Lock acquire failed, treating as denied");
                AcquireOutcome::Denied { held_by: None }
            }
        }
    }

    async fn current_holder_name(&self, order_id: i64) -> Option<String> {
        match self.db.locks().get(order_id).await {
            Ok(Some(lock)) => match lock.status_for(&self.holder(), Utc::now()) {
                LockStatus::Locked { held_by, .. } => Some(held_by),
                LockStatus::Unlocked => None,
            },
            Ok(None) => None,
            Err(e) => {
                debug!(order_id, error = %e, "Could not read lock holder");
                None
            }
        }
    }

    /// Pushes this session's lease forward by the ttl.
    ///
    /// Returns `false` when the lease is no longer ours or the store could
    /// not be reached; the next heartbeat tries again.
    pub async fn renew(&self, order_id: i64) -> bool {
        match self
            .db
            .locks()
            .renew(order_id, &self.holder(), Utc::now(), self.ttl)
            .await
        {
            Ok(true) => {
                debug!(order_id, "Lock renewed");
                true
            }
            Ok(false) => {
                warn!(order_id, "Lock renew found no lease held by this session");
                false
            }
            Err(e) => {
                warn!(order_id, error = %e, "Lock renew failed");
                false
            }
        }
    }

    /// Drops this session's lease.
    ///
    /// Transient store failures are retried until the retry window closes.
    /// After that the failure is logged and the lease is left to expire.
    pub async fn release(&self, order_id: i64) {
        let locks = self.db.locks();
        let holder = self.holder();
        let mut backoff = self.release_backoff();

        loop {
            match locks.release(order_id, &holder).await {
                Ok(removed) => {
                    info!(order_id, removed, "Lock released");
                    self.events.publish(EngineEvent::LockReleased { order_id });
                    return;
                }
                Err(e) if e.is_transient() => match backoff.next_backoff() {
                    Some(wait) => {
                        debug!(order_id, ?wait, error = %e, "Lock release failed, retrying");
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        warn!(order_id, error = %e, "Giving up on lock release, lease will expire");
                        return;
                    }
                },
                Err(e) => {
                    warn!(order_id, error = %e, "Lock release failed, lease will expire");
                    return;
                }
            }
        }
    }

    fn release_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(800),
            multiplier: 2.0,
            max_elapsed_time: Some(self.release_retry),
            ..Default::default()
        }
    }

    /// What this session sees for `order_id`. Expired leases and our own
    /// lease read as unlocked.
    pub async fn is_locked(&self, order_id: i64) -> EngineResult<LockStatus> {
        let status = match self.db.locks().get(order_id).await? {
            Some(lock) => lock.status_for(&self.holder(), Utc::now()),
            None => LockStatus::Unlocked,
        };
        Ok(status)
    }

    /// Drops every lease of this session (graceful session end).
    pub async fn release_all(&self) -> u64 {
        match self.db.locks().release_session(&self.holder()).await {
            Ok(removed) => {
                info!(removed, "Session locks released");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Releasing session locks failed, leases will expire");
                0
            }
        }
    }

    /// Every live lease in the store.
    pub async fn active_locks(&self) -> EngineResult<Vec<OrderLock>> {
        Ok(self.db.locks().list_active(Utc::now()).await?)
    }

    /// Deletes expired leases and returns the live set that remains.
    pub async fn sweep(&self) -> EngineResult<(u64, Vec<OrderLock>)> {
        let now = Utc::now();
        let removed = self.db.locks().sweep_expired(now).await?;
        if removed > 0 {
            info!(removed, "Expired locks swept");
            self.events.publish(EngineEvent::LocksSwept { removed });
        }
        let active = self.db.locks().list_active(now).await?;
        Ok((removed, active))
    }
}

// =============================================================================
// Lock Maintenance Service
// =============================================================================

/// Commands accepted by the maintenance task.
#[derive(Debug)]
pub enum MaintenanceCommand {
    /// Run a sweep now instead of waiting for the interval.
    SweepNow,
    /// Renew the foreground order now.
    HeartbeatNow,
    Shutdown,
}

/// Background task: periodic sweep plus heartbeat on the foreground order.
pub struct LockMaintenance {
    manager: Arc<LockManager>,
    sweep_interval: Duration,
    heartbeat_interval: Duration,
    /// Stored id of the order in the foreground tab, if we hold its lease.
    foreground: watch::Receiver<Option<i64>>,
    snapshot_tx: watch::Sender<Vec<OrderLock>>,
}

/// Handle for interacting with a running [`LockMaintenance`].
#[derive(Clone)]
pub struct LockMaintenanceHandle {
    cmd_tx: mpsc::Sender<MaintenanceCommand>,
    snapshot_rx: watch::Receiver<Vec<OrderLock>>,
}

impl LockMaintenanceHandle {
    /// The live lease set as of the last sweep.
    pub fn locks(&self) -> Vec<OrderLock> {
        self.snapshot_rx.borrow().clone()
    }

    /// The live lease set as JSON, for the order list screen.
    pub fn locks_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(&*self.snapshot_rx.borrow())?)
    }

    /// Subscribes to the lease set published after each sweep.
    pub fn subscribe(&self) -> watch::Receiver<Vec<OrderLock>> {
        self.snapshot_rx.clone()
    }

    pub async fn sweep_now(&self) -> EngineResult<()> {
        self.send(MaintenanceCommand::SweepNow).await
    }

    pub async fn heartbeat_now(&self) -> EngineResult<()> {
        self.send(MaintenanceCommand::HeartbeatNow).await
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        self.send(MaintenanceCommand::Shutdown).await
    }

    async fn send(&self, cmd: MaintenanceCommand) -> EngineResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::ChannelError("Lock maintenance channel closed".into()))
    }
}

impl LockMaintenance {
    pub fn new(
        manager: Arc<LockManager>,
        settings: &LockSettings,
        foreground: watch::Receiver<Option<i64>>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        LockMaintenance {
            manager,
            sweep_interval: settings.sweep_interval(),
            heartbeat_interval: settings.heartbeat_interval(),
            foreground,
            snapshot_tx,
        }
    }

    /// Overrides the timer periods (tests use milliseconds).
    pub fn with_intervals(mut self, sweep: Duration, heartbeat: Duration) -> Self {
        self.sweep_interval = sweep;
        self.heartbeat_interval = heartbeat;
        self
    }

    /// Spawns the maintenance loop and returns a handle.
    pub fn start(self) -> LockMaintenanceHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let handle = LockMaintenanceHandle {
            cmd_tx,
            snapshot_rx: self.snapshot_tx.subscribe(),
        };

        tokio::spawn(async move {
            self.run(cmd_rx).await;
        });

        handle
    }

    async fn run(self, mut cmd_rx: mpsc::Receiver<MaintenanceCommand>) {
        info!(
            sweep = ?self.sweep_interval,
            heartbeat = ?self.heartbeat_interval,
            "Lock maintenance started"
        );

        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the lease was just taken, no need to renew at time zero
        heartbeat.tick().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(MaintenanceCommand::SweepNow) => self.sweep().await,
                    Some(MaintenanceCommand::HeartbeatNow) => self.heartbeat().await,
                    Some(MaintenanceCommand::Shutdown) | None => {
                        info!("Lock maintenance shutting down");
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep().await,
                _ = heartbeat.tick() => self.heartbeat().await,
            }
        }
    }

    async fn sweep(&self) {
        match self.manager.sweep().await {
            Ok((_, active)) => {
                self.snapshot_tx.send_replace(active);
            }
            Err(e) => warn!(error = %e, "Lock sweep failed"),
        }
    }

    async fn heartbeat(&self) {
        let foreground = *self.foreground.borrow();
        if let Some(order_id) = foreground {
            self.manager.renew(order_id).await;
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
