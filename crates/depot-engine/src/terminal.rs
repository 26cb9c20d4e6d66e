//! # Terminal
//!
//! Wires the engine services for one terminal session.
//!
//! ```text
//! EngineConfig ──► Database ──┬──► LockManager ──► LockMaintenance (task)
//!                             │         │                 ▲
//!                             │         ▼                 │ foreground
//!                             ├──► TabSessionManager ─────┘
//!                             │         │
//!                             └──► SettlementEngine ◄──── Authorizer
//!
//!                    all of them ──► EventBus ──► subscribers
//! ```

use std::sync::Arc;

use depot_db::Database;
use tracing::info;

use crate::auth::{Authorizer, Identity, StaticAuthorizer};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::lock_manager::{LockMaintenance, LockMaintenanceHandle, LockManager};
use crate::settlement::SettlementEngine;
use crate::tabs::TabSessionManager;

/// A running terminal session.
pub struct Terminal {
    config: EngineConfig,
    db: Database,
    events: EventBus,
    locks: LockManager,
    settlement: SettlementEngine,
    tabs: TabSessionManager,
    maintenance: LockMaintenanceHandle,
}

impl Terminal {
    pub fn builder(config: EngineConfig) -> TerminalBuilder {
        TerminalBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    pub fn tabs(&self) -> &TabSessionManager {
        &self.tabs
    }

    pub fn maintenance(&self) -> &LockMaintenanceHandle {
        &self.maintenance
    }

    /// Graceful session end: releases every lease and stops the timers.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.tabs.close_all().await?;
        self.maintenance.shutdown().await?;
        info!(terminal = %self.config.terminal.name, "Terminal shut down");
        Ok(())
    }
}

/// Builder for [`Terminal`].
pub struct TerminalBuilder {
    config: EngineConfig,
    identity: Option<Identity>,
    db: Option<Database>,
    authorizer: Option<Arc<dyn Authorizer>>,
    events: Option<EventBus>,
}

impl TerminalBuilder {
    pub fn new(config: EngineConfig) -> Self {
        TerminalBuilder {
            config,
            identity: None,
            db: None,
            authorizer: None,
            events: None,
        }
    }

    /// The signed-in user. Required.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// An already-open store; otherwise one is opened from the config.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Permission checks; defaults to no capabilities.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Opens the store if needed and starts lock maintenance.
    pub async fn build(self) -> EngineResult<Terminal> {
        self.config.validate()?;
        let identity = self
            .identity
            .ok_or_else(|| EngineError::Config("Identity required".into()))?;

        let db = match self.db {
            Some(db) => db,
            None => Database::new(self.config.db_config()).await?,
        };
        let events = self.events.unwrap_or_default();
        let authorizer = self
            .authorizer
            .unwrap_or_else(|| Arc::new(StaticAuthorizer::new()));

        let locks = LockManager::new(db.clone(), identity, &self.config.locks, events.clone());
        let settlement = SettlementEngine::new(
            db.clone(),
            authorizer,
            events.clone(),
            self.config.primary_warehouse().map(str::to_string),
        );
        let tabs = TabSessionManager::new(db.clone(), locks.clone(), settlement.clone(), events.clone());
        let maintenance = LockMaintenance::new(
            Arc::new(locks.clone()),
            &self.config.locks,
            tabs.foreground_watch(),
        )
        .start();

        info!(
            terminal = %self.config.terminal.name,
            user = %locks.identity().user_id,
            "Terminal started"
        );

        Ok(Terminal {
            config: self.config,
            db,
            events,
            locks,
            settlement,
            tabs,
            maintenance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::tests::seeded_db;
    use depot_core::SessionId;

    #[tokio::test]
    async fn test_build_requires_identity() {
        let db = seeded_db().await;
        let result = Terminal::builder(EngineConfig::default())
            .with_database(db)
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_terminal_session_round_trip() {
        let db = seeded_db().await;
        let order = crate::settlement::tests::draft(&db, None, &[("p-salt", 1_000)]).await;
        let id = db.orders().save(&order).await.unwrap().id.stored().unwrap();

        let terminal = Terminal::builder(EngineConfig::default())
            .with_identity(Identity::new("u-ana", "Ana", SessionId::generate()))
            .with_database(db.clone())
            .build()
            .await
            .unwrap();

        terminal.tabs().open_order(id).await.unwrap();
        assert!(db.locks().get(id).await.unwrap().is_some());

        terminal.shutdown().await.unwrap();
        assert!(db.locks().get(id).await.unwrap().is_none());
        assert_eq!(terminal.tabs().tabs().await.len(), 1);
    }
}
