//! # Order Lock Types
//!
//! Time-boxed editing leases on persisted orders.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Holder = (user_id, session)                                            │
//! │                                                                         │
//! │  Terminal A, user "ana", session s1 ──┐                                 │
//! │                                       ├── different holders: excluded   │
//! │  Terminal B, user "ana", session s2 ──┘                                 │
//! │                                                                         │
//! │  Terminal A reopening its own locked order → "not locked"               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expired rows are treated as absent on every read, before the sweep runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::SessionId;

/// Who holds a lock: a user in one specific session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LockHolder {
    pub user_id: String,
    pub session: SessionId,
}

impl LockHolder {
    pub fn new(user_id: impl Into<String>, session: SessionId) -> Self {
        LockHolder {
            user_id: user_id.into(),
            session,
        }
    }
}

/// A lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLock {
    pub order_id: i64,
    pub holder: LockHolder,
    /// Shown to other terminals ("locked by Ana").
    pub holder_name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
}

impl OrderLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, holder: &LockHolder) -> bool {
        &self.holder == holder
    }

    /// What `viewer` should see for this lock at `now`.
    pub fn status_for(&self, viewer: &LockHolder, now: DateTime<Utc>) -> LockStatus {
        if self.is_expired(now) || self.is_held_by(viewer) {
            LockStatus::Unlocked
        } else {
            LockStatus::Locked {
                held_by: self.holder_name.clone(),
                expires_at: self.expires_at,
            }
        }
    }
}

/// Result of an `is_locked` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockStatus {
    Unlocked,
    Locked {
        held_by: String,
        #[ts(as = "String")]
        expires_at: DateTime<Utc>,
    },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lock(holder: &LockHolder, expires_in_secs: i64) -> OrderLock {
        let now = Utc::now();
        OrderLock {
            order_id: 7,
            holder: holder.clone(),
            holder_name: "Ana".to_string(),
            created_at: now,
            expires_at: now + Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn test_other_session_sees_lock() {
        let ana_a = LockHolder::new("ana", SessionId::generate());
        let ana_b = LockHolder::new("ana", SessionId::generate());
        let row = lock(&ana_a, 600);

        match row.status_for(&ana_b, Utc::now()) {
            LockStatus::Locked { held_by, .. } => assert_eq!(held_by, "Ana"),
            LockStatus::Unlocked => panic!("same user in another session must be excluded"),
        }
    }

    #[test]
    fn test_own_session_bypasses_lock() {
        let holder = LockHolder::new("ana", SessionId::generate());
        let row = lock(&holder, 600);
        assert_eq!(row.status_for(&holder, Utc::now()), LockStatus::Unlocked);
    }

    #[test]
    fn test_expired_lock_reads_as_absent() {
        let holder = LockHolder::new("ana", SessionId::generate());
        let other = LockHolder::new("luis", SessionId::generate());
        let row = lock(&holder, -1);
        assert!(row.is_expired(Utc::now()));
        assert!(!row.status_for(&other, Utc::now()).is_locked());
    }
}
