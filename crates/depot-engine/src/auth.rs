//! # Authorization Seam
//!
//! Identity and permission checks the engine consumes. Credential storage
//! and login live outside the engine; it only asks yes/no questions.
//!
//! ## Gates
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Situation                           Needs                              │
//! │  ─────────                           ─────                              │
//! │  tender puts money on credit         Capability::CreditSales            │
//! │  an item exceeds current stock       Capability::SellWithoutStock       │
//! │  a line carries a custom price       Capability::PriceOverride          │
//! │  custom price below cost             + verified StepUpGrant             │
//! │  credit past the client's limit      verified StepUpGrant               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::fmt;

use depot_core::{LockHolder, SessionId};
use serde::{Deserialize, Serialize};

/// A named permission flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreditSales,
    SellWithoutStock,
    PriceOverride,
}

impl Capability {
    /// Stable name used by the permission store.
    pub fn name(&self) -> &'static str {
        match self {
            Capability::CreditSales => "credit_sales",
            Capability::SellWithoutStock => "sell_without_stock",
            Capability::PriceOverride => "price_override",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The signed-in user on this terminal.
///
/// `session` is generated once per process start and distinguishes the
/// same user on two terminals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
    pub session: SessionId,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, session: SessionId) -> Self {
        Identity {
            user_id: user_id.into(),
            user_name: user_name.into(),
            session,
        }
    }

    /// The lock owner for this identity.
    pub fn holder(&self) -> LockHolder {
        LockHolder::new(self.user_id.clone(), self.session.clone())
    }
}

/// A supervisor credential re-entered mid-flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUpGrant {
    pub supervisor_id: String,
    pub credential: String,
}

impl StepUpGrant {
    pub fn new(supervisor_id: impl Into<String>, credential: impl Into<String>) -> Self {
        StepUpGrant {
            supervisor_id: supervisor_id.into(),
            credential: credential.into(),
        }
    }
}

/// Permission checks for the current user.
pub trait Authorizer: Send + Sync {
    fn has_capability(&self, capability: &Capability) -> bool;

    /// Verifies a supervisor credential.
    fn verify_step_up(&self, grant: &StepUpGrant) -> bool;
}

/// Fixed capability set plus one accepted supervisor PIN.
///
/// Used for tests and single-user setups.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    capabilities: HashSet<Capability>,
    supervisor_pin: Option<String>,
}

impl StaticAuthorizer {
    /// No capabilities, no step-up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every capability.
    pub fn allow_all() -> Self {
        StaticAuthorizer {
            capabilities: [
                Capability::CreditSales,
                Capability::SellWithoutStock,
                Capability::PriceOverride,
            ]
            .into_iter()
            .collect(),
            supervisor_pin: None,
        }
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_supervisor_pin(mut self, pin: impl Into<String>) -> Self {
        self.supervisor_pin = Some(pin.into());
        self
    }
}

impl Authorizer for StaticAuthorizer {
    fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    fn verify_step_up(&self, grant: &StepUpGrant) -> bool {
        self.supervisor_pin
            .as_deref()
            .is_some_and(|pin| !pin.is_empty() && pin == grant.credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names_are_stable() {
        assert_eq!(Capability::CreditSales.name(), "credit_sales");
        assert_eq!(Capability::SellWithoutStock.to_string(), "sell_without_stock");
        assert_eq!(
            serde_json::to_string(&Capability::PriceOverride).unwrap(),
            "\"price_override\""
        );
    }

    #[test]
    fn test_static_authorizer() {
        let auth = StaticAuthorizer::new()
            .with(Capability::CreditSales)
            .with_supervisor_pin("4321");

        assert!(auth.has_capability(&Capability::CreditSales));
        assert!(!auth.has_capability(&Capability::PriceOverride));
        assert!(auth.verify_step_up(&StepUpGrant::new("sup", "4321")));
        assert!(!auth.verify_step_up(&StepUpGrant::new("sup", "0000")));

        // no PIN configured: nothing verifies
        assert!(!StaticAuthorizer::allow_all().verify_step_up(&StepUpGrant::new("sup", "")));
    }

    #[test]
    fn test_identity_holder_carries_session() {
        let session = SessionId::generate();
        let ana = Identity::new("u-ana", "Ana", session.clone());
        assert_eq!(ana.holder(), LockHolder::new("u-ana", session));
    }
}
