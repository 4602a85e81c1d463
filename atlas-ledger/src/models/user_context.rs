//! Authenticated caller context

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller role supplied by the outer authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Customer,
    Operator,
}

/// Identity attached to every coordinator call. The core trusts this
/// identity; authentication happens outside the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl UserContext {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn operator(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Operator,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    /// Whether this caller may act on a wallet owned by `owner_id`.
    pub fn can_act_for(&self, owner_id: Uuid) -> bool {
        self.is_operator() || self.user_id == owner_id
    }
}
