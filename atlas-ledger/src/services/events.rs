//! Settlement event fan-out
//!
//! Terminal state transitions publish events for the external notification
//! dispatcher. Delivery is broadcast-based and never blocks settlement: if no
//! subscriber is listening the event is simply dropped.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::TransactionType;

/// Events emitted by the settlement core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEvent {
    TransactionSettled {
        transaction_id: Uuid,
        reference: String,
        transaction_type: TransactionType,
        amount: Decimal,
        fee: Decimal,
        currency: String,
        from_wallet_id: Option<Uuid>,
        to_wallet_id: Option<Uuid>,
    },
    TransactionFlagged {
        transaction_id: Uuid,
        reference: String,
        risk_score: u8,
    },
    TransactionFailed {
        transaction_id: Uuid,
        reference: String,
        reason: String,
    },
    TransactionReversed {
        transaction_id: Uuid,
        reference: String,
    },
    WalletFrozen {
        wallet_id: Uuid,
        owner_id: Uuid,
    },
    WalletUnfrozen {
        wallet_id: Uuid,
        owner_id: Uuid,
    },
    RiskEscalated {
        transaction_id: Uuid,
        score: u8,
        classification: String,
    },
}

/// Broadcast dispatcher for ledger events.
pub struct EventDispatcher {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers never fail the caller.
    pub fn emit(&self, event: LedgerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
