//! Append-only double-entry ledger lines

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One signed, immutable movement recorded against a single wallet for a
/// single transaction.
///
/// Entries are append-only; there is no update or delete. For a given wallet
/// they are totally ordered by `sequence` and `balance_after` is consistent
/// with that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub wallet_id: Uuid,
    /// Signed movement: positive credits the wallet, negative debits it.
    pub amount: Decimal,
    pub currency: String,
    /// Wallet balance immediately after this entry was applied.
    pub balance_after: Decimal,
    pub description: String,
    /// Global commit sequence assigned by the settlement store.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// An entry leg awaiting commit, before sequence and balance snapshot exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDraft {
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

impl EntryDraft {
    pub fn new(wallet_id: Uuid, amount: Decimal, currency: &str, description: &str) -> Self {
        Self {
            wallet_id,
            amount,
            currency: currency.to_string(),
            description: description.to_string(),
        }
    }
}
