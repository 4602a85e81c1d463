//! Persistent store abstraction for the settlement core
//!
//! The core is written against `SettlementStore`, which must offer atomic
//! multi-row read-modify-write within one unit of work (`commit`). The
//! storage engine itself is not prescribed; `memory::InMemoryStore` is the
//! reference implementation used in tests and development.

mod memory;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    EntryDraft, FraudReport, LedgerEntry, Transaction, Wallet, WalletStatus,
};

pub use memory::InMemoryStore;

/// One wallet's balance mutation inside an atomic settlement commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletDelta {
    pub wallet_id: Uuid,
    /// Optimistic concurrency check: the commit fails with `Conflict` if the
    /// wallet's version no longer matches. `None` skips the check for blind
    /// credits that do not depend on a prior read (platform fee wallets).
    pub expected_version: Option<u64>,
    pub balance_delta: Decimal,
    pub available_delta: Decimal,
}

impl WalletDelta {
    /// Delta that moves `balance` and `available_balance` together.
    pub fn balanced(wallet: &Wallet, amount: Decimal) -> Self {
        Self {
            wallet_id: wallet.id,
            expected_version: Some(wallet.version),
            balance_delta: amount,
            available_delta: amount,
        }
    }

    /// Blind credit against a platform wallet; no version expectation.
    pub fn platform_credit(wallet_id: Uuid, amount: Decimal) -> Self {
        Self {
            wallet_id,
            expected_version: None,
            balance_delta: amount,
            available_delta: amount,
        }
    }

    /// Settle a previously held amount: the balance drops, the availability
    /// reduction already happened when the hold was placed.
    pub fn settle_held(wallet: &Wallet, amount: Decimal) -> Self {
        Self {
            wallet_id: wallet.id,
            expected_version: Some(wallet.version),
            balance_delta: -amount,
            available_delta: Decimal::ZERO,
        }
    }
}

/// The atomic unit of work: a transaction's status transition, every wallet
/// delta it causes, and the paired ledger entries. Applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct SettlementBatch {
    pub transaction: Transaction,
    pub deltas: Vec<WalletDelta>,
    pub entries: Vec<EntryDraft>,
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub transaction: Transaction,
    pub entries: Vec<LedgerEntry>,
}

/// Sender history consumed by the risk gate.
#[derive(Debug, Clone, Default)]
pub struct ActivitySnapshot {
    /// Transactions the user initiated in the trailing 24 hours.
    pub tx_count_24h: u32,
    /// Mean amount across the user's completed transactions, if any.
    pub average_completed_amount: Option<Decimal>,
    pub oldest_wallet_created_at: Option<DateTime<Utc>>,
}

/// Storage contract required by the settlement core.
#[async_trait::async_trait]
pub trait SettlementStore: Send + Sync {
    // Wallet operations
    async fn insert_wallet(&self, wallet: Wallet) -> Result<Wallet>;
    async fn wallet(&self, id: Uuid) -> Result<Wallet>;
    async fn wallet_for_owner(&self, owner_id: Uuid, currency: &str) -> Result<Option<Wallet>>;
    async fn wallets_for_owner(&self, owner_id: Uuid) -> Result<Vec<Wallet>>;
    async fn update_wallet_status(&self, id: Uuid, status: WalletStatus) -> Result<Wallet>;
    async fn update_wallet_limits(
        &self,
        id: Uuid,
        daily_limit: Option<Decimal>,
        monthly_limit: Option<Decimal>,
    ) -> Result<Wallet>;
    /// Reserve funds: reduces `available_balance` only.
    async fn place_hold(&self, wallet_id: Uuid, amount: Decimal) -> Result<Wallet>;
    /// Release a reservation placed by `place_hold`.
    async fn release_hold(&self, wallet_id: Uuid, amount: Decimal) -> Result<Wallet>;
    /// The platform's fee-collection wallet for a currency.
    async fn fee_wallet(&self, currency: &str) -> Result<Wallet>;

    // Transaction operations
    async fn insert_transaction(&self, transaction: Transaction) -> Result<Transaction>;
    async fn transaction(&self, id: Uuid) -> Result<Transaction>;
    async fn transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>>;
    async fn update_transaction(&self, transaction: Transaction) -> Result<Transaction>;
    /// Sum of principal + fee across COMPLETED debits from a wallet since a
    /// point in time; feeds the daily/monthly limit checks.
    async fn completed_debit_total(&self, wallet_id: Uuid, since: DateTime<Utc>) -> Result<Decimal>;
    async fn activity_snapshot(&self, user_id: Uuid) -> Result<ActivitySnapshot>;

    // Ledger queries (entries are append-only; writes happen only in commit)
    async fn entries_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntry>>;
    async fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>>;

    // Fraud reports
    async fn insert_fraud_report(&self, report: FraudReport) -> Result<FraudReport>;
    async fn fraud_report_for_transaction(&self, transaction_id: Uuid)
        -> Result<Option<FraudReport>>;
    async fn update_fraud_report(&self, report: FraudReport) -> Result<FraudReport>;

    /// Apply a settlement batch atomically: validates wallet versions,
    /// statuses, and resulting balances, then applies every delta, appends
    /// every entry with its `balance_after` snapshot and commit sequence, and
    /// persists the transaction row. On any failure nothing is applied.
    async fn commit(&self, batch: SettlementBatch) -> Result<SettlementOutcome>;
}
