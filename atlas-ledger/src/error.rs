//! Error types for the ledger and settlement core

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Custom error type for ledger-core operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Wallet {0} is frozen")]
    WalletFrozen(Uuid),

    #[error("Wallet {0} is closed")]
    WalletClosed(Uuid),

    #[error("Insufficient funds in wallet {wallet_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        wallet_id: Uuid,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Daily limit of {limit} exceeded on wallet {wallet_id}")]
    DailyLimitExceeded { wallet_id: Uuid, limit: Decimal },

    #[error("Monthly limit of {limit} exceeded on wallet {wallet_id}")]
    MonthlyLimitExceeded { wallet_id: Uuid, limit: Decimal },

    #[error("Unsupported currency pair: {from} -> {to}")]
    UnsupportedCurrencyPair { from: String, to: String },

    #[error("Transaction blocked by risk review (score {risk_score})")]
    TransactionBlocked { risk_score: u8 },

    #[error("Unbalanced ledger entries for transaction {transaction_id}: {detail}")]
    UnbalancedLedger { transaction_id: Uuid, detail: String },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("External service unavailable: {0}")]
    ExternalService(String),
}

impl LedgerError {
    /// Transient failures are safe to retry under the same idempotency reference.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Conflict(_) | LedgerError::Timeout)
    }

    /// Internal invariant violations must abort and alert rather than reach callers verbatim.
    pub fn is_internal(&self) -> bool {
        matches!(self, LedgerError::UnbalancedLedger { .. })
    }
}

/// Result type for ledger-core operations
pub type Result<T> = std::result::Result<T, LedgerError>;
