//! Transaction entity and lifecycle

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failure reason recorded when the atomic commit times out; a retry with the
/// same reference resumes the transaction instead of returning it unchanged.
pub const REASON_TIMEOUT: &str = "timeout";
/// Failure reason recorded when optimistic retries are exhausted.
pub const REASON_CONFLICT: &str = "conflict";

/// Balance-changing operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    PosPayment,
    CryptoBuy,
    CryptoSell,
}

impl TransactionType {
    /// Whether the operation debits the source wallet.
    pub fn is_debit(&self) -> bool {
        !matches!(self, TransactionType::Deposit)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
            TransactionType::Transfer => write!(f, "transfer"),
            TransactionType::PosPayment => write!(f, "pos_payment"),
            TransactionType::CryptoBuy => write!(f, "crypto_buy"),
            TransactionType::CryptoSell => write!(f, "crypto_sell"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer" => Ok(TransactionType::Transfer),
            "pos_payment" => Ok(TransactionType::PosPayment),
            "crypto_buy" => Ok(TransactionType::CryptoBuy),
            "crypto_sell" => Ok(TransactionType::CryptoSell),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Flagged,
    Failed,
    Reversed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Flagged => write!(f, "flagged"),
            TransactionStatus::Failed => write!(f, "failed"),
            TransactionStatus::Reversed => write!(f, "reversed"),
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "flagged" => Ok(TransactionStatus::Flagged),
            "failed" => Ok(TransactionStatus::Failed),
            "reversed" => Ok(TransactionStatus::Reversed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

/// One requested balance-changing operation.
///
/// Exactly one Transaction exists per idempotency `reference`. A transaction
/// that used a currency conversion pins the rate it settled at so historical
/// amounts remain reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub target_currency: Option<String>,
    /// Rate pinned at settlement time (target units per source unit).
    pub exchange_rate: Option<Decimal>,
    pub converted_amount: Option<Decimal>,
    pub status: TransactionStatus,
    /// Caller-supplied idempotency key, unique across all transactions.
    pub reference: String,
    pub risk_score: u8,
    pub from_wallet_id: Option<Uuid>,
    pub to_wallet_id: Option<Uuid>,
    /// Availability hold placed while the transaction awaits review or
    /// external confirmation; released or settled when it resolves.
    pub hold_amount: Option<Decimal>,
    pub description: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        transaction_type: TransactionType,
        amount: Decimal,
        currency: String,
        reference: String,
        from_wallet_id: Option<Uuid>,
        to_wallet_id: Option<Uuid>,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_type,
            amount,
            fee: Decimal::ZERO,
            currency,
            target_currency: None,
            exchange_rate: None,
            converted_amount: None,
            status: TransactionStatus::Pending,
            reference,
            risk_score: 0,
            from_wallet_id,
            to_wallet_id,
            hold_amount: None,
            description,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pin the conversion this transaction settled with.
    pub fn pin_conversion(&mut self, target_currency: String, rate: Decimal, converted: Decimal) {
        self.target_currency = Some(target_currency);
        self.exchange_rate = Some(rate);
        self.converted_amount = Some(converted);
        self.updated_at = Utc::now();
    }

    /// Transition to a new status, enforcing the monotonic lifecycle.
    ///
    /// Allowed: Pending -> {Completed, Flagged, Failed}, Flagged ->
    /// {Pending, Completed, Failed} (review resolution), Completed ->
    /// Reversed, and Failed -> Pending only when the failure was transient
    /// (timeout/conflict retry).
    pub fn transition(&mut self, next: TransactionStatus) -> Result<(), String> {
        use TransactionStatus::*;
        let allowed = matches!(
            (self.status, next),
            (Pending, Completed)
                | (Pending, Flagged)
                | (Pending, Failed)
                | (Flagged, Pending)
                | (Flagged, Completed)
                | (Flagged, Failed)
                | (Completed, Reversed)
        ) || (self.status == Failed && next == Pending && self.is_transient_failure());

        if !allowed {
            return Err(format!(
                "invalid status transition {} -> {}",
                self.status, next
            ));
        }
        self.status = next;
        if next != Failed {
            self.failure_reason = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: &str) {
        self.status = TransactionStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.updated_at = Utc::now();
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Completed | TransactionStatus::Reversed
        )
    }

    /// Failed for a transient reason; retryable under the same reference.
    pub fn is_transient_failure(&self) -> bool {
        self.status == TransactionStatus::Failed
            && matches!(
                self.failure_reason.as_deref(),
                Some(REASON_TIMEOUT) | Some(REASON_CONFLICT)
            )
    }

    /// Total debited from the source wallet: principal plus fee.
    pub fn debit_total(&self) -> Decimal {
        self.amount + self.fee
    }
}
