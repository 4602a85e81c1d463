//! Data models for the ledger and settlement core

pub mod fraud;
pub mod ledger;
pub mod rates;
pub mod transaction;
pub mod user_context;
pub mod wallet;

pub use fraud::{FraudReport, FraudReportStatus, RiskLevel, RiskVerdict};
pub use ledger::{EntryDraft, LedgerEntry};
pub use rates::{ExchangeRateSnapshot, RateSource};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use user_context::{Role, UserContext};
pub use wallet::{Wallet, WalletStatus};
