//! Atlas Ledger - custodial multi-currency ledger and settlement core
//!
//! Each user owns one or more currency-denominated wallets (fiat and
//! crypto); money moves between them through deposits, withdrawals,
//! internal transfers, point-of-sale payments, and crypto buy/sell/withdraw
//! operations. The core decides atomically, under concurrent load, whether
//! a balance-changing operation is allowed, executes it without violating
//! conservation-of-money invariants, records an immutable double-entry
//! audit trail, and gates risky operations through a fraud-risk check
//! before funds move.
//!
//! Authentication, KYC review, notification delivery, and the storage
//! engine live outside this crate; the core consumes them through traits
//! (`KycProvider`, `SecondaryClassifier`, `RateProvider`, `SettlementStore`)
//! and publishes structured events and audit records for the rest.

pub mod audit;
pub mod currency;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

// Re-export commonly used types for convenience
pub use error::{LedgerError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
