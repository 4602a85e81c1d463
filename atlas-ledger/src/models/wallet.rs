//! Wallet entity and status invariants

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletStatus {
    Active,
    Frozen,
    Closed,
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletStatus::Active => write!(f, "active"),
            WalletStatus::Frozen => write!(f, "frozen"),
            WalletStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for WalletStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WalletStatus::Active),
            "frozen" => Ok(WalletStatus::Frozen),
            "closed" => Ok(WalletStatus::Closed),
            _ => Err(format!("Invalid wallet status: {}", s)),
        }
    }
}

/// A currency-denominated custodial wallet.
///
/// Invariants: `0 <= available_balance <= balance` at all times. Balances are
/// mutated only through the settlement store's atomic commit (or hold
/// placement/release), never in place. `version` is the optimistic
/// concurrency counter; every committed mutation increments it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub currency: String,
    /// Total funds held, including amounts reserved by pending operations.
    pub balance: Decimal,
    /// Funds not reserved by a pending or flagged operation.
    pub available_balance: Decimal,
    pub status: WalletStatus,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub is_default: bool,
    /// Set for the platform's internal fee-collection wallets.
    pub is_platform: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new customer wallet with the platform's default limits.
    pub fn new(owner_id: Uuid, currency: String, is_default: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            currency,
            balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            status: WalletStatus::Active,
            daily_limit: Decimal::from(10_000),
            monthly_limit: Decimal::from(100_000),
            is_default,
            is_platform: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a platform fee-collection wallet for one currency.
    pub fn fee_collection(owner_id: Uuid, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            currency,
            balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            status: WalletStatus::Active,
            daily_limit: Decimal::ZERO,
            monthly_limit: Decimal::ZERO,
            is_default: false,
            is_platform: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Whether the wallet state satisfies the balance invariants.
    pub fn invariants_hold(&self) -> bool {
        self.balance >= Decimal::ZERO
            && self.available_balance >= Decimal::ZERO
            && self.available_balance <= self.balance
    }

    /// Funds currently reserved by pending or flagged operations.
    pub fn held_amount(&self) -> Decimal {
        self.balance - self.available_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_starts_empty_and_active() {
        let wallet = Wallet::new(Uuid::new_v4(), "USD".to_string(), true);
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.available_balance, Decimal::ZERO);
        assert!(wallet.is_active());
        assert!(wallet.is_default);
        assert!(wallet.invariants_hold());
        assert_eq!(wallet.version, 0);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [WalletStatus::Active, WalletStatus::Frozen, WalletStatus::Closed] {
            let parsed: WalletStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("unknown".parse::<WalletStatus>().is_err());
    }
}
