//! In-memory settlement store for development and testing

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::currency::CurrencyRegistry;
use crate::error::{LedgerError, Result};
use crate::models::{
    FraudReport, LedgerEntry, Transaction, TransactionStatus, TransactionType, Wallet,
    WalletStatus,
};

use super::{ActivitySnapshot, SettlementBatch, SettlementOutcome, SettlementStore, WalletDelta};

#[derive(Debug, Default)]
struct StoreState {
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    references: HashMap<String, Uuid>,
    entries: Vec<LedgerEntry>,
    fraud_reports: HashMap<Uuid, FraudReport>,
    reports_by_transaction: HashMap<Uuid, Uuid>,
    sequence: u64,
}

/// Reference `SettlementStore` backed by process memory.
///
/// All state lives behind a single `RwLock`, so `commit` is trivially
/// serializable: the whole batch validates and applies under one write guard.
/// A platform fee-collection wallet is seeded per supported currency.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    fee_wallets: HashMap<String, Uuid>,
    platform_owner_id: Uuid,
}

impl InMemoryStore {
    pub fn new(registry: &CurrencyRegistry) -> Self {
        let platform_owner_id = Uuid::new_v4();
        let mut state = StoreState::default();
        let mut fee_wallets = HashMap::new();

        for code in registry.codes() {
            let wallet = Wallet::fee_collection(platform_owner_id, code.clone());
            fee_wallets.insert(code, wallet.id);
            state.wallets.insert(wallet.id, wallet);
        }

        Self {
            state: RwLock::new(state),
            fee_wallets,
            platform_owner_id,
        }
    }

    pub fn platform_owner_id(&self) -> Uuid {
        self.platform_owner_id
    }

    fn wallet_or_not_found(state: &StoreState, id: Uuid) -> Result<&Wallet> {
        state
            .wallets
            .get(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", id)))
    }

    /// Validate one delta against current wallet state and return the wallet's
    /// post-delta balances. Nothing is mutated here.
    fn check_delta(wallet: &Wallet, delta: &WalletDelta) -> Result<(Decimal, Decimal)> {
        if let Some(expected) = delta.expected_version {
            if wallet.version != expected {
                return Err(LedgerError::Conflict(format!(
                    "wallet {} version {} (expected {})",
                    wallet.id, wallet.version, expected
                )));
            }
        }
        match wallet.status {
            WalletStatus::Active => {}
            WalletStatus::Frozen => return Err(LedgerError::WalletFrozen(wallet.id)),
            WalletStatus::Closed => return Err(LedgerError::WalletClosed(wallet.id)),
        }

        let new_balance = wallet.balance + delta.balance_delta;
        let new_available = wallet.available_balance + delta.available_delta;
        if new_balance < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                wallet_id: wallet.id,
                requested: delta.balance_delta.abs(),
                available: wallet.balance,
            });
        }
        if new_available < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                wallet_id: wallet.id,
                requested: delta.available_delta.abs(),
                available: wallet.available_balance,
            });
        }
        if new_available > new_balance {
            return Err(LedgerError::Validation(format!(
                "available balance would exceed balance on wallet {}",
                wallet.id
            )));
        }
        Ok((new_balance, new_available))
    }
}

#[async_trait::async_trait]
impl SettlementStore for InMemoryStore {
    async fn insert_wallet(&self, wallet: Wallet) -> Result<Wallet> {
        let mut state = self.state.write().unwrap();
        let duplicate = state.wallets.values().any(|w| {
            !w.is_platform && w.owner_id == wallet.owner_id && w.currency == wallet.currency
        });
        if duplicate {
            return Err(LedgerError::AlreadyExists(format!(
                "wallet for owner {} in {}",
                wallet.owner_id, wallet.currency
            )));
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&self, id: Uuid) -> Result<Wallet> {
        let state = self.state.read().unwrap();
        Self::wallet_or_not_found(&state, id).cloned()
    }

    async fn wallet_for_owner(&self, owner_id: Uuid, currency: &str) -> Result<Option<Wallet>> {
        let state = self.state.read().unwrap();
        Ok(state
            .wallets
            .values()
            .find(|w| !w.is_platform && w.owner_id == owner_id && w.currency == currency)
            .cloned())
    }

    async fn wallets_for_owner(&self, owner_id: Uuid) -> Result<Vec<Wallet>> {
        let state = self.state.read().unwrap();
        let mut wallets: Vec<Wallet> = state
            .wallets
            .values()
            .filter(|w| !w.is_platform && w.owner_id == owner_id)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.created_at);
        Ok(wallets)
    }

    async fn update_wallet_status(&self, id: Uuid, status: WalletStatus) -> Result<Wallet> {
        let mut state = self.state.write().unwrap();
        let wallet = state
            .wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", id)))?;
        wallet.status = status;
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn update_wallet_limits(
        &self,
        id: Uuid,
        daily_limit: Option<Decimal>,
        monthly_limit: Option<Decimal>,
    ) -> Result<Wallet> {
        let mut state = self.state.write().unwrap();
        let wallet = state
            .wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", id)))?;
        if let Some(limit) = daily_limit {
            wallet.daily_limit = limit;
        }
        if let Some(limit) = monthly_limit {
            wallet.monthly_limit = limit;
        }
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn place_hold(&self, wallet_id: Uuid, amount: Decimal) -> Result<Wallet> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "hold amount must be positive".to_string(),
            ));
        }
        let mut state = self.state.write().unwrap();
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", wallet_id)))?;
        match wallet.status {
            WalletStatus::Active => {}
            WalletStatus::Frozen => return Err(LedgerError::WalletFrozen(wallet_id)),
            WalletStatus::Closed => return Err(LedgerError::WalletClosed(wallet_id)),
        }
        if wallet.available_balance < amount {
            return Err(LedgerError::InsufficientFunds {
                wallet_id,
                requested: amount,
                available: wallet.available_balance,
            });
        }
        wallet.available_balance -= amount;
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn release_hold(&self, wallet_id: Uuid, amount: Decimal) -> Result<Wallet> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "hold amount must be positive".to_string(),
            ));
        }
        let mut state = self.state.write().unwrap();
        // Releases are allowed on frozen wallets: failing an operation must
        // always return the reservation.
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet {}", wallet_id)))?;
        if wallet.available_balance + amount > wallet.balance {
            return Err(LedgerError::Validation(format!(
                "hold release of {} would exceed balance on wallet {}",
                amount, wallet_id
            )));
        }
        wallet.available_balance += amount;
        wallet.version += 1;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    async fn fee_wallet(&self, currency: &str) -> Result<Wallet> {
        let id = self
            .fee_wallets
            .get(currency)
            .copied()
            .ok_or_else(|| LedgerError::NotFound(format!("fee wallet for {}", currency)))?;
        self.wallet(id).await
    }

    async fn insert_transaction(&self, transaction: Transaction) -> Result<Transaction> {
        let mut state = self.state.write().unwrap();
        if state.references.contains_key(&transaction.reference) {
            return Err(LedgerError::AlreadyExists(format!(
                "transaction reference {}",
                transaction.reference
            )));
        }
        state
            .references
            .insert(transaction.reference.clone(), transaction.id);
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn transaction(&self, id: Uuid) -> Result<Transaction> {
        let state = self.state.read().unwrap();
        state
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))
    }

    async fn transaction_by_reference(&self, reference: &str) -> Result<Option<Transaction>> {
        let state = self.state.read().unwrap();
        Ok(state
            .references
            .get(reference)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn update_transaction(&self, transaction: Transaction) -> Result<Transaction> {
        let mut state = self.state.write().unwrap();
        if !state.transactions.contains_key(&transaction.id) {
            return Err(LedgerError::NotFound(format!(
                "transaction {}",
                transaction.id
            )));
        }
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn completed_debit_total(
        &self,
        wallet_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Decimal> {
        let state = self.state.read().unwrap();
        let total = state
            .transactions
            .values()
            .filter(|tx| {
                tx.from_wallet_id == Some(wallet_id)
                    && tx.status == TransactionStatus::Completed
                    && tx.created_at >= since
            })
            .map(|tx| tx.debit_total())
            .sum();
        Ok(total)
    }

    async fn activity_snapshot(&self, user_id: Uuid) -> Result<ActivitySnapshot> {
        let state = self.state.read().unwrap();
        let wallet_ids: Vec<Uuid> = state
            .wallets
            .values()
            .filter(|w| !w.is_platform && w.owner_id == user_id)
            .map(|w| w.id)
            .collect();
        let oldest_wallet_created_at = state
            .wallets
            .values()
            .filter(|w| !w.is_platform && w.owner_id == user_id)
            .map(|w| w.created_at)
            .min();

        let initiated_by_user = |tx: &Transaction| match tx.transaction_type {
            TransactionType::Deposit => tx
                .to_wallet_id
                .map(|id| wallet_ids.contains(&id))
                .unwrap_or(false),
            _ => tx
                .from_wallet_id
                .map(|id| wallet_ids.contains(&id))
                .unwrap_or(false),
        };

        let window_start = Utc::now() - Duration::hours(24);
        let mut tx_count_24h = 0u32;
        let mut completed_total = Decimal::ZERO;
        let mut completed_count = 0u32;
        for tx in state.transactions.values() {
            if !initiated_by_user(tx) {
                continue;
            }
            if tx.created_at >= window_start {
                tx_count_24h += 1;
            }
            if tx.status == TransactionStatus::Completed {
                completed_total += tx.amount;
                completed_count += 1;
            }
        }

        let average_completed_amount = if completed_count > 0 {
            Some(completed_total / Decimal::from(completed_count))
        } else {
            None
        };

        Ok(ActivitySnapshot {
            tx_count_24h,
            average_completed_amount,
            oldest_wallet_created_at,
        })
    }

    async fn entries_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn insert_fraud_report(&self, report: FraudReport) -> Result<FraudReport> {
        let mut state = self.state.write().unwrap();
        state
            .reports_by_transaction
            .insert(report.transaction_id, report.id);
        state.fraud_reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn fraud_report_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<FraudReport>> {
        let state = self.state.read().unwrap();
        Ok(state
            .reports_by_transaction
            .get(&transaction_id)
            .and_then(|id| state.fraud_reports.get(id))
            .cloned())
    }

    async fn update_fraud_report(&self, report: FraudReport) -> Result<FraudReport> {
        let mut state = self.state.write().unwrap();
        if !state.fraud_reports.contains_key(&report.id) {
            return Err(LedgerError::NotFound(format!("fraud report {}", report.id)));
        }
        state.fraud_reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn commit(&self, batch: SettlementBatch) -> Result<SettlementOutcome> {
        let mut state = self.state.write().unwrap();

        if !state.transactions.contains_key(&batch.transaction.id) {
            return Err(LedgerError::NotFound(format!(
                "transaction {}",
                batch.transaction.id
            )));
        }
        if batch.entries.is_empty() {
            return Err(LedgerError::UnbalancedLedger {
                transaction_id: batch.transaction.id,
                detail: "settlement batch has no ledger entries".to_string(),
            });
        }

        // Validate every delta against current state before touching anything.
        let mut deltas_by_wallet: HashMap<Uuid, &WalletDelta> = HashMap::new();
        for delta in &batch.deltas {
            if deltas_by_wallet.insert(delta.wallet_id, delta).is_some() {
                return Err(LedgerError::UnbalancedLedger {
                    transaction_id: batch.transaction.id,
                    detail: format!("duplicate delta for wallet {}", delta.wallet_id),
                });
            }
        }
        for delta in &batch.deltas {
            let wallet = Self::wallet_or_not_found(&state, delta.wallet_id)?;
            Self::check_delta(wallet, delta)?;
        }

        // Entries must pair with the deltas: every entry's wallet carries a
        // delta, currencies match, and per-wallet entry sums equal the
        // wallet's balance delta.
        let mut entry_sums: HashMap<Uuid, Decimal> = HashMap::new();
        for entry in &batch.entries {
            let delta = deltas_by_wallet.get(&entry.wallet_id).ok_or_else(|| {
                LedgerError::UnbalancedLedger {
                    transaction_id: batch.transaction.id,
                    detail: format!("entry for wallet {} without a delta", entry.wallet_id),
                }
            })?;
            let wallet = Self::wallet_or_not_found(&state, delta.wallet_id)?;
            if wallet.currency != entry.currency {
                return Err(LedgerError::UnbalancedLedger {
                    transaction_id: batch.transaction.id,
                    detail: format!(
                        "entry currency {} does not match wallet {} ({})",
                        entry.currency, wallet.id, wallet.currency
                    ),
                });
            }
            if entry.amount.is_zero() {
                return Err(LedgerError::UnbalancedLedger {
                    transaction_id: batch.transaction.id,
                    detail: format!("zero-amount entry for wallet {}", entry.wallet_id),
                });
            }
            *entry_sums.entry(entry.wallet_id).or_insert(Decimal::ZERO) += entry.amount;
        }
        for delta in &batch.deltas {
            let entry_sum = entry_sums
                .get(&delta.wallet_id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            if entry_sum != delta.balance_delta {
                return Err(LedgerError::UnbalancedLedger {
                    transaction_id: batch.transaction.id,
                    detail: format!(
                        "entries for wallet {} sum to {} but balance delta is {}",
                        delta.wallet_id, entry_sum, delta.balance_delta
                    ),
                });
            }
        }

        // All checks passed; apply. Capture pre-commit balances so each
        // entry's balance_after reflects the running application order.
        let now = Utc::now();
        let mut running: HashMap<Uuid, Decimal> = HashMap::new();
        for delta in &batch.deltas {
            let wallet = state
                .wallets
                .get_mut(&delta.wallet_id)
                .expect("validated above");
            running.insert(wallet.id, wallet.balance);
            wallet.balance += delta.balance_delta;
            wallet.available_balance += delta.available_delta;
            wallet.version += 1;
            wallet.updated_at = now;
        }

        let mut recorded = Vec::with_capacity(batch.entries.len());
        for entry in &batch.entries {
            let balance = running
                .get_mut(&entry.wallet_id)
                .expect("entry wallet has a delta");
            *balance += entry.amount;
            state.sequence += 1;
            let row = LedgerEntry {
                id: Uuid::new_v4(),
                transaction_id: batch.transaction.id,
                wallet_id: entry.wallet_id,
                amount: entry.amount,
                currency: entry.currency.clone(),
                balance_after: *balance,
                description: entry.description.clone(),
                sequence: state.sequence,
                created_at: now,
            };
            state.entries.push(row.clone());
            recorded.push(row);
        }

        let mut transaction = batch.transaction;
        transaction.updated_at = now;
        state
            .transactions
            .insert(transaction.id, transaction.clone());

        Ok(SettlementOutcome {
            transaction,
            entries: recorded,
        })
    }
}
