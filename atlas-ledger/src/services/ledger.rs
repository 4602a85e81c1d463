//! Ledger engine
//!
//! Validates that a transaction's entry legs conserve money before they are
//! appended inside the settlement commit, and answers entry queries for
//! auditing. Entries themselves are append-only; no update or delete exists.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency::CurrencyRegistry;
use crate::error::{LedgerError, Result};
use crate::models::{EntryDraft, LedgerEntry, Transaction, TransactionType};
use crate::store::SettlementStore;

/// Whether legs apply a transaction forward or compensate a completed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegDirection {
    Forward,
    Reversal,
}

/// Result of replaying a wallet's entries against its persisted balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletReconciliation {
    pub wallet_id: Uuid,
    pub expected_balance: Decimal,
    pub actual_balance: Decimal,
    pub entry_count: usize,
    pub balanced: bool,
}

pub struct LedgerService {
    store: Arc<dyn SettlementStore>,
    registry: Arc<CurrencyRegistry>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn SettlementStore>, registry: Arc<CurrencyRegistry>) -> Self {
        Self { store, registry }
    }

    /// Check that entry legs conserve money for this transaction.
    ///
    /// Per currency, signed amounts are netted; the per-currency nets are
    /// normalized into the transaction currency through the pinned rate and
    /// compared against the expected external flow: +amount for a deposit,
    /// -amount for a withdrawal, zero for every internal movement (fee legs
    /// against the platform wallet keep internal currencies at zero).
    /// A violation is a programming-error-class failure that aborts the
    /// enclosing unit of work.
    pub fn validate_legs(
        &self,
        transaction: &Transaction,
        legs: &[EntryDraft],
        direction: LegDirection,
    ) -> Result<()> {
        let unbalanced = |detail: String| LedgerError::UnbalancedLedger {
            transaction_id: transaction.id,
            detail,
        };

        if legs.is_empty() {
            return Err(unbalanced("transaction has no entry legs".to_string()));
        }

        let mut nets: HashMap<&str, Decimal> = HashMap::new();
        for leg in legs {
            if leg.amount.is_zero() {
                return Err(unbalanced(format!(
                    "zero-amount leg for wallet {}",
                    leg.wallet_id
                )));
            }
            *nets.entry(leg.currency.as_str()).or_insert(Decimal::ZERO) += leg.amount;
        }

        // Normalize every currency's net into the transaction currency.
        let mut total = Decimal::ZERO;
        for (currency, net) in &nets {
            if *currency == transaction.currency {
                total += *net;
            } else if Some(*currency) == transaction.target_currency.as_deref() {
                let rate = transaction.exchange_rate.ok_or_else(|| {
                    unbalanced(format!(
                        "leg in {} without a pinned exchange rate",
                        currency
                    ))
                })?;
                if rate <= Decimal::ZERO {
                    return Err(unbalanced(format!("non-positive pinned rate {}", rate)));
                }
                total += *net / rate;
            } else {
                return Err(unbalanced(format!(
                    "leg in unexpected currency {}",
                    currency
                )));
            }
        }

        let expected = match transaction.transaction_type {
            TransactionType::Deposit => transaction.amount,
            TransactionType::Withdrawal => -transaction.amount,
            _ => Decimal::ZERO,
        };
        let expected = match direction {
            LegDirection::Forward => expected,
            LegDirection::Reversal => -expected,
        };

        let tolerance = self
            .registry
            .minor_unit(&transaction.currency)
            .unwrap_or(Decimal::ZERO);
        if (total - expected).abs() > tolerance {
            return Err(unbalanced(format!(
                "normalized net {} differs from expected {} beyond tolerance {}",
                total, expected, tolerance
            )));
        }

        Ok(())
    }

    pub async fn entries_for_wallet(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_wallet(wallet_id).await
    }

    pub async fn entries_for_transaction(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_transaction(transaction_id).await
    }

    /// Replay a wallet's entries and compare against its persisted balance.
    pub async fn reconcile_wallet(&self, wallet_id: Uuid) -> Result<WalletReconciliation> {
        let wallet = self.store.wallet(wallet_id).await?;
        let entries = self.store.entries_for_wallet(wallet_id).await?;

        let mut running = Decimal::ZERO;
        let mut consistent = true;
        for entry in &entries {
            running += entry.amount;
            if entry.balance_after != running {
                consistent = false;
            }
        }

        Ok(WalletReconciliation {
            wallet_id,
            expected_balance: running,
            actual_balance: wallet.balance,
            entry_count: entries.len(),
            balanced: consistent && running == wallet.balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::str::FromStr;

    fn ledger() -> LedgerService {
        let registry = Arc::new(CurrencyRegistry::new());
        LedgerService::new(Arc::new(InMemoryStore::new(&registry)), registry)
    }

    fn transfer_tx(amount: Decimal, fee: Decimal) -> Transaction {
        let mut tx = Transaction::new(
            TransactionType::Transfer,
            amount,
            "USD".to_string(),
            Uuid::new_v4().to_string(),
            Some(Uuid::new_v4()),
            Some(Uuid::new_v4()),
            None,
        );
        tx.fee = fee;
        tx
    }

    #[test]
    fn balanced_internal_legs_pass() {
        let ledger = ledger();
        let tx = transfer_tx(Decimal::from(100), Decimal::from(2));
        let fee_wallet = Uuid::new_v4();
        let legs = vec![
            EntryDraft::new(tx.from_wallet_id.unwrap(), Decimal::from(-102), "USD", "out"),
            EntryDraft::new(fee_wallet, Decimal::from(2), "USD", "fee"),
            EntryDraft::new(tx.to_wallet_id.unwrap(), Decimal::from(100), "USD", "in"),
        ];
        ledger.validate_legs(&tx, &legs, LegDirection::Forward).unwrap();
    }

    #[test]
    fn missing_fee_leg_is_unbalanced() {
        let ledger = ledger();
        let tx = transfer_tx(Decimal::from(100), Decimal::from(2));
        let legs = vec![
            EntryDraft::new(tx.from_wallet_id.unwrap(), Decimal::from(-102), "USD", "out"),
            EntryDraft::new(tx.to_wallet_id.unwrap(), Decimal::from(100), "USD", "in"),
        ];
        let err = ledger
            .validate_legs(&tx, &legs, LegDirection::Forward)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedLedger { .. }));
    }

    #[test]
    fn deposit_expects_an_external_inflow() {
        let ledger = ledger();
        let tx = Transaction::new(
            TransactionType::Deposit,
            Decimal::from(500),
            "USD".to_string(),
            Uuid::new_v4().to_string(),
            None,
            Some(Uuid::new_v4()),
            None,
        );
        let legs = vec![EntryDraft::new(
            tx.to_wallet_id.unwrap(),
            Decimal::from(500),
            "USD",
            "Deposit",
        )];
        ledger.validate_legs(&tx, &legs, LegDirection::Forward).unwrap();
    }

    #[test]
    fn cross_currency_legs_normalize_through_the_pinned_rate() {
        let ledger = ledger();
        let mut tx = transfer_tx(Decimal::from(100), Decimal::ZERO);
        tx.pin_conversion(
            "EUR".to_string(),
            Decimal::from_str("0.92").unwrap(),
            Decimal::from_str("92.00").unwrap(),
        );
        let legs = vec![
            EntryDraft::new(tx.from_wallet_id.unwrap(), Decimal::from(-100), "USD", "out"),
            EntryDraft::new(
                tx.to_wallet_id.unwrap(),
                Decimal::from_str("92.00").unwrap(),
                "EUR",
                "in",
            ),
        ];
        ledger.validate_legs(&tx, &legs, LegDirection::Forward).unwrap();
    }

    #[test]
    fn cross_currency_leg_without_pinned_rate_is_rejected() {
        let ledger = ledger();
        let tx = transfer_tx(Decimal::from(100), Decimal::ZERO);
        let legs = vec![
            EntryDraft::new(tx.from_wallet_id.unwrap(), Decimal::from(-100), "USD", "out"),
            EntryDraft::new(tx.to_wallet_id.unwrap(), Decimal::from(92), "EUR", "in"),
        ];
        let err = ledger
            .validate_legs(&tx, &legs, LegDirection::Forward)
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnbalancedLedger { .. }));
    }

    #[test]
    fn reversal_inverts_the_expected_flow() {
        let ledger = ledger();
        let tx = {
            let mut tx = Transaction::new(
                TransactionType::Withdrawal,
                Decimal::from(50),
                "USD".to_string(),
                Uuid::new_v4().to_string(),
                Some(Uuid::new_v4()),
                None,
                None,
            );
            tx.fee = Decimal::ONE;
            tx
        };
        // Fee is not returned on reversal.
        let legs = vec![EntryDraft::new(
            tx.from_wallet_id.unwrap(),
            Decimal::from(50),
            "USD",
            "Reversal",
        )];
        ledger.validate_legs(&tx, &legs, LegDirection::Reversal).unwrap();
    }
}
