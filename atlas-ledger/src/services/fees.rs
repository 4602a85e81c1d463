//! Transaction fee policy

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::currency::CurrencyRegistry;
use crate::error::{LedgerError, Result};
use crate::models::TransactionType;

/// Fee schedule. Percentages are fractions (0.01 = 1%); flat fees are in the
/// transaction currency.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    /// Percentage charged on crypto buy/sell principal.
    pub crypto_trade_percent: Decimal,
    /// Percentage charged on point-of-sale payments.
    pub pos_payment_percent: Decimal,
    /// Flat rail fee for fiat withdrawals.
    pub fiat_withdrawal_flat: Decimal,
    /// Flat network fee per crypto currency for withdrawals.
    pub crypto_network_fees: HashMap<String, Decimal>,
    /// Fallback network fee for crypto currencies missing from the table.
    pub crypto_network_fee_default: Decimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        let mut crypto_network_fees = HashMap::new();
        crypto_network_fees.insert("BTC".to_string(), Decimal::from_str("0.0005").unwrap());
        crypto_network_fees.insert("ETH".to_string(), Decimal::from_str("0.003").unwrap());
        crypto_network_fees.insert("SOL".to_string(), Decimal::from_str("0.01").unwrap());
        crypto_network_fees.insert("USDT".to_string(), Decimal::from_str("1.0").unwrap());
        crypto_network_fees.insert("USDC".to_string(), Decimal::from_str("1.0").unwrap());

        Self {
            crypto_trade_percent: Decimal::from_str("0.01").unwrap(),
            pos_payment_percent: Decimal::from_str("0.015").unwrap(),
            fiat_withdrawal_flat: Decimal::ONE,
            crypto_network_fees,
            crypto_network_fee_default: Decimal::from_str("0.001").unwrap(),
        }
    }
}

impl FeePolicy {
    /// Policy with every fee zeroed; useful for tests.
    pub fn free() -> Self {
        Self {
            crypto_trade_percent: Decimal::ZERO,
            pos_payment_percent: Decimal::ZERO,
            fiat_withdrawal_flat: Decimal::ZERO,
            crypto_network_fees: HashMap::new(),
            crypto_network_fee_default: Decimal::ZERO,
        }
    }
}

/// Pure fee computation over the policy table.
///
/// Fees are computed before the debit check so the debited amount
/// (principal + fee) is known upfront, and are never negative.
pub struct FeeCalculator {
    policy: FeePolicy,
    registry: Arc<CurrencyRegistry>,
}

impl FeeCalculator {
    pub fn new(policy: FeePolicy, registry: Arc<CurrencyRegistry>) -> Self {
        Self { policy, registry }
    }

    pub fn fee(
        &self,
        transaction_type: TransactionType,
        currency: &str,
        amount: Decimal,
    ) -> Result<Decimal> {
        let info = self
            .registry
            .get(currency)
            .ok_or_else(|| LedgerError::Validation(format!("unsupported currency: {}", currency)))?;

        let fee = match transaction_type {
            TransactionType::Deposit | TransactionType::Transfer => Decimal::ZERO,
            TransactionType::Withdrawal => {
                if self.registry.is_crypto(currency) {
                    self.policy
                        .crypto_network_fees
                        .get(currency)
                        .copied()
                        .unwrap_or(self.policy.crypto_network_fee_default)
                } else {
                    self.policy.fiat_withdrawal_flat
                }
            }
            TransactionType::PosPayment => amount * self.policy.pos_payment_percent,
            TransactionType::CryptoBuy | TransactionType::CryptoSell => {
                amount * self.policy.crypto_trade_percent
            }
        };

        let rounded = fee.round_dp_with_strategy(
            info.decimals,
            rust_decimal::RoundingStrategy::MidpointNearestEven,
        );
        Ok(rounded.max(Decimal::ZERO))
    }
}
