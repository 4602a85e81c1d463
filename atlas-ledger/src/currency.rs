//! Supported currencies and minor-unit rounding

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Currency classes handled by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrencyKind {
    Fiat,
    Crypto,
}

impl std::fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CurrencyKind::Fiat => write!(f, "fiat"),
            CurrencyKind::Crypto => write!(f, "crypto"),
        }
    }
}

/// Descriptor for one supported currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub name: String,
    pub kind: CurrencyKind,
    /// Minor-unit precision used when rounding settled amounts.
    pub decimals: u32,
}

/// Registry of the currencies the platform can hold and convert.
///
/// Fiat currencies settle at two decimal places; crypto currencies carry
/// their own precision (8 for BTC). The registry backs both the
/// `UnsupportedCurrencyPair` checks and minor-unit rounding.
#[derive(Debug, Clone)]
pub struct CurrencyRegistry {
    currencies: HashMap<String, CurrencyInfo>,
}

impl CurrencyRegistry {
    /// Registry with the platform's default currency set.
    pub fn new() -> Self {
        let mut currencies = HashMap::new();

        let fiat = vec![
            ("USD", "US Dollar"),
            ("EUR", "Euro"),
            ("GBP", "British Pound"),
            ("JPY", "Japanese Yen"),
            ("CAD", "Canadian Dollar"),
            ("AUD", "Australian Dollar"),
        ];
        for (code, name) in fiat {
            currencies.insert(
                code.to_string(),
                CurrencyInfo {
                    code: code.to_string(),
                    name: name.to_string(),
                    kind: CurrencyKind::Fiat,
                    decimals: if code == "JPY" { 0 } else { 2 },
                },
            );
        }

        let crypto = vec![
            ("BTC", "Bitcoin", 8),
            ("ETH", "Ethereum", 8),
            ("SOL", "Solana", 8),
            ("USDT", "Tether", 6),
            ("USDC", "USD Coin", 6),
        ];
        for (code, name, decimals) in crypto {
            currencies.insert(
                code.to_string(),
                CurrencyInfo {
                    code: code.to_string(),
                    name: name.to_string(),
                    kind: CurrencyKind::Crypto,
                    decimals,
                },
            );
        }

        Self { currencies }
    }

    pub fn get(&self, code: &str) -> Option<&CurrencyInfo> {
        self.currencies.get(code)
    }

    pub fn supports(&self, code: &str) -> bool {
        self.currencies.contains_key(code)
    }

    pub fn is_crypto(&self, code: &str) -> bool {
        self.currencies
            .get(code)
            .map(|c| c.kind == CurrencyKind::Crypto)
            .unwrap_or(false)
    }

    pub fn decimals(&self, code: &str) -> Option<u32> {
        self.currencies.get(code).map(|c| c.decimals)
    }

    /// All supported currency codes, sorted for deterministic iteration.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.currencies.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Round an amount to the currency's minor unit using banker's rounding.
    pub fn round(&self, code: &str, amount: Decimal) -> Option<Decimal> {
        self.decimals(code)
            .map(|dp| amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven))
    }

    /// The smallest representable increment for a currency (e.g. 0.01 for USD).
    pub fn minor_unit(&self, code: &str) -> Option<Decimal> {
        self.decimals(code).map(|dp| Decimal::new(1, dp))
    }
}

impl Default for CurrencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a decimal amount from its canonical string form.
pub fn parse_amount(value: &str) -> Option<Decimal> {
    Decimal::from_str(value).ok()
}
