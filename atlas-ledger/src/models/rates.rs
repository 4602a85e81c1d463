//! Exchange rate snapshots

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a rate snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSource {
    Live,
    Cached,
    Default,
}

impl std::fmt::Display for RateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateSource::Live => write!(f, "live"),
            RateSource::Cached => write!(f, "cached"),
            RateSource::Default => write!(f, "default"),
        }
    }
}

/// A point-in-time table of rates relative to a fixed base currency.
///
/// Ephemeral: lives in the conversion service's cache and is never persisted.
/// Any transaction that settles with a converted amount pins the rate it used
/// onto itself instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRateSnapshot {
    pub base: String,
    /// Units of each currency per one unit of `base`.
    pub rates: HashMap<String, Decimal>,
    pub fetched_at: DateTime<Utc>,
    pub source: RateSource,
}

impl ExchangeRateSnapshot {
    pub fn new(base: &str, rates: HashMap<String, Decimal>, source: RateSource) -> Self {
        Self {
            base: base.to_string(),
            rates,
            fetched_at: Utc::now(),
            source,
        }
    }

    pub fn rate_for(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.fetched_at
    }

    /// The same table re-labelled as served from cache.
    pub fn as_cached(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.source = RateSource::Cached;
        snapshot
    }
}
