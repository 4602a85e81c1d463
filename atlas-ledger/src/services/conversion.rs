//! Currency conversion service
//!
//! Rates come from a pluggable provider, are cached on a TTL, and degrade
//! gracefully: live fetch -> last good cache -> hardcoded default table.
//! Conversion always produces a deterministic answer; availability wins over
//! freshness.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Duration;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::currency::CurrencyRegistry;
use crate::error::{LedgerError, Result};
use crate::models::{ExchangeRateSnapshot, RateSource};

/// External rate source trait
#[async_trait::async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetch units-per-base rates for every currency the provider knows.
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, Decimal>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Response shape of the external rates API
#[derive(Debug, Deserialize)]
struct RateApiResponse {
    #[allow(dead_code)]
    base: String,
    rates: HashMap<String, f64>,
}

/// HTTP rate provider for an exchangerate-style API
pub struct HttpRateProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpRateProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, Decimal>> {
        let url = format!("{}/latest?base={}", self.base_url, base);

        let mut request = self.client.get(&url);
        if let Some(ref api_key) = self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LedgerError::ExternalService(format!("rate fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(LedgerError::ExternalService(format!(
                "rate source returned status {}",
                response.status()
            )));
        }

        let data: RateApiResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::ExternalService(format!("rate parse failed: {}", e)))?;

        let mut rates = HashMap::new();
        for (code, value) in data.rates {
            if let Ok(rate) = Decimal::try_from(value) {
                if rate > Decimal::ZERO {
                    rates.insert(code, rate);
                }
            }
        }
        Ok(rates)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Fixed-table provider for tests and offline development
pub struct StaticRateProvider {
    rates: HashMap<String, Decimal>,
}

impl StaticRateProvider {
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        Self { rates }
    }
}

impl Default for StaticRateProvider {
    fn default() -> Self {
        Self::new(default_rate_table())
    }
}

#[async_trait::async_trait]
impl RateProvider for StaticRateProvider {
    async fn fetch_rates(&self, _base: &str) -> Result<HashMap<String, Decimal>> {
        Ok(self.rates.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Hardcoded last-resort table, USD-based.
fn default_rate_table() -> HashMap<String, Decimal> {
    let table = vec![
        ("USD", "1.0"),
        ("EUR", "0.92"),
        ("GBP", "0.79"),
        ("JPY", "155.0"),
        ("CAD", "1.36"),
        ("AUD", "1.52"),
        ("BTC", "0.0000154"),
        ("ETH", "0.000317"),
        ("SOL", "0.0063"),
        ("USDT", "1.0"),
        ("USDC", "1.0"),
    ];
    table
        .into_iter()
        .map(|(code, rate)| (code.to_string(), Decimal::from_str(rate).unwrap()))
        .collect()
}

/// Conversion service configuration
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub base_currency: String,
    pub cache_ttl_seconds: i64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            cache_ttl_seconds: 300,
        }
    }
}

/// Result of one conversion. The rate is target units per source unit and is
/// what gets pinned onto a settling transaction.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub converted_amount: Decimal,
    pub rate: Decimal,
}

/// Rate cache and rounding-correct conversion between supported currencies.
pub struct ConversionService {
    provider: Arc<dyn RateProvider>,
    registry: Arc<CurrencyRegistry>,
    config: ConversionConfig,
    cache: RwLock<Option<ExchangeRateSnapshot>>,
}

impl ConversionService {
    pub fn new(
        provider: Arc<dyn RateProvider>,
        registry: Arc<CurrencyRegistry>,
        config: ConversionConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
            cache: RwLock::new(None),
        }
    }

    /// Current rate table relative to the base currency. Never fails: a dead
    /// provider degrades to the last good cache, then to the default table.
    pub async fn rates(&self) -> ExchangeRateSnapshot {
        {
            let cache = self.cache.read().await;
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.age() < Duration::seconds(self.config.cache_ttl_seconds) {
                    return snapshot.as_cached();
                }
            }
        }

        match self.provider.fetch_rates(&self.config.base_currency).await {
            Ok(rates) if !rates.is_empty() => {
                let snapshot =
                    ExchangeRateSnapshot::new(&self.config.base_currency, rates, RateSource::Live);
                let mut cache = self.cache.write().await;
                *cache = Some(snapshot.clone());
                snapshot
            }
            Ok(_) | Err(_) => {
                let cache = self.cache.read().await;
                if let Some(snapshot) = cache.as_ref() {
                    warn!(
                        provider = self.provider.name(),
                        "rate source unavailable, serving stale cache"
                    );
                    snapshot.as_cached()
                } else {
                    warn!(
                        provider = self.provider.name(),
                        "rate source unavailable with empty cache, serving default table"
                    );
                    ExchangeRateSnapshot::new(
                        &self.config.base_currency,
                        default_rate_table(),
                        RateSource::Default,
                    )
                }
            }
        }
    }

    /// Convert an amount between currencies via the base unit, rounding the
    /// result half-even to the target currency's minor-unit precision.
    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Conversion> {
        let unsupported = || LedgerError::UnsupportedCurrencyPair {
            from: from.to_string(),
            to: to.to_string(),
        };
        let to_info = self.registry.get(to).ok_or_else(unsupported)?;
        if !self.registry.supports(from) {
            return Err(unsupported());
        }

        if from == to {
            let rounded = amount
                .round_dp_with_strategy(to_info.decimals, RoundingStrategy::MidpointNearestEven);
            return Ok(Conversion {
                converted_amount: rounded,
                rate: Decimal::ONE,
            });
        }

        let snapshot = self.rates().await;
        let from_rate = snapshot.rate_for(from).ok_or_else(unsupported)?;
        let to_rate = snapshot.rate_for(to).ok_or_else(unsupported)?;
        if from_rate <= Decimal::ZERO || to_rate <= Decimal::ZERO {
            return Err(unsupported());
        }

        let rate = to_rate / from_rate;
        let converted = (amount * to_rate / from_rate)
            .round_dp_with_strategy(to_info.decimals, RoundingStrategy::MidpointNearestEven);

        Ok(Conversion {
            converted_amount: converted,
            rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn service_with(provider: Arc<dyn RateProvider>) -> ConversionService {
        ConversionService::new(
            provider,
            Arc::new(CurrencyRegistry::new()),
            ConversionConfig::default(),
        )
    }

    /// Provider that can be switched off after the first fetch.
    struct FlakyProvider {
        down: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RateProvider for FlakyProvider {
        async fn fetch_rates(&self, _base: &str) -> Result<HashMap<String, Decimal>> {
            if self.down.load(Ordering::SeqCst) {
                Err(LedgerError::ExternalService("down".to_string()))
            } else {
                Ok(default_rate_table())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    /// Provider that always fails.
    struct DeadProvider;

    #[async_trait::async_trait]
    impl RateProvider for DeadProvider {
        async fn fetch_rates(&self, _base: &str) -> Result<HashMap<String, Decimal>> {
            Err(LedgerError::ExternalService("unreachable".to_string()))
        }

        fn name(&self) -> &str {
            "dead"
        }
    }

    #[tokio::test]
    async fn converts_usd_to_eur_at_the_published_rate() {
        let service = service_with(Arc::new(StaticRateProvider::default()));
        let result = service
            .convert(Decimal::from(100), "USD", "EUR")
            .await
            .unwrap();
        assert_eq!(result.converted_amount, Decimal::from_str("92.00").unwrap());
        assert_eq!(result.rate, Decimal::from_str("0.92").unwrap());
    }

    #[tokio::test]
    async fn round_trip_stays_within_one_minor_unit() {
        let service = service_with(Arc::new(StaticRateProvider::default()));
        let forward = service
            .convert(Decimal::from(100), "USD", "EUR")
            .await
            .unwrap();
        let back = service
            .convert(forward.converted_amount, "EUR", "USD")
            .await
            .unwrap();
        let drift = (back.converted_amount - Decimal::from(100)).abs();
        assert!(drift <= Decimal::from_str("0.01").unwrap(), "drift {}", drift);
    }

    #[tokio::test]
    async fn same_currency_conversion_is_identity() {
        let service = service_with(Arc::new(StaticRateProvider::default()));
        let result = service
            .convert(Decimal::from_str("42.555").unwrap(), "USD", "USD")
            .await
            .unwrap();
        assert_eq!(result.rate, Decimal::ONE);
        // 42.555 rounds half-even to 42.56
        assert_eq!(result.converted_amount, Decimal::from_str("42.56").unwrap());
    }

    #[tokio::test]
    async fn unknown_pair_is_rejected() {
        let service = service_with(Arc::new(StaticRateProvider::default()));
        let err = service
            .convert(Decimal::from(10), "USD", "XYZ")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnsupportedCurrencyPair { .. }));
    }

    #[tokio::test]
    async fn dead_provider_falls_back_to_default_table() {
        let service = service_with(Arc::new(DeadProvider));
        let snapshot = service.rates().await;
        assert_eq!(snapshot.source, RateSource::Default);

        // Conversion still works deterministically.
        let result = service
            .convert(Decimal::from(100), "USD", "EUR")
            .await
            .unwrap();
        assert_eq!(result.converted_amount, Decimal::from_str("92.00").unwrap());
    }

    #[tokio::test]
    async fn provider_outage_serves_the_last_good_cache() {
        let provider = Arc::new(FlakyProvider {
            down: AtomicBool::new(false),
        });
        let service = ConversionService::new(
            provider.clone(),
            Arc::new(CurrencyRegistry::new()),
            ConversionConfig {
                base_currency: "USD".to_string(),
                cache_ttl_seconds: 0, // force refetch on every call
            },
        );

        let live = service.rates().await;
        assert_eq!(live.source, RateSource::Live);

        provider.down.store(true, Ordering::SeqCst);
        let stale = service.rates().await;
        assert_eq!(stale.source, RateSource::Cached);
        assert_eq!(stale.rates, live.rates);
    }
}
