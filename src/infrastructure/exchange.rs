use crate::domain::money::Currency;
use crate::domain::ports::ExchangeRates;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_RATE_URL: &str = "https://open.er-api.com/v6/latest";

#[derive(Debug, Deserialize)]
struct LatestRates {
    result: String,
    #[serde(default)]
    rates: HashMap<String, Decimal>,
}

/// Live rates from an `open.er-api.com` compatible endpoint
/// (`GET {base}/{FROM}` returning `{"result":"success","rates":{...}}`).
///
/// Every lookup goes to the network; a failed lookup is a `ProviderError`
/// so payment initiation fails closed.
pub struct HttpExchangeRates {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExchangeRates {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CommerceError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl ExchangeRates for HttpExchangeRates {
    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), from.code());
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CommerceError::provider(format!(
                "exchange rate lookup answered {}",
                response.status()
            )));
        }
        let latest: LatestRates = response
            .json()
            .await
            .map_err(|e| CommerceError::provider(format!("malformed exchange rates: {}", e)))?;
        if latest.result != "success" {
            return Err(CommerceError::provider(format!(
                "exchange rate lookup for {} returned {}",
                from, latest.result
            )));
        }
        let rate = latest
            .rates
            .get(to.code())
            .copied()
            .ok_or_else(|| CommerceError::provider(format!("no {} to {} rate", from, to)))?;
        if rate <= Decimal::ZERO {
            return Err(CommerceError::provider(format!(
                "non-positive {} to {} rate",
                from, to
            )));
        }
        tracing::debug!(from = from.code(), to = to.code(), %rate, "Exchange rate resolved");
        Ok(rate)
    }
}

/// A fixed rate table, for offline runs and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticRates {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: &Currency, to: &Currency, rate: Decimal) -> Self {
        self.rates
            .insert((from.code().to_string(), to.code().to_string()), rate);
        self
    }
}

#[async_trait]
impl ExchangeRates for StaticRates {
    async fn rate(&self, from: &Currency, to: &Currency) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        self.rates
            .get(&(from.code().to_string(), to.code().to_string()))
            .copied()
            .ok_or_else(|| CommerceError::provider(format!("no {} to {} rate", from, to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_static_rates() {
        let kes = Currency::new("KES").unwrap();
        let usd = Currency::usd();
        let rates = StaticRates::new().with_rate(&kes, &usd, dec!(0.0077));

        assert_eq!(rates.rate(&kes, &usd).await.unwrap(), dec!(0.0077));
        assert_eq!(rates.rate(&usd, &usd).await.unwrap(), Decimal::ONE);
        assert!(matches!(
            rates.rate(&usd, &kes).await,
            Err(CommerceError::ProviderError(_))
        ));
    }

    #[test]
    fn test_rate_payload_parses() {
        let latest: LatestRates =
            serde_json::from_str(r#"{"result":"success","base_code":"KES","rates":{"USD":0.0077,"EUR":0.0071}}"#)
                .unwrap();
        assert_eq!(latest.rates["USD"], dec!(0.0077));
    }
}
