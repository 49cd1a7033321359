use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use common::{MarketPriceSource, PriceQuote};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// MetaApi REST credentials and endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MetaApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            account_id: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl MetaApiConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.account_id.is_empty()
    }
}

fn default_base_url() -> String {
    "https://mt-client-api-v1.london.agiliumtrade.ai".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Current-price payload returned by MetaApi
#[derive(Debug, Deserialize)]
struct CurrentPrice {
    symbol: String,
    bid: Decimal,
    ask: Decimal,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(rename = "brokerTime", default)]
    broker_time: Option<String>,
}

impl CurrentPrice {
    fn into_quote(self) -> PriceQuote {
        PriceQuote {
            symbol: self.symbol,
            bid: self.bid,
            ask: self.ask,
            time: self.time.unwrap_or_else(Utc::now),
        }
    }
}

/// MetaApi market price connector
pub struct MetaApiClient {
    client: Client,
    config: MetaApiConfig,
}

impl MetaApiClient {
    pub fn new(config: MetaApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build MetaApi HTTP client")?;

        if !config.is_configured() {
            warn!("MetaApi token or account id missing, live prices unavailable");
        }

        Ok(Self { client, config })
    }

    fn price_url(&self, symbol: &str) -> String {
        format!(
            "{}/users/current/accounts/{}/symbols/{}/current-price",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_id,
            symbol
        )
    }

    pub async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote> {
        if !self.config.is_configured() {
            return Err(anyhow!("MetaApi credentials not configured"));
        }

        let response = self
            .client
            .get(self.price_url(symbol))
            .header("auth-token", &self.config.token)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("MetaApi request for {} failed", symbol))?;

        if !response.status().is_success() {
            return Err(anyhow!("MetaApi API error for {}: {}", symbol, response.status()));
        }

        let price: CurrentPrice = response
            .json()
            .await
            .with_context(|| format!("Invalid MetaApi price payload for {}", symbol))?;

        debug!(
            "{} bid={} ask={} broker_time={:?}",
            price.symbol, price.bid, price.ask, price.broker_time
        );
        Ok(price.into_quote())
    }
}

#[async_trait::async_trait]
impl MarketPriceSource for MetaApiClient {
    async fn current_price(&self, symbol: &str) -> Option<PriceQuote> {
        match self.fetch_price(symbol).await {
            Ok(quote) => Some(quote),
            Err(e) => {
                warn!("Price unavailable for {}: {:#}", symbol, e);
                None
            }
        }
    }
}
