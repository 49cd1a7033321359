// Market price port
// Live bid/ask lookups used by the monitoring loop

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Current quote for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: DateTime<Utc>,
}

impl PriceQuote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// Market data capability. Implementations never fail: a quote that cannot
/// be obtained is reported as `None`.
#[async_trait::async_trait]
pub trait MarketPriceSource: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Option<PriceQuote>;

    /// Fetch several symbols concurrently, at most `concurrency` in flight.
    /// Symbols without a quote are absent from the result.
    async fn current_prices(
        &self,
        symbols: &[String],
        concurrency: usize,
    ) -> HashMap<String, PriceQuote> {
        let fetches: Vec<_> = symbols
            .iter()
            .map(|symbol| async move { (symbol, self.current_price(symbol).await) })
            .collect();
        let fetched: Vec<(&String, Option<PriceQuote>)> = stream::iter(fetches)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut quotes = HashMap::new();
        for (symbol, quote) in fetched {
            if let Some(quote) = quote {
                quotes.insert(symbol.clone(), quote);
            }
        }
        quotes
    }
}

/// Price source backed by a fixed quote table
#[derive(Debug, Default)]
pub struct StaticPriceSource {
    quotes: RwLock<HashMap<String, PriceQuote>>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a quote where bid == ask == `price`
    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.quotes
            .get_mut()
            .insert(symbol.to_string(), Self::flat_quote(symbol, price));
        self
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.quotes
            .write()
            .await
            .insert(symbol.to_string(), Self::flat_quote(symbol, price));
    }

    pub async fn set_quote(&self, quote: PriceQuote) {
        self.quotes.write().await.insert(quote.symbol.clone(), quote);
    }

    pub async fn remove(&self, symbol: &str) {
        self.quotes.write().await.remove(symbol);
    }

    fn flat_quote(symbol: &str, price: Decimal) -> PriceQuote {
        PriceQuote {
            symbol: symbol.to_string(),
            bid: price,
            ask: price,
            time: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
impl MarketPriceSource for StaticPriceSource {
    async fn current_price(&self, symbol: &str) -> Option<PriceQuote> {
        self.quotes.read().await.get(symbol).cloned()
    }
}
