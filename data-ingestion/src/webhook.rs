// Webhook ingestion
// Parses inbound alert payloads, logs them, upserts the active record and
// runs it through the rule chain

use chrono::{DateTime, Utc};
use common::{ActiveTradingSignal, Clock, SignalAction, WebhookSignal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use signal_rules::{ActiveSignalProcessor, ProcessingResult, SignalStore};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// One configured webhook path. The path doubles as the signal type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRoute {
    pub path: String,
    /// Shared secret expected in the payload, if any
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no webhook configured for path {0:?}")]
    UnknownRoute(String),
    #[error("webhook {0:?} is disabled")]
    Disabled(String),
    #[error("invalid webhook secret")]
    InvalidSecret,
    #[error("malformed payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    secret: Option<String>,
    symbol: Option<String>,
    action: Option<String>,
    price: Option<Value>,
    swing: Option<Value>,
    message: Option<String>,
    timestamp: Option<String>,
}

fn parse_decimal(field: &'static str, value: &Value) -> Result<Decimal, IngestError> {
    let invalid = || IngestError::InvalidField {
        field,
        value: value.to_string(),
    };
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map_err(|_| invalid()),
        Value::String(s) => Decimal::from_str(s.trim()).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Parse a payload posted to `path`. Returns the signal and the secret it carried.
pub fn parse_payload(
    path: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<(WebhookSignal, Option<String>), IngestError> {
    let raw: RawPayload = serde_json::from_str(body)?;

    let symbol = raw
        .symbol
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(IngestError::MissingField("symbol"))?;

    let action_text = raw.action.ok_or(IngestError::MissingField("action"))?;
    let action = SignalAction::from_str(&action_text).map_err(|_| IngestError::InvalidField {
        field: "action",
        value: action_text.clone(),
    })?;

    let price = parse_decimal("price", raw.price.as_ref().ok_or(IngestError::MissingField("price"))?)?;

    let swing = match raw.swing.as_ref() {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_decimal("swing", value)?),
    };

    let timestamp = match raw.timestamp.as_deref() {
        Some(ts) => match DateTime::parse_from_rfc3339(ts.trim()) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(_) => {
                warn!("Unparseable webhook timestamp {:?}, using receive time", ts);
                now
            }
        },
        None => now,
    };

    let signal = WebhookSignal {
        symbol,
        signal_type: path.trim_matches('/').to_string(),
        action,
        price,
        timestamp,
        swing,
        message: raw.message,
    };
    Ok((signal, raw.secret))
}

/// Result of ingesting one webhook call
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub event_id: Uuid,
    pub signal: ActiveTradingSignal,
    pub processing: ProcessingResult,
}

/// Entry point for inbound webhook events
pub struct SignalIngestor {
    store: Arc<dyn SignalStore>,
    processor: Arc<ActiveSignalProcessor>,
    clock: Arc<dyn Clock>,
    /// Keyed by lower-cased path; empty accepts every path
    routes: HashMap<String, WebhookRoute>,
}

impl SignalIngestor {
    pub fn new(
        store: Arc<dyn SignalStore>,
        processor: Arc<ActiveSignalProcessor>,
        clock: Arc<dyn Clock>,
        routes: Vec<WebhookRoute>,
    ) -> Self {
        let routes = routes
            .into_iter()
            .map(|r| (r.path.trim_matches('/').to_lowercase(), r))
            .collect();
        Self {
            store,
            processor,
            clock,
            routes,
        }
    }

    fn authorize(&self, path: &str, secret: Option<&str>) -> Result<(), IngestError> {
        if self.routes.is_empty() {
            return Ok(());
        }
        let route = self
            .routes
            .get(&path.trim_matches('/').to_lowercase())
            .ok_or_else(|| IngestError::UnknownRoute(path.to_string()))?;
        if !route.enabled {
            return Err(IngestError::Disabled(route.path.clone()));
        }
        match route.secret.as_deref() {
            Some(expected) if Some(expected) != secret => Err(IngestError::InvalidSecret),
            _ => Ok(()),
        }
    }

    pub async fn ingest(&self, path: &str, body: &str) -> Result<IngestOutcome, IngestError> {
        let (webhook, secret) = parse_payload(path, body, self.clock.now())?;
        self.authorize(path, secret.as_deref())?;

        info!(
            "Webhook {} {} {} @ {}",
            webhook.signal_type, webhook.symbol, webhook.action, webhook.price
        );

        let event = webhook.to_history();
        self.store.record_event(&event).await?;

        let active = self.store.upsert(&webhook).await?;
        let processing = self.processor.process_signal(active.clone()).await;

        self.store.mark_event_processed(event.id).await?;

        Ok(IngestOutcome {
            event_id: event.id,
            signal: processing.signal.clone().unwrap_or(active),
            processing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{FixedClock, SignalStatus};
    use rust_decimal_macros::dec;
    use signal_rules::{InMemorySignalStore, ProcessorConfig, RulesConfig, SignalRuleEngine};

    fn ingestor(
        store: Arc<InMemorySignalStore>,
        clock: Arc<FixedClock>,
        routes: Vec<WebhookRoute>,
    ) -> SignalIngestor {
        let processor = Arc::new(ActiveSignalProcessor::new(
            store.clone(),
            Arc::new(SignalRuleEngine::standard(&RulesConfig::default())),
            clock.clone(),
            ProcessorConfig::default(),
        ));
        SignalIngestor::new(store, processor, clock, routes)
    }

    #[test]
    fn test_parse_price_variants() {
        let now = Utc::now();
        let (signal, secret) = parse_payload(
            "/entrybos",
            r#"{"symbol":"EURUSD","action":"buy","price":"1.1050","secret":"s3"}"#,
            now,
        )
        .unwrap();
        assert_eq!(signal.price, dec!(1.1050));
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.signal_type, "entrybos");
        assert_eq!(signal.timestamp, now);
        assert_eq!(secret.as_deref(), Some("s3"));

        let (signal, _) = parse_payload(
            "entrychoch",
            r#"{"symbol":"GBPUSD","action":"SELL","price":1.2701,"swing":1.275,"timestamp":"2024-03-01T10:00:00Z"}"#,
            now,
        )
        .unwrap();
        assert_eq!(signal.price, dec!(1.2701));
        assert_eq!(signal.swing, Some(dec!(1.275)));
        assert_eq!(signal.timestamp.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_errors() {
        let now = Utc::now();
        assert!(matches!(
            parse_payload("entrybos", r#"{"action":"BUY","price":1.1}"#, now),
            Err(IngestError::MissingField("symbol"))
        ));
        assert!(matches!(
            parse_payload("entrybos", r#"{"symbol":"EURUSD","action":"HOLD","price":1.1}"#, now),
            Err(IngestError::InvalidField { field: "action", .. })
        ));
        assert!(matches!(
            parse_payload("entrybos", r#"{"symbol":"EURUSD","action":"BUY","price":"abc"}"#, now),
            Err(IngestError::InvalidField { field: "price", .. })
        ));
        assert!(matches!(
            parse_payload("entrybos", "not json", now),
            Err(IngestError::InvalidJson(_))
        ));
    }

    #[tokio::test]
    async fn test_first_signal_creates_active_record() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let ingestor = ingestor(store.clone(), Arc::new(FixedClock::new(now)), Vec::new());

        let outcome = ingestor
            .ingest("entrybos", r#"{"symbol":"EURUSD","action":"BUY","price":1.1050}"#)
            .await
            .unwrap();

        assert!(outcome.processing.success, "{}", outcome.processing.message);
        let stored = store.get_by_key("EURUSD_entrybos").await.unwrap().unwrap();
        assert_eq!(stored.unique_key, "EURUSD_entrybos");
        assert!(!stored.resolved);
        assert!(!stored.used);
        assert_eq!(stored.swing, Some(dec!(1.1050)));

        let events = store.events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, SignalStatus::Processed);
    }

    #[tokio::test]
    async fn test_second_webhook_overwrites_same_record() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let ingestor = ingestor(store.clone(), clock.clone(), Vec::new());

        let first = ingestor
            .ingest("entrybos", r#"{"symbol":"EURUSD","action":"BUY","price":1.1050}"#)
            .await
            .unwrap();
        store.mark_used(first.signal.id).await.unwrap();
        store.mark_resolved(&[first.signal.id]).await.unwrap();

        clock.advance(Duration::minutes(10));
        let second = ingestor
            .ingest("entrybos", r#"{"symbol":"EURUSD","action":"BUY","price":1.1100,"swing":1.1060}"#)
            .await
            .unwrap();

        assert_eq!(second.signal.id, first.signal.id);
        let stored = store.get(first.signal.id).await.unwrap().unwrap();
        assert!(!stored.used);
        assert!(!stored.resolved);
        assert_eq!(stored.price, dec!(1.1100));
        assert_eq!(stored.swing, Some(dec!(1.1060)));
        assert_eq!(stored.timestamp, now + Duration::minutes(10));
        assert_eq!(store.stats().await.unwrap().total_signals, 1);
        assert_eq!(store.events(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_route_secret_checked() {
        let store = Arc::new(InMemorySignalStore::new());
        let routes = vec![
            WebhookRoute {
                path: "EntryBOS".to_string(),
                secret: Some("s3cret".to_string()),
                enabled: true,
            },
            WebhookRoute {
                path: "legacy".to_string(),
                secret: None,
                enabled: false,
            },
        ];
        let ingestor = ingestor(store.clone(), Arc::new(FixedClock::new(Utc::now())), routes);
        let body = |secret: &str| {
            format!(r#"{{"symbol":"EURUSD","action":"BUY","price":1.1,"secret":"{}"}}"#, secret)
        };

        assert!(matches!(
            ingestor.ingest("entrybos", &body("wrong")).await,
            Err(IngestError::InvalidSecret)
        ));
        assert!(matches!(
            ingestor.ingest("unknown", &body("s3cret")).await,
            Err(IngestError::UnknownRoute(_))
        ));
        assert!(matches!(
            ingestor.ingest("legacy", &body("")).await,
            Err(IngestError::Disabled(_))
        ));
        assert!(ingestor.ingest("/entrybos", &body("s3cret")).await.is_ok());
        assert!(store.events(10).await.unwrap().len() == 1);
    }
}
