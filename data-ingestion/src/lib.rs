//! Inbound side of the signal service: webhook parsing and ingestion, the
//! PostgreSQL signal store and the MetaApi market price connector.

pub mod connectors;
pub mod databases;
pub mod webhook;

pub use connectors::{MetaApiClient, MetaApiConfig};
pub use databases::PostgresSignalStore;
pub use webhook::{parse_payload, IngestError, IngestOutcome, SignalIngestor, WebhookRoute};
