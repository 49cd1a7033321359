// Signal Storage Interface
// Persistence for active signals and the webhook history log

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use common::{ActiveTradingSignal, SignalStatus, TradingSignal, WebhookSignal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Result ordering for signal queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalOrder {
    #[default]
    NewestFirst,
    /// Lower-cased type ascending, then newest first
    TypeThenNewest,
}

/// Filter over active signals
#[derive(Debug, Clone, Default)]
pub struct SignalQuery {
    pub symbol: Option<String>,
    /// Compared case-insensitively
    pub signal_type: Option<String>,
    pub resolved: Option<bool>,
    pub used: Option<bool>,
    pub has_swing: Option<bool>,
    pub order: SignalOrder,
    pub limit: Option<usize>,
}

impl SignalQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn signal_type(mut self, signal_type: &str) -> Self {
        self.signal_type = Some(signal_type.to_string());
        self
    }

    pub fn resolved(mut self, resolved: bool) -> Self {
        self.resolved = Some(resolved);
        self
    }

    pub fn used(mut self, used: bool) -> Self {
        self.used = Some(used);
        self
    }

    pub fn has_swing(mut self, has_swing: bool) -> Self {
        self.has_swing = Some(has_swing);
        self
    }

    pub fn order(mut self, order: SignalOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, signal: &ActiveTradingSignal) -> bool {
        self.symbol.as_ref().map_or(true, |s| *s == signal.symbol)
            && self
                .signal_type
                .as_ref()
                .map_or(true, |t| t.eq_ignore_ascii_case(&signal.signal_type))
            && self.resolved.map_or(true, |r| r == signal.resolved)
            && self.used.map_or(true, |u| u == signal.used)
            && self.has_swing.map_or(true, |h| h == signal.swing.is_some())
    }

    /// Sort and truncate already filtered signals
    pub fn arrange(&self, signals: &mut Vec<ActiveTradingSignal>) {
        match self.order {
            SignalOrder::NewestFirst => signals.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            SignalOrder::TypeThenNewest => signals.sort_by(|a, b| {
                a.signal_type
                    .to_lowercase()
                    .cmp(&b.signal_type.to_lowercase())
                    .then_with(|| b.timestamp.cmp(&a.timestamp))
            }),
        }
        if let Some(limit) = self.limit {
            signals.truncate(limit);
        }
    }
}

/// Trait for active-signal storage backends.
///
/// Implementations guarantee at most one record per unique key.
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Create the record for the webhook's (symbol, type) pair, or overwrite
    /// the existing one in place keeping its id
    async fn upsert(&self, webhook: &WebhookSignal) -> Result<ActiveTradingSignal>;

    async fn get(&self, id: Uuid) -> Result<Option<ActiveTradingSignal>>;

    async fn get_by_key(&self, unique_key: &str) -> Result<Option<ActiveTradingSignal>>;

    async fn query(&self, query: &SignalQuery) -> Result<Vec<ActiveTradingSignal>>;

    /// Most recent signals across all symbols and types
    async fn recent(&self, limit: usize) -> Result<Vec<ActiveTradingSignal>> {
        self.query(&SignalQuery::new().limit(limit)).await
    }

    /// All unresolved signals, ordered by type then newest first
    async fn unresolved(&self) -> Result<Vec<ActiveTradingSignal>> {
        self.query(&SignalQuery::new().resolved(false).order(SignalOrder::TypeThenNewest))
            .await
    }

    /// Write back full records. Returns the number written.
    async fn save(&self, signals: &[ActiveTradingSignal]) -> Result<usize>;

    /// Resolve by id. Returns how many flipped from unresolved.
    async fn mark_resolved(&self, ids: &[Uuid]) -> Result<usize>;

    /// Resolve records loaded earlier, keyed by (id, timestamp as loaded).
    /// A record overwritten by a newer webhook since then is left alone.
    /// Returns how many flipped from unresolved.
    async fn resolve_loaded(&self, loaded: &[(Uuid, DateTime<Utc>)]) -> Result<usize>;

    /// Write back the fields the rule chain owns (`swing`, `resolved`) unless
    /// the record was overwritten since `signal` was loaded. Never clears
    /// `resolved`. Returns false when the write was skipped.
    async fn apply_rule_changes(&self, signal: &ActiveTradingSignal) -> Result<bool>;

    async fn mark_used(&self, id: Uuid) -> Result<bool>;

    async fn update_swing(&self, id: Uuid, swing: Decimal) -> Result<bool>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Append a webhook history entry
    async fn record_event(&self, event: &TradingSignal) -> Result<()>;

    async fn mark_event_processed(&self, id: Uuid) -> Result<()>;

    /// History entries, newest first
    async fn events(&self, limit: usize) -> Result<Vec<TradingSignal>>;

    async fn stats(&self) -> Result<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_signals: usize,
    pub unresolved_signals: usize,
    pub used_signals: usize,
    pub signals_by_type: HashMap<String, usize>,
    pub oldest_signal: Option<DateTime<Utc>>,
    pub newest_signal: Option<DateTime<Utc>>,
    pub history_events: usize,
}

impl StorageStats {
    pub fn from_signals<'a>(
        signals: impl IntoIterator<Item = &'a ActiveTradingSignal>,
        history_events: usize,
    ) -> Self {
        let mut stats = StorageStats {
            history_events,
            ..Default::default()
        };
        for signal in signals {
            stats.total_signals += 1;
            if !signal.resolved {
                stats.unresolved_signals += 1;
            }
            if signal.used {
                stats.used_signals += 1;
            }
            *stats
                .signals_by_type
                .entry(signal.signal_type.to_lowercase())
                .or_insert(0) += 1;
            stats.oldest_signal = Some(stats.oldest_signal.map_or(signal.timestamp, |t| t.min(signal.timestamp)));
            stats.newest_signal = Some(stats.newest_signal.map_or(signal.timestamp, |t| t.max(signal.timestamp)));
        }
        stats
    }
}

#[derive(Default)]
struct ActiveState {
    signals: HashMap<Uuid, ActiveTradingSignal>,
    keys: HashMap<String, Uuid>,
}

/// In-memory signal storage (for testing and development)
#[derive(Default)]
pub struct InMemorySignalStore {
    active: RwLock<ActiveState>,
    history: RwLock<Vec<TradingSignal>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed record, replacing any record with the same key
    pub async fn insert(&self, signal: ActiveTradingSignal) {
        let mut state = self.active.write().await;
        if let Some(old) = state.keys.insert(signal.unique_key.clone(), signal.id) {
            if old != signal.id {
                state.signals.remove(&old);
            }
        }
        state.signals.insert(signal.id, signal);
    }
}

#[async_trait::async_trait]
impl SignalStore for InMemorySignalStore {
    async fn upsert(&self, webhook: &WebhookSignal) -> Result<ActiveTradingSignal> {
        let key = webhook.unique_key();
        let mut state = self.active.write().await;

        if let Some(id) = state.keys.get(&key).copied() {
            if let Some(existing) = state.signals.get_mut(&id) {
                webhook.apply_to(existing);
                debug!("Overwrote active signal {}", key);
                return Ok(existing.clone());
            }
        }

        let signal = webhook.to_active();
        state.keys.insert(key.clone(), signal.id);
        state.signals.insert(signal.id, signal.clone());
        debug!("Created active signal {}", key);
        Ok(signal)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ActiveTradingSignal>> {
        Ok(self.active.read().await.signals.get(&id).cloned())
    }

    async fn get_by_key(&self, unique_key: &str) -> Result<Option<ActiveTradingSignal>> {
        let state = self.active.read().await;
        Ok(state
            .keys
            .get(unique_key)
            .and_then(|id| state.signals.get(id))
            .cloned())
    }

    async fn query(&self, query: &SignalQuery) -> Result<Vec<ActiveTradingSignal>> {
        let state = self.active.read().await;
        let mut signals: Vec<ActiveTradingSignal> = state
            .signals
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        query.arrange(&mut signals);
        Ok(signals)
    }

    async fn save(&self, signals: &[ActiveTradingSignal]) -> Result<usize> {
        let mut state = self.active.write().await;
        for signal in signals {
            if let Some(owner) = state.keys.get(&signal.unique_key) {
                if *owner != signal.id {
                    bail!("Unique key {} already belongs to signal {}", signal.unique_key, owner);
                }
            }
        }
        for signal in signals {
            state.keys.insert(signal.unique_key.clone(), signal.id);
            state.signals.insert(signal.id, signal.clone());
        }
        Ok(signals.len())
    }

    async fn mark_resolved(&self, ids: &[Uuid]) -> Result<usize> {
        let mut state = self.active.write().await;
        let mut flipped = 0;
        for id in ids {
            if let Some(signal) = state.signals.get_mut(id) {
                if signal.resolve() {
                    flipped += 1;
                }
            }
        }
        Ok(flipped)
    }

    async fn resolve_loaded(&self, loaded: &[(Uuid, DateTime<Utc>)]) -> Result<usize> {
        let mut state = self.active.write().await;
        let mut flipped = 0;
        for (id, timestamp) in loaded {
            match state.signals.get_mut(id) {
                Some(signal) if signal.timestamp == *timestamp => {
                    if signal.resolve() {
                        flipped += 1;
                    }
                }
                Some(signal) => debug!("Skipping resolution of {}, overwritten since load", signal.unique_key),
                None => {}
            }
        }
        Ok(flipped)
    }

    async fn apply_rule_changes(&self, signal: &ActiveTradingSignal) -> Result<bool> {
        let mut state = self.active.write().await;
        match state.signals.get_mut(&signal.id) {
            Some(stored) if stored.timestamp == signal.timestamp => {
                stored.swing = signal.swing;
                stored.resolved |= signal.resolved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_used(&self, id: Uuid) -> Result<bool> {
        let mut state = self.active.write().await;
        Ok(match state.signals.get_mut(&id) {
            Some(signal) => {
                signal.used = true;
                true
            }
            None => false,
        })
    }

    async fn update_swing(&self, id: Uuid, swing: Decimal) -> Result<bool> {
        if swing <= Decimal::ZERO {
            bail!("Swing must be greater than 0");
        }
        let mut state = self.active.write().await;
        Ok(match state.signals.get_mut(&id) {
            Some(signal) => {
                signal.swing = Some(swing);
                true
            }
            None => false,
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.active.write().await;
        match state.signals.remove(&id) {
            Some(signal) => {
                state.keys.remove(&signal.unique_key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_event(&self, event: &TradingSignal) -> Result<()> {
        self.history.write().await.push(event.clone());
        Ok(())
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<()> {
        let mut history = self.history.write().await;
        if let Some(event) = history.iter_mut().find(|e| e.id == id) {
            event.status = SignalStatus::Processed;
        }
        Ok(())
    }

    async fn events(&self, limit: usize) -> Result<Vec<TradingSignal>> {
        let history = self.history.read().await;
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let state = self.active.read().await;
        let history = self.history.read().await.len();
        Ok(StorageStats::from_signals(state.signals.values(), history))
    }
}
