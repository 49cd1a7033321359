// Signal Monitor
// Periodic reconciliation of unresolved signals against age limits, each
// other, and live market price

use crate::config::MonitorConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use common::{ActiveTradingSignal, Clock, MarketPriceSource, SignalAction, SignalKind};
use rust_decimal::Decimal;
use serde::Serialize;
use signal_rules::{SignalQuery, SignalStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why the monitor resolved a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionReason {
    /// Older than the family's age limit
    Expired,
    /// Superseded by a newer opposite CHoCH
    Reversal,
    /// Price crossed the relevant swing
    PriceBreak,
    /// A later CHoCH for the symbol was resolved
    Cascade,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub id: Uuid,
    pub unique_key: String,
    pub reason: ResolutionReason,
}

/// Summary of one monitoring cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// Another cycle held the guard; nothing was done
    pub skipped: bool,
    pub examined: usize,
    pub resolutions: Vec<Resolution>,
    /// Symbols whose price could not be fetched
    pub prices_unavailable: Vec<String>,
    /// Symbols skipped after a store error
    pub failed_symbols: Vec<String>,
    pub saved: usize,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    pub fn reason_for(&self, id: Uuid) -> Option<ResolutionReason> {
        self.resolutions.iter().find(|r| r.id == id).map(|r| r.reason)
    }

    pub fn count(&self, reason: ResolutionReason) -> usize {
        self.resolutions.iter().filter(|r| r.reason == reason).count()
    }
}

/// Mutable view of the unresolved signals loaded for one cycle
struct WorkingSet {
    now: DateTime<Utc>,
    signals: HashMap<Uuid, ActiveTradingSignal>,
    report: CycleReport,
}

impl WorkingSet {
    fn new(now: DateTime<Utc>, unresolved: Vec<ActiveTradingSignal>) -> Self {
        let report = CycleReport {
            examined: unresolved.len(),
            ..Default::default()
        };
        Self {
            now,
            signals: unresolved.into_iter().map(|s| (s.id, s)).collect(),
            report,
        }
    }

    fn get(&self, id: Uuid) -> Option<&ActiveTradingSignal> {
        self.signals.get(&id)
    }

    fn is_open(&self, id: Uuid) -> bool {
        self.get(id).map_or(false, |s| !s.resolved)
    }

    fn resolve(&mut self, id: Uuid, reason: ResolutionReason) {
        if let Some(signal) = self.signals.get_mut(&id) {
            if signal.resolve() {
                info!(
                    "Resolved {} {} ({:?})",
                    signal.unique_key, signal.action, reason
                );
                self.report.resolutions.push(Resolution {
                    id,
                    unique_key: signal.unique_key.clone(),
                    reason,
                });
            }
        }
    }

    fn expire_older_than(&mut self, ids: &[Uuid], max_age: Duration) {
        let now = self.now;
        let stale: Vec<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| self.get(*id).map_or(false, |s| !s.resolved && s.age(now) > max_age))
            .collect();
        for id in stale {
            self.resolve(id, ResolutionReason::Expired);
        }
    }

    /// (id, timestamp as loaded) of every signal resolved this cycle
    fn dirty(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        self.report
            .resolutions
            .iter()
            .filter_map(|r| self.signals.get(&r.id).map(|s| (s.id, s.timestamp)))
            .collect()
    }
}

/// Background reconciliation loop, one instance per process
pub struct SignalMonitor {
    store: Arc<dyn SignalStore>,
    prices: Arc<dyn MarketPriceSource>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    cycle_guard: Mutex<()>,
}

impl SignalMonitor {
    pub fn new(
        store: Arc<dyn SignalStore>,
        prices: Arc<dyn MarketPriceSource>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            prices,
            clock,
            config,
            cycle_guard: Mutex::new(()),
        }
    }

    /// Run cycles on the configured interval until `shutdown` flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Signal monitor starting in {}s, interval {}s",
            self.config.startup_delay_secs, self.config.interval_secs
        );

        tokio::select! {
            _ = sleep(std::time::Duration::from_secs(self.config.startup_delay_secs)) => {}
            _ = shutdown.changed() => {
                info!("Signal monitor stopped before first cycle");
                return;
            }
        }

        let mut ticker = interval(std::time::Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.skipped => {}
                        Ok(report) => info!(
                            "Monitor cycle: {} examined, {} resolved, {} saved, {} prices unavailable",
                            report.examined,
                            report.resolutions.len(),
                            report.saved,
                            report.prices_unavailable.len()
                        ),
                        Err(e) => error!("Monitor cycle failed: {:#}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Signal monitor shutting down");
                    break;
                }
            }
        }
    }

    /// One reconciliation pass. Returns a skipped report if another pass is
    /// still in flight.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            warn!("Previous monitor cycle still running, skipping");
            return Ok(CycleReport::skipped());
        };

        let now = self.clock.now();
        let unresolved = self
            .store
            .unresolved()
            .await
            .context("Failed to load unresolved signals")?;
        debug!("Monitor cycle over {} unresolved signals", unresolved.len());

        // type (lower-cased) -> symbol -> ids, newest first
        let mut groups: BTreeMap<String, BTreeMap<String, Vec<Uuid>>> = BTreeMap::new();
        let mut ordered = unresolved.clone();
        ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        for signal in &ordered {
            groups
                .entry(signal.signal_type.to_lowercase())
                .or_default()
                .entry(signal.symbol.clone())
                .or_default()
                .push(signal.id);
        }

        let priced: BTreeSet<String> = ordered
            .iter()
            .filter(|s| !s.is_kind(SignalKind::Generic))
            .map(|s| s.symbol.clone())
            .collect();
        let symbols: Vec<String> = priced.into_iter().collect();
        let quotes = self
            .prices
            .current_prices(&symbols, self.config.price_fetch_concurrency)
            .await;
        let mids: HashMap<String, Decimal> = quotes.iter().map(|(s, q)| (s.clone(), q.mid())).collect();

        let mut work = WorkingSet::new(now, unresolved);
        for symbol in symbols.iter().filter(|s| !mids.contains_key(*s)) {
            warn!("Current price unavailable for {}, skipping price checks", symbol);
            work.report.prices_unavailable.push(symbol.clone());
        }

        for (signal_type, by_symbol) in &groups {
            for (symbol, ids) in by_symbol {
                let price = mids.get(symbol).copied();
                match SignalKind::from_type(signal_type) {
                    SignalKind::EntryChoch => self.handle_choch(&mut work, symbol, ids, price),
                    SignalKind::EntryBos => {
                        if let Err(e) = self.handle_bos(&mut work, symbol, ids, price).await {
                            warn!("Skipping BOS reconciliation for {}: {:#}", symbol, e);
                            work.report.failed_symbols.push(symbol.clone());
                        }
                    }
                    SignalKind::Generic => self.handle_generic(&mut work, ids),
                }
            }
        }

        let dirty = work.dirty();
        if !dirty.is_empty() {
            work.report.saved = self
                .store
                .resolve_loaded(&dirty)
                .await
                .context("Failed to save monitor resolutions")?;
            if work.report.saved < dirty.len() {
                debug!(
                    "{} resolutions skipped, signals overwritten or already resolved",
                    dirty.len() - work.report.saved
                );
            }
        }

        Ok(work.report)
    }

    fn handle_generic(&self, work: &mut WorkingSet, ids: &[Uuid]) {
        work.expire_older_than(ids, Duration::hours(self.config.generic_max_age_hours));
    }

    fn handle_choch(&self, work: &mut WorkingSet, symbol: &str, ids: &[Uuid], price: Option<Decimal>) {
        work.expire_older_than(ids, Duration::hours(self.config.choch_max_age_hours));

        // A newer opposite CHoCH supersedes an older one close in time
        let window = Duration::minutes(self.config.reversal_window_minutes);
        let top: Vec<ActiveTradingSignal> = ids
            .iter()
            .take(self.config.reversal_depth)
            .filter_map(|id| work.get(*id).cloned())
            .collect();
        if let Some((newest, rest)) = top.split_first() {
            for older in rest {
                if work.is_open(older.id)
                    && older.action != newest.action
                    && newest.timestamp - older.timestamp < window
                {
                    debug!("CHoCH {} on {} reverses {}", newest.action, symbol, older.action);
                    work.resolve(older.id, ResolutionReason::Reversal);
                }
            }
        }

        let Some(price) = price else {
            return;
        };

        // Pairing uses the BOS set as loaded, so a BOS broken earlier in
        // this cycle still confirms its CHoCH
        let bos: Vec<ActiveTradingSignal> = work
            .signals
            .values()
            .filter(|s| s.symbol == symbol && s.is_kind(SignalKind::EntryBos) && s.swing.is_some())
            .cloned()
            .collect();

        for id in ids {
            let Some(choch) = work.get(*id).filter(|s| !s.resolved).cloned() else {
                continue;
            };
            // BOS SELL pairs with CHoCH BUY, BOS BUY with CHoCH SELL
            let paired = bos
                .iter()
                .filter(|b| b.action == choch.action.opposite() && b.timestamp < choch.timestamp)
                .max_by_key(|b| b.timestamp);

            let Some(paired) = paired else {
                warn!("No {} BOS before CHoCH {} on {}", choch.action.opposite(), choch.action, symbol);
                continue;
            };
            let Some(swing) = paired.swing else {
                continue;
            };

            let confirmed = match choch.action {
                SignalAction::Buy => price > swing,
                SignalAction::Sell => price < swing,
            };
            debug!(
                "CHoCH {} on {}: price {} vs BOS {} swing {} -> {}",
                choch.action, symbol, price, paired.action, swing, confirmed
            );
            if confirmed {
                work.resolve(choch.id, ResolutionReason::PriceBreak);
            }
        }
    }

    async fn handle_bos(
        &self,
        work: &mut WorkingSet,
        symbol: &str,
        ids: &[Uuid],
        price: Option<Decimal>,
    ) -> Result<()> {
        let mut choch = self
            .store
            .query(&SignalQuery::new().symbol(symbol).signal_type(SignalKind::ENTRY_CHOCH))
            .await
            .with_context(|| format!("Failed to load CHoCH signals for {}", symbol))?;
        for signal in choch.iter_mut() {
            if let Some(current) = work.get(signal.id) {
                *signal = current.clone();
            }
        }

        work.expire_older_than(ids, Duration::hours(self.config.bos_max_age_hours));

        for id in ids {
            let Some(bos) = work.get(*id).filter(|s| !s.resolved).cloned() else {
                continue;
            };
            let Some(swing) = bos.swing else {
                continue;
            };

            if choch.iter().any(|c| c.timestamp > bos.timestamp && c.resolved) {
                work.resolve(bos.id, ResolutionReason::Cascade);
                continue;
            }

            if let Some(price) = price {
                // Structure invalidated when price reverses through the swing
                let broken = match bos.action {
                    SignalAction::Sell => price > swing,
                    SignalAction::Buy => price < swing,
                };
                if broken {
                    work.resolve(bos.id, ResolutionReason::PriceBreak);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FixedClock, PriceQuote, StaticPriceSource, SystemClock, TradingSignal, WebhookSignal};
    use rust_decimal_macros::dec;
    use signal_rules::{InMemorySignalStore, StorageStats};
    use tokio::sync::Notify;

    fn signal(symbol: &str, signal_type: &str, action: SignalAction, minutes_ago: i64, now: DateTime<Utc>) -> ActiveTradingSignal {
        ActiveTradingSignal::new(symbol, signal_type, action, dec!(1.1), now - Duration::minutes(minutes_ago))
    }

    fn monitor(store: Arc<dyn SignalStore>, prices: Arc<dyn MarketPriceSource>, now: DateTime<Utc>) -> SignalMonitor {
        SignalMonitor::new(store, prices, Arc::new(FixedClock::new(now)), MonitorConfig::default())
    }

    async fn seed(store: &InMemorySignalStore, signals: &[ActiveTradingSignal]) {
        for s in signals {
            store.insert(s.clone()).await;
        }
    }

    async fn is_resolved(store: &InMemorySignalStore, id: Uuid) -> bool {
        store.get(id).await.unwrap().unwrap().resolved
    }

    #[tokio::test]
    async fn test_bos_sell_resolves_when_price_rises_above_swing() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let bos = signal("EURUSD", "entrybos", SignalAction::Sell, 30, now).with_swing(dec!(1.2000));
        seed(&store, &[bos.clone()]).await;
        let prices = Arc::new(StaticPriceSource::new().with_price("EURUSD", dec!(1.2050)));

        let report = monitor(store.clone(), prices, now).run_cycle().await.unwrap();

        assert_eq!(report.reason_for(bos.id), Some(ResolutionReason::PriceBreak));
        assert_eq!(report.saved, 1);
        assert!(is_resolved(&store, bos.id).await);
    }

    #[tokio::test]
    async fn test_bos_buy_open_until_price_breaks_below() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let bos = signal("EURUSD", "entrybos", SignalAction::Buy, 30, now).with_swing(dec!(1.1000));
        seed(&store, &[bos.clone()]).await;
        let prices = Arc::new(StaticPriceSource::new().with_price("EURUSD", dec!(1.1010)));
        let monitor = monitor(store.clone(), prices.clone(), now);

        let report = monitor.run_cycle().await.unwrap();
        assert!(report.resolutions.is_empty());
        assert!(!is_resolved(&store, bos.id).await);

        prices.set_price("EURUSD", dec!(1.0990)).await;
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.reason_for(bos.id), Some(ResolutionReason::PriceBreak));
        assert!(is_resolved(&store, bos.id).await);
    }

    #[tokio::test]
    async fn test_choch_pairs_with_prior_opposite_bos() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let bos_sell = signal("EURUSD", "entrybos", SignalAction::Sell, 90, now).with_swing(dec!(1.2100));
        let choch_buy = signal("EURUSD", "entrychoch", SignalAction::Buy, 30, now);
        seed(&store, &[bos_sell.clone(), choch_buy.clone()]).await;
        let prices = Arc::new(StaticPriceSource::new().with_price("EURUSD", dec!(1.2050)));
        let monitor = monitor(store.clone(), prices.clone(), now);

        // Below the BOS SELL swing: CHoCH BUY not yet confirmed
        let report = monitor.run_cycle().await.unwrap();
        assert!(report.reason_for(choch_buy.id).is_none());

        prices.set_price("EURUSD", dec!(1.2150)).await;
        let report = monitor.run_cycle().await.unwrap();
        assert_eq!(report.reason_for(choch_buy.id), Some(ResolutionReason::PriceBreak));
        // The BOS SELL is broken by the same move
        assert_eq!(report.reason_for(bos_sell.id), Some(ResolutionReason::PriceBreak));
    }

    #[tokio::test]
    async fn test_choch_without_prior_opposite_bos_stays_open() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        // Same-direction BOS and an opposite BOS that came later do not pair
        let bos_sell_later = signal("EURUSD", "entrybos", SignalAction::Sell, 10, now).with_swing(dec!(1.0000));
        let choch_buy = signal("EURUSD", "entrychoch", SignalAction::Buy, 30, now);
        let bos_buy = signal("EURUSD", "EntryBOS", SignalAction::Buy, 60, now).with_swing(dec!(1.0000));
        seed(&store, &[bos_sell_later, choch_buy.clone(), bos_buy]).await;
        let prices = Arc::new(StaticPriceSource::new().with_price("EURUSD", dec!(1.0500)));

        let report = monitor(store.clone(), prices, now).run_cycle().await.unwrap();
        assert!(report.reason_for(choch_buy.id).is_none());
        assert!(!is_resolved(&store, choch_buy.id).await);
    }

    #[tokio::test]
    async fn test_choch_reversal_and_expiry() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let old_sell = signal("EURUSD", "EntryCHoCH", SignalAction::Sell, 40, now);
        let new_buy = signal("EURUSD", "entrychoch", SignalAction::Buy, 5, now);
        let stale = signal("GBPUSD", "entrychoch", SignalAction::Buy, 5 * 60, now);
        seed(&store, &[old_sell.clone(), new_buy.clone(), stale.clone()]).await;

        let report = monitor(store.clone(), Arc::new(StaticPriceSource::new()), now)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.reason_for(old_sell.id), Some(ResolutionReason::Reversal));
        assert_eq!(report.reason_for(stale.id), Some(ResolutionReason::Expired));
        assert!(report.reason_for(new_buy.id).is_none());
        assert_eq!(report.prices_unavailable, vec!["EURUSD".to_string(), "GBPUSD".to_string()]);
    }

    #[tokio::test]
    async fn test_reversal_measured_against_newest_choch() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let newest_buy = signal("EURUSD", "entrychoch", SignalAction::Buy, 5, now);
        let middle_sell = signal("EURUSD", "EntryCHoCH", SignalAction::Sell, 20, now);
        let oldest_buy = signal("EURUSD", "ENTRYCHOCH", SignalAction::Buy, 40, now);
        seed(&store, &[newest_buy.clone(), middle_sell.clone(), oldest_buy.clone()]).await;

        let report = monitor(store.clone(), Arc::new(StaticPriceSource::new()), now)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.reason_for(middle_sell.id), Some(ResolutionReason::Reversal));
        // Same direction as the newest CHoCH, so not reversed by the middle one
        assert!(report.reason_for(oldest_buy.id).is_none());
        assert!(!is_resolved(&store, oldest_buy.id).await);
        assert!(!is_resolved(&store, newest_buy.id).await);
    }

    #[tokio::test]
    async fn test_bos_cascades_from_resolved_later_choch() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let bos = signal("EURUSD", "entrybos", SignalAction::Buy, 120, now).with_swing(dec!(1.1000));
        let mut choch = signal("EURUSD", "entrychoch", SignalAction::Sell, 60, now);
        choch.resolved = true;
        seed(&store, &[bos.clone(), choch]).await;

        let report = monitor(store.clone(), Arc::new(StaticPriceSource::new()), now)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.reason_for(bos.id), Some(ResolutionReason::Cascade));
    }

    #[tokio::test]
    async fn test_age_limits_per_family() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let generic_old = signal("EURUSD", "scalp", SignalAction::Buy, 25 * 60, now);
        let generic_fresh = signal("EURUSD", "swing", SignalAction::Buy, 23 * 60, now);
        let bos_old = signal("EURUSD", "entrybos", SignalAction::Buy, 9 * 60, now);
        seed(&store, &[generic_old.clone(), generic_fresh.clone(), bos_old.clone()]).await;

        let report = monitor(store.clone(), Arc::new(StaticPriceSource::new()), now)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.count(ResolutionReason::Expired), 2);
        assert!(is_resolved(&store, generic_old.id).await);
        assert!(!is_resolved(&store, generic_fresh.id).await);
        assert!(is_resolved(&store, bos_old.id).await);
    }

    #[tokio::test]
    async fn test_unavailable_price_only_affects_its_symbol() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        let eur = signal("EURUSD", "entrybos", SignalAction::Sell, 30, now).with_swing(dec!(1.2000));
        let gbp = signal("GBPUSD", "entrybos", SignalAction::Sell, 30, now).with_swing(dec!(1.2000));
        seed(&store, &[eur.clone(), gbp.clone()]).await;
        let prices = Arc::new(StaticPriceSource::new().with_price("EURUSD", dec!(1.2050)));

        let report = monitor(store.clone(), prices, now).run_cycle().await.unwrap();

        assert!(is_resolved(&store, eur.id).await);
        assert!(!is_resolved(&store, gbp.id).await);
        assert_eq!(report.prices_unavailable, vec!["GBPUSD".to_string()]);
    }

    /// In-memory store that can fail CHoCH lookups for one symbol and can
    /// land a webhook right after the unresolved set is loaded
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemorySignalStore,
        broken_symbol: Option<&'static str>,
        overwrite_after_load: std::sync::Mutex<Option<WebhookSignal>>,
    }

    #[async_trait::async_trait]
    impl SignalStore for ScriptedStore {
        async fn upsert(&self, webhook: &WebhookSignal) -> Result<ActiveTradingSignal> {
            self.inner.upsert(webhook).await
        }
        async fn get(&self, id: Uuid) -> Result<Option<ActiveTradingSignal>> {
            self.inner.get(id).await
        }
        async fn get_by_key(&self, unique_key: &str) -> Result<Option<ActiveTradingSignal>> {
            self.inner.get_by_key(unique_key).await
        }
        async fn query(&self, query: &SignalQuery) -> Result<Vec<ActiveTradingSignal>> {
            if self.broken_symbol.is_some() && query.symbol.as_deref() == self.broken_symbol {
                anyhow::bail!("connection reset");
            }
            self.inner.query(query).await
        }
        async fn unresolved(&self) -> Result<Vec<ActiveTradingSignal>> {
            let signals = self.inner.unresolved().await?;
            let pending = self.overwrite_after_load.lock().unwrap().take();
            if let Some(webhook) = pending {
                self.inner.upsert(&webhook).await?;
            }
            Ok(signals)
        }
        async fn save(&self, signals: &[ActiveTradingSignal]) -> Result<usize> {
            self.inner.save(signals).await
        }
        async fn mark_resolved(&self, ids: &[Uuid]) -> Result<usize> {
            self.inner.mark_resolved(ids).await
        }
        async fn resolve_loaded(&self, loaded: &[(Uuid, DateTime<Utc>)]) -> Result<usize> {
            self.inner.resolve_loaded(loaded).await
        }
        async fn apply_rule_changes(&self, signal: &ActiveTradingSignal) -> Result<bool> {
            self.inner.apply_rule_changes(signal).await
        }
        async fn mark_used(&self, id: Uuid) -> Result<bool> {
            self.inner.mark_used(id).await
        }
        async fn update_swing(&self, id: Uuid, swing: Decimal) -> Result<bool> {
            self.inner.update_swing(id, swing).await
        }
        async fn delete(&self, id: Uuid) -> Result<bool> {
            self.inner.delete(id).await
        }
        async fn record_event(&self, event: &TradingSignal) -> Result<()> {
            self.inner.record_event(event).await
        }
        async fn mark_event_processed(&self, id: Uuid) -> Result<()> {
            self.inner.mark_event_processed(id).await
        }
        async fn events(&self, limit: usize) -> Result<Vec<TradingSignal>> {
            self.inner.events(limit).await
        }
        async fn stats(&self) -> Result<StorageStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_webhook_during_cycle_is_not_clobbered() {
        let now = Utc::now();
        let store = Arc::new(ScriptedStore::default());
        let stale = signal("EURUSD", "entrybos", SignalAction::Buy, 9 * 60, now).with_swing(dec!(1.0900));
        seed(&store.inner, &[stale.clone()]).await;
        *store.overwrite_after_load.lock().unwrap() = Some(WebhookSignal {
            symbol: "EURUSD".to_string(),
            signal_type: "entrybos".to_string(),
            action: SignalAction::Sell,
            price: dec!(1.2000),
            timestamp: now,
            swing: Some(dec!(1.2100)),
            message: None,
        });

        let report = monitor(store.clone(), Arc::new(StaticPriceSource::new()), now)
            .run_cycle()
            .await
            .unwrap();
        assert_eq!(report.reason_for(stale.id), Some(ResolutionReason::Expired));
        assert_eq!(report.saved, 0);

        let stored = store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stored.action, SignalAction::Sell);
        assert_eq!(stored.price, dec!(1.2000));
        assert_eq!(stored.timestamp, now);
        assert_eq!(stored.swing, Some(dec!(1.2100)));
        assert!(!stored.resolved);
    }

    #[tokio::test]
    async fn test_store_failure_skips_only_that_symbol() {
        let now = Utc::now();
        let store = Arc::new(ScriptedStore {
            broken_symbol: Some("GBPUSD"),
            ..Default::default()
        });
        let eur = signal("EURUSD", "entrybos", SignalAction::Sell, 30, now).with_swing(dec!(1.2000));
        let gbp = signal("GBPUSD", "entrybos", SignalAction::Sell, 30, now).with_swing(dec!(1.2000));
        seed(&store.inner, &[eur.clone(), gbp.clone()]).await;
        let prices = Arc::new(
            StaticPriceSource::new()
                .with_price("EURUSD", dec!(1.2050))
                .with_price("GBPUSD", dec!(1.2050)),
        );

        let report = monitor(store.clone(), prices, now).run_cycle().await.unwrap();

        assert_eq!(report.failed_symbols, vec!["GBPUSD".to_string()]);
        assert!(is_resolved(&store.inner, eur.id).await);
        assert!(!is_resolved(&store.inner, gbp.id).await);
    }

    /// Blocks inside the price fetch until released
    struct GatedPrices {
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl MarketPriceSource for GatedPrices {
        async fn current_price(&self, _symbol: &str) -> Option<PriceQuote> {
            self.entered.notify_one();
            self.release.notified().await;
            None
        }
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let now = Utc::now();
        let store = Arc::new(InMemorySignalStore::new());
        seed(&store, &[signal("EURUSD", "entrybos", SignalAction::Buy, 5, now)]).await;
        let prices = Arc::new(GatedPrices {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let monitor = Arc::new(SignalMonitor::new(
            store,
            prices.clone(),
            Arc::new(SystemClock),
            MonitorConfig::default(),
        ));

        let first = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run_cycle().await }
        });
        prices.entered.notified().await;

        let second = monitor.run_cycle().await.unwrap();
        assert!(second.skipped);

        prices.release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(!first.skipped);
        assert_eq!(first.examined, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemorySignalStore::new());
        let monitor = monitor(store, Arc::new(StaticPriceSource::new()), Utc::now());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { monitor.run(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
