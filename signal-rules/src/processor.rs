// Active Signal Processor
// Runs signals through the rule engine against a fresh store snapshot

use super::engine::{SignalRuleEngine, SignalValidationResult};
use super::rule::SignalContext;
use super::storage::SignalStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{ActiveTradingSignal, Clock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the signal processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Most recent signals loaded as rule context
    pub context_size: usize,
    /// Seconds between maintenance sweeps when scheduled by the service
    pub maintenance_interval_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            context_size: 100,
            maintenance_interval_secs: 300,
        }
    }
}

/// Outcome of processing one signal
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub message: String,
    pub validation: Option<SignalValidationResult>,
    /// The signal after the chain ran
    pub signal: Option<ActiveTradingSignal>,
}

impl ProcessingResult {
    fn fault(message: String) -> Self {
        Self {
            success: false,
            message,
            validation: None,
            signal: None,
        }
    }
}

/// Outcome of a maintenance sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub processed: usize,
    /// Signals whose own chain run resolved them
    pub resolved: usize,
    /// Other signals resolved on a rule's request
    pub cross_resolved: usize,
    pub errors: usize,
}

pub struct ActiveSignalProcessor {
    store: Arc<dyn SignalStore>,
    engine: Arc<SignalRuleEngine>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
}

impl ActiveSignalProcessor {
    pub fn new(
        store: Arc<dyn SignalStore>,
        engine: Arc<SignalRuleEngine>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Validate one signal and persist its annotations. Rule failures are
    /// reported in the result; only infrastructure faults make it unsuccessful.
    pub async fn process_signal(&self, signal: ActiveTradingSignal) -> ProcessingResult {
        let key = signal.unique_key.clone();
        match self.try_process(signal).await {
            Ok(result) => result,
            Err(e) => {
                error!("Error processing signal {}: {:#}", key, e);
                ProcessingResult::fault(format!("Error: {:#}", e))
            }
        }
    }

    async fn try_process(&self, mut signal: ActiveTradingSignal) -> Result<ProcessingResult> {
        let existing = self
            .store
            .recent(self.config.context_size)
            .await
            .context("Failed to load signal context")?;
        let context = SignalContext::new(existing, self.clock.now());

        let validation = self.engine.validate(&mut signal, &context);

        let written = self
            .store
            .apply_rule_changes(&signal)
            .await
            .context("Failed to save processed signal")?;
        if !written {
            warn!("{} was overwritten while processing, rule changes dropped", signal.unique_key);
        }

        let others = loaded_versions(&context, &validation.resolved_signals(), Some(signal.id));
        if !others.is_empty() {
            let flipped = self
                .store
                .resolve_loaded(&others)
                .await
                .context("Failed to resolve superseded signals")?;
            info!("{} resolved {} related signals", signal.unique_key, flipped);
        }

        if validation.is_valid {
            debug!("Signal {} passed all rules", signal.unique_key);
            Ok(ProcessingResult {
                success: true,
                message: "Signal processed successfully".to_string(),
                validation: Some(validation),
                signal: Some(signal),
            })
        } else {
            info!("Signal {} failed validation: {}", signal.unique_key, validation.summary());
            Ok(ProcessingResult {
                success: false,
                message: validation.summary(),
                validation: Some(validation),
                signal: Some(signal),
            })
        }
    }

    /// Re-run the chain over every unresolved signal and persist resolutions.
    /// Never propagates errors.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let unresolved = match self.store.unresolved().await {
            Ok(signals) => signals,
            Err(e) => {
                error!("Maintenance could not load unresolved signals: {:#}", e);
                report.errors += 1;
                return report;
            }
        };

        let context = SignalContext::new(unresolved.clone(), self.clock.now());
        let mut flipped = Vec::new();
        let mut related = Vec::new();

        for mut signal in unresolved {
            let validation = self.engine.validate(&mut signal, &context);
            report.processed += 1;
            report.errors += validation.errors.len();
            for id in validation.resolved_signals() {
                if id != signal.id && !related.contains(&id) {
                    related.push(id);
                }
            }
            if signal.resolved {
                debug!("Maintenance resolved {}", signal.unique_key);
                flipped.push((signal.id, signal.timestamp));
            }
        }

        report.resolved = flipped.len();
        if !flipped.is_empty() {
            if let Err(e) = self.store.resolve_loaded(&flipped).await {
                warn!("Maintenance failed to save {} resolved signals: {:#}", flipped.len(), e);
                report.errors += 1;
            }
        }
        related.retain(|id| !flipped.iter().any(|(flipped_id, _)| flipped_id == id));
        let related = loaded_versions(&context, &related, None);
        if !related.is_empty() {
            match self.store.resolve_loaded(&related).await {
                Ok(n) => report.cross_resolved = n,
                Err(e) => {
                    warn!("Maintenance failed to resolve related signals: {:#}", e);
                    report.errors += 1;
                }
            }
        }

        info!(
            "Maintenance sweep: {} processed, {} resolved, {} cross-resolved, {} errors",
            report.processed, report.resolved, report.cross_resolved, report.errors
        );
        report
    }
}

/// (id, timestamp) of the context copies of `ids`, skipping `except`
fn loaded_versions(context: &SignalContext, ids: &[Uuid], except: Option<Uuid>) -> Vec<(Uuid, DateTime<Utc>)> {
    ids.iter()
        .filter(|id| Some(**id) != except)
        .filter_map(|id| {
            context
                .existing_signals
                .iter()
                .find(|s| s.id == *id)
                .map(|s| (s.id, s.timestamp))
        })
        .collect()
}
