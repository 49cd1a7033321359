use crate::rule::{RuleContext, RuleResult, SignalRule};
use anyhow::Result;
use chrono::Duration;
use common::ActiveTradingSignal;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateSignalConfig {
    pub window_minutes: i64,
}

impl Default for DuplicateSignalConfig {
    fn default() -> Self {
        Self { window_minutes: 5 }
    }
}

/// Stops the chain when the same symbol and action fired within the window
pub struct DuplicateSignalRule {
    config: DuplicateSignalConfig,
}

impl DuplicateSignalRule {
    pub fn new(config: DuplicateSignalConfig) -> Self {
        Self { config }
    }

    pub fn default() -> Self {
        Self::new(DuplicateSignalConfig::default())
    }
}

impl SignalRule for DuplicateSignalRule {
    fn name(&self) -> &str {
        "DuplicateSignal"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult> {
        let cutoff = ctx.now() - Duration::minutes(self.config.window_minutes);

        let duplicate = ctx
            .same_symbol(signal)
            .into_iter()
            .find(|s| s.action == signal.action && s.timestamp > cutoff);

        match duplicate {
            Some(previous) => {
                info!(
                    "Duplicate {} {} signal, previous {} at {}",
                    signal.symbol, signal.action, previous.signal_type, previous.timestamp
                );
                Ok(RuleResult::failure(
                    format!("Duplicate signal within {} minutes", self.config.window_minutes),
                    false,
                )
                .with_data("duplicate_of", previous.id.to_string()))
            }
            None => Ok(RuleResult::success()),
        }
    }
}
