use crate::rule::{RuleContext, RuleResult, SignalRule};
use anyhow::Result;
use chrono::Duration;
use common::ActiveTradingSignal;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    pub max_age_hours: i64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self { max_age_hours: 24 }
    }
}

/// Resolves signals older than the configured age
pub struct SignalExpirationRule {
    config: ExpirationConfig,
}

impl SignalExpirationRule {
    pub fn new(config: ExpirationConfig) -> Self {
        Self { config }
    }

    pub fn default() -> Self {
        Self::new(ExpirationConfig::default())
    }
}

impl SignalRule for SignalExpirationRule {
    fn name(&self) -> &str {
        "SignalExpiration"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult> {
        let age = signal.age(ctx.now());
        if signal.resolved || age <= Duration::hours(self.config.max_age_hours) {
            return Ok(RuleResult::success());
        }

        signal.resolve();
        let hours = age.num_minutes() as f64 / 60.0;
        info!("Expired {} {} after {:.1} hours", signal.symbol, signal.signal_type, hours);
        Ok(RuleResult::success()
            .with_message(format!("Signal auto-expired after {:.1} hours", hours))
            .with_data("expired", true))
    }
}
