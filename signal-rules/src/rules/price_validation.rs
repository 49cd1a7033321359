use crate::rule::{RuleContext, RuleResult, SignalRule};
use anyhow::Result;
use common::ActiveTradingSignal;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceValidationConfig {
    /// Number of recent same-symbol prices averaged
    pub lookback: usize,
    /// Maximum relative deviation from the average (0.05 = 5%)
    pub max_deviation: Decimal,
}

impl Default for PriceValidationConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            max_deviation: dec!(0.05),
        }
    }
}

/// Rejects non-positive prices and flags spikes against recent prices
pub struct PriceValidationRule {
    config: PriceValidationConfig,
}

impl PriceValidationRule {
    pub fn new(config: PriceValidationConfig) -> Self {
        Self { config }
    }

    pub fn default() -> Self {
        Self::new(PriceValidationConfig::default())
    }
}

impl SignalRule for PriceValidationRule {
    fn name(&self) -> &str {
        "PriceValidation"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult> {
        if signal.price <= Decimal::ZERO {
            return Ok(RuleResult::failure("Price must be greater than 0", false));
        }

        let recent: Vec<Decimal> = ctx
            .same_symbol(signal)
            .iter()
            .take(self.config.lookback)
            .map(|s| s.price)
            .collect();

        if recent.is_empty() {
            return Ok(RuleResult::success());
        }

        let average = recent.iter().copied().sum::<Decimal>() / Decimal::from(recent.len());
        if average <= Decimal::ZERO {
            return Ok(RuleResult::success());
        }

        let change = ((signal.price - average) / average).abs();
        debug!(
            "Price check for {}: {} vs average {} ({} samples)",
            signal.symbol,
            signal.price,
            average,
            recent.len()
        );

        if change > self.config.max_deviation {
            let pct = (change * Decimal::ONE_HUNDRED).round_dp(2);
            warn!("Price spike on {}: {}% from average", signal.symbol, pct);
            return Ok(
                RuleResult::failure(format!("Price spike detected: {}% change from average", pct), true)
                    .with_data("average_price", average)
                    .with_data("change", change),
            );
        }

        Ok(RuleResult::success().with_data("average_price", average))
    }
}
