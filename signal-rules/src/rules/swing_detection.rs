use crate::rule::{RuleContext, RuleResult, SignalRule};
use anyhow::Result;
use common::ActiveTradingSignal;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingDetectionConfig {
    /// Recent swings considered for adoption
    pub lookback: usize,
    /// Maximum price distance for adopting an existing swing
    pub adopt_distance: Decimal,
    /// Decimal places kept when the price becomes the new swing
    pub precision: u32,
}

impl Default for SwingDetectionConfig {
    fn default() -> Self {
        Self {
            lookback: 5,
            adopt_distance: dec!(0.001),
            precision: 5,
        }
    }
}

/// Assigns a swing level to signals that arrive without one
pub struct SwingDetectionRule {
    config: SwingDetectionConfig,
}

impl SwingDetectionRule {
    pub fn new(config: SwingDetectionConfig) -> Self {
        Self { config }
    }

    pub fn default() -> Self {
        Self::new(SwingDetectionConfig::default())
    }
}

impl SignalRule for SwingDetectionRule {
    fn name(&self) -> &str {
        "SwingDetection"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult> {
        if signal.swing.is_some() {
            return Ok(RuleResult::success().with_message("Swing already set"));
        }

        let nearest = ctx
            .same_symbol(signal)
            .into_iter()
            .filter_map(|s| s.swing)
            .take(self.config.lookback)
            .min_by_key(|swing| (*swing - signal.price).abs());

        if let Some(swing) = nearest {
            if (swing - signal.price).abs() < self.config.adopt_distance {
                debug!("Adopting swing {} for {}", swing, signal.symbol);
                signal.swing = Some(swing);
                return Ok(RuleResult::success()
                    .with_message(format!("Swing detected: {}", swing))
                    .with_data("swing", swing)
                    .with_data("adopted", true));
            }
        }

        let swing = signal.price.round_dp(self.config.precision);
        signal.swing = Some(swing);
        Ok(RuleResult::success()
            .with_message(format!("New swing: {}", swing))
            .with_data("swing", swing)
            .with_data("adopted", false))
    }
}
