// Change of Character rule
// Pairs reversals, inherits swing from the reversed signal, ages out stale CHoCH

use crate::rule::{RuleContext, RuleResult, SignalRule};
use anyhow::Result;
use chrono::Duration;
use common::{ActiveTradingSignal, SignalKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryChochConfig {
    /// Recent CHoCH signals inspected
    pub lookback: usize,
    /// Opposite CHoCH within this window is superseded
    pub reversal_window_minutes: i64,
    pub choppy_window_minutes: i64,
    pub choppy_threshold: usize,
    /// Price change bounds in percent
    pub min_change_pct: Decimal,
    pub max_change_pct: Decimal,
    pub max_age_hours: i64,
}

impl Default for EntryChochConfig {
    fn default() -> Self {
        Self {
            lookback: 5,
            reversal_window_minutes: 60,
            choppy_window_minutes: 120,
            choppy_threshold: 3,
            min_change_pct: dec!(0.05),
            max_change_pct: dec!(2.0),
            max_age_hours: 4,
        }
    }
}

pub struct EntryChochRule {
    config: EntryChochConfig,
}

impl EntryChochRule {
    pub fn new(config: EntryChochConfig) -> Self {
        Self { config }
    }

    pub fn default() -> Self {
        Self::new(EntryChochConfig::default())
    }
}

impl SignalRule for EntryChochRule {
    fn name(&self) -> &str {
        "EntryCHoCH"
    }

    fn priority(&self) -> i32 {
        25
    }

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult> {
        if !signal.is_kind(SignalKind::EntryChoch) {
            return Ok(RuleResult::success().with_message("Not an EntryCHoCH signal"));
        }

        let now = ctx.now();
        let recent: Vec<&ActiveTradingSignal> = ctx
            .same_symbol_kind(signal, SignalKind::EntryChoch)
            .into_iter()
            .take(self.config.lookback)
            .collect();

        let mut result = RuleResult::success().with_message("CHoCH signal validated");

        // Most recent opposite CHoCH
        if let Some(opposite) = recent.iter().find(|s| s.action != signal.action) {
            let gap = (signal.timestamp - opposite.timestamp).abs();
            if gap < Duration::minutes(self.config.reversal_window_minutes) {
                info!(
                    "CHoCH reversal on {}: {} supersedes {} from {}",
                    signal.symbol, signal.action, opposite.action, opposite.timestamp
                );
                if !opposite.resolved {
                    result.resolve(opposite.id);
                }
                if ctx.received_swing.is_none() {
                    if let Some(swing) = opposite.swing {
                        signal.swing = Some(swing);
                        result.add_data("inherited_swing", swing);
                    }
                }
                result.add_data("reversed_signal", opposite.id.to_string());
            }
        }

        let choppy_cutoff = now - Duration::minutes(self.config.choppy_window_minutes);
        let recent_count = recent.iter().filter(|s| s.timestamp > choppy_cutoff).count();
        if recent_count >= self.config.choppy_threshold {
            warn!("Choppy market on {}: {} CHoCH signals recently", signal.symbol, recent_count);
            result.add_note(format!(
                "Choppy market: {} CHoCH signals in the last {} minutes",
                recent_count, self.config.choppy_window_minutes
            ));
        }
        result.add_data("recent_choch_count", recent_count);

        if let Some(previous) = recent.first() {
            if previous.price > Decimal::ZERO {
                let change_pct =
                    ((signal.price - previous.price) / previous.price).abs() * Decimal::ONE_HUNDRED;
                debug!("CHoCH price change on {}: {}%", signal.symbol, change_pct.round_dp(4));
                if change_pct < self.config.min_change_pct {
                    warn!("CHoCH price change too small on {}: {}%", signal.symbol, change_pct.round_dp(4));
                    result.add_note(format!("Price change too small: {}%", change_pct.round_dp(4)));
                } else if change_pct > self.config.max_change_pct {
                    warn!("CHoCH price change too large on {}: {}%", signal.symbol, change_pct.round_dp(4));
                    result.add_note(format!("Price change too large: {}%", change_pct.round_dp(4)));
                }
                result.add_data("price_change_pct", change_pct.round_dp(4));
            }
        }

        let max_age = Duration::hours(self.config.max_age_hours);
        for stale in recent.iter().filter(|s| !s.resolved && now - s.timestamp > max_age) {
            debug!("Auto-resolving stale CHoCH {} on {}", stale.id, stale.symbol);
            result.resolve(stale.id);
        }

        Ok(result)
    }
}
