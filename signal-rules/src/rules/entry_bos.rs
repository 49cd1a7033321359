// Break of Structure rule
// Annotates trend continuation, checks the swing break, ages out stale BOS

use crate::rule::{RuleContext, RuleResult, SignalRule};
use anyhow::Result;
use chrono::Duration;
use common::{ActiveTradingSignal, SignalAction, SignalKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryBosConfig {
    /// Recent same-symbol signals inspected
    pub lookback: usize,
    pub opposite_choch_window_minutes: i64,
    pub frequent_window_minutes: i64,
    pub trend_window_minutes: i64,
    /// Break beyond this percentage of the swing is flagged
    pub max_break_pct: Decimal,
    /// Prices used when deriving a swing
    pub swing_lookback: usize,
    pub bias_window_minutes: i64,
    pub bias_threshold: usize,
    pub max_age_hours: i64,
}

impl Default for EntryBosConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            opposite_choch_window_minutes: 30,
            frequent_window_minutes: 15,
            trend_window_minutes: 120,
            max_break_pct: dec!(1.0),
            swing_lookback: 5,
            bias_window_minutes: 240,
            bias_threshold: 2,
            max_age_hours: 8,
        }
    }
}

pub struct EntryBosRule {
    config: EntryBosConfig,
}

impl EntryBosRule {
    pub fn new(config: EntryBosConfig) -> Self {
        Self { config }
    }

    pub fn default() -> Self {
        Self::new(EntryBosConfig::default())
    }

    fn check_swing_break(&self, signal: &ActiveTradingSignal, swing: Decimal, result: &mut RuleResult) {
        let distance = match signal.action {
            SignalAction::Buy => signal.price - swing,
            SignalAction::Sell => swing - signal.price,
        };

        if distance <= Decimal::ZERO {
            warn!(
                "BOS {} on {} at {} has not broken swing {}",
                signal.action, signal.symbol, signal.price, swing
            );
            result.add_note(format!("Price {} has not broken swing {}", signal.price, swing));
            result.add_data("swing_broken", false);
            return;
        }

        result.add_data("swing_broken", true);
        if swing > Decimal::ZERO {
            let break_pct = (distance / swing * Decimal::ONE_HUNDRED).round_dp(4);
            result.add_data("break_pct", break_pct);
            if break_pct > self.config.max_break_pct {
                warn!("Large BOS break on {}: {}%, possible false breakout", signal.symbol, break_pct);
                result.add_note(format!("Break of {}% exceeds {}%, possible false breakout", break_pct, self.config.max_break_pct));
            }
        }
    }
}

impl SignalRule for EntryBosRule {
    fn name(&self) -> &str {
        "EntryBOS"
    }

    fn priority(&self) -> i32 {
        25
    }

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult> {
        if !signal.is_kind(SignalKind::EntryBos) {
            return Ok(RuleResult::success().with_message("Not an EntryBOS signal"));
        }

        let now = ctx.now();
        let recent: Vec<&ActiveTradingSignal> = ctx
            .same_symbol(signal)
            .into_iter()
            .take(self.config.lookback)
            .collect();
        let recent_bos: Vec<&ActiveTradingSignal> =
            recent.iter().copied().filter(|s| s.is_kind(SignalKind::EntryBos)).collect();
        let recent_choch: Vec<&ActiveTradingSignal> =
            recent.iter().copied().filter(|s| s.is_kind(SignalKind::EntryChoch)).collect();

        let mut result = RuleResult::success().with_message("BOS signal validated");

        let opposite_window = Duration::minutes(self.config.opposite_choch_window_minutes);
        if let Some(choch) = recent_choch
            .iter()
            .find(|c| c.action != signal.action && (signal.timestamp - c.timestamp).abs() < opposite_window)
        {
            warn!(
                "BOS {} on {} follows opposite CHoCH {} from {}, possible trend change",
                signal.action, signal.symbol, choch.action, choch.timestamp
            );
            result.add_note(format!("Recent opposite CHoCH {}, possible trend change", choch.action));
        }

        let mut inherited = None;
        if let Some(previous) = recent_bos.iter().find(|b| b.action == signal.action) {
            let gap = (signal.timestamp - previous.timestamp).abs();
            if gap < Duration::minutes(self.config.frequent_window_minutes) {
                warn!("BOS signals too frequent on {}: {} minutes apart", signal.symbol, gap.num_minutes());
                result.add_note(format!("BOS too frequent: {} minutes since last", gap.num_minutes()));
            }
            if gap < Duration::minutes(self.config.trend_window_minutes) {
                info!("{} trend confirmed on {}", signal.action, signal.symbol);
                result.add_note(format!("{} trend confirmed", signal.action));
                if ctx.received_swing.is_none() {
                    if let Some(swing) = previous.swing {
                        signal.swing = Some(swing);
                        inherited = Some(swing);
                        result.add_data("inherited_swing", swing);
                    }
                }
            }
        }

        // The break is measured against a swing the webhook carried or one
        // inherited above; a provisional swing from SwingDetection does not count
        match ctx.received_swing.or(inherited) {
            Some(swing) => self.check_swing_break(signal, swing, &mut result),
            None => {
                let prices = recent.iter().take(self.config.swing_lookback).map(|s| s.price);
                let derived = match signal.action {
                    SignalAction::Buy => prices.max().filter(|high| signal.price > *high),
                    SignalAction::Sell => prices.min().filter(|low| signal.price < *low),
                };
                if let Some(swing) = derived {
                    debug!("Derived swing {} for BOS on {}", swing, signal.symbol);
                    signal.swing = Some(swing);
                    result.add_data("derived_swing", swing);
                }
            }
        }

        let bias_cutoff = now - Duration::minutes(self.config.bias_window_minutes);
        let same_direction = recent
            .iter()
            .filter(|s| s.action == signal.action && s.timestamp > bias_cutoff)
            .count();
        result.add_data("same_direction_count", same_direction);
        if same_direction >= self.config.bias_threshold {
            info!("Strong {} bias on {}: {} signals", signal.action, signal.symbol, same_direction);
            result.add_note(format!("Strong {} bias: {} recent signals", signal.action, same_direction));
        }

        let max_age = Duration::hours(self.config.max_age_hours);
        for stale in recent_bos.iter().filter(|s| !s.resolved && now - s.timestamp > max_age) {
            debug!("Auto-resolving stale BOS {} on {}", stale.id, stale.symbol);
            result.resolve(stale.id);
        }

        Ok(result)
    }
}
