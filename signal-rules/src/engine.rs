// Signal Rule Engine
// Runs the prioritized rule chain over one signal and aggregates the outcome

use super::rule::{RuleContext, RuleResult, SignalContext, SignalRule};
use super::rules::{
    DuplicateSignalRule, EntryBosRule, EntryChochRule, PriceValidationRule, RulesConfig,
    SignalExpirationRule, SwingDetectionRule,
};
use common::ActiveTradingSignal;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result recorded for one rule that ran
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub result: RuleResult,
}

/// Aggregate outcome of a chain run
#[derive(Debug, Clone, Serialize)]
pub struct SignalValidationResult {
    pub is_valid: bool,
    /// Results in execution order
    pub rule_results: Vec<RuleOutcome>,
    pub failed_rules: Vec<String>,
    /// Faults raised inside rules, as "<rule>: <message>"
    pub errors: Vec<String>,
    /// Rule that stopped the chain early, if any
    pub stopped_by: Option<String>,
}

impl SignalValidationResult {
    fn new() -> Self {
        Self {
            is_valid: true,
            rule_results: Vec::new(),
            failed_rules: Vec::new(),
            errors: Vec::new(),
            stopped_by: None,
        }
    }

    pub fn summary(&self) -> String {
        if self.is_valid {
            "All rules passed".to_string()
        } else {
            format!("Failed rules: {}", self.failed_rules.join(", "))
        }
    }

    pub fn result_for(&self, rule: &str) -> Option<&RuleResult> {
        self.rule_results
            .iter()
            .find(|outcome| outcome.rule == rule)
            .map(|outcome| &outcome.result)
    }

    pub fn ran(&self, rule: &str) -> bool {
        self.result_for(rule).is_some()
    }

    /// Context signals any rule asked to resolve, deduplicated
    pub fn resolved_signals(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = Vec::new();
        for outcome in &self.rule_results {
            for id in &outcome.result.resolves {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }
}

/// Ordered rule chain
pub struct SignalRuleEngine {
    rules: Vec<Box<dyn SignalRule>>,
}

impl SignalRuleEngine {
    /// Rules are sorted once by priority; equal priorities keep registration order
    pub fn new(mut rules: Vec<Box<dyn SignalRule>>) -> Self {
        rules.sort_by_key(|rule| rule.priority());
        info!(
            "Rule engine initialized with {} rules: {}",
            rules.len(),
            rules.iter().map(|r| r.name()).collect::<Vec<_>>().join(", ")
        );
        Self { rules }
    }

    /// The standard chain with the given thresholds
    pub fn standard(config: &RulesConfig) -> Self {
        Self::new(vec![
            Box::new(PriceValidationRule::new(config.price_validation.clone())),
            Box::new(DuplicateSignalRule::new(config.duplicate.clone())),
            Box::new(SwingDetectionRule::new(config.swing_detection.clone())),
            Box::new(EntryChochRule::new(config.entry_choch.clone())),
            Box::new(EntryBosRule::new(config.entry_bos.clone())),
            Box::new(SignalExpirationRule::new(config.expiration.clone())),
        ])
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run the chain. Rule failures and faults are reported in the result,
    /// never propagated.
    pub fn validate(
        &self,
        signal: &mut ActiveTradingSignal,
        context: &SignalContext,
    ) -> SignalValidationResult {
        let ctx = RuleContext {
            existing_signals: &context.existing_signals,
            processing_time: context.processing_time,
            received_swing: signal.swing,
        };
        let mut validation = SignalValidationResult::new();

        for rule in &self.rules {
            let name = rule.name();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.execute(signal, &ctx)));

            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("Rule {} failed on {} {}: {:#}", name, signal.symbol, signal.signal_type, e);
                    validation.errors.push(format!("{}: {}", name, e));
                    continue;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("Rule {} panicked on {} {}: {}", name, signal.symbol, signal.signal_type, message);
                    validation.errors.push(format!("{}: {}", name, message));
                    continue;
                }
            };

            debug!(
                "Rule {} on {} {}: valid={} continue={} {:?}",
                name, signal.symbol, signal.signal_type, result.is_valid, result.should_continue, result.message
            );

            if !result.is_valid {
                validation.is_valid = false;
                validation.failed_rules.push(name.to_string());
            }
            let stop = !result.should_continue;
            validation.rule_results.push(RuleOutcome {
                rule: name.to_string(),
                result,
            });

            if stop {
                debug!("Rule chain stopped by {}", name);
                validation.stopped_by = Some(name.to_string());
                break;
            }
        }

        validation
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "rule panicked".to_string()
    }
}
