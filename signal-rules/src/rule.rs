// Signal Rule Contract
// A named, prioritized validation/annotation step over one active signal

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{ActiveTradingSignal, SignalKind};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// A single step of the rule chain.
///
/// Rules may mutate the signal they are given; later rules in the same chain
/// observe those changes. The context snapshot is read-only. When a rule
/// decides another signal should be resolved it says so through
/// [`RuleResult::resolves`] and the caller applies it to the store.
pub trait SignalRule: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs earlier
    fn priority(&self) -> i32;

    fn execute(&self, signal: &mut ActiveTradingSignal, ctx: &RuleContext<'_>) -> Result<RuleResult>;
}

/// Typed diagnostic value attached to a rule result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DiagnosticValue {
    Text(String),
    Decimal(Decimal),
    Integer(i64),
    Flag(bool),
}

impl From<&str> for DiagnosticValue {
    fn from(v: &str) -> Self {
        DiagnosticValue::Text(v.to_string())
    }
}

impl From<String> for DiagnosticValue {
    fn from(v: String) -> Self {
        DiagnosticValue::Text(v)
    }
}

impl From<Decimal> for DiagnosticValue {
    fn from(v: Decimal) -> Self {
        DiagnosticValue::Decimal(v)
    }
}

impl From<i64> for DiagnosticValue {
    fn from(v: i64) -> Self {
        DiagnosticValue::Integer(v)
    }
}

impl From<usize> for DiagnosticValue {
    fn from(v: usize) -> Self {
        DiagnosticValue::Integer(v as i64)
    }
}

impl From<bool> for DiagnosticValue {
    fn from(v: bool) -> Self {
        DiagnosticValue::Flag(v)
    }
}

/// Outcome of one rule execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    pub is_valid: bool,
    pub should_continue: bool,
    pub message: Option<String>,
    pub data: Vec<(String, DiagnosticValue)>,
    /// Warnings and informational notes that do not affect validity
    pub notes: Vec<String>,
    /// Context signals this rule decided to resolve
    pub resolves: Vec<Uuid>,
}

impl RuleResult {
    /// Valid, continue
    pub fn success() -> Self {
        Self {
            is_valid: true,
            should_continue: true,
            message: None,
            data: Vec::new(),
            notes: Vec::new(),
            resolves: Vec::new(),
        }
    }

    /// Invalid; `should_continue` decides whether later rules still run
    pub fn failure(message: impl Into<String>, should_continue: bool) -> Self {
        Self {
            is_valid: false,
            should_continue,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    /// Valid, but nothing after this rule applies
    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            should_continue: false,
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<DiagnosticValue>) -> Self {
        self.data.push((key.to_string(), value.into()));
        self
    }

    pub fn add_data(&mut self, key: &str, value: impl Into<DiagnosticValue>) {
        self.data.push((key.to_string(), value.into()));
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn resolve(&mut self, id: Uuid) {
        if !self.resolves.contains(&id) {
            self.resolves.push(id);
        }
    }

    pub fn get(&self, key: &str) -> Option<&DiagnosticValue> {
        self.data.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Snapshot handed to the engine for one chain invocation
#[derive(Debug, Clone)]
pub struct SignalContext {
    /// Owned copies of existing active signals, newest first
    pub existing_signals: Vec<ActiveTradingSignal>,
    pub processing_time: DateTime<Utc>,
}

impl SignalContext {
    pub fn new(existing_signals: Vec<ActiveTradingSignal>, processing_time: DateTime<Utc>) -> Self {
        Self {
            existing_signals,
            processing_time,
        }
    }

    pub fn empty(processing_time: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), processing_time)
    }
}

/// Read-only view rules execute against
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub existing_signals: &'a [ActiveTradingSignal],
    pub processing_time: DateTime<Utc>,
    /// Swing the signal carried before the chain started
    pub received_swing: Option<Decimal>,
}

impl<'a> RuleContext<'a> {
    pub fn now(&self) -> DateTime<Utc> {
        self.processing_time
    }

    /// Other signals for the same symbol, newest first
    pub fn same_symbol(&self, signal: &ActiveTradingSignal) -> Vec<&'a ActiveTradingSignal> {
        let mut others: Vec<&'a ActiveTradingSignal> = self
            .existing_signals
            .iter()
            .filter(|s| s.symbol == signal.symbol && s.id != signal.id)
            .collect();
        others.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        others
    }

    /// Other signals for the same symbol and kind, newest first
    pub fn same_symbol_kind(
        &self,
        signal: &ActiveTradingSignal,
        kind: SignalKind,
    ) -> Vec<&'a ActiveTradingSignal> {
        self.same_symbol(signal)
            .into_iter()
            .filter(|s| s.is_kind(kind))
            .collect()
    }
}
