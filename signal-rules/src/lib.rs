// Signal Rule Engine (core)
// Ordered business rules over active trading signals, plus the processor
// that feeds them store snapshots

pub mod engine;
pub mod processor;
pub mod rule;
pub mod rules;
pub mod storage;

pub use engine::{RuleOutcome, SignalRuleEngine, SignalValidationResult};
pub use processor::{ActiveSignalProcessor, MaintenanceReport, ProcessingResult, ProcessorConfig};
pub use rule::{DiagnosticValue, RuleContext, RuleResult, SignalContext, SignalRule};
pub use rules::{
    DuplicateSignalConfig, DuplicateSignalRule, EntryBosConfig, EntryBosRule, EntryChochConfig,
    EntryChochRule, ExpirationConfig, PriceValidationConfig, PriceValidationRule, RulesConfig,
    SignalExpirationRule, SwingDetectionConfig, SwingDetectionRule,
};
pub use storage::{InMemorySignalStore, SignalOrder, SignalQuery, SignalStore, StorageStats};
