// Concrete signal rules, in chain order

pub mod duplicate;
pub mod entry_bos;
pub mod entry_choch;
pub mod expiration;
pub mod price_validation;
pub mod swing_detection;

pub use duplicate::{DuplicateSignalConfig, DuplicateSignalRule};
pub use entry_bos::{EntryBosConfig, EntryBosRule};
pub use entry_choch::{EntryChochConfig, EntryChochRule};
pub use expiration::{ExpirationConfig, SignalExpirationRule};
pub use price_validation::{PriceValidationConfig, PriceValidationRule};
pub use swing_detection::{SwingDetectionConfig, SwingDetectionRule};

use serde::{Deserialize, Serialize};

/// Thresholds for every rule in the standard chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub price_validation: PriceValidationConfig,
    pub duplicate: DuplicateSignalConfig,
    pub swing_detection: SwingDetectionConfig,
    pub entry_choch: EntryChochConfig,
    pub entry_bos: EntryBosConfig,
    pub expiration: ExpirationConfig,
}
