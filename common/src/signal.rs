// Signal domain model
// Active per-(symbol, type) records and the append-only webhook history

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Trade direction carried by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl SignalAction {
    pub fn opposite(self) -> Self {
        match self {
            SignalAction::Buy => SignalAction::Sell,
            SignalAction::Sell => SignalAction::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal action: {0:?}")]
pub struct ParseActionError(pub String);

impl FromStr for SignalAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalAction::Buy),
            "SELL" => Ok(SignalAction::Sell),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

/// Category of an active signal, derived from its free-form type string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Break of structure ("entrybos")
    EntryBos,
    /// Change of character ("entrychoch")
    EntryChoch,
    Generic,
}

impl SignalKind {
    pub const ENTRY_BOS: &'static str = "entrybos";
    pub const ENTRY_CHOCH: &'static str = "entrychoch";

    /// Classify a type string, ignoring case
    pub fn from_type(signal_type: &str) -> Self {
        if signal_type.eq_ignore_ascii_case(Self::ENTRY_BOS) {
            SignalKind::EntryBos
        } else if signal_type.eq_ignore_ascii_case(Self::ENTRY_CHOCH) {
            SignalKind::EntryChoch
        } else {
            SignalKind::Generic
        }
    }
}

/// The single live record for a (symbol, type) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTradingSignal {
    pub id: Uuid,
    pub symbol: String,
    pub action: SignalAction,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub unique_key: String,
    /// Set by downstream consumers once they acted on the signal
    pub used: bool,
    pub resolved: bool,
    /// Structural price level the signal is measured against
    pub swing: Option<Decimal>,
}

impl ActiveTradingSignal {
    pub fn new(
        symbol: impl Into<String>,
        signal_type: impl Into<String>,
        action: SignalAction,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let symbol = symbol.into();
        let signal_type = signal_type.into();
        Self {
            id: Uuid::new_v4(),
            unique_key: Self::unique_key_for(&symbol, &signal_type),
            symbol,
            action,
            price,
            timestamp,
            signal_type,
            used: false,
            resolved: false,
            swing: None,
        }
    }

    pub fn with_swing(mut self, swing: Decimal) -> Self {
        self.swing = Some(swing);
        self
    }

    pub fn unique_key_for(symbol: &str, signal_type: &str) -> String {
        format!("{}_{}", symbol, signal_type)
    }

    pub fn kind(&self) -> SignalKind {
        SignalKind::from_type(&self.signal_type)
    }

    pub fn is_kind(&self, kind: SignalKind) -> bool {
        self.kind() == kind
    }

    /// Mark the signal resolved. Returns true only on the false -> true transition.
    pub fn resolve(&mut self) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        true
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

/// Parsed inbound webhook event, ready to be upserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSignal {
    pub symbol: String,
    pub signal_type: String,
    pub action: SignalAction,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub swing: Option<Decimal>,
    pub message: Option<String>,
}

impl WebhookSignal {
    pub fn unique_key(&self) -> String {
        ActiveTradingSignal::unique_key_for(&self.symbol, &self.signal_type)
    }

    /// Fresh active record for a pair that has none yet
    pub fn to_active(&self) -> ActiveTradingSignal {
        let mut signal = ActiveTradingSignal::new(
            self.symbol.clone(),
            self.signal_type.clone(),
            self.action,
            self.price,
            self.timestamp,
        );
        signal.swing = self.swing;
        signal
    }

    /// Overwrite an existing record in place, starting a new lifecycle
    pub fn apply_to(&self, signal: &mut ActiveTradingSignal) {
        signal.action = self.action;
        signal.price = self.price;
        signal.timestamp = self.timestamp;
        signal.swing = self.swing;
        signal.used = false;
        signal.resolved = false;
    }

    pub fn to_history(&self) -> TradingSignal {
        TradingSignal {
            id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            signal_type: self.signal_type.clone(),
            action: self.action,
            price: self.price,
            timestamp: self.timestamp,
            message: self.message.clone(),
            status: SignalStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Processed,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Pending => "Pending",
            SignalStatus::Processed => "Processed",
        }
    }
}

/// Append-only audit record, one per inbound webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub symbol: String,
    pub signal_type: String,
    pub action: SignalAction,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    pub status: SignalStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_action_parsing() {
        assert_eq!("buy".parse::<SignalAction>().unwrap(), SignalAction::Buy);
        assert_eq!(" SELL ".parse::<SignalAction>().unwrap(), SignalAction::Sell);
        assert!("hold".parse::<SignalAction>().is_err());
        assert_eq!(SignalAction::Buy.opposite(), SignalAction::Sell);
        assert_eq!(serde_json::to_string(&SignalAction::Sell).unwrap(), "\"SELL\"");
    }

    #[test]
    fn test_kind_is_case_insensitive() {
        assert_eq!(SignalKind::from_type("EntryBOS"), SignalKind::EntryBos);
        assert_eq!(SignalKind::from_type("entrychoch"), SignalKind::EntryChoch);
        assert_eq!(SignalKind::from_type("scalp"), SignalKind::Generic);
    }

    #[test]
    fn test_unique_key_and_resolve() {
        let mut signal = ActiveTradingSignal::new(
            "EURUSD",
            "entrybos",
            SignalAction::Buy,
            dec!(1.1050),
            Utc::now(),
        );
        assert_eq!(signal.unique_key, "EURUSD_entrybos");
        assert!(signal.resolve());
        assert!(!signal.resolve());
        assert!(signal.resolved);
    }

    #[test]
    fn test_webhook_overwrite_resets_flags() {
        let now = Utc::now();
        let mut existing =
            ActiveTradingSignal::new("EURUSD", "entrybos", SignalAction::Buy, dec!(1.1), now)
                .with_swing(dec!(1.09));
        existing.used = true;
        existing.resolved = true;
        let id = existing.id;

        let webhook = WebhookSignal {
            symbol: "EURUSD".to_string(),
            signal_type: "entrybos".to_string(),
            action: SignalAction::Sell,
            price: dec!(1.2),
            timestamp: now + Duration::minutes(3),
            swing: None,
            message: None,
        };
        webhook.apply_to(&mut existing);

        assert_eq!(existing.id, id);
        assert_eq!(existing.action, SignalAction::Sell);
        assert_eq!(existing.price, dec!(1.2));
        assert_eq!(existing.swing, None);
        assert!(!existing.used);
        assert!(!existing.resolved);
    }
}
