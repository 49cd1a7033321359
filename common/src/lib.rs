//! Shared domain types for the trading signal workspace.
//!
//! Every crate in the workspace speaks in terms of [`ActiveTradingSignal`]
//! (the one live record per symbol and signal type), the append-only
//! [`TradingSignal`] history entry, and the two ports the core depends on:
//! a [`Clock`] and a [`MarketPriceSource`].

pub mod clock;
pub mod market;
pub mod signal;

pub use clock::{Clock, FixedClock, SystemClock};
pub use market::{MarketPriceSource, PriceQuote, StaticPriceSource};
pub use signal::{
    ActiveTradingSignal, ParseActionError, SignalAction, SignalKind, SignalStatus, TradingSignal,
    WebhookSignal,
};
