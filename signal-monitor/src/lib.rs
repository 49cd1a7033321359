//! Signal monitor service: configuration and the periodic reconciliation
//! loop over unresolved BOS/CHoCH signals.

pub mod config;
pub mod signal_monitor;

pub use config::{create_config_template, load_config, save_config, MonitorConfig, ServiceConfig};
pub use signal_monitor::{CycleReport, Resolution, ResolutionReason, SignalMonitor};
