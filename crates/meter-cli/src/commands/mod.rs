//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod authorize;
pub mod billing;
pub mod config;
pub mod key;
pub mod usage;

use std::sync::Arc;

use crate::output::OutputFormat;
use meter_core::services::metering::KeyLayout;
use meter_core::{KvStore, MeterConfig};

/// Shared context for all commands
pub struct Context {
    pub store: Arc<dyn KvStore>,
    pub config: MeterConfig,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Context {
    /// Key layout under the configured prefix
    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(self.config.key_prefix.clone())
    }
}

/// Render an optional value for table display
pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}
