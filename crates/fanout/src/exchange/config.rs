//! Exchange configuration.

use serde::{Deserialize, Serialize};

/// Configuration for starting an exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Name to register the exchange process under, if any.
    pub name: Option<String>,
}

impl ExchangeConfig {
    /// An anonymous exchange.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the exchange under `name` on its node.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
