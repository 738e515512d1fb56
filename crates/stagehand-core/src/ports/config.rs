//! Named configuration values.

use std::collections::HashMap;

/// Source of named string options.
///
/// Typed resolution (defaults, parsing) happens in
/// [`EngineSettings`](crate::settings::EngineSettings); sources only return
/// raw values.
pub trait ConfigSource: Send + Sync {
    /// Raw value of the named option, if set.
    fn get(&self, name: &str) -> Option<String>;
}

/// In-memory configuration, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, returning the updated configuration.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Set a value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Configuration read from `STAGEHAND_<NAME>` environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl EnvConfig {
    /// Environment variable consulted for an option name.
    #[must_use]
    pub fn var_name(name: &str) -> String {
        format!("STAGEHAND_{}", name.to_ascii_uppercase().replace(['-', '.'], "_"))
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(Self::var_name(name)).ok()
    }
}
