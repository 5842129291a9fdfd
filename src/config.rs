//! Loader configuration.

use crate::strategy::DispatchTrigger;
use serde::{Deserialize, Serialize};

/// Construction-time configuration for a [`Loader`](crate::Loader).
///
/// Serializable so it can sit inside an application's own config file;
/// missing fields take their defaults.
///
/// # Example
///
/// ```
/// use loader_kit::{DispatchTrigger, LoaderConfig};
///
/// let config = LoaderConfig::default()
///     .with_max_batch_size(100)
///     .with_trigger(DispatchTrigger::Manual)
///     .with_name("users");
///
/// assert_eq!(config.max_batch_size, 100);
/// assert!(config.caching_enabled);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Dispatch a batch as soon as it holds this many distinct keys.
    ///
    /// `0` means unbounded.
    pub max_batch_size: usize,

    /// Memoize outcomes for the lifetime of the loader.
    ///
    /// When `false`, loads for a key still share its slot until it settles,
    /// in a pending batch or in flight. Nothing is remembered afterwards.
    pub caching_enabled: bool,

    /// When an armed batch is dispatched.
    pub trigger: DispatchTrigger,

    /// Label used in log lines.
    pub name: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            max_batch_size: 0,
            caching_enabled: true,
            trigger: DispatchTrigger::default(),
            name: None,
        }
    }
}

impl LoaderConfig {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn with_trigger(mut self, trigger: DispatchTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Batch size limit, if any.
    pub(crate) fn batch_limit(&self) -> Option<usize> {
        (self.max_batch_size > 0).then_some(self.max_batch_size)
    }

    pub(crate) fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("loader")
    }
}
