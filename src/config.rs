use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Settings applied with [`Computer::configure`](crate::Computer::configure).
///
/// Every field ends up in the reserved `"config"` entry of the graph, where
/// tasks and the result cache read it. Sections this crate has no handler
/// for are kept there untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Key computed by [`Computer::get`](crate::Computer::get) when none is
    /// given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Directory for cached results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<Utf8PathBuf>,
    /// Recompute cached functions even when a stored result exists.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_skip: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn with_default(mut self, key: impl Into<String>) -> Self {
        self.default = Some(key.into());
        self
    }

    pub fn with_cache_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_cache_skip(mut self, skip: bool) -> Self {
        self.cache_skip = skip;
        self
    }

    pub fn with_section(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub(crate) fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
