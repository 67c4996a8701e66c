//! Persisted engine configuration
//!
//! The configuration is owned by the embedding script; the engine only reads
//! it. Validation happens in [`EngineConfig::from_json`] so that a malformed
//! document never replaces a good one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::host::normalize_host;
use crate::types::{Profile, SourceCategory, SourceDescriptor};

/// Default freshness window for fetched lists.
pub const DEFAULT_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid source #{index} in '{category}': {reason}")]
    InvalidSource {
        category: &'static str,
        index: usize,
        reason: String,
    },
    #[error("invalid per-host entry '{0}'")]
    InvalidHost(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sources {
    #[serde(default)]
    pub packs: Vec<SourceDescriptor>,
    #[serde(default)]
    pub excludes: Vec<SourceDescriptor>,
}

impl Sources {
    pub fn get(&self, category: SourceCategory) -> &[SourceDescriptor] {
        match category {
            SourceCategory::Packs => &self.packs,
            SourceCategory::Excludes => &self.excludes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPolicy {
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_MAX_AGE_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

fn default_max_age_ms() -> u64 {
    DEFAULT_MAX_AGE_MS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub global_profile: Profile,
    #[serde(default)]
    pub sources: Sources,
    #[serde(default)]
    pub per_host: BTreeMap<String, HostSettings>,
    #[serde(default)]
    pub fetch: FetchPolicy,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validated()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check semantic constraints serde cannot express and normalize
    /// per-host keys.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        for category in [SourceCategory::Packs, SourceCategory::Excludes] {
            for (index, source) in self.sources.get(category).iter().enumerate() {
                validate_source(source).map_err(|reason| ConfigError::InvalidSource {
                    category: category.namespace(),
                    index,
                    reason,
                })?;
            }
        }

        let mut per_host = BTreeMap::new();
        for (host, settings) in std::mem::take(&mut self.per_host) {
            let normalized = normalize_host(&host)
                .filter(|h| !h.starts_with("*."))
                .ok_or_else(|| ConfigError::InvalidHost(host.clone()))?;
            per_host.insert(normalized, settings);
        }
        self.per_host = per_host;

        Ok(self)
    }

    pub fn host_settings(&self, host: &str) -> Option<&HostSettings> {
        self.per_host.get(host)
    }

    /// Profile pinned for this host, if any.
    pub fn pinned_profile(&self, host: &str) -> Option<Profile> {
        self.host_settings(host).and_then(|s| s.profile)
    }

    pub fn is_enabled(&self, host: &str) -> bool {
        self.host_settings(host).and_then(|s| s.enabled).unwrap_or(true)
    }
}

fn validate_source(source: &SourceDescriptor) -> Result<(), String> {
    let url = source.url.trim();
    if url.is_empty() {
        return Err("empty url".to_string());
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(format!("unsupported url '{}'", url));
    }
    if crate::host::extract_host(url).is_none() {
        return Err(format!("url '{}' has no host", url));
    }
    Ok(())
}
