//! Core type definitions for Clearpage
//!
//! These types are shared by the parser, the rule compiler and the engine,
//! and most of them are persisted through the cache store as JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Profiles
// =============================================================================

/// Aggressiveness tier. Variants are declared in ascending order so that
/// `Ord` follows aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Light,
    #[default]
    Medium,
    Nuclear,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Light, Profile::Medium, Profile::Nuclear];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Medium => "medium",
            Self::Nuclear => "nuclear",
        }
    }

    /// Fixed feature set for this profile.
    pub fn features(&self) -> FeatureSet {
        match self {
            Self::Light => FeatureSet::LIGHT,
            Self::Medium => FeatureSet::MEDIUM,
            Self::Nuclear => FeatureSet::NUCLEAR,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "medium" => Ok(Self::Medium),
            "nuclear" => Ok(Self::Nuclear),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

// =============================================================================
// Feature Sets
// =============================================================================

bitflags::bitflags! {
    /// Rule categories a profile enables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FeatureSet: u16 {
        /// Host-specific cosmetic selectors
        const OVERLAY_REMOVAL = 1 << 0;
        /// Built-in heuristic overlay selectors
        const OVERLAY_HEURISTICS = 1 << 1;
        /// Domain-less cosmetic selectors from the lists
        const GLOBAL_COSMETICS = 1 << 2;
        /// Built-in broad attribute-substring selectors
        const BROAD_SELECTORS = 1 << 3;
        /// Host-specific scriptlets
        const SCRIPTLETS = 1 << 4;
        /// Domain-less scriptlets
        const GLOBAL_SCRIPTLETS = 1 << 5;

        const LIGHT = Self::OVERLAY_REMOVAL.bits();
        const MEDIUM = Self::LIGHT.bits()
            | Self::OVERLAY_HEURISTICS.bits()
            | Self::SCRIPTLETS.bits();
        const NUCLEAR = Self::MEDIUM.bits()
            | Self::GLOBAL_COSMETICS.bits()
            | Self::BROAD_SELECTORS.bits()
            | Self::GLOBAL_SCRIPTLETS.bits();
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Kind of a remote source. Only filter lists exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Filterlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trust {
    High,
    Low,
}

/// One remote rule source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub url: String,
    pub trust: Trust,
}

impl SourceDescriptor {
    pub fn filterlist(url: &str, trust: Trust) -> Self {
        Self {
            kind: SourceKind::Filterlist,
            url: url.to_string(),
            trust,
        }
    }
}

/// Source category; doubles as the cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceCategory {
    Packs,
    Excludes,
}

impl SourceCategory {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Packs => "packs",
            Self::Excludes => "excludes",
        }
    }
}

// =============================================================================
// Cached Resources
// =============================================================================

/// HTTP validators remembered for conditional revalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Validator {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Last good copy of one `(namespace, url)` source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResource {
    pub text: String,
    pub validator: Validator,
    /// Milliseconds since the Unix epoch.
    pub fetched_at: u64,
}

// =============================================================================
// Scriptlets
// =============================================================================

/// A named scriptlet call as written in a filter list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptletInvocation {
    pub name: String,
    pub args: Vec<String>,
}

impl ScriptletInvocation {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

// =============================================================================
// Host Rule Set
// =============================================================================

/// Effective rules for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRuleSet {
    pub effective_profile: Profile,
    pub selectors: Vec<String>,
    pub heuristic_selectors: Vec<String>,
    pub broad_selectors: Vec<String>,
    pub scriptlets: Vec<ScriptletInvocation>,
    pub clamp_to_light: bool,
}

impl HostRuleSet {
    pub fn empty(profile: Profile) -> Self {
        Self {
            effective_profile: profile,
            selectors: Vec::new(),
            heuristic_selectors: Vec::new(),
            broad_selectors: Vec::new(),
            scriptlets: Vec::new(),
            clamp_to_light: false,
        }
    }

    /// Union of every selector category, first occurrence wins.
    pub fn all_selectors(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.selectors
            .iter()
            .chain(&self.heuristic_selectors)
            .chain(&self.broad_selectors)
            .map(String::as_str)
            .filter(|s| seen.insert(*s))
            .collect()
    }
}
