//! Rule compiler: merges parsed lists into the effective rules for one host.

use std::collections::{BTreeSet, HashSet};

use cp_core::host::{domain_matches, matching_domain_keys};
use cp_core::types::{FeatureSet, HostRuleSet, Profile, ScriptletInvocation};

use crate::parser::ParsedFilterList;

/// Hosts that break under aggressive mitigation. Always clamped to light
/// unless the user pinned a profile for the host.
pub const LEGACY_SAFE_HOSTS: &[&str] = &[
    "accounts.google.com",
    "login.live.com",
    "login.microsoftonline.com",
    "appleid.apple.com",
    "paypal.com",
    "stripe.com",
];

/// Overlay heuristics, enabled from medium upward.
pub const HEURISTIC_SELECTORS: &[&str] = &[
    r#"[class*="adblock"]"#,
    r#"[id*="adblock"]"#,
    r#"[class*="ad-block"]"#,
    r#"[id*="ad-block"]"#,
    r#"[class*="adblk"]"#,
    r#"div[class*="detect"][class*="overlay"]"#,
];

/// Broad attribute-substring selectors, nuclear only.
pub const BROAD_SELECTORS: &[&str] = &[
    r#"[class*="paywall"]"#,
    r#"[id*="paywall"]"#,
    r#"[class*="modal-backdrop"]"#,
    r#"[class*="overlay"][style*="z-index"]"#,
    r#"[class*="fc-ab-root"]"#,
];

/// Inputs for one compilation.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub host: &'a str,
    pub profile: Profile,
    pub sources: &'a [ParsedFilterList],
    pub exception_sources: &'a [ParsedFilterList],
    /// Profile the user pinned for this host; disables the safe-mode clamp.
    pub site_override: Option<Profile>,
}

/// Whether the safe-mode clamp applies to `host`.
pub fn is_safe_mode_host(host: &str, exception_sources: &[ParsedFilterList]) -> bool {
    LEGACY_SAFE_HOSTS.iter().any(|d| domain_matches(host, d))
        || exception_sources
            .iter()
            .flat_map(|s| s.host_hints.iter())
            .any(|d| domain_matches(host, d))
}

/// Compile the effective rule set for `request.host`.
///
/// Deterministic: output depends only on the request.
pub fn compile(request: &CompileRequest<'_>) -> HostRuleSet {
    let host = request.host;
    let clamp_to_light =
        request.site_override.is_none() && is_safe_mode_host(host, request.exception_sources);

    let effective_profile = if clamp_to_light {
        Profile::Light
    } else {
        request.site_override.unwrap_or(request.profile)
    };
    let features = effective_profile.features();
    let include_global_cosmetics =
        effective_profile == Profile::Nuclear && features.contains(FeatureSet::GLOBAL_COSMETICS);

    let keys = matching_domain_keys(host);
    let mut selectors: BTreeSet<String> = BTreeSet::new();
    let mut scriptlets: Vec<ScriptletInvocation> = Vec::new();
    let mut seen_scriptlets: HashSet<ScriptletInvocation> = HashSet::new();

    for source in request.sources {
        // Exceptions only cancel selectors from the list that declares them.
        let excluded: HashSet<&str> = keys
            .iter()
            .filter_map(|k| source.exceptions_by_domain.get(k))
            .flatten()
            .map(String::as_str)
            .collect();

        if features.contains(FeatureSet::OVERLAY_REMOVAL) {
            for key in &keys {
                let Some(domain_selectors) = source.selectors_by_domain.get(key) else {
                    continue;
                };
                selectors.extend(
                    domain_selectors
                        .iter()
                        .filter(|s| !excluded.contains(s.as_str()))
                        .cloned(),
                );
            }
        }

        if include_global_cosmetics {
            selectors.extend(
                source
                    .global_selectors
                    .iter()
                    .filter(|s| !excluded.contains(s.as_str()))
                    .cloned(),
            );
        }

        if features.contains(FeatureSet::SCRIPTLETS) {
            for key in &keys {
                for invocation in source.scriptlets_by_domain.get(key).into_iter().flatten() {
                    if seen_scriptlets.insert(invocation.clone()) {
                        scriptlets.push(invocation.clone());
                    }
                }
            }
        }

        if features.contains(FeatureSet::GLOBAL_SCRIPTLETS) {
            for invocation in &source.global_scriptlets {
                if seen_scriptlets.insert(invocation.clone()) {
                    scriptlets.push(invocation.clone());
                }
            }
        }
    }

    let heuristic_selectors = if features.contains(FeatureSet::OVERLAY_HEURISTICS) {
        HEURISTIC_SELECTORS.iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };

    let broad_selectors = if features.contains(FeatureSet::BROAD_SELECTORS) {
        BROAD_SELECTORS.iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };

    log::debug!(
        "Compiled {} as {} (clamped: {}): {} selectors, {} scriptlets",
        host,
        effective_profile,
        clamp_to_light,
        selectors.len(),
        scriptlets.len()
    );

    HostRuleSet {
        effective_profile,
        selectors: selectors.into_iter().collect(),
        heuristic_selectors,
        broad_selectors,
        scriptlets,
        clamp_to_light,
    }
}
