//! Engine instance
//!
//! Owns the configuration and the injected store, HTTP and clock
//! primitives, and wires the data flow:
//!
//! ```text
//! Fetcher -> cached text -> Parser -> Compiler -> HostRuleCache
//! ```
//!
//! One engine is built per document context. Sources are fetched one after
//! another, never in parallel.

use cp_compiler::{compile, parse_filter_list, CompileRequest, ParsedFilterList};
use cp_core::config::{ConfigError, EngineConfig};
use cp_core::hash::SignatureBuilder;
use cp_core::host::{extract_host, normalize_host};
use cp_core::scriptlet::{ApplyReport, PropertyHost, ScriptletExecutor};
use cp_core::store::{CacheIndex, CacheStore, StoreError};
use cp_core::types::{HostRuleSet, SourceCategory, SourceDescriptor, Trust};

use crate::fetcher::{FetchError, Fetcher};
use crate::host_cache::HostRuleCache;
use crate::http::{Clock, HttpClient};

/// Bumped whenever the compiled rule layout changes, so old host entries
/// stop matching.
pub const FORMAT_VERSION: u64 = 1;

const CATEGORIES: [SourceCategory; 2] = [SourceCategory::Packs, SourceCategory::Excludes];

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid host '{0}'")]
    InvalidHost(String),
}

/// Outcome counts of a forced refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub failed: usize,
}

impl UpdateReport {
    pub fn total(&self) -> usize {
        self.updated + self.unchanged + self.stale + self.failed
    }
}

/// Result of [`Engine::resolve_host`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRules {
    pub rules: HostRuleSet,
    /// Sources that failed with no cached copy to fall back on.
    pub failed_sources: Vec<String>,
}

#[derive(Default)]
struct LoadedCategory<'a> {
    texts: Vec<(&'a SourceDescriptor, String)>,
    failed: Vec<String>,
}

impl LoadedCategory<'_> {
    fn parse(&self) -> Vec<ParsedFilterList> {
        self.texts.iter().map(|(source, text)| parse_source(source, text)).collect()
    }
}

pub struct Engine<S: CacheStore, H: HttpClient, C: Clock> {
    config: EngineConfig,
    store: S,
    http: H,
    clock: C,
    executor: ScriptletExecutor,
}

impl<S: CacheStore, H: HttpClient, C: Clock> Engine<S, H, C> {
    pub fn new(config: EngineConfig, store: S, http: H, clock: C) -> Self {
        Self {
            config,
            store,
            http,
            clock,
            executor: ScriptletExecutor::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    /// Swap in a new configuration. On error the current one is kept.
    pub fn replace_config(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        self.config = config.validated()?;
        log::info!(
            "Configuration replaced: {} packs, {} excludes",
            self.config.sources.packs.len(),
            self.config.sources.excludes.len()
        );
        Ok(())
    }

    pub fn replace_config_json(&mut self, text: &str) -> Result<(), EngineError> {
        let config = EngineConfig::from_json(text)?;
        self.replace_config(config)
    }

    fn fetcher(&self) -> Fetcher<'_, S, H, C> {
        Fetcher::new(&self.store, &self.http, &self.clock, self.config.fetch.max_age_ms)
    }

    /// Signature of everything the compiled rules for `host` depend on.
    pub fn signature_for(&self, host: &str) -> String {
        match normalize_host(host) {
            Some(host) => self.signature_of(&host),
            None => self.signature_of(&host.trim().to_ascii_lowercase()),
        }
    }

    fn signature_of(&self, host: &str) -> String {
        let fetcher = self.fetcher();
        let pinned = self.config.pinned_profile(host);
        let sources = serde_json::to_string(&self.config.sources).unwrap_or_default();

        let mut builder = SignatureBuilder::new()
            .number(FORMAT_VERSION)
            .field(self.config.global_profile.as_str())
            .field(pinned.map(|p| p.as_str()).unwrap_or(""))
            .field(&sources);
        for category in CATEGORIES {
            for source in self.config.sources.get(category) {
                let fetched_at = fetcher.last_fetched(category.namespace(), &source.url);
                builder = builder.number(fetched_at.unwrap_or(0));
            }
        }
        builder.finish()
    }

    /// Compiled rules for `host`, or `None` when the host is disabled.
    pub async fn rules_for_host(&self, host: &str, force: bool) -> Result<Option<HostRuleSet>, EngineError> {
        Ok(self.resolve_host(host, force).await?.map(|resolved| resolved.rules))
    }

    /// Same as [`Engine::rules_for_host`] for the host of a document URL.
    pub async fn rules_for_url(&self, url: &str, force: bool) -> Result<Option<HostRuleSet>, EngineError> {
        Ok(self.resolve_url(url, force).await?.map(|resolved| resolved.rules))
    }

    pub async fn resolve_url(&self, url: &str, force: bool) -> Result<Option<HostRules>, EngineError> {
        let host = extract_host(url).ok_or_else(|| EngineError::InvalidHost(url.to_string()))?;
        self.resolve_host(host, force).await
    }

    /// Compiled rules for `host` along with the sources that could not be
    /// loaded. Rules compiled while a source is missing are returned but not
    /// stored, so the next call retries the fetch.
    pub async fn resolve_host(&self, host: &str, force: bool) -> Result<Option<HostRules>, EngineError> {
        let host = normalize_host(host)
            .filter(|h| !h.starts_with("*."))
            .ok_or_else(|| EngineError::InvalidHost(host.to_string()))?;

        if !self.config.is_enabled(&host) {
            log::info!("Mitigation disabled for {}", host);
            return Ok(None);
        }

        let packs = self.load_category(SourceCategory::Packs).await;
        let excludes = self.load_category(SourceCategory::Excludes).await;
        let failed_sources: Vec<String> = packs.failed.iter().chain(&excludes.failed).cloned().collect();

        if !failed_sources.is_empty() {
            log::warn!(
                "{} source(s) unavailable for {}, rules not cached: {}",
                failed_sources.len(),
                host,
                failed_sources.join(", ")
            );
            let rules = self.compile_host(&host, &packs, &excludes);
            return Ok(Some(HostRules { rules, failed_sources }));
        }

        // Fetch timestamps are final only once the sources are loaded.
        let signature = self.signature_of(&host);
        let rules = HostRuleCache::new(&self.store)
            .get_or_compute(
                &host,
                &signature,
                || async { self.compile_host(&host, &packs, &excludes) },
                force,
            )
            .await?;
        Ok(Some(HostRules { rules, failed_sources }))
    }

    fn compile_host(&self, host: &str, packs: &LoadedCategory<'_>, excludes: &LoadedCategory<'_>) -> HostRuleSet {
        let sources = packs.parse();
        let exception_sources = excludes.parse();
        compile(&CompileRequest {
            host,
            profile: self.config.global_profile,
            sources: &sources,
            exception_sources: &exception_sources,
            site_override: self.config.pinned_profile(host),
        })
    }

    /// Fetch (or reuse) every source of one category. Text is parsed only
    /// when a compile actually runs.
    async fn load_category(&self, category: SourceCategory) -> LoadedCategory<'_> {
        let fetcher = self.fetcher();
        let timeout_ms = self.config.fetch.timeout_ms;
        let mut loaded = LoadedCategory::default();

        for source in self.config.sources.get(category) {
            match fetcher.fetch(category.namespace(), &source.url, timeout_ms, false).await {
                Ok(outcome) => loaded.texts.push((source, outcome.text)),
                Err(e) => {
                    log::warn!("Skipping source {}: {}", source.url, e);
                    loaded.failed.push(source.url.clone());
                }
            }
        }
        loaded
    }

    /// Force a refresh of every declared source.
    pub async fn update_lists_now(&self) -> UpdateReport {
        let fetcher = self.fetcher();
        let timeout_ms = self.config.fetch.timeout_ms;
        let mut report = UpdateReport::default();

        for category in CATEGORIES {
            for source in self.config.sources.get(category) {
                match fetcher.fetch(category.namespace(), &source.url, timeout_ms, true).await {
                    Ok(outcome) if outcome.updated => report.updated += 1,
                    Ok(outcome) if outcome.stale => report.stale += 1,
                    Ok(_) => report.unchanged += 1,
                    Err(FetchError::FetchFailed { url, reason }) => {
                        log::warn!("Update of {} failed: {}", url, reason);
                        report.failed += 1;
                    }
                    Err(FetchError::Store(e)) => {
                        log::warn!("Update of {} failed: {}", source.url, e);
                        report.failed += 1;
                    }
                }
            }
        }

        log::info!(
            "Lists updated: {} updated, {} unchanged, {} stale, {} failed",
            report.updated,
            report.unchanged,
            report.stale,
            report.failed
        );
        report
    }

    /// Delete every key this engine has written. Returns the number removed.
    pub fn clear_caches(&self) -> Result<usize, EngineError> {
        Ok(CacheIndex::new(&self.store).clear_all()?)
    }

    /// Run the scriptlets of a compiled rule set against `target`.
    pub fn apply_scriptlets<P: PropertyHost>(&self, target: &mut P, rules: &HostRuleSet) -> ApplyReport {
        self.executor.apply(target, &rules.scriptlets)
    }
}

fn parse_source(source: &SourceDescriptor, text: &str) -> ParsedFilterList {
    let mut parsed = parse_filter_list(text);
    if source.trust == Trust::Low {
        let dropped = parsed.global_scriptlets.len()
            + parsed.scriptlets_by_domain.values().map(Vec::len).sum::<usize>();
        if dropped > 0 {
            log::debug!("Dropping {} scriptlets from low-trust source {}", dropped, source.url);
        }
        parsed.global_scriptlets.clear();
        parsed.scriptlets_by_domain.clear();
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{ManualClock, ScriptedHttp};
    use crate::http::{HttpError, HttpResponse};
    use cp_core::config::HostSettings;
    use cp_core::scriptlet::ObjectGraph;
    use cp_core::store::MemoryStore;
    use cp_core::types::Profile;

    const PACK: &str = "https://lists.example.org/anti.txt";
    const EXCLUDE: &str = "https://lists.example.org/safe.txt";

    fn config(trust: Trust) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.sources.packs.push(SourceDescriptor::filterlist(PACK, trust));
        config
    }

    fn engine(config: EngineConfig) -> Engine<MemoryStore, ScriptedHttp, ManualClock> {
        Engine::new(config, MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(1_000))
    }

    #[tokio::test]
    async fn test_rules_are_cached_until_a_source_refreshes() {
        let engine = engine(config(Trust::High));
        engine.http().push(Ok(HttpResponse::new(200, "example.com##.overlay")));

        let first = engine.rules_for_host("Sub.Example.com", false).await.unwrap().unwrap();
        assert_eq!(first.selectors, vec![".overlay"]);
        assert_eq!(first.effective_profile, Profile::Medium);

        let signature = engine.signature_for("sub.example.com");
        let again = engine.rules_for_host("sub.example.com", false).await.unwrap().unwrap();
        assert_eq!(again, first);
        assert_eq!(engine.signature_for("sub.example.com"), signature);
        assert_eq!(engine.http().calls(), 1);

        engine.clock.advance(60_000);
        engine.http().push(Ok(HttpResponse::new(200, "example.com##.paywall")));
        let report = engine.update_lists_now().await;
        assert_eq!(report, UpdateReport { updated: 1, ..Default::default() });
        assert_ne!(engine.signature_for("sub.example.com"), signature);

        let refreshed = engine.rules_for_host("sub.example.com", false).await.unwrap().unwrap();
        assert_eq!(refreshed.selectors, vec![".paywall"]);
        assert_eq!(engine.http().calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_host_returns_none_without_fetching() {
        let mut config = config(Trust::High);
        config.per_host.insert(
            "off.example".to_string(),
            HostSettings {
                enabled: Some(false),
                profile: None,
            },
        );
        let engine = engine(config);
        assert_eq!(engine.rules_for_host("off.example", false).await.unwrap(), None);
        assert_eq!(engine.http().calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_host_is_rejected() {
        let engine = engine(config(Trust::High));
        assert!(matches!(
            engine.rules_for_host("*.example.com", false).await,
            Err(EngineError::InvalidHost(_))
        ));
        assert!(matches!(
            engine.rules_for_url("not a url", false).await,
            Err(EngineError::InvalidHost(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_source_degrades_to_builtin_rules() {
        let engine = engine(config(Trust::High));
        engine.http().push(Err(HttpError::Timeout(15_000)));
        let resolved = engine.resolve_url("https://news.example/a", false).await.unwrap().unwrap();
        assert!(resolved.rules.selectors.is_empty());
        assert!(!resolved.rules.heuristic_selectors.is_empty());
        assert_eq!(resolved.failed_sources, vec![PACK.to_string()]);
    }

    #[tokio::test]
    async fn test_cold_fetch_failure_is_not_cached() {
        const DAY: u64 = 24 * 60 * 60 * 1000;
        let engine = engine(config(Trust::High));
        engine.http().push(Err(HttpError::Network("offline".to_string())));

        let first = engine.rules_for_host("a.com", false).await.unwrap().unwrap();
        assert!(first.selectors.is_empty());
        assert!(!engine.store().keys().iter().any(|k| k.starts_with("cache.host.a.com.")));

        engine.clock.advance(3 * DAY);
        engine.http().push(Ok(HttpResponse::new(200, "a.com##.wall")));
        let second = engine.resolve_host("a.com", false).await.unwrap().unwrap();
        assert_eq!(second.rules.selectors, vec![".wall"]);
        assert!(second.failed_sources.is_empty());
        assert_eq!(engine.http().calls(), 2);

        let signature = engine.signature_for("a.com");
        assert!(engine.store().contains(&format!("cache.host.a.com.{}", signature)));
    }

    #[tokio::test]
    async fn test_first_compile_is_stored_under_current_signature() {
        let engine = engine(config(Trust::High));
        engine.http().push(Ok(HttpResponse::new(200, "a.com##.wall")));
        engine.rules_for_host("a.com", false).await.unwrap();

        let host_keys: Vec<_> = engine
            .store()
            .keys()
            .into_iter()
            .filter(|k| k.starts_with("cache.host.a.com."))
            .collect();
        assert_eq!(host_keys, vec![format!("cache.host.a.com.{}", engine.signature_for("a.com"))]);
    }

    #[test]
    fn test_signature_normalizes_host() {
        let engine = engine(config(Trust::High));
        assert_eq!(engine.signature_for(" A.Com. "), engine.signature_for("a.com"));
    }

    #[tokio::test]
    async fn test_low_trust_source_loses_scriptlets() {
        let text = "a.com##.wall\na.com##+js(set-constant, adsBlocked, false)";
        let high = engine(config(Trust::High));
        high.http().push(Ok(HttpResponse::new(200, text)));
        let low = engine(config(Trust::Low));
        low.http().push(Ok(HttpResponse::new(200, text)));

        let high_rules = high.rules_for_host("a.com", false).await.unwrap().unwrap();
        let low_rules = low.rules_for_host("a.com", false).await.unwrap().unwrap();
        assert_eq!(high_rules.scriptlets.len(), 1);
        assert!(low_rules.scriptlets.is_empty());
        assert_eq!(low_rules.selectors, vec![".wall"]);
    }

    #[tokio::test]
    async fn test_exclude_source_hint_clamps_host() {
        let mut config = config(Trust::High);
        config.global_profile = Profile::Nuclear;
        config.sources.excludes.push(SourceDescriptor::filterlist(EXCLUDE, Trust::Low));
        let engine = engine(config);
        engine.http().push(Ok(HttpResponse::new(200, "bank.example##.promo")));
        engine.http().push(Ok(HttpResponse::new(200, "bank.example#@#.promo-x")));

        let rules = engine.rules_for_host("bank.example", false).await.unwrap().unwrap();
        assert!(rules.clamp_to_light);
        assert_eq!(rules.effective_profile, Profile::Light);
    }

    #[tokio::test]
    async fn test_pinned_profile_changes_signature() {
        let mut engine = engine(config(Trust::High));
        let before = engine.signature_for("a.com");
        let mut config = engine.config().clone();
        config.per_host.insert(
            "a.com".to_string(),
            HostSettings {
                enabled: None,
                profile: Some(Profile::Nuclear),
            },
        );
        engine.replace_config(config).unwrap();
        assert_ne!(engine.signature_for("a.com"), before);
        assert_eq!(engine.signature_for("b.com"), engine.signature_for("b.com"));
    }

    #[test]
    fn test_invalid_config_keeps_previous() {
        let mut engine = engine(config(Trust::High));
        let err = engine.replace_config_json(r#"{"sources": {"packs": "https://x"}}"#);
        assert!(matches!(err, Err(EngineError::Config(_))));
        assert_eq!(engine.config().sources.packs[0].url, PACK);

        engine
            .replace_config_json(r#"{"globalProfile": "light"}"#)
            .unwrap();
        assert_eq!(engine.config().global_profile, Profile::Light);
        assert!(engine.config().sources.packs.is_empty());
    }

    #[tokio::test]
    async fn test_clear_caches_removes_everything_written() {
        let engine = engine(config(Trust::High));
        engine.store().set("user.setting", "keep").unwrap();
        engine.http().push(Ok(HttpResponse::new(200, "a.com##.x")));
        engine.rules_for_host("a.com", false).await.unwrap();

        assert!(engine.clear_caches().unwrap() > 0);
        assert_eq!(engine.store().len(), 1);
        assert!(engine.store().contains("user.setting"));
    }

    #[tokio::test]
    async fn test_update_counts_stale_and_failed() {
        let mut config = config(Trust::High);
        config.sources.excludes.push(SourceDescriptor::filterlist(EXCLUDE, Trust::Low));
        let engine = engine(config);
        engine.http().push(Ok(HttpResponse::new(200, "a.com##.x")));
        engine.http().push(Err(HttpError::Network("down".to_string())));
        let first = engine.update_lists_now().await;
        assert_eq!(first, UpdateReport { updated: 1, failed: 1, ..Default::default() });

        engine.http().push(Err(HttpError::Network("down".to_string())));
        engine.http().push(Ok(HttpResponse::new(200, "b.com#@#.y")));
        let second = engine.update_lists_now().await;
        assert_eq!(second, UpdateReport { updated: 1, stale: 1, ..Default::default() });
        assert_eq!(second.total(), 2);
    }

    #[tokio::test]
    async fn test_apply_scriptlets_from_compiled_rules() {
        let engine = engine(config(Trust::High));
        engine.http().push(Ok(HttpResponse::new(
            200,
            "a.com##+js(set-constant, adsBlocked, false)\na.com##+js(unknown-op, x)",
        )));
        let rules = engine.rules_for_host("a.com", false).await.unwrap().unwrap();

        let mut window = ObjectGraph::new();
        let report = engine.apply_scriptlets(&mut window, &rules);
        assert_eq!(report, ApplyReport { applied: 1, ignored: 1, failed: 0 });
    }
}
