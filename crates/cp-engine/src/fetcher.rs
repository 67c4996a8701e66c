//! Remote source fetcher
//!
//! Conditional fetches with ETag / Last-Modified revalidation, a max-age
//! window that skips the network entirely, and a stale fallback when the
//! network fails. Every successful cycle is written back to the store in one
//! uninterrupted sequence of writes (no await in between).

use std::collections::BTreeMap;

use cp_core::hash::hash_url;
use cp_core::store::{get_json, keys, CacheIndex, CacheStore, StoreError};
use cp_core::types::{CachedResource, Validator};

use crate::http::{Clock, HttpClient, HttpRequest, HttpResponse};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network failure with no cached copy to fall back to.
    #[error("fetch-failed: {url}: {reason}")]
    FetchFailed { url: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// A new body was received and stored.
    pub updated: bool,
    /// The network failed and `text` is the last good copy.
    pub stale: bool,
    pub text: String,
    pub validator: Validator,
}

pub struct Fetcher<'a, S: CacheStore, H: HttpClient, C: Clock> {
    store: &'a S,
    http: &'a H,
    clock: &'a C,
    max_age_ms: u64,
}

impl<'a, S: CacheStore, H: HttpClient, C: Clock> Fetcher<'a, S, H, C> {
    pub fn new(store: &'a S, http: &'a H, clock: &'a C, max_age_ms: u64) -> Self {
        Self {
            store,
            http,
            clock,
            max_age_ms,
        }
    }

    /// Last good copy of `(namespace, url)`, if any.
    pub fn cached(&self, namespace: &str, url: &str) -> Option<CachedResource> {
        let text = self.store.get(&keys::remote_data(namespace, url))?;
        Some(CachedResource {
            text,
            validator: Validator {
                etag: self.store.get(&keys::remote_etag(namespace, url)),
                last_modified: self.store.get(&keys::remote_last_modified(namespace, url)),
            },
            fetched_at: self.last_fetched(namespace, url).unwrap_or_default(),
        })
    }

    /// When `(namespace, url)` was last fetched or revalidated.
    pub fn last_fetched(&self, namespace: &str, url: &str) -> Option<u64> {
        self.timestamps(namespace).get(&hash_url(url)).copied()
    }

    fn timestamps(&self, namespace: &str) -> BTreeMap<String, u64> {
        get_json(self.store, &keys::remote_timestamps(namespace)).unwrap_or_default()
    }

    pub async fn fetch(
        &self,
        namespace: &str,
        url: &str,
        timeout_ms: u64,
        force: bool,
    ) -> Result<FetchOutcome, FetchError> {
        self.register_keys(namespace, url)?;
        let cached = self.cached(namespace, url);

        if !force {
            if let Some(cached) = &cached {
                let age = self.clock.now_ms().saturating_sub(cached.fetched_at);
                if age < self.max_age_ms {
                    log::debug!("{} is fresh ({}ms old), skipping network", url, age);
                    return Ok(outcome(cached, false, false));
                }
            }
        }

        let mut headers = Vec::new();
        if !force {
            if let Some(cached) = &cached {
                if let Some(etag) = &cached.validator.etag {
                    headers.push(("If-None-Match".to_string(), etag.clone()));
                }
                if let Some(last_modified) = &cached.validator.last_modified {
                    headers.push(("If-Modified-Since".to_string(), last_modified.clone()));
                }
            }
        }

        let request = HttpRequest {
            url: url.to_string(),
            headers,
            timeout_ms,
        };

        let reason = match self.http.get(&request).await {
            Ok(response) if response.is_not_modified() => match &cached {
                Some(cached) => {
                    if let Err(e) = self.touch(namespace, url) {
                        log::warn!("Could not refresh timestamp for {}: {}", url, e);
                    }
                    log::info!("{} not modified", url);
                    return Ok(outcome(cached, false, false));
                }
                None => "304 without a cached copy".to_string(),
            },
            Ok(response) if response.is_success() => {
                let validator = validator_from(&response);
                // The body is still usable for this cycle if persisting it fails.
                if let Err(e) = self.commit(namespace, url, &response.body, &validator) {
                    log::warn!("Could not persist {}: {}", url, e);
                }
                log::info!("Fetched {} ({} bytes)", url, response.body.len());
                return Ok(FetchOutcome {
                    updated: true,
                    stale: false,
                    text: response.body,
                    validator,
                });
            }
            Ok(response) => format!("HTTP {}", response.status),
            Err(e) => e.to_string(),
        };

        match cached {
            Some(cached) => {
                log::warn!("Fetching {} failed ({}), using cached copy", url, reason);
                Ok(outcome(&cached, false, true))
            }
            None => {
                log::warn!("Fetching {} failed ({}), no cached copy", url, reason);
                Err(FetchError::FetchFailed {
                    url: url.to_string(),
                    reason,
                })
            }
        }
    }

    fn register_keys(&self, namespace: &str, url: &str) -> Result<(), StoreError> {
        let index = CacheIndex::new(self.store);
        index.register(&keys::remote_etag(namespace, url))?;
        index.register(&keys::remote_last_modified(namespace, url))?;
        index.register(&keys::remote_data(namespace, url))?;
        index.register(&keys::remote_timestamps(namespace))
    }

    fn commit(&self, namespace: &str, url: &str, text: &str, validator: &Validator) -> Result<(), StoreError> {
        self.store.set(&keys::remote_data(namespace, url), text)?;
        write_optional(self.store, &keys::remote_etag(namespace, url), validator.etag.as_deref())?;
        write_optional(
            self.store,
            &keys::remote_last_modified(namespace, url),
            validator.last_modified.as_deref(),
        )?;
        self.touch(namespace, url)
    }

    fn touch(&self, namespace: &str, url: &str) -> Result<(), StoreError> {
        let mut timestamps = self.timestamps(namespace);
        timestamps.insert(hash_url(url), self.clock.now_ms());
        cp_core::store::set_json(self.store, &keys::remote_timestamps(namespace), &timestamps)
    }
}

fn outcome(cached: &CachedResource, updated: bool, stale: bool) -> FetchOutcome {
    FetchOutcome {
        updated,
        stale,
        text: cached.text.clone(),
        validator: cached.validator.clone(),
    }
}

fn validator_from(response: &HttpResponse) -> Validator {
    Validator {
        etag: response.header("etag").map(ToOwned::to_owned),
        last_modified: response.header("last-modified").map(ToOwned::to_owned),
    }
}

fn write_optional(store: &impl CacheStore, key: &str, value: Option<&str>) -> Result<(), StoreError> {
    match value {
        Some(value) => store.set(key, value),
        None => store.delete(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{ManualClock, ScriptedHttp};
    use crate::http::HttpError;
    use cp_core::store::{MemoryStore, INDEX_KEY};

    const URL: &str = "https://lists.example.org/anti.txt";
    const DAY: u64 = 24 * 60 * 60 * 1000;

    #[tokio::test]
    async fn test_first_fetch_stores_body_and_validators() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(1_000));
        http.push(Ok(HttpResponse::new(200, "a.com##.x")
            .with_header("ETag", "\"v1\"")
            .with_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);

        let result = fetcher.fetch("packs", URL, 5_000, false).await.unwrap();
        assert!(result.updated && !result.stale);
        assert_eq!(result.validator.etag.as_deref(), Some("\"v1\""));

        let cached = fetcher.cached("packs", URL).unwrap();
        assert_eq!(cached.text, "a.com##.x");
        assert_eq!(cached.fetched_at, 1_000);
        assert_eq!(http.last_request().unwrap().timeout_ms, 5_000);
        assert!(http.last_request().unwrap().headers.is_empty());

        let index = CacheIndex::new(&store).keys();
        assert!(index.contains(&keys::remote_data("packs", URL)));
        assert!(index.contains(&keys::remote_timestamps("packs")));
        assert!(store.contains(INDEX_KEY));
    }

    #[tokio::test]
    async fn test_fresh_copy_skips_network() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(0));
        http.push(Ok(HttpResponse::new(200, "body")));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);
        fetcher.fetch("packs", URL, 1_000, false).await.unwrap();

        clock.advance(DAY - 1);
        let again = fetcher.fetch("packs", URL, 1_000, false).await.unwrap();
        assert!(!again.updated);
        assert_eq!(again.text, "body");
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_modified_keeps_text_and_refreshes_timestamp() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(0));
        http.push(Ok(HttpResponse::new(200, "original").with_header("etag", "\"v1\"")));
        http.push(Ok(HttpResponse::new(304, "")));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);
        fetcher.fetch("packs", URL, 1_000, false).await.unwrap();

        clock.advance(DAY + 1);
        let result = fetcher.fetch("packs", URL, 1_000, false).await.unwrap();
        assert!(!result.updated && !result.stale);
        assert_eq!(result.text, "original");

        let request = http.last_request().unwrap();
        assert!(request
            .headers
            .contains(&("If-None-Match".to_string(), "\"v1\"".to_string())));
        let cached = fetcher.cached("packs", URL).unwrap();
        assert_eq!(cached.text, "original");
        assert_eq!(cached.fetched_at, DAY + 1);
    }

    #[tokio::test]
    async fn test_force_skips_validators_and_max_age() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(0));
        http.push(Ok(HttpResponse::new(200, "v1").with_header("etag", "\"1\"")));
        http.push(Ok(HttpResponse::new(200, "v2")));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);
        fetcher.fetch("packs", URL, 1_000, false).await.unwrap();

        let forced = fetcher.fetch("packs", URL, 1_000, true).await.unwrap();
        assert!(forced.updated);
        assert!(http.last_request().unwrap().headers.is_empty());
        // The new response carried no ETag, so the old one is gone.
        assert_eq!(fetcher.cached("packs", URL).unwrap().validator, Validator::default());
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_stale_copy() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(0));
        http.push(Ok(HttpResponse::new(200, "good")));
        http.push(Err(HttpError::Timeout(1_000)));
        http.push(Ok(HttpResponse::new(503, "")));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);
        fetcher.fetch("packs", URL, 1_000, false).await.unwrap();

        for _ in 0..2 {
            let result = fetcher.fetch("packs", URL, 1_000, true).await.unwrap();
            assert!(result.stale && !result.updated);
            assert_eq!(result.text, "good");
        }
        assert_eq!(fetcher.last_fetched("packs", URL), Some(0));
    }

    #[tokio::test]
    async fn test_failure_without_cache_is_fetch_failed() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(0));
        http.push(Err(HttpError::Network("refused".to_string())));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);

        let err = fetcher.fetch("excludes", URL, 1_000, false).await.unwrap_err();
        assert!(matches!(err, FetchError::FetchFailed { .. }));
        assert!(err.to_string().starts_with("fetch-failed"));
        assert!(fetcher.cached("excludes", URL).is_none());
    }

    #[tokio::test]
    async fn test_namespaces_are_separate() {
        let (store, http, clock) = (MemoryStore::new(), ScriptedHttp::default(), ManualClock::at(0));
        http.push(Ok(HttpResponse::new(200, "packs body")));
        let fetcher = Fetcher::new(&store, &http, &clock, DAY);
        fetcher.fetch("packs", URL, 1_000, false).await.unwrap();
        assert!(fetcher.cached("excludes", URL).is_none());
    }
}
