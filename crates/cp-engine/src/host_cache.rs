//! Per-host cache of compiled rule sets, keyed by source signature.

use std::future::Future;

use serde::{Deserialize, Serialize};

use cp_core::store::{get_json, keys, CacheIndex, CacheStore, StoreError};
use cp_core::types::HostRuleSet;

/// Stored form of one compiled rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HostRecord {
    host: String,
    signature: String,
    rules: HostRuleSet,
}

pub struct HostRuleCache<'a, S: CacheStore> {
    store: &'a S,
}

impl<'a, S: CacheStore> HostRuleCache<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Stored rule set for exactly this `host` and `signature`.
    pub fn get(&self, host: &str, signature: &str) -> Option<HostRuleSet> {
        let record: HostRecord = get_json(self.store, &keys::host_rules(host, signature))?;
        (record.host == host && record.signature == signature).then_some(record.rules)
    }

    /// Return the cached rule set, or run `compute` and store its result.
    ///
    /// `force` skips the read but still writes the fresh result back.
    pub async fn get_or_compute<F, Fut>(
        &self,
        host: &str,
        signature: &str,
        compute: F,
        force: bool,
    ) -> Result<HostRuleSet, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HostRuleSet>,
    {
        if !force {
            if let Some(rules) = self.get(host, signature) {
                log::debug!("Host cache hit for {} ({})", host, signature);
                return Ok(rules);
            }
        }

        log::debug!("Host cache miss for {} ({}), compiling", host, signature);
        let rules = compute().await;
        self.put(host, signature, &rules)?;
        Ok(rules)
    }

    fn put(&self, host: &str, signature: &str, rules: &HostRuleSet) -> Result<(), StoreError> {
        let record = HostRecord {
            host: host.to_string(),
            signature: signature.to_string(),
            rules: rules.clone(),
        };
        let key = keys::host_rules(host, signature);
        let index = CacheIndex::new(self.store);
        index.set_json(&key, &record)?;
        self.prune(&index, host, &key)
    }

    /// Drop entries for `host` stored under any other signature.
    fn prune(&self, index: &CacheIndex<'_, S>, host: &str, keep: &str) -> Result<(), StoreError> {
        let prefix = keys::host_rules(host, "");
        let stale: Vec<String> = index
            .keys()
            .into_iter()
            .filter(|k| k != keep)
            .filter(|k| {
                // Signatures never contain '.', so this excludes longer hosts
                // that share the prefix.
                k.strip_prefix(&prefix)
                    .is_some_and(|sig| !sig.is_empty() && !sig.contains('.'))
            })
            .collect();

        for key in &stale {
            index.remove(key)?;
        }
        if !stale.is_empty() {
            log::debug!("Pruned {} outdated rule sets for {}", stale.len(), host);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::store::MemoryStore;
    use cp_core::types::Profile;
    use std::cell::Cell;

    fn rules(profile: Profile) -> HostRuleSet {
        let mut rules = HostRuleSet::empty(profile);
        rules.selectors.push(".overlay".to_string());
        rules
    }

    #[tokio::test]
    async fn test_same_signature_computes_once() {
        let store = MemoryStore::new();
        let cache = HostRuleCache::new(&store);
        let counter = Cell::new(0);
        let calls = &counter;
        let compute = move || async move {
            calls.set(calls.get() + 1);
            rules(Profile::Medium)
        };

        let first = cache.get_or_compute("x.com", "sig1", compute, false).await.unwrap();
        let second = cache.get_or_compute("x.com", "sig1", compute, false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        cache.get_or_compute("x.com", "sig2", compute, false).await.unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_force_recomputes_and_writes() {
        let store = MemoryStore::new();
        let cache = HostRuleCache::new(&store);
        cache
            .get_or_compute("x.com", "sig", || async { rules(Profile::Light) }, false)
            .await
            .unwrap();
        let forced = cache
            .get_or_compute("x.com", "sig", || async { rules(Profile::Nuclear) }, true)
            .await
            .unwrap();
        assert_eq!(forced.effective_profile, Profile::Nuclear);
        assert_eq!(cache.get("x.com", "sig").unwrap().effective_profile, Profile::Nuclear);
    }

    #[tokio::test]
    async fn test_writes_are_indexed_and_old_signatures_pruned() {
        let store = MemoryStore::new();
        let cache = HostRuleCache::new(&store);
        for (host, sig) in [("x.com", "aaaa"), ("x.com.evil", "bbbb"), ("x.com", "cccc")] {
            cache
                .get_or_compute(host, sig, || async { rules(Profile::Medium) }, false)
                .await
                .unwrap();
        }

        let index = CacheIndex::new(&store).keys();
        assert_eq!(
            index,
            vec![keys::host_rules("x.com.evil", "bbbb"), keys::host_rules("x.com", "cccc")]
        );
        assert!(!store.contains(&keys::host_rules("x.com", "aaaa")));
        assert!(cache.get("x.com.evil", "bbbb").is_some());
    }

    #[test]
    fn test_mismatched_record_is_a_miss() {
        let store = MemoryStore::new();
        let record = HostRecord {
            host: "other.com".to_string(),
            signature: "sig".to_string(),
            rules: rules(Profile::Light),
        };
        cp_core::store::set_json(&store, &keys::host_rules("x.com", "sig"), &record).unwrap();
        assert!(HostRuleCache::new(&store).get("x.com", "sig").is_none());
    }
}
