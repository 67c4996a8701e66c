//! Clearpage Core Library
//!
//! Shared building blocks of the Clearpage anti-detection rule engine: the
//! data model, profile feature sets, host matching, the key/value cache
//! store with its explicit key index, the persisted configuration, and the
//! whitelisted scriptlet executor.
//!
//! # Modules
//!
//! - `hash`: Murmur3 hashing for cache keys and signatures
//! - `host`: Host normalization and rule-domain matching
//! - `store`: Cache store abstraction, in-memory backend and `CacheIndex`
//! - `config`: Persisted engine configuration and validation
//! - `scriptlet`: Closed registry of property mutations
//! - `types`: Shared type definitions

pub mod config;
pub mod hash;
pub mod host;
pub mod scriptlet;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig, FetchPolicy, HostSettings, Sources};
pub use hash::{hash64, hash_url, Hash64, SignatureBuilder};
pub use host::{domain_matches, extract_host, normalize_host};
pub use scriptlet::{ApplyReport, ObjectGraph, PropertyHost, ScriptletError, ScriptletExecutor};
pub use store::{CacheIndex, CacheStore, MemoryStore, StoreError};
pub use types::{
    CachedResource, FeatureSet, HostRuleSet, Profile, ScriptletInvocation, SourceCategory,
    SourceDescriptor, SourceKind, Trust, Validator,
};
