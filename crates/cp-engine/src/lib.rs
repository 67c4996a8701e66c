//! Clearpage Engine
//!
//! Remote source fetching, the per-host compiled rule cache, and the
//! [`Engine`] instance that ties them to the parser and compiler.
//!
//! The engine never touches the network or the clock directly: both are
//! injected through [`HttpClient`] and [`Clock`], next to the
//! [`cp_core::CacheStore`] that holds everything persisted.

pub mod engine;
pub mod fetcher;
pub mod host_cache;
pub mod http;

pub use engine::{Engine, EngineError, HostRules, UpdateReport, FORMAT_VERSION};
pub use fetcher::{FetchError, FetchOutcome, Fetcher};
pub use host_cache::HostRuleCache;
pub use http::{Clock, HttpClient, HttpError, HttpRequest, HttpResponse, SystemClock};
