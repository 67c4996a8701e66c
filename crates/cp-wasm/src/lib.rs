//! WebAssembly bindings for Clearpage
//!
//! One engine per document context, held in a thread-local. Async entry
//! points return promises; every failure is reported as a rejected
//! `JsValue` and nothing throws into the page.

pub mod dom;
pub mod fetch;
pub mod js_host;
pub mod storage;

use std::cell::RefCell;
use std::rc::Rc;

use cp_core::config::EngineConfig;
use cp_core::host::extract_host;
use cp_core::types::HostRuleSet;
use cp_engine::{Engine, HostRules};
use wasm_bindgen::prelude::*;

use crate::fetch::{JsClock, JsFetch};
use crate::js_host::WindowHost;
use crate::storage::LocalStorageStore;

type PageEngine = Engine<LocalStorageStore, JsFetch, JsClock>;

thread_local! {
    static ENGINE: RefCell<Option<Rc<PageEngine>>> = const { RefCell::new(None) };
}

fn current_engine() -> Result<Rc<PageEngine>, JsValue> {
    ENGINE
        .with(|slot| slot.borrow().clone())
        .ok_or_else(|| JsValue::from_str("Engine not initialized. Call init() first."))
}

fn install(engine: PageEngine) {
    ENGINE.with(|slot| *slot.borrow_mut() = Some(Rc::new(engine)));
}

fn to_js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Create the engine from a JSON configuration and a fetch function.
#[wasm_bindgen]
pub fn init(config_json: &str, fetch: js_sys::Function) -> Result<(), JsValue> {
    if is_initialized() {
        return Err(JsValue::from_str("Already initialized. Use configure() to change settings."));
    }
    let config = EngineConfig::from_json(config_json).map_err(to_js_error)?;
    let store = LocalStorageStore::from_window()?;
    install(Engine::new(config, store, JsFetch::new(fetch), JsClock));
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.with(|slot| slot.borrow().is_some())
}

/// Replace the configuration. A rejected document leaves the current one
/// in place. Calls already in flight finish with the old configuration.
#[wasm_bindgen]
pub fn configure(config_json: &str) -> Result<(), JsValue> {
    let engine = current_engine()?;
    let config = EngineConfig::from_json(config_json).map_err(to_js_error)?;
    let store = LocalStorageStore::from_window()?;
    install(Engine::new(config, store, engine.http().clone(), JsClock));
    Ok(())
}

/// Current configuration as JSON text.
#[wasm_bindgen]
pub fn get_config() -> Result<String, JsValue> {
    Ok(current_engine()?.config().to_json())
}

/// Compiled rules for `host`, or `null` when mitigation is disabled there.
/// `failedSources` lists sources that could not be loaded; such a result is
/// not cached.
#[wasm_bindgen]
pub async fn rules_for_host(host: String, force: bool) -> Result<JsValue, JsValue> {
    let engine = current_engine()?;
    let resolved = engine.resolve_host(&host, force).await.map_err(to_js_error)?;
    rules_to_js(resolved.as_ref())
}

#[wasm_bindgen]
pub async fn rules_for_url(url: String, force: bool) -> Result<JsValue, JsValue> {
    let engine = current_engine()?;
    let resolved = engine.resolve_url(&url, force).await.map_err(to_js_error)?;
    rules_to_js(resolved.as_ref())
}

fn rules_to_js(resolved: Option<&HostRules>) -> Result<JsValue, JsValue> {
    let Some(resolved) = resolved else {
        return Ok(JsValue::NULL);
    };
    let json = serde_json::to_string(&resolved.rules).map_err(to_js_error)?;
    let result = js_sys::JSON::parse(&json)?;
    let failed: js_sys::Array = resolved.failed_sources.iter().map(|url| JsValue::from_str(url)).collect();
    js_sys::Reflect::set(&result, &"failedSources".into(), &failed)?;
    Ok(result)
}

fn parse_rule_set(rule_set_json: &str) -> Result<HostRuleSet, String> {
    serde_json::from_str(rule_set_json).map_err(|e| format!("Invalid rule set: {}", e))
}

fn rules_from_json(rule_set_json: &str) -> Result<HostRuleSet, JsValue> {
    parse_rule_set(rule_set_json).map_err(|e| JsValue::from_str(&e))
}

/// Force a refresh of every source.
#[wasm_bindgen]
pub async fn update_lists_now() -> Result<JsValue, JsValue> {
    let engine = current_engine()?;
    let report = engine.update_lists_now().await;

    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"updated".into(), &JsValue::from(report.updated as u32));
    let _ = js_sys::Reflect::set(&result, &"unchanged".into(), &JsValue::from(report.unchanged as u32));
    let _ = js_sys::Reflect::set(&result, &"stale".into(), &JsValue::from(report.stale as u32));
    let _ = js_sys::Reflect::set(&result, &"failed".into(), &JsValue::from(report.failed as u32));
    Ok(result.into())
}

#[wasm_bindgen]
pub fn clear_caches() -> Result<u32, JsValue> {
    let removed = current_engine()?.clear_caches().map_err(to_js_error)?;
    Ok(removed as u32)
}

/// Current signature for `host`. The host is normalized the same way
/// `rules_for_host` does it.
#[wasm_bindgen]
pub fn signature_for(host: &str) -> Result<String, JsValue> {
    Ok(current_engine()?.signature_for(host))
}

/// Apply the scriptlets of a rule set (as returned by `rules_for_host`)
/// to `window`.
#[wasm_bindgen]
pub fn apply_scriptlets(rule_set_json: &str) -> Result<JsValue, JsValue> {
    let engine = current_engine()?;
    let rules = rules_from_json(rule_set_json)?;
    let report = engine.apply_scriptlets(&mut WindowHost::new(), &rules);

    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"applied".into(), &JsValue::from(report.applied as u32));
    let _ = js_sys::Reflect::set(&result, &"ignored".into(), &JsValue::from(report.ignored as u32));
    let _ = js_sys::Reflect::set(&result, &"failed".into(), &JsValue::from(report.failed as u32));
    Ok(result.into())
}

/// Remove elements matching a rule set and restore scrolling. Does not need
/// an initialized engine.
#[wasm_bindgen]
pub fn mitigate(rule_set_json: &str) -> Result<u32, JsValue> {
    let rules = rules_from_json(rule_set_json)?;
    let document = dom::current_document()?;
    Ok(dom::mitigate(&document, &rules))
}

#[wasm_bindgen]
pub fn extract_host_js(url: &str) -> Option<String> {
    extract_host(url).map(|h| h.to_string())
}

// =============================================================================
// Console logging
// =============================================================================

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[clearpage] {}", record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            log::Level::Info => web_sys::console::info_1(&line),
            log::Level::Debug | log::Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Route engine logs to the browser console at `level`
/// (`error`, `warn`, `info`, `debug`, `trace` or `off`).
#[wasm_bindgen]
pub fn set_log_level(level: &str) -> Result<(), JsValue> {
    let filter: log::LevelFilter = level
        .parse()
        .map_err(|_| JsValue::from_str(&format!("Unknown log level '{}'", level)))?;
    // Already installed on repeat calls; only the level changes.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::types::Profile;

    #[test]
    fn test_parse_rule_set_accepts_engine_output() {
        let mut rules = HostRuleSet::empty(Profile::Nuclear);
        rules.selectors.push(".wall".to_string());
        let json = serde_json::to_string(&rules).unwrap();
        assert!(json.contains("\"effectiveProfile\":\"nuclear\""));
        assert_eq!(parse_rule_set(&json).unwrap(), rules);
    }

    #[test]
    fn test_parse_rule_set_ignores_failed_sources_field() {
        let rules = HostRuleSet::empty(Profile::Light);
        let mut value = serde_json::to_value(&rules).unwrap();
        value["failedSources"] = serde_json::json!(["https://lists.example.org/a.txt"]);
        assert_eq!(parse_rule_set(&value.to_string()).unwrap(), rules);
    }

    #[test]
    fn test_parse_rule_set_rejects_garbage() {
        let err = parse_rule_set("{\"selectors\": 1}").unwrap_err();
        assert!(err.starts_with("Invalid rule set"));
    }
}
