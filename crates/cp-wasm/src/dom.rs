//! DOM mitigation: remove matching elements and restore scrolling.

use cp_core::types::HostRuleSet;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Element, HtmlElement};

/// Style properties pages use to lock scrolling behind an overlay.
const SCROLL_LOCK_PROPERTIES: &[&str] = &["overflow", "overflow-x", "overflow-y", "position"];

/// Remove every element matching the rule set's selectors and unlock
/// scrolling. Invalid selectors are skipped. Returns the number of removed
/// elements.
pub fn mitigate(document: &Document, rules: &HostRuleSet) -> u32 {
    let mut removed = 0;
    for selector in rules.all_selectors() {
        removed += remove_matching(document, selector);
    }
    restore_scroll(document);
    if removed > 0 {
        log::info!("Removed {} elements", removed);
    }
    removed
}

fn remove_matching(document: &Document, selector: &str) -> u32 {
    let nodes = match document.query_selector_all(selector) {
        Ok(nodes) => nodes,
        Err(_) => {
            log::debug!("Skipping invalid selector {}", selector);
            return 0;
        }
    };

    let mut removed = 0;
    for i in 0..nodes.length() {
        if let Some(element) = nodes.get(i).and_then(|n| n.dyn_into::<Element>().ok()) {
            element.remove();
            removed += 1;
        }
    }
    removed
}

/// Clear overflow/position locks on `<html>` and `<body>`.
pub fn restore_scroll(document: &Document) {
    let root = document
        .document_element()
        .and_then(|e| e.dyn_into::<HtmlElement>().ok());
    for element in root.into_iter().chain(document.body()) {
        let style = element.style();
        for property in SCROLL_LOCK_PROPERTIES {
            if let Err(e) = style.remove_property(property) {
                log::debug!("Could not clear {}: {:?}", property, e);
            }
        }
    }
}

pub fn current_document() -> Result<Document, JsValue> {
    web_sys::window()
        .and_then(|w| w.document())
        .ok_or_else(|| JsValue::from_str("No document available"))
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use cp_core::types::Profile;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn removes_matches_and_unlocks_body() {
        let document = current_document().unwrap();
        let body = document.body().unwrap();
        body.set_inner_html(r#"<div class="overlay"></div><div class="adblock-wall"></div><p>text</p>"#);
        body.style().set_property("overflow", "hidden").unwrap();

        let mut rules = HostRuleSet::empty(Profile::Medium);
        rules.selectors = vec![".overlay".to_string(), "[[invalid".to_string()];
        rules.heuristic_selectors = vec![r#"[class*="adblock"]"#.to_string(), ".overlay".to_string()];

        assert_eq!(mitigate(&document, &rules), 2);
        assert_eq!(body.child_element_count(), 1);
        assert_eq!(body.style().get_property_value("overflow").unwrap(), "");
    }
}
