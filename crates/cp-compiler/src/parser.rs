use std::collections::{BTreeMap, BTreeSet};

use cp_core::host::normalize_host;
use cp_core::types::ScriptletInvocation;

const EXCEPTION_MARKER: &str = "#@#";
const SCRIPTLET_JS_MARKER: &str = "##+js(";
const SCRIPTLET_CALL_MARKER: &str = "#%#//scriptlet(";
const COSMETIC_MARKER: &str = "##";

/// Rules extracted from one filter list. Built once, then read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFilterList {
    pub selectors_by_domain: BTreeMap<String, BTreeSet<String>>,
    pub global_selectors: BTreeSet<String>,
    pub exceptions_by_domain: BTreeMap<String, BTreeSet<String>>,
    pub scriptlets_by_domain: BTreeMap<String, Vec<ScriptletInvocation>>,
    pub global_scriptlets: Vec<ScriptletInvocation>,
    pub host_hints: BTreeSet<String>,
}

impl ParsedFilterList {
    pub fn is_empty(&self) -> bool {
        self.selectors_by_domain.is_empty()
            && self.global_selectors.is_empty()
            && self.exceptions_by_domain.is_empty()
            && self.scriptlets_by_domain.is_empty()
            && self.global_scriptlets.is_empty()
    }

    pub fn stats(&self) -> ParseStats {
        ParseStats {
            domain_selectors: self.selectors_by_domain.values().map(BTreeSet::len).sum(),
            global_selectors: self.global_selectors.len(),
            exceptions: self.exceptions_by_domain.values().map(BTreeSet::len).sum(),
            domain_scriptlets: self.scriptlets_by_domain.values().map(Vec::len).sum(),
            global_scriptlets: self.global_scriptlets.len(),
            host_hints: self.host_hints.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub domain_selectors: usize,
    pub global_selectors: usize,
    pub exceptions: usize,
    pub domain_scriptlets: usize,
    pub global_scriptlets: usize,
    pub host_hints: usize,
}

/// Classification of one filter-list line, decided before any field
/// extraction. Slices borrow from the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Cosmetic { domains: &'a str, selector: &'a str },
    Exception { domains: &'a str, selector: &'a str },
    /// `domain##+js(name, args...)`; `call` is the text after the opening paren.
    ScriptletJs { domains: &'a str, call: &'a str },
    /// `domain#%#//scriptlet('name', 'args'...)`.
    ScriptletCall { domains: &'a str, call: &'a str },
    Unrecognized,
}

/// Classify a trimmed line. Markers are tried in a fixed order and the
/// first one present wins, so each line gets exactly one kind.
pub fn classify_line(line: &str) -> LineKind<'_> {
    if line.is_empty() || is_comment_line(line) {
        return LineKind::Unrecognized;
    }

    if let Some(pos) = line.find(EXCEPTION_MARKER) {
        return LineKind::Exception {
            domains: &line[..pos],
            selector: line[pos + EXCEPTION_MARKER.len()..].trim(),
        };
    }

    if let Some(pos) = line.find(SCRIPTLET_JS_MARKER) {
        return LineKind::ScriptletJs {
            domains: &line[..pos],
            call: &line[pos + SCRIPTLET_JS_MARKER.len()..],
        };
    }

    if let Some(pos) = line.find(SCRIPTLET_CALL_MARKER) {
        return LineKind::ScriptletCall {
            domains: &line[..pos],
            call: &line[pos + SCRIPTLET_CALL_MARKER.len()..],
        };
    }

    if let Some(pos) = line.find(COSMETIC_MARKER) {
        return LineKind::Cosmetic {
            domains: &line[..pos],
            selector: line[pos + COSMETIC_MARKER.len()..].trim(),
        };
    }

    LineKind::Unrecognized
}

/// Parse a filter list. Never fails; lines this engine does not target are
/// skipped.
pub fn parse_filter_list(text: &str) -> ParsedFilterList {
    let mut parsed = ParsedFilterList::default();
    let mut skipped = 0usize;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        let accepted = match classify_line(line) {
            LineKind::Exception { domains, selector } => add_exception(&mut parsed, domains, selector),
            LineKind::ScriptletJs { domains, call } | LineKind::ScriptletCall { domains, call } => {
                add_scriptlet(&mut parsed, domains, call)
            }
            LineKind::Cosmetic { domains, selector } => add_cosmetic(&mut parsed, domains, selector),
            LineKind::Unrecognized => false,
        };
        if !accepted && !line.is_empty() {
            skipped += 1;
        }
    }

    log::debug!(
        "Parsed filter list: {:?}, {} lines skipped",
        parsed.stats(),
        skipped
    );
    parsed
}

fn add_exception(parsed: &mut ParsedFilterList, domains: &str, selector: &str) -> bool {
    if selector.is_empty() {
        return false;
    }
    // Exceptions require a domain.
    let Some(domains) = parse_domains(domains).filter(|d| !d.is_empty()) else {
        return false;
    };

    for domain in domains {
        parsed
            .exceptions_by_domain
            .entry(domain.clone())
            .or_default()
            .insert(selector.to_string());
        parsed.host_hints.insert(domain);
    }
    true
}

fn add_scriptlet(parsed: &mut ParsedFilterList, domains: &str, call: &str) -> bool {
    let Some(domains) = parse_domains(domains) else {
        return false;
    };
    let Some(end) = find_closing_paren(call) else {
        return false;
    };
    let Some(invocation) = parse_call(&call[..end]) else {
        return false;
    };

    if domains.is_empty() {
        parsed.global_scriptlets.push(invocation);
        return true;
    }

    for domain in domains {
        parsed
            .scriptlets_by_domain
            .entry(domain.clone())
            .or_default()
            .push(invocation.clone());
        parsed.host_hints.insert(domain);
    }
    true
}

fn add_cosmetic(parsed: &mut ParsedFilterList, domains: &str, selector: &str) -> bool {
    // `##^` is HTML filtering, not a CSS selector.
    if selector.is_empty() || selector.starts_with('^') {
        return false;
    }
    let Some(domains) = parse_domains(domains) else {
        return false;
    };

    if domains.is_empty() {
        parsed.global_selectors.insert(selector.to_string());
        return true;
    }

    for domain in domains {
        parsed
            .selectors_by_domain
            .entry(domain.clone())
            .or_default()
            .insert(selector.to_string());
        parsed.host_hints.insert(domain);
    }
    true
}

fn is_comment_line(line: &str) -> bool {
    if line.starts_with('!') || line.starts_with('[') {
        return true;
    }
    line.starts_with('#')
        && !line.starts_with(COSMETIC_MARKER)
        && !line.starts_with(EXCEPTION_MARKER)
        && !line.starts_with("#%#")
}

/// Parse the left-hand domain list.
///
/// `Some(vec![])` means no domain was written (a generic rule). `None` means
/// domains were written but none survived (all negated or invalid); such a
/// line is dropped rather than widened to every host.
fn parse_domains(text: &str) -> Option<Vec<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Vec::new());
    }

    let domains: Vec<String> = text
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty() && !d.starts_with('~'))
        .filter_map(normalize_host)
        .collect();

    if domains.is_empty() {
        None
    } else {
        Some(domains)
    }
}

/// Position of the parenthesis closing a scriptlet call, ignoring
/// parentheses inside quotes.
fn find_closing_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match (c, quote) {
            ('\\', _) => escape_next = true,
            (q, Some(open)) if q == open => quote = None,
            (_, Some(_)) => {}
            ('"' | '\'' | '`', None) => quote = Some(c),
            ('(', None) => depth += 1,
            (')', None) => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Split call content into a name and arguments. Commas inside matching
/// quotes are kept; the quotes themselves are removed.
fn parse_call(content: &str) -> Option<ScriptletInvocation> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for c in content.chars() {
        if escape_next {
            current.push(c);
            escape_next = false;
            continue;
        }

        match (c, quote) {
            ('\\', _) => escape_next = true,
            (q, Some(open)) if q == open => quote = None,
            (_, Some(_)) => current.push(c),
            ('"' | '\'' | '`', None) => quote = Some(c),
            (',', None) => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let last = current.trim().to_string();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }

    let mut parts = parts.into_iter();
    let name = normalize_scriptlet_name(&parts.next()?);
    if name.is_empty() {
        return None;
    }

    Some(ScriptletInvocation {
        name,
        args: parts.collect(),
    })
}

/// Normalize scriptlet name spellings across both dialects.
fn normalize_scriptlet_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_prefix("ubo-").unwrap_or(name);
    let name = name.strip_suffix(".js").unwrap_or(name);
    match name {
        "set" => "set-constant".to_string(),
        "aopr" => "abort-on-property-read".to_string(),
        "aopw" => "abort-on-property-write".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cosmetic_rules() {
        let parsed = parse_filter_list("example.com,Other.org##.overlay\n##.generic-wall\n");
        assert_eq!(parsed.selectors_by_domain["example.com"], set(&[".overlay"]));
        assert_eq!(parsed.selectors_by_domain["other.org"], set(&[".overlay"]));
        assert_eq!(parsed.global_selectors, set(&[".generic-wall"]));
        assert_eq!(parsed.host_hints, set(&["example.com", "other.org"]));
    }

    #[test]
    fn test_exception_requires_domain() {
        let parsed = parse_filter_list("example.com#@#.overlay\n#@#.everywhere\n");
        assert_eq!(parsed.exceptions_by_domain["example.com"], set(&[".overlay"]));
        assert_eq!(parsed.exceptions_by_domain.len(), 1);
        assert!(parsed.host_hints.contains("example.com"));
    }

    #[test]
    fn test_scriptlet_js_dialect() {
        let parsed = parse_filter_list("##+js(set-constant,foo.bar,true)\nsite.net##+js(aopr, detect)");
        assert_eq!(
            parsed.global_scriptlets,
            vec![ScriptletInvocation::new("set-constant", &["foo.bar", "true"])]
        );
        assert_eq!(
            parsed.scriptlets_by_domain["site.net"],
            vec![ScriptletInvocation::new("abort-on-property-read", &["detect"])]
        );
    }

    #[test]
    fn test_scriptlet_call_dialect() {
        let parsed =
            parse_filter_list("site.net#%#//scriptlet('ubo-set-constant.js', 'a.b', 'false')");
        assert_eq!(
            parsed.scriptlets_by_domain["site.net"],
            vec![ScriptletInvocation::new("set-constant", &["a.b", "false"])]
        );
    }

    #[test]
    fn test_quoted_commas_are_not_separators() {
        let parsed = parse_filter_list(r#"x.com##+js(set-constant, "a,b", 'c, (d)')"#);
        assert_eq!(
            parsed.scriptlets_by_domain["x.com"],
            vec![ScriptletInvocation::new("set-constant", &["a,b", "c, (d)"])]
        );
    }

    #[test]
    fn test_escaped_comma() {
        let parsed = parse_filter_list(r"x.com##+js(set-constant, a\,b, 1)");
        assert_eq!(parsed.scriptlets_by_domain["x.com"][0].args, vec!["a,b", "1"]);
    }

    #[test]
    fn test_skips_comments_and_malformed_lines() {
        let text = "! comment\n[Adblock Plus 2.0]\n# hash comment\n\nx.com##+js(set-constant, a\n\
                    ||ads.example.com^\nx.com#?#div:has(.ad)\n~neg.com##.only-negated\nx.com##^script\nx.com##";
        let parsed = parse_filter_list(text);
        assert!(parsed.is_empty());
        assert!(parsed.host_hints.is_empty());
    }

    #[test]
    fn test_negated_domains_are_dropped() {
        let parsed = parse_filter_list("a.com,~b.a.com##.wall");
        assert_eq!(parsed.selectors_by_domain.keys().collect::<Vec<_>>(), vec!["a.com"]);
    }

    #[test]
    fn test_classification_order() {
        assert!(matches!(classify_line("a.com#@#+js(x)"), LineKind::Exception { .. }));
        assert!(matches!(classify_line("a.com##+js(x)"), LineKind::ScriptletJs { .. }));
        assert!(matches!(
            classify_line("a.com#%#//scriptlet('x')"),
            LineKind::ScriptletCall { .. }
        ));
        assert_eq!(
            classify_line("a.com##div.ad"),
            LineKind::Cosmetic { domains: "a.com", selector: "div.ad" }
        );
        assert_eq!(classify_line("##.ad"), LineKind::Cosmetic { domains: "", selector: ".ad" });
        assert_eq!(classify_line("# note"), LineKind::Unrecognized);
        assert_eq!(classify_line("||a.com^"), LineKind::Unrecognized);
    }

    #[test]
    fn test_parse_is_idempotent() {
        let text = "a.com##.x\na.com#@#.y\n##+js(aopw, z)\nb.org#%#//scriptlet('set', 'q', 'null')\n##.g";
        assert_eq!(parse_filter_list(text), parse_filter_list(text));
    }

    #[test]
    fn test_wildcard_domain_kept() {
        let parsed = parse_filter_list("*.example.com##.banner");
        assert!(parsed.selectors_by_domain.contains_key("*.example.com"));
    }

    #[test]
    fn test_empty_call_is_skipped() {
        let parsed = parse_filter_list("x.com##+js()\n##+js( )");
        assert!(parsed.is_empty());
    }
}
