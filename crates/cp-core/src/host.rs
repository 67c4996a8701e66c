//! Host utilities: normalization, rule-domain matching and suffix walking
//!
//! A rule domain `d` matches host `h` when `h == d` or `h` ends with `.d`.
//! A `*.`-prefixed domain matches strict subdomains only.
//!
//! # Examples
//!
//! ```
//! use cp_core::host::domain_matches;
//!
//! assert!(domain_matches("sub.example.com", "example.com"));
//! assert!(domain_matches("example.com", "example.com"));
//! assert!(!domain_matches("example.com", "*.example.com"));
//! assert!(!domain_matches("badexample.com", "example.com"));
//! ```

/// Lower-case and validate a host or rule domain.
///
/// Accepts an optional leading `*.`; rejects anything that is not a
/// plausible DNS name.
pub fn normalize_host(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_end_matches('.');
    let (wildcard, rest) = match trimmed.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let rest = rest.trim_start_matches('.');
    if rest.is_empty() {
        return None;
    }

    if !rest
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return None;
    }

    let lower = rest.to_ascii_lowercase();
    Some(if wildcard { format!("*.{}", lower) } else { lower })
}

/// Check whether a single rule domain matches `host`.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    if let Some(base) = domain.strip_prefix("*.") {
        return host.len() > base.len() + 1 && is_dot_suffix(host, base);
    }
    host == domain || (host.len() > domain.len() && is_dot_suffix(host, domain))
}

/// Check whether any member of a comma-separated domain list matches `host`.
pub fn domain_list_matches(host: &str, list: &str) -> bool {
    list.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .any(|d| domain_matches(host, &d.to_ascii_lowercase()))
}

fn is_dot_suffix(host: &str, base: &str) -> bool {
    host.ends_with(base) && host.as_bytes()[host.len() - base.len() - 1] == b'.'
}

/// Every rule-domain key that matches `host`, most specific first.
///
/// Lets callers do map lookups instead of scanning every domain entry.
pub fn matching_domain_keys(host: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for suffix in walk_host_suffixes(host) {
        if suffix != host {
            keys.push(format!("*.{}", suffix));
        }
        keys.push(suffix.to_string());
    }
    keys
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator for suffix-walking a host from full name to its last label.
pub struct HostSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = get_parent_domain(result);
        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    HostSuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
    }
}

/// Host extraction from a document URL without allocations.
pub fn extract_host(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for i in scheme_end..bytes.len() {
        if bytes[i] == b'@' {
            host_start = i + 1;
            break;
        }
        if matches!(bytes[i], b'/' | b'?' | b'#') {
            break;
        }
    }

    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    if host_start >= host_end {
        return None;
    }
    Some(&url[host_start..host_end])
}
