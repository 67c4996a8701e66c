//! Typed property paths and the owner resolver

use super::{Lookup, PropertyHost, ScriptletError};

/// Segments that would reach object internals rather than page state.
const FORBIDDEN_SEGMENTS: &[&str] = &["__proto__", "prototype", "constructor"];

/// A validated dotted property path such as `ads.config.enabled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    pub fn parse(raw: &str) -> Result<Self, ScriptletError> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("window.").unwrap_or(raw);
        if raw.is_empty() {
            return Err(ScriptletError::InvalidPath(raw.to_string()));
        }

        let mut segments = Vec::new();
        for segment in raw.split('.') {
            let valid = !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'-')
                && !FORBIDDEN_SEGMENTS.contains(&segment);
            if !valid {
                return Err(ScriptletError::InvalidPath(raw.to_string()));
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Intermediate segments leading to the owner object.
    pub fn owner_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The final property name.
    pub fn key(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }
}

impl std::fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Outcome of walking a path to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<H> {
    Resolved { owner: H, key: String },
    /// An intermediate segment holds a non-object value.
    Unresolved { segment: String },
}

/// Walk `path` from the host root, creating missing intermediate objects.
///
/// Only reads data slots and defines plain objects; accessors on the way
/// are never invoked.
pub fn resolve<P: PropertyHost>(
    host: &mut P,
    path: &PropertyPath,
) -> Result<Resolution<P::Handle>, ScriptletError> {
    let mut owner = host.root();
    for segment in path.owner_segments() {
        owner = match host.lookup(&owner, segment)? {
            Lookup::Object(handle) => handle,
            Lookup::Missing => host.create_object(&owner, segment)?,
            Lookup::Value => {
                return Ok(Resolution::Unresolved {
                    segment: segment.clone(),
                })
            }
        };
    }

    Ok(Resolution::Resolved {
        owner,
        key: path.key().to_string(),
    })
}
