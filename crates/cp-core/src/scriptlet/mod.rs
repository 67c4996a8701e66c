//! Scriptlet executor
//!
//! Scriptlets are applied through a closed registry of property mutations.
//! Nothing here evaluates text as code: an invocation names one of the
//! registered operations, its first argument is parsed into a
//! [`PropertyPath`], and the operation performs exactly one definition on the
//! resolved owner through a [`PropertyHost`].
//!
//! Unknown names are ignored. A failing invocation is logged and counted;
//! it never stops the invocations after it.

pub mod graph;
pub mod path;

pub use graph::ObjectGraph;
pub use path::{resolve, PropertyPath, Resolution};

use crate::types::ScriptletInvocation;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptletError {
    #[error("invalid property path '{0}'")]
    InvalidPath(String),
    #[error("scriptlet '{name}' is missing argument {position}")]
    MissingArgument { name: &'static str, position: usize },
    #[error("unsupported constant value '{0}'")]
    UnsupportedValue(String),
    #[error("property '{0}' is not configurable")]
    NotConfigurable(String),
    #[error("cannot reach '{0}': an intermediate value is not an object")]
    Unresolved(String),
    #[error("host error: {0}")]
    Host(String),
}

// =============================================================================
// Property Host
// =============================================================================

/// Result of looking up one own-or-inherited property without invoking it.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<H> {
    Missing,
    Object(H),
    /// A primitive, function or accessor; cannot be walked through.
    Value,
}

/// Accessor installed by the abort-on-property operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    ThrowOnRead,
    ThrowOnWrite,
}

/// The object model scriptlets mutate: the page's global object, or an
/// in-memory [`ObjectGraph`].
pub trait PropertyHost {
    type Handle: Clone;

    fn root(&self) -> Self::Handle;
    fn lookup(&self, owner: &Self::Handle, key: &str) -> Result<Lookup<Self::Handle>, ScriptletError>;
    fn create_object(&mut self, owner: &Self::Handle, key: &str) -> Result<Self::Handle, ScriptletError>;
    fn define_value(&mut self, owner: &Self::Handle, key: &str, value: &Literal) -> Result<(), ScriptletError>;
    fn define_trap(&mut self, owner: &Self::Handle, key: &str, trap: Trap) -> Result<(), ScriptletError>;
}

// =============================================================================
// Literals
// =============================================================================

/// Values `set-constant` may assign.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    EmptyString,
    EmptyArray,
    EmptyObject,
    NoopFunc,
    TrueFunc,
    FalseFunc,
}

impl Literal {
    pub fn parse(raw: &str) -> Option<Self> {
        let value = match raw.trim() {
            "undefined" => Self::Undefined,
            "null" => Self::Null,
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            "''" | "\"\"" | "emptyStr" => Self::EmptyString,
            "[]" | "emptyArr" => Self::EmptyArray,
            "{}" | "emptyObj" => Self::EmptyObject,
            "noopFunc" => Self::NoopFunc,
            "trueFunc" => Self::TrueFunc,
            "falseFunc" => Self::FalseFunc,
            other => {
                let n: f64 = other.parse().ok()?;
                if !n.is_finite() {
                    return None;
                }
                Self::Number(n)
            }
        };
        Some(value)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// The closed set of operations. Adding one is a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptletOp {
    SetConstant,
    AbortOnPropertyRead,
    AbortOnPropertyWrite,
}

impl ScriptletOp {
    pub const ALL: [ScriptletOp; 3] = [
        ScriptletOp::SetConstant,
        ScriptletOp::AbortOnPropertyRead,
        ScriptletOp::AbortOnPropertyWrite,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "set-constant" | "set" => Some(Self::SetConstant),
            "abort-on-property-read" | "aopr" => Some(Self::AbortOnPropertyRead),
            "abort-on-property-write" | "aopw" => Some(Self::AbortOnPropertyWrite),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetConstant => "set-constant",
            Self::AbortOnPropertyRead => "abort-on-property-read",
            Self::AbortOnPropertyWrite => "abort-on-property-write",
        }
    }

    fn run<P: PropertyHost>(&self, host: &mut P, args: &[String]) -> Result<(), ScriptletError> {
        let raw_path = args.first().ok_or(ScriptletError::MissingArgument {
            name: self.name(),
            position: 1,
        })?;
        let path = PropertyPath::parse(raw_path)?;

        // Validate the value before touching the host.
        let literal = match self {
            Self::SetConstant => {
                let raw = args.get(1).ok_or(ScriptletError::MissingArgument {
                    name: self.name(),
                    position: 2,
                })?;
                Some(Literal::parse(raw).ok_or_else(|| ScriptletError::UnsupportedValue(raw.clone()))?)
            }
            _ => None,
        };

        let (owner, key) = match resolve(host, &path)? {
            Resolution::Resolved { owner, key } => (owner, key),
            Resolution::Unresolved { segment } => return Err(ScriptletError::Unresolved(segment)),
        };

        match (self, literal) {
            (Self::SetConstant, Some(literal)) => host.define_value(&owner, &key, &literal),
            (Self::AbortOnPropertyRead, _) => host.define_trap(&owner, &key, Trap::ThrowOnRead),
            (Self::AbortOnPropertyWrite, _) => host.define_trap(&owner, &key, Trap::ThrowOnWrite),
            (Self::SetConstant, None) => Err(ScriptletError::MissingArgument {
                name: self.name(),
                position: 2,
            }),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    /// Names not in the registry.
    pub ignored: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptletExecutor;

impl ScriptletExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        ScriptletOp::from_name(name).is_some()
    }

    pub fn apply<P: PropertyHost>(&self, host: &mut P, invocations: &[ScriptletInvocation]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for invocation in invocations {
            let Some(op) = ScriptletOp::from_name(&invocation.name) else {
                log::debug!("Ignoring unregistered scriptlet '{}'", invocation.name);
                report.ignored += 1;
                continue;
            };

            match op.run(host, &invocation.args) {
                Ok(()) => {
                    log::debug!("Applied {}({})", op.name(), invocation.args.join(", "));
                    report.applied += 1;
                }
                Err(e) => {
                    log::warn!("Scriptlet {} failed: {}", op.name(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}
