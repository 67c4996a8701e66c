//! Clearpage Filter List Compiler
//!
//! This crate parses cosmetic / scriptlet filter lists and compiles them
//! into the effective rule set for one host.

pub mod compiler;
pub mod parser;

pub use compiler::{compile, is_safe_mode_host, CompileRequest};
pub use parser::{classify_line, parse_filter_list, LineKind, ParsedFilterList};
