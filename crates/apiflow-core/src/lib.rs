//! apiflow core
//!
//! Compiles declarative API test definitions into executable flows.
//!
//! This crate provides:
//! - Definition model for api/test documents with tagged step/stage kinds
//! - Step compiler and stage scheduler targeting an explicit statement tree
//! - Reference resolution for `namespace:name` tokens with type-preserving
//!   substitution
//! - Output extraction from JSON/XML/text response envelopes
//! - A tree-walking async runner over an injected transport

pub mod compile;
pub mod definition;
pub mod error;
pub mod extract;
pub mod format;
pub mod imports;
pub mod ir;
pub mod ops;
pub mod resolve;
pub mod runtime;
pub mod xml;

pub use compile::compile;
pub use definition::{ApiDefinition, Definition, Stage, Step, TestDefinition};
pub use error::{CompileError, RunError, TransportError};
pub use extract::{extract_outputs, BodyKind, ResponseEnvelope};
pub use imports::{detect_kind, parse_csv_table, ImportKind, ImportSource};
pub use ir::{Program, Routine, Stmt};
pub use ops::{parse_check, CheckExpr, Comparator};
pub use resolve::{resolve_refs, Bindings};
pub use runtime::{ApiRequest, RunReport, Runner, Transport};
