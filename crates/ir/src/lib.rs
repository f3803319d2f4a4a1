//! mill IR substrate
//!
//! The shared foundation of the mill middle-end: a tagged tree
//! representation in the GENERIC tradition. Nodes live in an append-only
//! [`Arena`] addressed by dense [`NodeId`]s; constants, declarations and
//! types are interned so handle equality is value equality for them.
//! The three engines (preprocessor, simplifier, analyzers) depend on this
//! crate and on nothing else of each other.

pub mod arena;
pub mod code;
pub mod diagnostics;
pub mod location;
pub mod node;

pub use arena::Arena;
pub use code::{Code, CodeClass};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use location::SourceLocation;
pub use node::{Node, NodeFlags, NodeId, Payload};
