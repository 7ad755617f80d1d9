//! Marshal-stream walking and rewriting.
//!
//! CPython's marshal format is a recursive, self-referential, version-sensitive
//! serialization of code objects and their transitive constants. This module
//! parses it the way the rewriter needs it parsed: tolerantly, with byte-exact
//! frame tracking, and with every edit applied in place to a mirror buffer so
//! reference and interning indices never drift.
//!
//! # Architecture
//!
//! - [`crate::marshal::Walker`] - owns the buffers and tables, drives one walk
//! - The dispatcher (`reader`) - per-object protocol: remap, reference
//!   short-circuit, mapper construction, pre-order registration
//! - [`crate::marshal::Mapper`] / [`crate::marshal::MapperKind`] - one parsed
//!   object each, arena-indexed by [`crate::marshal::MapperId`]
//! - [`crate::marshal::CodeLayout`] - the per-version code-object field table
//! - The rewriter - forward opcode sweep over instruction strings
//! - [`crate::marshal::InternTable`] / [`crate::marshal::ReferenceTable`] - the
//!   append-only side tables back-references resolve through
//!
//! # Ordering guarantees
//!
//! Flagged mappers register in the reference table pre-order (the moment their
//! type byte is read), interned strings in the intern table post-order (after
//! their body parsed), and back-references never descend. These three rules are
//! what make self-referential code objects resolve correctly.

pub(crate) mod code;
pub(crate) mod mapper;
pub(crate) mod reader;
pub(crate) mod rewriter;
pub(crate) mod tables;
pub(crate) mod typecode;
pub(crate) mod walker;

pub use code::{CodeLayout, CodeObject, WORDCODE_VERSION};
pub use mapper::{Mapper, MapperId, MapperKind};
pub use rewriter::{rewrite_opcodes, RewriteCount, HAVE_ARGUMENT};
pub use tables::{InternTable, ReferenceTable};
pub use typecode::{TypeCode, FLAG_REF};
pub use walker::{Walked, WalkStats, Walker};
