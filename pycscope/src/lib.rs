// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # pycscope
//!
//! A library for restoring tampered CPython `.pyc` modules to a form downstream
//! decompilers accept. `pycscope` parses the versioned marshal object graph embedded
//! in a pyc container - including the string-interning and back-reference mechanisms -
//! and performs in-place, size-preserving type-code and opcode substitutions driven by
//! a user-supplied rule set.
//!
//! Obfuscators ship pyc files whose marshal stream or instruction stream has been
//! rewritten with private byte values. A naive marshal decoder rejects such inputs;
//! `pycscope` instead mirrors the input into an output buffer and walks the graph once,
//! repairing selected bytes as it goes. Every byte it does not substitute is preserved
//! exactly, so reference and interning indices never drift.
//!
//! # Architecture
//!
//! - **File Layer**: memory-mapped or in-memory pyc access and bounds-checked parsing
//! - **Marshal Layer**: the type-code dispatcher, per-kind mappers, intern and
//!   reference tables, and the version-keyed code-object layouts
//! - **Rewriter**: the forward-sweep opcode substitution pass over instruction strings
//! - **Rules Layer**: the [`crate::rules::Rules`] contract, the built-in CPython rules
//!   and the declarative `.pycrules` config loader
//!
//! ## Key Components
//!
//! - [`crate::Pyc`] - Main entry point for loading and rewriting a pyc module
//! - [`crate::marshal::Walker`] - One-shot walk over a marshal payload
//! - [`crate::marshal::Mapper`] - One parsed marshal object with its on-wire frame
//! - [`crate::rules`] - Rule-set plumbing: compatibility, header, remap tables, hooks
//! - [`crate::Error`] and [`crate::Result`] - Comprehensive error handling
//!
//! # Usage Examples
//!
//! ## Identity pass-through
//!
//! ```rust,no_run
//! use pycscope::{Pyc, rules::CpythonRules};
//!
//! let pyc = Pyc::from_path(std::path::Path::new("module.pyc"))?;
//! let walked = pyc.rewrite(&CpythonRules::new())?;
//!
//! // With no remap rules the output is byte-identical to the input.
//! assert_eq!(walked.data, pyc.data());
//! # Ok::<(), pycscope::Error>(())
//! ```
//!
//! ## Substitution driven by a rules file
//!
//! ```rust,no_run
//! use pycscope::{Pyc, rules::ConfigRules};
//!
//! let rules = ConfigRules::from_path(std::path::Path::new("default.pycrules"))?;
//! let pyc = Pyc::from_path(std::path::Path::new("obfuscated.pyc"))?;
//!
//! let walked = pyc.rewrite(&rules)?;
//! std::fs::write("restored.pyc", &walked.data)?;
//!
//! println!(
//!     "{} type codes and {} opcodes substituted",
//!     walked.stats.typecode_swaps, walked.stats.opcode_swaps
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # What pycscope does NOT do
//!
//! The library neither decompiles, disassembles, executes nor validates bytecode.
//! The opcode rewriter is a byte-for-byte substitution sweep that never interprets
//! instruction arguments, and the walker never re-serializes the object graph.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

mod pyc;

/// Marshal-stream walking and rewriting.
///
/// The heart of the library: the type-code dispatcher, the per-kind mappers,
/// the intern and reference tables, the version-keyed code-object layouts and
/// the opcode rewriter. Most users drive this through [`crate::Pyc::rewrite`];
/// [`crate::marshal::Walker`] is the lower-level one-shot API over a raw buffer.
pub mod marshal;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// Rule-set plumbing: the [`crate::rules::Rules`] contract, the built-in CPython
/// rules and the declarative `.pycrules` config loader.
///
/// The core never executes user code; a rule set is either the built-in
/// [`crate::rules::CpythonRules`] or a [`crate::rules::ConfigRules`] table loaded
/// from disk. Everything the walker asks of a rule set goes through the
/// [`crate::rules::Rules`] trait, so embedders can supply their own implementation.
pub mod rules;

pub use crate::error::Error;
pub use crate::file::parser::Parser;
pub use crate::file::File;
pub use crate::pyc::Pyc;

/// The result type used throughout pycscope.
pub type Result<T> = std::result::Result<T, Error>;
