//! # pycscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits from the pycscope library. Import this module to get quick access to the
//! essential types for pyc rewriting.
//!
//! ```rust,no_run
//! use pycscope::prelude::*;
//!
//! let pyc = Pyc::from_path(std::path::Path::new("module.pyc"))?;
//! let walked = pyc.rewrite(&CpythonRules::new())?;
//! # Ok::<(), pycscope::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all pycscope operations
pub use crate::Error;

/// The result type used throughout pycscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Main entry point for loading and rewriting a pyc module
pub use crate::Pyc;

/// Low-level parsing utilities
pub use crate::{File, Parser};

// ================================================================================================
// Marshal Layer
// ================================================================================================

/// One-shot walk over a raw buffer, and its result
pub use crate::marshal::{Walked, WalkStats, Walker};

/// Parsed marshal objects
pub use crate::marshal::{Mapper, MapperId, MapperKind};

/// Marshal type codes and the reference flag bit
pub use crate::marshal::{TypeCode, FLAG_REF};

// ================================================================================================
// Rules Layer
// ================================================================================================

/// The rule-set contract and the bundled implementations
pub use crate::rules::{ConfigRules, CpythonRules, Rules};

/// Container header descriptor
pub use crate::rules::{Header, HeaderFlags, Stamp};
