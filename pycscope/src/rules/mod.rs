//! Rule-set plumbing for the marshal walker.
//!
//! A rule set parameterizes everything about a rewrite that depends on which
//! obfuscator mangled the input: the compatibility check, header interpretation,
//! type-code and opcode substitution tables, and the optional per-step hooks.
//! The walker only ever talks to the [`Rules`] trait; concrete rule sets are the
//! built-in [`CpythonRules`] (identity - no substitutions) and [`ConfigRules`]
//! (a declarative table loaded from a `.pycrules` JSON file). The core never
//! executes user-supplied code.
//!
//! # Example
//!
//! ```rust,no_run
//! use pycscope::{Pyc, rules::ConfigRules};
//!
//! let rules = ConfigRules::from_str(r#"{ "typecodes": { "0x5A": { "t": 122 } } }"#)?;
//! let pyc = Pyc::from_path(std::path::Path::new("obfuscated.pyc"))?;
//! let walked = pyc.rewrite(&rules)?;
//! # Ok::<(), pycscope::Error>(())
//! ```

pub(crate) mod config;
pub(crate) mod cpython;

pub use config::ConfigRules;
pub use cpython::{CpythonRules, HeaderFlags, MAGIC_VERSIONS};

use crate::Result;

/// A parsed pyc container header.
///
/// Produced by [`Rules::parse_header`]. The walker only consumes `size` (where the
/// marshal payload begins) and `version`; the remaining fields are carried for
/// front ends that want to display or verify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// The four magic bytes at offset 0
    pub magic: [u8; 4],
    /// Byte offset at which the marshal payload begins
    pub size: usize,
    /// CPython version encoded as `major * 100 + minor` (e.g. 311 for 3.11)
    pub version: u16,
    /// The bit-field word present in 3.7+ headers
    pub flags: HeaderFlags,
    /// The source stamp that follows the flags word
    pub stamp: Stamp,
}

/// The source stamp variants a pyc header can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stamp {
    /// Hash-based pyc: eight bytes of source hash (3.7+, `flags & 1`)
    Hash([u8; 8]),
    /// Timestamp-based pyc: mtime plus, from 3.3 on, the source size
    Timestamp {
        /// Source mtime as stored in the header
        timestamp: u32,
        /// Marshalled source size; absent before 3.3
        source_size: Option<u32>,
    },
}

/// A type-code substitution entry.
///
/// `to` replaces the matched code byte in the output. When `skip` is set the
/// dispatcher does not descend into the object: it emits an opaque mapper covering
/// `skip` bytes in total (type byte included) and resumes after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeCodeRemap {
    /// Replacement code byte
    pub to: u8,
    /// Total consumed-byte override; `None` parses the body normally
    pub skip: Option<usize>,
}

/// An opcode substitution entry.
///
/// `to`, when present, is written over the matched opcode bytes in the output.
/// `stride` overrides the version-derived instruction stride for this opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeRemap {
    /// Replacement bytes, exactly `opcode_size` long; `None` leaves the output alone
    pub to: Option<Vec<u8>>,
    /// Cursor advance override in bytes
    pub stride: Option<usize>,
}

/// Cursor control returned by the per-step hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    /// Continue the walk at the given offset instead of the current one
    Jump(usize),
    /// Terminate the walk with [`crate::Error::Aborted`]
    Abort,
}

/// The contract between a rule set and the marshal walker.
///
/// Every method except [`Rules::is_compatible`] and [`Rules::parse_header`] has a
/// default that amounts to "no substitution, no opinion", so a minimal rule set
/// only has to know how to recognize and describe its container format.
///
/// # Buffer discipline
///
/// Methods receive the immutable input and, where they are allowed to edit, the
/// mutable output mirror. Header repair ([`Rules::parse_header`]) and the trailer
/// ([`Rules::finalize_trailer`]) are the only sanctioned places a rule set touches
/// the output directly; everything else is expressed through the remap queries and
/// applied by the walker, which keeps all edits size-preserving.
pub trait Rules {
    /// Decide whether this rule set understands the input at all.
    ///
    /// Returning `false` aborts the walk with [`crate::Error::Incompatible`]
    /// before anything is parsed.
    fn is_compatible(&self, input: &[u8]) -> bool;

    /// Parse (and, if needed, repair) the container header.
    ///
    /// May edit `output` in place to fix a damaged header; edits must not change
    /// the buffer length.
    ///
    /// # Errors
    /// Returns an error if the header is too short or internally inconsistent.
    fn parse_header(&self, input: &[u8], output: &mut [u8]) -> Result<Header>;

    /// Finalize the output after the walk and return the length to persist.
    ///
    /// The returned length must not exceed `output.len()`; the default keeps
    /// everything.
    ///
    /// # Errors
    /// Returns an error if the rule set cannot produce a consistent trailer.
    fn finalize_trailer(&self, _input: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        Ok(output.len())
    }

    /// Width of one opcode in bytes. Almost always 1.
    fn opcode_size(&self) -> usize {
        1
    }

    /// Query the type-code substitution table.
    ///
    /// Consulted twice per dispatch: first with the raw byte (including the
    /// reference flag bit), then with the masked 7-bit code.
    fn remap_typecode(&self, _code: u8) -> Option<TypeCodeRemap> {
        None
    }

    /// Query the opcode substitution table with `opcode_size` raw bytes.
    fn remap_opcode(&self, _opcode: &[u8]) -> Option<OpcodeRemap> {
        None
    }

    /// Claim the object at `offset` as an opaque region of the returned total size.
    ///
    /// Runs before the built-in mapper construction; a `Some(n)` answer makes the
    /// dispatcher skip `n` bytes (type byte included) without descending. Used for
    /// obfuscator-private records no standard mapper understands.
    fn substitute_mapper(&self, _typecode: u8, _input: &[u8], _offset: usize) -> Option<usize> {
        None
    }

    /// Hook running before every dispatcher read.
    fn pre_step(&self, _input: &[u8], _output: &mut [u8], _offset: usize) -> Option<StepControl> {
        None
    }

    /// Hook running after every dispatcher read.
    fn post_step(&self, _input: &[u8], _output: &mut [u8], _offset: usize) -> Option<StepControl> {
        None
    }

    /// Debug name for an opcode byte; `<N>` when the rule set has no mnemonic table.
    fn opcode_name(&self, opcode: u8) -> String {
        format!("<{opcode}>")
    }
}
