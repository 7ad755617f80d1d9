//! The top-level walk over a pyc module.
//!
//! [`Walker`] owns the two buffers and both side tables for the duration of a
//! single walk: it runs the rules' compatibility check and header parser,
//! positions the dispatcher at the marshal root, drives one depth-first pre-order
//! descent, invokes the trailer finalizer and hands everything back as a
//! [`Walked`] report. The input buffer is never mutated; the output starts as an
//! exact copy and only receives size-preserving substitutions until the trailer
//! finalizer, the sole place allowed to shorten it.

use crate::{
    marshal::{
        mapper::{resolve_id, Mapper, MapperId},
        tables::{InternTable, ReferenceTable},
    },
    rules::{Header, Rules},
    Error, Result,
};

/// Counters accumulated over one walk.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkStats {
    /// Mappers constructed
    pub mappers: usize,
    /// Code objects encountered
    pub code_objects: usize,
    /// Type-code bytes substituted in the output
    pub typecode_swaps: usize,
    /// Opcode byte sequences substituted in the output
    pub opcode_swaps: usize,
    /// Instructions visited by the opcode rewriter
    pub opcodes_visited: usize,
}

/// The result of a completed walk.
///
/// `data` is the finalized output, already truncated to the length the trailer
/// finalizer chose; the mapper arena and both side tables are kept for callers
/// that want to inspect what was parsed.
#[derive(Debug)]
pub struct Walked {
    /// The rewritten module bytes to persist
    pub data: Vec<u8>,
    /// The parsed container header
    pub header: Header,
    /// The marshal root mapper (a code object in well-formed modules)
    pub root: MapperId,
    /// Every mapper constructed during the walk, arena-ordered
    pub mappers: Vec<Mapper>,
    /// The intern table entries in insertion order
    pub interns: Vec<MapperId>,
    /// The reference table entries in insertion order
    pub refs: Vec<MapperId>,
    /// Walk counters
    pub stats: WalkStats,
}

impl Walked {
    /// Access a mapper by id
    #[must_use]
    pub fn mapper(&self, id: MapperId) -> &Mapper {
        &self.mappers[id.index()]
    }

    /// Follow back-references until a concrete mapper is reached
    #[must_use]
    pub fn resolve(&self, id: MapperId) -> MapperId {
        resolve_id(&self.mappers, id)
    }
}

/// One-shot walk over a raw pyc byte stream.
///
/// Most callers go through [`crate::Pyc::rewrite`]; `Walker` is the lower-level
/// API for buffers that never touched a file.
///
/// # Example
///
/// ```rust
/// use pycscope::{marshal::Walker, rules::CpythonRules};
///
/// // 3.11 header followed by a single None object.
/// let mut input = vec![0xA7, 0x0D, 0x0D, 0x0A];
/// input.extend_from_slice(&[0u8; 12]);
/// input.push(0x4E);
///
/// let rules = CpythonRules::new();
/// let walked = Walker::new(&input, &rules).walk()?;
/// assert_eq!(walked.data, input);
/// # Ok::<(), pycscope::Error>(())
/// ```
pub struct Walker<'a, R: Rules + ?Sized> {
    pub(crate) input: &'a [u8],
    pub(crate) output: Vec<u8>,
    pub(crate) rules: &'a R,
    pub(crate) version: u16,
    pub(crate) mappers: Vec<Mapper>,
    pub(crate) interns: InternTable,
    pub(crate) refs: ReferenceTable,
    pub(crate) depth: usize,
    pub(crate) stats: WalkStats,
}

impl<'a, R: Rules + ?Sized> Walker<'a, R> {
    /// Create a walker over `input`, mirroring it into a fresh output buffer
    ///
    /// ## Arguments
    /// * 'input' - The full pyc byte stream, header included
    /// * 'rules' - The rule set driving substitutions
    #[must_use]
    pub fn new(input: &'a [u8], rules: &'a R) -> Self {
        Walker {
            input,
            output: input.to_vec(),
            rules,
            version: 0,
            mappers: Vec::new(),
            interns: InternTable::default(),
            refs: ReferenceTable::default(),
            depth: 0,
            stats: WalkStats::default(),
        }
    }

    /// Run the walk to completion, consuming the walker.
    ///
    /// # Errors
    /// Returns [`Error::Incompatible`] if the rules reject the input,
    /// [`Error::UnknownTypeCode`] on an unrecognized and unremapped type byte,
    /// [`Error::MalformedLong`] on an invalid long-integer digit, and
    /// [`Error::OutOfBounds`] / [`Error::Malformed`] on structural damage the
    /// walk cannot step over.
    pub fn walk(mut self) -> Result<Walked> {
        if !self.rules.is_compatible(self.input) {
            return Err(Error::Incompatible);
        }

        let header = self.rules.parse_header(self.input, &mut self.output)?;
        self.version = header.version;

        let (root, _consumed) = self.read_object(header.size)?;

        let keep = self.rules.finalize_trailer(self.input, &mut self.output)?;
        let keep = keep.min(self.output.len());
        self.output.truncate(keep);

        self.stats.mappers = self.mappers.len();

        Ok(Walked {
            data: self.output,
            header,
            root,
            mappers: self.mappers,
            interns: self.interns.into_entries(),
            refs: self.refs.into_entries(),
            stats: self.stats,
        })
    }

    /// Allocate an arena slot for a mapper whose body is about to be parsed.
    ///
    /// The slot exists (with a placeholder body) before parsing starts so the
    /// reference table can register it pre-order.
    pub(crate) fn alloc(&mut self, typecode: u8, offset: usize) -> MapperId {
        let id = MapperId(u32::try_from(self.mappers.len()).unwrap_or(u32::MAX));
        self.mappers.push(Mapper {
            typecode,
            offset,
            size: 0,
            kind: crate::marshal::mapper::MapperKind::Null,
        });
        id
    }

    /// Follow back-references until a concrete mapper is reached
    pub(crate) fn resolve(&self, id: MapperId) -> MapperId {
        resolve_id(&self.mappers, id)
    }
}
