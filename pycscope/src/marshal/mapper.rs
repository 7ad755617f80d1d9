//! Parsed marshal objects and their on-wire frames.
//!
//! Every object the dispatcher reads becomes a [`Mapper`]: the 7-bit type code,
//! the offset where its encoding starts, the total bytes it consumes (type byte
//! included) and the kind-specific parsed fields. Mappers live in an id-indexed
//! arena owned by the walker; children and back-references are [`MapperId`]s into
//! that arena. Ids instead of owned pointers matter because the reference table
//! must hand out entries whose bodies are still being parsed (a code object can
//! reference itself), which tree ownership cannot express.

use crate::marshal::code::CodeObject;

/// Index of a mapper in the walker's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapperId(pub(crate) u32);

impl MapperId {
    /// The arena slot this id names
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One parsed marshal object.
///
/// The slice `input[offset..offset + size]` is exactly the object's on-wire
/// encoding; `size` is always at least 1 (the type-code byte).
#[derive(Debug)]
pub struct Mapper {
    /// The effective 7-bit type code, after any remapping
    pub typecode: u8,
    /// Start offset of the encoding in both buffers
    pub offset: usize,
    /// Total bytes consumed, type-code byte included
    pub size: usize,
    /// Kind-specific parsed fields
    pub kind: MapperKind,
}

/// Kind-specific payload of a [`Mapper`].
#[derive(Debug)]
pub enum MapperKind {
    /// The null sentinel
    Null,
    /// The None singleton
    None,
    /// The False singleton
    False,
    /// The True singleton
    True,
    /// The StopIteration singleton
    StopIteration,
    /// The Ellipsis singleton
    Ellipsis,
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer (obsolete writer)
    Int64(i64),
    /// Arbitrary-precision integer: sign and 15-bit digit count
    Long {
        /// Sign of the value
        negative: bool,
        /// Number of 2-byte digits in the magnitude
        digits: u32,
    },
    /// Float parsed from length-prefixed ASCII text
    Float(f64),
    /// Float from 8 IEEE-754 bytes
    BinaryFloat(f64),
    /// Complex parsed from two text floats
    Complex {
        /// Real part
        real: f64,
        /// Imaginary part
        imag: f64,
    },
    /// Complex from two 8-byte IEEE-754 doubles
    BinaryComplex {
        /// Real part
        real: f64,
        /// Imaginary part
        imag: f64,
    },
    /// Any of the string-like kinds: payload location and interning
    Str {
        /// Offset of the payload bytes in both buffers
        payload: usize,
        /// Payload length in bytes
        len: usize,
        /// Whether this entered the intern table
        interned: bool,
    },
    /// Back-reference into the intern table
    StringRef {
        /// Zero-based intern-table index
        index: u32,
        /// The interned string mapper the index resolved to
        target: MapperId,
    },
    /// Back-reference into the reference table
    Ref {
        /// Zero-based reference-table index
        index: u32,
        /// The mapper the index resolved to
        target: MapperId,
    },
    /// Tuple (either length encoding)
    Tuple(Vec<MapperId>),
    /// List
    List(Vec<MapperId>),
    /// Set
    Set(Vec<MapperId>),
    /// Frozenset
    FrozenSet(Vec<MapperId>),
    /// Dict as parsed key/value pairs; the terminating null is part of `size`
    Dict(Vec<(MapperId, MapperId)>),
    /// Code object with its version-dependent fields and children
    Code(Box<CodeObject>),
    /// A region claimed by a substitution rule; never descended into
    Opaque,
}

impl Mapper {
    /// The mappers this one owns, in parse order.
    ///
    /// Back-references have no children: they resolve into already-parsed
    /// mappers instead of descending.
    #[must_use]
    pub fn children(&self) -> Vec<MapperId> {
        match &self.kind {
            MapperKind::Tuple(items)
            | MapperKind::List(items)
            | MapperKind::Set(items)
            | MapperKind::FrozenSet(items) => items.clone(),
            MapperKind::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [*k, *v]).collect(),
            MapperKind::Code(code) => code.children(),
            _ => Vec::new(),
        }
    }

    /// Is this mapper a back-reference (`Ref` or `StringRef`)?
    #[must_use]
    pub fn is_backref(&self) -> bool {
        matches!(
            self.kind,
            MapperKind::Ref { .. } | MapperKind::StringRef { .. }
        )
    }
}

/// Follow back-reference nodes to the mapper they resolve to.
///
/// Table entries are never themselves back-references, so one hop normally
/// suffices; the hop cap just bounds damage from adversarial graphs.
pub(crate) fn resolve_id(mappers: &[Mapper], mut id: MapperId) -> MapperId {
    for _ in 0..8 {
        match &mappers[id.index()].kind {
            MapperKind::Ref { target, .. } | MapperKind::StringRef { target, .. } => {
                id = *target;
            }
            _ => break,
        }
    }
    id
}
