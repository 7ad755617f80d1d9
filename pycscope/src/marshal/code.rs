//! Version-dependent code-object layouts.
//!
//! CPython reshaped the marshalled code object many times: field widths grew from
//! 16 to 32 bits in 2.3, keyword-only and positional-only counts appeared in 3.0
//! and 3.8, and 3.11 replaced the locals/freevars/cellvars triple with the
//! locals-plus encoding while adding `qualname` and the exception table. Rather
//! than scattering version conditionals through the reader, the differences are
//! captured once here as a per-field decision table keyed on the numeric version.

use crate::marshal::mapper::MapperId;

/// First version using the two-byte-per-instruction wordcode encoding.
pub const WORDCODE_VERSION: u16 = 306;

/// First version carrying 32-bit code-object scalar fields.
const WIDE_FIELDS_VERSION: u16 = 203;

/// Which fields a marshalled code object carries, and how wide, for one version.
///
/// Scalar widths are 2 or 4 bytes (`wide`); child entries are full marshal
/// objects read recursively. Field order on the wire is fixed: the scalars,
/// then the children up to `name`/`qualname`, then `firstlineno`, then the
/// line and exception tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLayout {
    /// Scalar fields are 4 bytes (2 before 2.3)
    pub wide: bool,
    /// `posonlyargcount` present (3.8+)
    pub has_posonlyargcount: bool,
    /// `kwonlyargcount` present (3.0+)
    pub has_kwonlyargcount: bool,
    /// `nlocals` present (dropped in 3.11)
    pub has_nlocals: bool,
    /// `varnames` child present (1.3+, absent in legacy `C` records)
    pub has_varnames: bool,
    /// `localspluskinds` child present (3.11+)
    pub has_localspluskinds: bool,
    /// `freevars`/`cellvars` children present (2.1 through 3.10)
    pub has_freevars: bool,
    /// `qualname` child present (3.11+)
    pub has_qualname: bool,
    /// `firstlineno` scalar present (1.5+)
    pub has_firstlineno: bool,
    /// `lnotab`/`linetable` child present (1.5+)
    pub has_linetable: bool,
    /// `exceptiontable` child present (3.11+)
    pub has_exceptiontable: bool,
}

impl CodeLayout {
    /// The layout a given interpreter version marshals.
    ///
    /// ## Arguments
    /// * 'version' - CPython version as `major * 100 + minor`
    #[must_use]
    pub fn for_version(version: u16) -> CodeLayout {
        CodeLayout {
            wide: version >= WIDE_FIELDS_VERSION,
            has_posonlyargcount: version >= 308,
            has_kwonlyargcount: version >= 300,
            has_nlocals: version < 311,
            has_varnames: version >= 103,
            has_localspluskinds: version >= 311,
            has_freevars: (201..311).contains(&version),
            has_qualname: version >= 311,
            has_firstlineno: version >= 105,
            has_linetable: version >= 105,
            has_exceptiontable: version >= 311,
        }
    }

    /// The layout for a legacy `C` record: the version's layout without `varnames`,
    /// matching the pre-1.3 writer that code was copied forward from.
    #[must_use]
    pub fn legacy(version: u16) -> CodeLayout {
        CodeLayout {
            has_varnames: false,
            ..Self::for_version(version)
        }
    }

    /// Byte width of the scalar fields in this layout
    #[must_use]
    pub fn scalar_width(&self) -> usize {
        if self.wide {
            4
        } else {
            2
        }
    }
}

/// The parsed fields of one code object.
///
/// Scalars absent from the writing version's layout are `None`, as are missing
/// children. `code` is the instruction-bytes child the opcode rewriter runs over.
#[derive(Debug)]
pub struct CodeObject {
    /// Positional argument count
    pub argcount: u32,
    /// Positional-only argument count (3.8+)
    pub posonlyargcount: Option<u32>,
    /// Keyword-only argument count (3.0+)
    pub kwonlyargcount: Option<u32>,
    /// Local variable count (through 3.10)
    pub nlocals: Option<u32>,
    /// Evaluation stack depth
    pub stacksize: u32,
    /// Code flags word
    pub flags: u32,
    /// First source line (1.5+)
    pub firstlineno: Option<u32>,
    /// The instruction bytes child
    pub code: MapperId,
    /// The constants child
    pub consts: MapperId,
    /// The names child
    pub names: MapperId,
    /// The variable-names child (locals-plus names from 3.11)
    pub varnames: Option<MapperId>,
    /// The locals-plus kinds child (3.11+)
    pub localspluskinds: Option<MapperId>,
    /// The free-variables child (2.1 through 3.10)
    pub freevars: Option<MapperId>,
    /// The cell-variables child (2.1 through 3.10)
    pub cellvars: Option<MapperId>,
    /// The filename child
    pub filename: MapperId,
    /// The name child
    pub name: MapperId,
    /// The qualified-name child (3.11+)
    pub qualname: Option<MapperId>,
    /// The line-number table child (1.5+)
    pub linetable: Option<MapperId>,
    /// The exception table child (3.11+)
    pub exceptiontable: Option<MapperId>,
}

impl CodeObject {
    /// The child mappers in on-wire order.
    #[must_use]
    pub fn children(&self) -> Vec<MapperId> {
        let mut out = vec![self.code, self.consts, self.names];
        out.extend(self.varnames);
        out.extend(self.localspluskinds);
        out.extend(self.freevars);
        out.extend(self.cellvars);
        out.push(self.filename);
        out.push(self.name);
        out.extend(self.qualname);
        out.extend(self.linetable);
        out.extend(self.exceptiontable);
        out
    }
}
