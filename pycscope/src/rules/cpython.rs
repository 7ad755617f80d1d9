//! Built-in rules for stock CPython pyc containers.
//!
//! [`CpythonRules`] recognizes the historical header layouts and performs no
//! substitutions at all, which makes it the identity rule set: walking with it
//! reproduces the input byte for byte. It also serves as the header/compatibility
//! base that [`crate::rules::ConfigRules`] delegates to.

use bitflags::bitflags;

use crate::{
    file::parser::Parser,
    rules::{Header, Rules, Stamp},
    Result,
};

/// Known release magic numbers, mapped to `major * 100 + minor`.
///
/// The magic is the little-endian 16-bit value in the first two header bytes;
/// bytes two and three are always `\r\n` so text-mode transfer damage is caught
/// by the compatibility check.
pub const MAGIC_VERSIONS: &[(u16, u16)] = &[
    (20121, 105), // 1.5
    (50428, 106), // 1.6
    (50823, 200), // 2.0
    (60202, 201), // 2.1
    (60717, 202), // 2.2
    (62011, 203), // 2.3
    (62061, 204), // 2.4
    (62131, 205), // 2.5
    (62161, 206), // 2.6
    (62211, 207), // 2.7
    (3131, 300),  // 3.0
    (3151, 301),  // 3.1
    (3180, 302),  // 3.2
    (3230, 303),  // 3.3
    (3310, 304),  // 3.4
    (3351, 305),  // 3.5
    (3379, 306),  // 3.6
    (3394, 307),  // 3.7
    (3413, 308),  // 3.8
    (3425, 309),  // 3.9
    (3439, 310),  // 3.10
    (3495, 311),  // 3.11
    (3531, 312),  // 3.12
    (3571, 313),  // 3.13
];

bitflags! {
    /// The bit-field word carried by 3.7+ pyc headers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u32 {
        /// The header carries a source hash instead of a timestamp
        const HASH_BASED = 0x0000_0001;
        /// The interpreter should verify the hash against the source
        const CHECK_SOURCE = 0x0000_0002;
    }
}

/// The identity rule set for stock CPython containers.
///
/// Knows every release magic from 1.5 through 3.13 and all three header layouts
/// (8 bytes before 3.3, 12 bytes through 3.6, 16 bytes with the flags word from
/// 3.7 on). Exposes no remap entries, so the walk leaves the output untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpythonRules;

impl CpythonRules {
    /// Create the identity rule set
    #[must_use]
    pub fn new() -> Self {
        CpythonRules
    }

    /// Look up the version a release magic encodes
    #[must_use]
    pub fn version_for_magic(magic: u16) -> Option<u16> {
        MAGIC_VERSIONS
            .iter()
            .find(|(m, _)| *m == magic)
            .map(|(_, v)| *v)
    }

    /// Parse a header whose version is already known, ignoring the magic lookup.
    ///
    /// Obfuscators swap the magic itself; a rules file that pins the version uses
    /// this to still walk the correct header layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the input is shorter than the
    /// layout the version dictates
    pub fn parse_header_with_version(input: &[u8], version: u16) -> Result<Header> {
        let mut parser = Parser::new(input);

        let magic = [
            parser.read_le::<u8>()?,
            parser.read_le::<u8>()?,
            parser.read_le::<u8>()?,
            parser.read_le::<u8>()?,
        ];

        let (flags, stamp) = if version >= 307 {
            let flags = HeaderFlags::from_bits_retain(parser.read_le::<u32>()?);
            if flags.contains(HeaderFlags::HASH_BASED) {
                let mut hash = [0u8; 8];
                hash.copy_from_slice(parser.read_bytes(8)?);
                (flags, Stamp::Hash(hash))
            } else {
                let timestamp = parser.read_le::<u32>()?;
                let source_size = parser.read_le::<u32>()?;
                (
                    flags,
                    Stamp::Timestamp {
                        timestamp,
                        source_size: Some(source_size),
                    },
                )
            }
        } else if version >= 303 {
            let timestamp = parser.read_le::<u32>()?;
            let source_size = parser.read_le::<u32>()?;
            (
                HeaderFlags::empty(),
                Stamp::Timestamp {
                    timestamp,
                    source_size: Some(source_size),
                },
            )
        } else {
            let timestamp = parser.read_le::<u32>()?;
            (
                HeaderFlags::empty(),
                Stamp::Timestamp {
                    timestamp,
                    source_size: None,
                },
            )
        };

        Ok(Header {
            magic,
            size: parser.pos(),
            version,
            flags,
            stamp,
        })
    }
}

impl Rules for CpythonRules {
    fn is_compatible(&self, input: &[u8]) -> bool {
        if input.len() < 8 || input[2] != 0x0D || input[3] != 0x0A {
            return false;
        }

        let magic = u16::from_le_bytes([input[0], input[1]]);
        Self::version_for_magic(magic).is_some()
    }

    fn parse_header(&self, input: &[u8], _output: &mut [u8]) -> Result<Header> {
        if input.len() < 4 || input[2] != 0x0D || input[3] != 0x0A {
            return Err(malformed_error!("Header magic does not end in \\r\\n"));
        }

        let magic_word = u16::from_le_bytes([input[0], input[1]]);
        let Some(version) = Self::version_for_magic(magic_word) else {
            return Err(crate::Error::Incompatible);
        };

        Self::parse_header_with_version(input, version)
    }
}
