//! Declarative rule tables loaded from `.pycrules` files.
//!
//! A rules file is a JSON document describing which type codes and opcodes an
//! obfuscator swapped and what to swap them back to. Keys are byte values written
//! either decimal (`"90"`) or hex (`"0x5A"`); opcode keys may list several bytes
//! separated by whitespace when `opcode_size` is larger than one.
//!
//! ```json
//! {
//!     "version": 311,
//!     "opcode_size": 1,
//!     "typecodes": { "0x5A": { "t": 122 } },
//!     "opcodes":   { "0x90": { "to": [100], "i": 2 } },
//!     "names":     { "LOAD_CONST": 100 }
//! }
//! ```
//!
//! Header interpretation and the compatibility check delegate to the built-in
//! [`CpythonRules`]; a `version` entry overrides the magic-derived version for
//! streams whose magic was itself tampered with.

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{
    rules::{CpythonRules, Header, OpcodeRemap, Rules, TypeCodeRemap},
    Error, Result,
};

/// On-disk schema of a `.pycrules` file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    /// Version override as `major * 100 + minor`
    #[serde(default)]
    version: Option<u16>,

    /// Opcode width in bytes (default 1)
    #[serde(default)]
    opcode_size: Option<usize>,

    /// Type-code substitutions, keyed by code byte
    #[serde(default)]
    typecodes: FxHashMap<String, TypeCodeEntry>,

    /// Opcode substitutions, keyed by opcode byte sequence
    #[serde(default)]
    opcodes: FxHashMap<String, OpcodeEntry>,

    /// Mnemonic table for debug output
    #[serde(default)]
    names: FxHashMap<String, u8>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeCodeEntry {
    /// Replacement code byte
    t: u8,
    /// Total consumed-byte override
    #[serde(default)]
    i: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpcodeEntry {
    /// Replacement bytes
    #[serde(default)]
    to: Option<Vec<u8>>,
    /// Stride override
    #[serde(default)]
    i: Option<usize>,
}

/// A rule set backed by a declarative substitution table.
///
/// Built from a `.pycrules` JSON document with [`ConfigRules::from_path`] or
/// [`ConfigRules::from_str`]. Compatibility and header parsing come from
/// [`CpythonRules`] unless the table pins a `version`.
#[derive(Debug, Clone)]
pub struct ConfigRules {
    base: CpythonRules,
    version: Option<u16>,
    opcode_size: usize,
    typecodes: FxHashMap<u8, TypeCodeRemap>,
    opcodes: FxHashMap<Vec<u8>, OpcodeRemap>,
    names: FxHashMap<u8, String>,
}

impl ConfigRules {
    /// Load and validate a rules file from disk.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read and
    /// [`Error::Rules`] if it fails parsing or validation
    pub fn from_path(path: &Path) -> Result<ConfigRules> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Parse and validate a rules document from a string.
    ///
    /// # Errors
    /// Returns [`Error::Rules`] if the document fails parsing or validation
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<ConfigRules> {
        let file: RuleFile =
            serde_json::from_str(text).map_err(|e| Error::Rules(e.to_string()))?;

        let opcode_size = file.opcode_size.unwrap_or(1);
        if opcode_size == 0 {
            return Err(Error::Rules("opcode_size must be positive".to_string()));
        }

        let mut typecodes = FxHashMap::default();
        for (key, entry) in &file.typecodes {
            let bytes = parse_byte_seq(key)?;
            if bytes.len() != 1 {
                return Err(Error::Rules(format!(
                    "type code key '{key}' must be a single byte"
                )));
            }
            typecodes.insert(
                bytes[0],
                TypeCodeRemap {
                    to: entry.t,
                    skip: entry.i,
                },
            );
        }

        let mut opcodes = FxHashMap::default();
        for (key, entry) in &file.opcodes {
            let bytes = parse_byte_seq(key)?;
            if bytes.len() != opcode_size {
                return Err(Error::Rules(format!(
                    "opcode key '{key}' must be {opcode_size} byte(s)"
                )));
            }
            if let Some(to) = &entry.to {
                if to.len() != opcode_size {
                    return Err(Error::Rules(format!(
                        "opcode replacement for '{key}' must be {opcode_size} byte(s)"
                    )));
                }
            }
            opcodes.insert(
                bytes,
                OpcodeRemap {
                    to: entry.to.clone(),
                    stride: entry.i,
                },
            );
        }

        let names = file
            .names
            .iter()
            .map(|(name, byte)| (*byte, name.clone()))
            .collect();

        Ok(ConfigRules {
            base: CpythonRules::new(),
            version: file.version,
            opcode_size,
            typecodes,
            opcodes,
            names,
        })
    }

    /// The version override carried by the table, if any
    #[must_use]
    pub fn version_override(&self) -> Option<u16> {
        self.version
    }
}

impl Rules for ConfigRules {
    fn is_compatible(&self, input: &[u8]) -> bool {
        // A pinned version vouches for streams whose magic was itself swapped.
        if self.version.is_some() {
            return input.len() >= 8;
        }
        self.base.is_compatible(input)
    }

    fn parse_header(&self, input: &[u8], output: &mut [u8]) -> Result<Header> {
        match self.version {
            // A pinned version walks that version's header layout even when the
            // magic itself was swapped by the obfuscator.
            Some(version) => CpythonRules::parse_header_with_version(input, version),
            None => self.base.parse_header(input, output),
        }
    }

    fn opcode_size(&self) -> usize {
        self.opcode_size
    }

    fn remap_typecode(&self, code: u8) -> Option<TypeCodeRemap> {
        self.typecodes.get(&code).copied()
    }

    fn remap_opcode(&self, opcode: &[u8]) -> Option<OpcodeRemap> {
        self.opcodes.get(opcode).cloned()
    }

    fn opcode_name(&self, opcode: u8) -> String {
        match self.names.get(&opcode) {
            Some(name) => name.clone(),
            None => format!("<{opcode}>"),
        }
    }
}

/// Parse a whitespace-separated list of decimal or `0x`-prefixed byte values.
fn parse_byte_seq(key: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for part in key.split_whitespace() {
        let value = if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X"))
        {
            u8::from_str_radix(hex, 16)
        } else {
            part.parse::<u8>()
        };

        match value {
            Ok(byte) => bytes.push(byte),
            Err(_) => {
                return Err(Error::Rules(format!("invalid byte value '{part}'")));
            }
        }
    }

    if bytes.is_empty() {
        return Err(Error::Rules(format!("empty byte key '{key}'")));
    }

    Ok(bytes)
}
