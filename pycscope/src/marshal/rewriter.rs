//! Forward-sweep opcode substitution over a code object's instruction bytes.
//!
//! The rewriter walks an instruction string with version-specific stride rules and
//! applies the rule set's opcode remap table to the output buffer. It is explicitly
//! lenient: obfuscated streams routinely misalign the cursor with the true
//! instruction boundaries, and the sweep just keeps substituting bytes without ever
//! interpreting arguments or declaring an instruction malformed.

use crate::{
    marshal::code::WORDCODE_VERSION,
    rules::Rules,
    Result,
};

/// Boundary above which pre-wordcode opcodes carry a 2-byte argument.
///
/// CPython's `HAVE_ARGUMENT`: opcodes at or above 90 take an argument, making the
/// instruction 3 bytes in the pre-3.6 encoding.
pub const HAVE_ARGUMENT: u32 = 90;

/// Statistics of one rewrite sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteCount {
    /// Instructions visited
    pub visited: usize,
    /// Opcode byte sequences substituted
    pub swapped: usize,
}

/// Sweep the instruction payload at `output[start..start + len]`, substituting
/// opcodes per the rule set.
///
/// Reads always come from `input` so earlier substitutions never cascade; writes
/// go to `output` and are size-preserving. The cursor advances by the remap
/// entry's stride when given, else 2 bytes on wordcode versions, else 3 for
/// opcodes with an argument and 1 without.
///
/// ## Arguments
/// * 'rules'   - The rule set supplying `opcode_size` and the remap table
/// * 'version' - CPython version as `major * 100 + minor`
/// * 'input'   - The immutable input buffer
/// * 'output'  - The output mirror receiving substitutions
/// * 'start'   - Offset of the first instruction byte
/// * 'len'     - Length of the instruction payload in bytes
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the payload range exceeds the buffers
pub fn rewrite_opcodes<R: Rules + ?Sized>(
    rules: &R,
    version: u16,
    input: &[u8],
    output: &mut [u8],
    start: usize,
    len: usize,
) -> Result<RewriteCount> {
    let Some(end) = start.checked_add(len) else {
        return Err(crate::Error::OutOfBounds);
    };
    if end > input.len() || end > output.len() {
        return Err(crate::Error::OutOfBounds);
    }

    let op_size = rules.opcode_size().max(1);
    let mut count = RewriteCount::default();
    let mut cursor = start;

    // A truncated trailing instruction is left alone rather than rejected.
    while cursor + op_size <= end {
        let op_bytes = &input[cursor..cursor + op_size];
        let op = le_value(op_bytes);
        count.visited += 1;

        let stride = match rules.remap_opcode(op_bytes) {
            Some(remap) => {
                if let Some(to) = &remap.to {
                    let write = to.len().min(end - cursor);
                    output[cursor..cursor + write].copy_from_slice(&to[..write]);
                    count.swapped += 1;
                }
                remap.stride.unwrap_or_else(|| default_stride(version, op))
            }
            None => default_stride(version, op),
        };

        // A zero stride would never terminate; treat it as one opcode.
        cursor += stride.max(op_size);
    }

    Ok(count)
}

/// The version-derived cursor advance for an unremapped opcode.
fn default_stride(version: u16, op: u32) -> usize {
    if version >= WORDCODE_VERSION {
        2
    } else if op >= HAVE_ARGUMENT {
        3
    } else {
        1
    }
}

/// Little-endian integer value of up to 4 opcode bytes.
fn le_value(bytes: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for (i, byte) in bytes.iter().take(4).enumerate() {
        value |= u32::from(*byte) << (8 * i);
    }
    value
}
