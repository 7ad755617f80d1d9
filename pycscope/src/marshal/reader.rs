//! The type-code dispatcher: one `read_object` per marshal object.
//!
//! Dispatch order is contractual and tuned for obfuscated inputs:
//!
//! 1. run the pre-step hook
//! 2. consult the remap table with the whole raw byte (reference flag included);
//!    a hit rewrites the output byte and takes precedence
//! 3. short-circuit `r` back-references - no descent, no table entries
//! 4. split the reference flag from the 7-bit code
//! 5. consult the remap table with the 7-bit code; a hit rewrites the output
//!    byte, preserving the flag bit
//! 6. offer the object to the rules' mapper-substitution hook
//! 7. construct the mapper for the (possibly remapped) code; an unknown code is
//!    fatal
//! 8. if the flag bit was set, register the mapper in the reference table
//!    *before* parsing its body, so self-references resolve
//! 9. parse the body, then run the post-step hook
//!
//! Interned strings enter the intern table after their body parsed (post-order),
//! mirroring the writer's counter.

use crate::{
    file::io::{read_le_at, read_le_at_dyn},
    marshal::{
        code::{CodeLayout, CodeObject},
        mapper::{MapperId, MapperKind},
        rewriter::rewrite_opcodes,
        typecode::{TypeCode, FLAG_REF},
        walker::Walker,
    },
    rules::{Rules, StepControl},
    Error, Result,
};

/// Depth bound for the pre-order descent, matching CPython's own marshal limit.
const MAX_RECURSION: usize = 2000;

impl<R: Rules + ?Sized> Walker<'_, R> {
    /// Read one marshal object at `offset`, returning its mapper id and the
    /// total bytes consumed.
    ///
    /// # Errors
    /// See [`crate::marshal::Walker::walk`]; this is where those errors originate.
    pub(crate) fn read_object(&mut self, offset: usize) -> Result<(MapperId, usize)> {
        self.depth += 1;
        if self.depth > MAX_RECURSION {
            self.depth -= 1;
            return Err(Error::RecursionLimit(MAX_RECURSION));
        }

        let result = self.dispatch(offset);
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, mut offset: usize) -> Result<(MapperId, usize)> {
        match self.rules.pre_step(self.input, &mut self.output, offset) {
            Some(StepControl::Jump(target)) => offset = target,
            Some(StepControl::Abort) => return Err(Error::Aborted),
            None => {}
        }

        if offset >= self.input.len() {
            return Err(Error::OutOfBounds);
        }

        let mut raw = self.input[offset];
        let mut skip_override = None;

        // Whole-byte remap, flag bit included. Takes precedence over the split below.
        if let Some(remap) = self.rules.remap_typecode(raw) {
            self.output[offset] = remap.to;
            self.stats.typecode_swaps += 1;
            raw = remap.to;
            skip_override = remap.skip;
        }

        // Back-references resolve by index; nothing is parsed and nothing registers.
        if raw & !FLAG_REF == TypeCode::Ref as u8 {
            return self.read_ref(offset);
        }

        let is_ref = raw & FLAG_REF != 0;
        let mut t7 = raw & !FLAG_REF;

        if let Some(remap) = self.rules.remap_typecode(t7) {
            self.output[offset] = remap.to | if is_ref { FLAG_REF } else { 0 };
            self.stats.typecode_swaps += 1;
            t7 = remap.to;
            skip_override = skip_override.or(remap.skip);
        }

        let opaque_size =
            skip_override.or_else(|| self.rules.substitute_mapper(t7, self.input, offset));

        let id = self.alloc(t7, offset);
        if is_ref {
            self.refs.push(id);
        }

        let size = match opaque_size {
            Some(claimed) => self.finish_opaque(id, offset, claimed)?,
            None => {
                let Some(tc) = TypeCode::from_byte(t7) else {
                    return Err(Error::UnknownTypeCode(t7));
                };

                let size = self.read_body(id, tc, offset)?;
                self.mappers[id.index()].size = size;

                if tc.is_interned() {
                    self.interns.push(id);
                }
                size
            }
        };

        match self.rules.post_step(self.input, &mut self.output, offset) {
            Some(StepControl::Jump(target)) => {
                // The walk resumes at `target`; anything else would re-read this
                // object forever.
                if target <= offset {
                    return Err(malformed_error!(
                        "post-step hook jumped backwards - {} <= {}",
                        target,
                        offset
                    ));
                }
                Ok((id, target - offset))
            }
            Some(StepControl::Abort) => Err(Error::Aborted),
            None => Ok((id, size)),
        }
    }

    /// An `r` back-reference: 4-byte index into the reference table, consumed = 5.
    fn read_ref(&mut self, offset: usize) -> Result<(MapperId, usize)> {
        let mut cursor = offset + 1;
        let index = read_le_at::<u32>(self.input, &mut cursor)?;

        let Some(target) = self.refs.get(index) else {
            return Err(malformed_error!(
                "Object reference {} has no table entry at offset {}",
                index,
                offset
            ));
        };

        let id = self.alloc(TypeCode::Ref as u8, offset);
        self.mappers[id.index()].size = 5;
        self.mappers[id.index()].kind = MapperKind::Ref { index, target };
        Ok((id, 5))
    }

    /// A region claimed by a substitution rule: consumed whole, never descended.
    fn finish_opaque(&mut self, id: MapperId, offset: usize, claimed: usize) -> Result<usize> {
        let size = claimed.max(1);
        let Some(end) = offset.checked_add(size) else {
            return Err(Error::OutOfBounds);
        };
        if end > self.input.len() {
            return Err(Error::OutOfBounds);
        }

        self.mappers[id.index()].size = size;
        self.mappers[id.index()].kind = MapperKind::Opaque;
        Ok(size)
    }

    /// Parse the body for a recognized type code and store kind plus parsed
    /// fields in the arena slot. Returns the total size, type byte included.
    fn read_body(&mut self, id: MapperId, tc: TypeCode, offset: usize) -> Result<usize> {
        let (kind, size) = match tc {
            TypeCode::Null => (MapperKind::Null, 1),
            TypeCode::None => (MapperKind::None, 1),
            TypeCode::False => (MapperKind::False, 1),
            TypeCode::True => (MapperKind::True, 1),
            TypeCode::StopIteration => (MapperKind::StopIteration, 1),
            TypeCode::Ellipsis => (MapperKind::Ellipsis, 1),

            TypeCode::Int => {
                let mut cursor = offset + 1;
                let value = read_le_at::<i32>(self.input, &mut cursor)?;
                (MapperKind::Int(value), 5)
            }
            TypeCode::Int64 => {
                let mut cursor = offset + 1;
                let value = read_le_at::<i64>(self.input, &mut cursor)?;
                (MapperKind::Int64(value), 9)
            }
            TypeCode::Long => self.read_long(offset)?,

            TypeCode::Float => {
                let mut cursor = offset + 1;
                let value = self.read_text_float(&mut cursor)?;
                (MapperKind::Float(value), cursor - offset)
            }
            TypeCode::BinaryFloat => {
                let mut cursor = offset + 1;
                let value = read_le_at::<f64>(self.input, &mut cursor)?;
                (MapperKind::BinaryFloat(value), 9)
            }
            TypeCode::Complex => {
                let mut cursor = offset + 1;
                let real = self.read_text_float(&mut cursor)?;
                let imag = self.read_text_float(&mut cursor)?;
                (MapperKind::Complex { real, imag }, cursor - offset)
            }
            TypeCode::BinaryComplex => {
                let mut cursor = offset + 1;
                let real = read_le_at::<f64>(self.input, &mut cursor)?;
                let imag = read_le_at::<f64>(self.input, &mut cursor)?;
                (MapperKind::BinaryComplex { real, imag }, 17)
            }

            TypeCode::String
            | TypeCode::Interned
            | TypeCode::Unicode
            | TypeCode::Ascii
            | TypeCode::AsciiInterned
            | TypeCode::ShortAscii
            | TypeCode::ShortAsciiInterned => self.read_string(tc, offset)?,

            TypeCode::StringRef => {
                let mut cursor = offset + 1;
                let index = read_le_at::<u32>(self.input, &mut cursor)?;
                let Some(target) = self.interns.get(index) else {
                    return Err(malformed_error!(
                        "String reference {} has no intern entry at offset {}",
                        index,
                        offset
                    ));
                };
                (MapperKind::StringRef { index, target }, 5)
            }

            TypeCode::Tuple => {
                let (items, size) = self.read_sequence(offset, false)?;
                (MapperKind::Tuple(items), size)
            }
            TypeCode::SmallTuple => {
                let (items, size) = self.read_sequence(offset, true)?;
                (MapperKind::Tuple(items), size)
            }
            TypeCode::List => {
                let (items, size) = self.read_sequence(offset, false)?;
                (MapperKind::List(items), size)
            }
            TypeCode::Set => {
                let (items, size) = self.read_sequence(offset, false)?;
                (MapperKind::Set(items), size)
            }
            TypeCode::FrozenSet => {
                let (items, size) = self.read_sequence(offset, false)?;
                (MapperKind::FrozenSet(items), size)
            }

            TypeCode::Dict => self.read_dict(offset)?,

            TypeCode::Code | TypeCode::LegacyCode => {
                self.stats.code_objects += 1;
                self.read_code(tc, offset)?
            }

            // References dispatch before body parsing; landing here means a
            // remap rule rewrote a 7-bit code into `r` mid-protocol.
            TypeCode::Ref => {
                return Err(malformed_error!(
                    "Type code at offset {} was remapped to a reference",
                    offset
                ));
            }
        };

        self.mappers[id.index()].kind = kind;
        Ok(size)
    }

    /// Arbitrary-precision integer: signed digit count, then 15-bit digits.
    fn read_long(&mut self, offset: usize) -> Result<(MapperKind, usize)> {
        let mut cursor = offset + 1;
        let count = read_le_at::<i32>(self.input, &mut cursor)?;

        let digits = count.unsigned_abs();
        let negative = count < 0;

        let Some(magnitude) = (digits as usize).checked_mul(2) else {
            return Err(Error::OutOfBounds);
        };
        let Some(end) = cursor.checked_add(magnitude) else {
            return Err(Error::OutOfBounds);
        };
        if end > self.input.len() {
            return Err(Error::OutOfBounds);
        }

        // Marshal digits are 15-bit; a set high bit means the stream lies about
        // being a long at all.
        for i in 0..digits as usize {
            let high = self.input[cursor + i * 2 + 1];
            if high & 0x80 != 0 {
                return Err(Error::MalformedLong(high));
            }
        }

        Ok((MapperKind::Long { negative, digits }, 5 + magnitude))
    }

    /// Length-prefixed ASCII float text; unparsable text warns and records NaN.
    fn read_text_float(&mut self, cursor: &mut usize) -> Result<f64> {
        let len = read_le_at::<u8>(self.input, cursor)? as usize;
        let Some(end) = cursor.checked_add(len) else {
            return Err(Error::OutOfBounds);
        };
        if end > self.input.len() {
            return Err(Error::OutOfBounds);
        }

        let bytes = &self.input[*cursor..end];
        *cursor = end;

        match std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok())
        {
            Some(value) => Ok(value),
            None => {
                log::warn!(
                    "unparsable float text at offset {}, recording NaN and continuing",
                    end - len
                );
                Ok(f64::NAN)
            }
        }
    }

    /// Any string-like kind: 1- or 4-byte length, then the payload bytes.
    fn read_string(&mut self, tc: TypeCode, offset: usize) -> Result<(MapperKind, usize)> {
        let mut cursor = offset + 1;
        let len = if tc.has_short_length() {
            read_le_at::<u8>(self.input, &mut cursor)? as usize
        } else {
            read_le_at::<u32>(self.input, &mut cursor)? as usize
        };

        let payload = cursor;
        let Some(end) = payload.checked_add(len) else {
            return Err(Error::OutOfBounds);
        };
        if end > self.input.len() {
            return Err(Error::OutOfBounds);
        }

        Ok((
            MapperKind::Str {
                payload,
                len,
                interned: tc.is_interned(),
            },
            end - offset,
        ))
    }

    /// Tuples, lists and sets: element count, then that many children.
    fn read_sequence(
        &mut self,
        offset: usize,
        short_count: bool,
    ) -> Result<(Vec<MapperId>, usize)> {
        let mut cursor = offset + 1;
        let count = if short_count {
            u32::from(read_le_at::<u8>(self.input, &mut cursor)?)
        } else {
            read_le_at::<u32>(self.input, &mut cursor)?
        };

        let mut items = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let (child, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            items.push(child);
        }

        Ok((items, cursor - offset))
    }

    /// Dict: key/value pairs until a null key terminates the container.
    fn read_dict(&mut self, offset: usize) -> Result<(MapperKind, usize)> {
        let mut cursor = offset + 1;
        let mut pairs = Vec::new();

        loop {
            let (key, consumed) = self.read_object(cursor)?;
            cursor += consumed;

            if matches!(self.mappers[key.index()].kind, MapperKind::Null) {
                break;
            }

            let (value, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            pairs.push((key, value));
        }

        Ok((MapperKind::Dict(pairs), cursor - offset))
    }

    /// Code object: version-dependent scalars, then the children, with the
    /// opcode sweep running right after the instruction-bytes child parses and
    /// before any later field is read.
    fn read_code(&mut self, tc: TypeCode, offset: usize) -> Result<(MapperKind, usize)> {
        let layout = if tc == TypeCode::LegacyCode {
            CodeLayout::legacy(self.version)
        } else {
            CodeLayout::for_version(self.version)
        };
        let wide = layout.wide;

        let mut cursor = offset + 1;

        let argcount = read_le_at_dyn(self.input, &mut cursor, wide)?;
        let posonlyargcount = if layout.has_posonlyargcount {
            Some(read_le_at_dyn(self.input, &mut cursor, wide)?)
        } else {
            None
        };
        let kwonlyargcount = if layout.has_kwonlyargcount {
            Some(read_le_at_dyn(self.input, &mut cursor, wide)?)
        } else {
            None
        };
        let nlocals = if layout.has_nlocals {
            Some(read_le_at_dyn(self.input, &mut cursor, wide)?)
        } else {
            None
        };
        let stacksize = read_le_at_dyn(self.input, &mut cursor, wide)?;
        let flags = read_le_at_dyn(self.input, &mut cursor, wide)?;

        let (code, consumed) = self.read_object(cursor)?;
        cursor += consumed;

        // Contractual ordering: the sweep happens before later fields parse, so
        // anything indexing into the instruction range observes the edits.
        self.rewrite_code_child(code)?;

        let (consts, consumed) = self.read_object(cursor)?;
        cursor += consumed;
        let (names, consumed) = self.read_object(cursor)?;
        cursor += consumed;

        let varnames = if layout.has_varnames {
            let (id, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            Some(id)
        } else {
            None
        };
        let localspluskinds = if layout.has_localspluskinds {
            let (id, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            Some(id)
        } else {
            None
        };
        let (freevars, cellvars) = if layout.has_freevars {
            let (free, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            let (cell, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            (Some(free), Some(cell))
        } else {
            (None, None)
        };

        let (filename, consumed) = self.read_object(cursor)?;
        cursor += consumed;
        let (name, consumed) = self.read_object(cursor)?;
        cursor += consumed;
        let qualname = if layout.has_qualname {
            let (id, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            Some(id)
        } else {
            None
        };

        let firstlineno = if layout.has_firstlineno {
            Some(read_le_at_dyn(self.input, &mut cursor, wide)?)
        } else {
            None
        };

        let linetable = if layout.has_linetable {
            let (id, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            Some(id)
        } else {
            None
        };
        let exceptiontable = if layout.has_exceptiontable {
            let (id, consumed) = self.read_object(cursor)?;
            cursor += consumed;
            Some(id)
        } else {
            None
        };

        let code_object = CodeObject {
            argcount,
            posonlyargcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            firstlineno,
            code,
            consts,
            names,
            varnames,
            localspluskinds,
            freevars,
            cellvars,
            filename,
            name,
            qualname,
            linetable,
            exceptiontable,
        };

        Ok((MapperKind::Code(Box::new(code_object)), cursor - offset))
    }

    /// Run the opcode sweep over a code object's instruction-bytes child.
    fn rewrite_code_child(&mut self, code: MapperId) -> Result<()> {
        let target = self.resolve(code);
        let mapper = &self.mappers[target.index()];

        let MapperKind::Str { payload, len, .. } = mapper.kind else {
            // Obfuscators stash non-string objects in the code slot; the sweep
            // only ever rewrites inline instruction bytes.
            log::debug!(
                "code child at offset {} is not an inline string, skipping opcode sweep",
                mapper.offset
            );
            return Ok(());
        };

        let count = rewrite_opcodes(
            self.rules,
            self.version,
            self.input,
            &mut self.output,
            payload,
            len,
        )?;

        self.stats.opcode_swaps += count.swapped;
        self.stats.opcodes_visited += count.visited;
        Ok(())
    }
}
