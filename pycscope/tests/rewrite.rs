//! Substitution-rules walks: type-code and opcode remaps land in the output at
//! exactly the right offsets, and everything else stays byte-identical.

use pycscope::{
    marshal::{MapperKind, Walker},
    rules::{ConfigRules, CpythonRules, Header, Rules, StepControl},
    Error,
};

/// A 3.11 container header (timestamp variant) followed by `payload`.
fn pyc_311(payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0xA7, 0x0D, 0x0D, 0x0A];
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(payload);
    data
}

/// A 2.7 container header (magic + mtime) followed by `payload`.
fn pyc_27(payload: &[u8]) -> Vec<u8> {
    let mut data = vec![0x03, 0xF3, 0x0D, 0x0A];
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(payload);
    data
}

const HEADER_311: usize = 16;

/// A minimal marshalled 3.11 code object around the given instruction bytes.
fn code_311(instrs: &[u8]) -> Vec<u8> {
    let mut p = vec![0x63]; // code
    for scalar in [0u32, 0, 0, 2, 0] {
        // argcount, posonlyargcount, kwonlyargcount, stacksize, flags
        p.extend_from_slice(&scalar.to_le_bytes());
    }
    p.push(0x73); // code: plain string
    p.extend_from_slice(&(instrs.len() as u32).to_le_bytes());
    p.extend_from_slice(instrs);
    p.extend_from_slice(&[0x29, 0x01, 0x4E]); // consts: (None,)
    p.extend_from_slice(&[0x29, 0x00]); // names: ()
    p.extend_from_slice(&[0x29, 0x00]); // varnames: ()
    p.extend_from_slice(&[0x7A, 0x00]); // localspluskinds: b""
    p.extend_from_slice(&[0x7A, 0x04]); // filename: "t.py"
    p.extend_from_slice(b"t.py");
    p.extend_from_slice(&[0x7A, 0x08]); // name: "<module>"
    p.extend_from_slice(b"<module>");
    p.extend_from_slice(&[0x7A, 0x08]); // qualname: "<module>"
    p.extend_from_slice(b"<module>");
    p.extend_from_slice(&1u32.to_le_bytes()); // firstlineno
    p.extend_from_slice(&[0x7A, 0x00]); // linetable: b""
    p.extend_from_slice(&[0x7A, 0x00]); // exceptiontable: b""
    p
}

/// A minimal marshalled 2.7 code object around the given instruction bytes.
fn code_27(instrs: &[u8]) -> Vec<u8> {
    let mut p = vec![0x63];
    for scalar in [0u32, 0, 2, 64] {
        // argcount, nlocals, stacksize, flags
        p.extend_from_slice(&scalar.to_le_bytes());
    }
    p.push(0x73); // code
    p.extend_from_slice(&(instrs.len() as u32).to_le_bytes());
    p.extend_from_slice(instrs);
    for _ in 0..5 {
        // consts, names, varnames, freevars, cellvars: empty tuples
        p.push(0x28);
        p.extend_from_slice(&0u32.to_le_bytes());
    }
    p.push(0x73); // filename: "t.py"
    p.extend_from_slice(&4u32.to_le_bytes());
    p.extend_from_slice(b"t.py");
    p.push(0x73); // name: "<module>"
    p.extend_from_slice(&8u32.to_le_bytes());
    p.extend_from_slice(b"<module>");
    p.extend_from_slice(&1u32.to_le_bytes()); // firstlineno
    p.push(0x73); // lnotab: b""
    p.extend_from_slice(&0u32.to_le_bytes());
    p
}

#[test]
fn typecode_remap_rewrites_one_byte() {
    // SHORT_ASCII_INTERNED "x" remapped to the non-interned variant.
    let input = pyc_311(&[0x5A, 0x01, 0x78]);
    let rules = ConfigRules::from_str(r#"{ "typecodes": { "0x5A": { "t": 122 } } }"#).unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    assert_eq!(walked.data[HEADER_311], 0x7A);
    // Every byte except the substituted one is unchanged.
    for (i, (a, b)) in input.iter().zip(walked.data.iter()).enumerate() {
        if i != HEADER_311 {
            assert_eq!(a, b, "byte {i} changed unexpectedly");
        }
    }
    // After the remap the string is no longer an interned variant.
    assert!(walked.interns.is_empty());
    assert_eq!(walked.stats.typecode_swaps, 1);

    let root = walked.mapper(walked.root);
    assert_eq!(root.typecode, 0x7A);
    assert!(matches!(
        root.kind,
        MapperKind::Str { len: 1, interned: false, .. }
    ));
}

#[test]
fn whole_byte_remap_keeps_reference_flag_semantics() {
    // The obfuscator encoded FLAG_REF|SHORT_ASCII_INTERNED as 0xD0; remapping the
    // whole byte back to 0xDA must restore interning and registration.
    let input = pyc_311(&[0xD0, 0x02, 0x61, 0x62]);
    let rules = ConfigRules::from_str(r#"{ "typecodes": { "0xD0": { "t": 218 } } }"#).unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    assert_eq!(walked.data[HEADER_311], 0xDA);
    assert_eq!(walked.refs.len(), 1);
    assert_eq!(walked.interns.len(), 1);
    assert_eq!(walked.refs[0], walked.root);
}

#[test]
fn typecode_skip_override_consumes_opaque_region() {
    // Unknown code 0x51 followed by two payload bytes the rules claim wholesale.
    let input = pyc_311(&[0x51, 0xAB, 0xCD]);
    let rules =
        ConfigRules::from_str(r#"{ "typecodes": { "0x51": { "t": 122, "i": 3 } } }"#).unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    assert_eq!(walked.data[HEADER_311], 0x7A);
    let root = walked.mapper(walked.root);
    assert_eq!(root.size, 3);
    assert!(matches!(root.kind, MapperKind::Opaque));
}

#[test]
fn opcode_identity_remap_leaves_wordcode_untouched() {
    // LOAD_CONST 0; RETURN_VALUE 0 - remapped to themselves.
    let input = pyc_311(&code_311(&[0x64, 0x00, 0x53, 0x00]));
    let rules = ConfigRules::from_str(
        r#"{ "opcodes": { "0x64": { "to": [100] }, "0x53": { "to": [83] } } }"#,
    )
    .unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    assert_eq!(walked.data, input);
    // Two wordcode instructions, both written back unchanged.
    assert_eq!(walked.stats.opcodes_visited, 2);
    assert_eq!(walked.stats.opcode_swaps, 2);
    assert_eq!(walked.stats.code_objects, 1);
}

#[test]
fn opcode_remap_rewrites_instruction_bytes() {
    let instrs = [0x90, 0x00, 0x53, 0x00];
    let input = pyc_311(&code_311(&instrs));
    let rules = ConfigRules::from_str(r#"{ "opcodes": { "0x90": { "to": [100] } } }"#).unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    // The instruction payload starts after the code child's 's' byte and length.
    let payload = HEADER_311 + 1 + 5 * 4 + 5;
    assert_eq!(walked.data[payload], 0x64);
    assert_eq!(&walked.data[payload + 1..payload + 4], &input[payload + 1..payload + 4]);
    assert_eq!(walked.stats.opcode_swaps, 1);

    // Nothing outside the single opcode byte moved.
    for (i, (a, b)) in input.iter().zip(walked.data.iter()).enumerate() {
        if i != payload {
            assert_eq!(a, b, "byte {i} changed unexpectedly");
        }
    }
}

#[test]
fn pre_wordcode_strides_in_27_code() {
    // POP_TOP (no argument), then STORE_NAME 0 (opcode 90, 2-byte argument).
    let instrs = [0x01, 0x5A, 0x00, 0x00];
    let input = pyc_27(&code_27(&instrs));
    let rules = ConfigRules::from_str(r#"{ "opcodes": { "0x01": { "to": [2] } } }"#).unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    let payload = 8 + 1 + 4 * 4 + 5;
    assert_eq!(walked.data[payload], 0x02);
    assert_eq!(walked.stats.opcodes_visited, 2);
    assert_eq!(walked.header.version, 207);
}

#[test]
fn code_object_shape_is_parsed() {
    let input = pyc_311(&code_311(&[0x64, 0x00, 0x53, 0x00]));
    let rules = CpythonRules::new();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    let root = walked.mapper(walked.root);
    assert_eq!(root.offset + root.size, input.len());

    let MapperKind::Code(code) = &root.kind else {
        panic!("expected a code root, got {:?}", root.kind);
    };
    assert_eq!(code.argcount, 0);
    assert_eq!(code.posonlyargcount, Some(0));
    assert_eq!(code.kwonlyargcount, Some(0));
    assert_eq!(code.nlocals, None);
    assert_eq!(code.stacksize, 2);
    assert_eq!(code.firstlineno, Some(1));
    assert!(code.qualname.is_some());
    assert!(code.exceptiontable.is_some());
    assert!(code.freevars.is_none());

    assert!(matches!(
        walked.mapper(code.code).kind,
        MapperKind::Str { len: 4, .. }
    ));

    // Size accounting: scalars plus children cover the whole frame.
    let children_total: usize = code
        .children()
        .iter()
        .map(|id| walked.mapper(*id).size)
        .sum();
    assert_eq!(root.size, 1 + 5 * 4 + 4 + children_total);
}

#[test]
fn legacy_27_code_object_shape() {
    let input = pyc_27(&code_27(&[0x01, 0x5A, 0x00, 0x00]));
    let rules = CpythonRules::new();

    let walked = Walker::new(&input, &rules).walk().unwrap();
    assert_eq!(walked.data, input);

    let root = walked.mapper(walked.root);
    let MapperKind::Code(code) = &root.kind else {
        panic!("expected a code root");
    };
    assert_eq!(code.nlocals, Some(0));
    assert_eq!(code.flags, 64);
    assert!(code.posonlyargcount.is_none());
    assert!(code.kwonlyargcount.is_none());
    assert!(code.freevars.is_some());
    assert!(code.qualname.is_none());
    assert_eq!(root.offset + root.size, input.len());
}

#[test]
fn unknown_typecode_is_fatal() {
    let input = pyc_311(&[0x51]);
    let rules = CpythonRules::new();

    let result = Walker::new(&input, &rules).walk();
    assert!(matches!(result, Err(Error::UnknownTypeCode(0x51))));
}

#[test]
fn malformed_long_digit_is_fatal() {
    let mut payload = vec![0x6C];
    payload.extend_from_slice(&1i32.to_le_bytes());
    payload.extend_from_slice(&[0x01, 0x80]); // digit with bit 15 set
    let input = pyc_311(&payload);
    let rules = CpythonRules::new();

    let result = Walker::new(&input, &rules).walk();
    assert!(matches!(result, Err(Error::MalformedLong(0x80))));
}

#[test]
fn incompatible_input_is_fatal() {
    let rules = CpythonRules::new();
    let result = Walker::new(&[0xFF; 20], &rules).walk();
    assert!(matches!(result, Err(Error::Incompatible)));
}

#[test]
fn truncated_container_is_out_of_bounds() {
    // Tuple announcing two elements but providing one.
    let input = pyc_311(&[0x29, 0x02, 0x4E]);
    let rules = CpythonRules::new();

    let result = Walker::new(&input, &rules).walk();
    assert!(matches!(result, Err(Error::OutOfBounds)));
}

/// Rules that skip pad bytes before each object and stop at a marker offset.
struct HookRules {
    abort_at: Option<usize>,
}

impl Rules for HookRules {
    fn is_compatible(&self, input: &[u8]) -> bool {
        CpythonRules::new().is_compatible(input)
    }

    fn parse_header(&self, input: &[u8], output: &mut [u8]) -> pycscope::Result<Header> {
        CpythonRules::new().parse_header(input, output)
    }

    fn pre_step(&self, input: &[u8], _output: &mut [u8], offset: usize) -> Option<StepControl> {
        if input.get(offset) == Some(&0xFF) {
            return Some(StepControl::Jump(offset + 1));
        }
        None
    }

    fn post_step(&self, _input: &[u8], _output: &mut [u8], offset: usize) -> Option<StepControl> {
        if Some(offset) == self.abort_at {
            return Some(StepControl::Abort);
        }
        None
    }
}

#[test]
fn pre_step_hook_can_jump_over_padding() {
    // A pad byte the obfuscator slipped in before the root object.
    let input = pyc_311(&[0xFF, 0x4E]);
    let rules = HookRules { abort_at: None };

    let walked = Walker::new(&input, &rules).walk().unwrap();

    assert_eq!(walked.data, input);
    let root = walked.mapper(walked.root);
    assert_eq!(root.offset, HEADER_311 + 1);
    assert!(matches!(root.kind, MapperKind::None));
}

#[test]
fn post_step_hook_can_abort() {
    let input = pyc_311(&[0x4E]);
    let rules = HookRules {
        abort_at: Some(HEADER_311),
    };

    let result = Walker::new(&input, &rules).walk();
    assert!(matches!(result, Err(Error::Aborted)));
}

/// Rules that claim unknown records as fixed-size opaque regions.
struct SubstituteRules;

impl Rules for SubstituteRules {
    fn is_compatible(&self, input: &[u8]) -> bool {
        CpythonRules::new().is_compatible(input)
    }

    fn parse_header(&self, input: &[u8], output: &mut [u8]) -> pycscope::Result<Header> {
        CpythonRules::new().parse_header(input, output)
    }

    fn substitute_mapper(&self, typecode: u8, _input: &[u8], _offset: usize) -> Option<usize> {
        // Obfuscator-private record: one type byte plus four payload bytes.
        (typecode == 0x51).then_some(5)
    }
}

#[test]
fn substitute_mapper_claims_private_records() {
    // (private-record, None)
    let input = pyc_311(&[0x29, 0x02, 0x51, 0x01, 0x02, 0x03, 0x04, 0x4E]);
    let rules = SubstituteRules;

    let walked = Walker::new(&input, &rules).walk().unwrap();

    assert_eq!(walked.data, input);
    let root = walked.mapper(walked.root);
    assert_eq!(root.size, 2 + 5 + 1);

    let MapperKind::Tuple(items) = &root.kind else {
        panic!("expected a tuple root");
    };
    let claimed = walked.mapper(items[0]);
    assert_eq!(claimed.size, 5);
    assert!(matches!(claimed.kind, MapperKind::Opaque));
    assert!(matches!(walked.mapper(items[1]).kind, MapperKind::None));
}

#[test]
fn rewrite_runs_before_following_fields_parse() {
    // The consts tuple lives after the instruction child; if rewriting ran late,
    // the opcode at the very end of the code string would still be the original
    // when consts is parsed. Observable here simply as: both got processed.
    let instrs = [0x90, 0x00, 0x90, 0x00];
    let input = pyc_311(&code_311(&instrs));
    let rules = ConfigRules::from_str(r#"{ "opcodes": { "0x90": { "to": [100] } } }"#).unwrap();

    let walked = Walker::new(&input, &rules).walk().unwrap();

    let payload = HEADER_311 + 1 + 5 * 4 + 5;
    assert_eq!(&walked.data[payload..payload + 4], &[0x64, 0x00, 0x64, 0x00]);
    assert_eq!(walked.stats.opcode_swaps, 2);
}
