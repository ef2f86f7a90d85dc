//! Binary decoding and module-level validation through the public
//! `load_module` surface: deterministic results, header checks before
//! section parsing, section ordering, and rejection of unsafe bodies.

use waxel::{DecodeError, LoadError, ValidationError};

const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

fn with_sections(sections: &[u8]) -> Vec<u8> {
    let mut bytes = HEADER.to_vec();
    bytes.extend_from_slice(sections);
    bytes
}

#[test]
fn identical_bytes_decode_identically() {
    let bytes = wat::parse_str(
        r#"
        (module
          (memory 1)
          (global i32 (i32.const 3))
          (func (export "f") (result i32) i32.const 1))
        "#,
    )
    .unwrap();

    let a = waxel::load_module(&bytes).unwrap();
    let b = waxel::load_module(&bytes).unwrap();
    assert_eq!(*a, *b);
    assert_eq!(a.exports.len(), 1);
    assert_eq!(a.memories.len(), 1);
}

#[test]
fn header_is_checked_before_any_section() {
    // empty input
    assert!(matches!(
        waxel::load_module(&[]),
        Err(LoadError::Decode(DecodeError::BadHeader { .. }))
    ));

    // wrong magic
    let mut bytes = HEADER.to_vec();
    bytes[0] = 0x01;
    assert!(matches!(
        waxel::load_module(&bytes),
        Err(LoadError::Decode(DecodeError::BadHeader { .. }))
    ));

    // wrong version
    let mut bytes = HEADER.to_vec();
    bytes[4] = 0x02;
    assert!(matches!(
        waxel::load_module(&bytes),
        Err(LoadError::Decode(DecodeError::BadHeader { .. }))
    ));
}

#[test]
fn sections_must_appear_in_order_without_duplicates() {
    // import section (id 2) followed by type section (id 1)
    let bytes = with_sections(&[0x02, 0x01, 0x00, 0x01, 0x01, 0x00]);
    assert!(matches!(
        waxel::load_module(&bytes),
        Err(LoadError::Decode(DecodeError::SectionOutOfOrder { id: 1, .. }))
    ));

    // two type sections
    let bytes = with_sections(&[0x01, 0x01, 0x00, 0x01, 0x01, 0x00]);
    assert!(matches!(
        waxel::load_module(&bytes),
        Err(LoadError::Decode(DecodeError::DuplicateSection { id: 1, .. }))
    ));
}

#[test]
fn custom_sections_are_skipped() {
    // a lone custom section named "hi"
    let bytes = with_sections(&[0x00, 0x03, 0x02, b'h', b'i']);
    let module = waxel::load_module(&bytes).unwrap();
    assert_eq!(module.types.len(), 0);
    assert_eq!(module.total_funcs(), 0);
}

#[test]
fn truncated_input_is_a_decode_error() {
    let bytes = wat::parse_str(r#"(module (func (export "f") (result i32) i32.const 7))"#).unwrap();
    let truncated = &bytes[..bytes.len() - 3];
    assert!(matches!(
        waxel::load_module(truncated),
        Err(LoadError::Decode(_))
    ));
}

#[test]
fn body_that_would_underflow_the_stack_is_rejected() {
    // one function of type () -> () whose body is a bare i32.add
    let bytes = with_sections(&[
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type section: () -> ()
        0x03, 0x02, 0x01, 0x00, // function section: [type 0]
        0x0A, 0x05, 0x01, 0x03, 0x00, 0x6A, 0x0B, // code: i32.add; end
    ]);
    assert!(matches!(
        waxel::load_module(&bytes),
        Err(LoadError::Validation(ValidationError::Body { func: 0, .. }))
    ));
}

#[test]
fn identical_malformed_bytes_fail_identically() {
    let bytes = with_sections(&[0x01, 0x01, 0x00, 0x01, 0x01, 0x00]);
    let a = waxel::load_module(&bytes).unwrap_err();
    let b = waxel::load_module(&bytes).unwrap_err();
    match (a, b) {
        (LoadError::Decode(a), LoadError::Decode(b)) => assert_eq!(a, b),
        other => panic!("expected matching decode errors, got {other:?}"),
    }
}
