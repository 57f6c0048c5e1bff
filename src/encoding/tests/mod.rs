use crate::encoding::{Decode, Encode, EncodingError};

/// Encodes through the trait into a fresh buffer.
fn wire_of<T: Encode>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf).unwrap();
    buf
}

#[test]
fn integers_are_little_endian() {
    assert_eq!(wire_of(&0xDEAD_BEEFu32), vec![0xEF, 0xBE, 0xAD, 0xDE]);
    assert_eq!(
        wire_of(&0x0102_0304_0506_0708u64),
        vec![0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
    );
}

#[test]
fn integer_extremes_round_trip() {
    for value in [0u64, 1, u64::MAX] {
        let (decoded, used) = u64::decode_from(&wire_of(&value)).unwrap();
        assert_eq!((decoded, used), (value, 8));
    }
    for value in [0u32, u32::MAX] {
        let (decoded, used) = u32::decode_from(&wire_of(&value)).unwrap();
        assert_eq!((decoded, used), (value, 4));
    }
}

#[test]
fn bool_accepts_only_zero_and_one() {
    assert_eq!(bool::decode_from(&[0x00]).unwrap(), (false, 1));
    assert_eq!(bool::decode_from(&[0x01]).unwrap(), (true, 1));
    assert!(matches!(
        bool::decode_from(&[0x5A]),
        Err(EncodingError::NotABool(0x5A))
    ));
}

#[test]
fn fixed_arrays_are_raw_bytes() {
    let magic = *b"CKV1";
    assert_eq!(wire_of(&magic), b"CKV1");
    let (decoded, used) = <[u8; 4]>::decode_from(b"CKV1 trailing junk").unwrap();
    assert_eq!(decoded, magic);
    assert_eq!(used, 4);
}

#[test]
fn short_buffer_reports_the_shortfall() {
    let err = u64::decode_from(&[1, 2, 3]).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::Truncated {
            wanted: 8,
            remaining: 3
        }
    ));
    assert!(matches!(
        u32::decode_from(&[]),
        Err(EncodingError::Truncated {
            wanted: 4,
            remaining: 0
        })
    ));
    assert!(matches!(
        <[u8; 32]>::decode_from(&[0; 16]),
        Err(EncodingError::Truncated {
            wanted: 32,
            remaining: 16
        })
    ));
}

#[test]
fn decoders_ignore_trailing_bytes() {
    // Structures decode field-by-field from a larger buffer; a
    // decoder must never look past its own field.
    let mut wire = wire_of(&99u32);
    wire.extend_from_slice(&[0xFF; 8]);
    let (value, used) = u32::decode_from(&wire).unwrap();
    assert_eq!((value, used), (99, 4));
}

#[test]
fn fields_decode_in_sequence_with_a_running_offset() {
    // The shape every multi-field structure in the crate follows:
    // magic, offset, flag, checksum.
    let mut wire = Vec::new();
    (*b"CKV1").encode_to(&mut wire).unwrap();
    7u64.encode_to(&mut wire).unwrap();
    true.encode_to(&mut wire).unwrap();
    42u32.encode_to(&mut wire).unwrap();

    let mut at = 0;
    let (magic, n) = <[u8; 4]>::decode_from(&wire[at..]).unwrap();
    at += n;
    let (offset, n) = u64::decode_from(&wire[at..]).unwrap();
    at += n;
    let (flag, n) = bool::decode_from(&wire[at..]).unwrap();
    at += n;
    let (checksum, n) = u32::decode_from(&wire[at..]).unwrap();
    at += n;

    assert_eq!(magic, *b"CKV1");
    assert_eq!((offset, flag, checksum), (7, true, 42));
    assert_eq!(at, wire.len());
}

#[test]
fn encoding_is_deterministic() {
    // Checksums upstream are computed over this output.
    assert_eq!(wire_of(&0xABCDu32), wire_of(&0xABCDu32));
    assert_eq!(wire_of(&u64::MAX), wire_of(&u64::MAX));
    assert_eq!(wire_of(&*b"CKV1"), wire_of(&*b"CKV1"));
}
