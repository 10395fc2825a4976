use super::*;
use proptest::prelude::*;

// -------------------- Varints --------------------

#[test]
fn varint_boundaries() {
    for (value, len) in [
        (0u64, 1usize),
        (127, 1),
        (128, 2),
        (16_383, 2),
        (16_384, 3),
        (u32::MAX as u64, 5),
        (u64::MAX, 10),
    ] {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        assert_eq!(buf.len(), len, "encoded length of {}", value);
        assert_eq!(varint_len(value), len);
        assert_eq!(get_varint(&buf), Some((value, len)));
    }
}

#[test]
fn varint_truncated_is_none() {
    assert_eq!(get_varint(&[]), None);
    assert_eq!(get_varint(&[0x80]), None);
    assert_eq!(get_varint(&[0xff, 0xff]), None);
}

#[test]
fn varint_overflow_is_none() {
    // 10th byte may only carry the top bit of a u64.
    let mut bytes = vec![0xff; 9];
    bytes.push(0x02);
    assert_eq!(get_varint(&bytes), None);

    let eleven = vec![0x80; 11];
    assert_eq!(get_varint(&eleven), None);
}

#[test]
fn varint_ignores_trailing_bytes() {
    assert_eq!(get_varint(&[0x05, 0xaa, 0xbb]), Some((5, 1)));
}

// -------------------- Encode / decode --------------------

#[test]
fn empty_block_is_single_zero_byte() {
    let block = encode::<&[u8]>(&[]);
    assert_eq!(block, vec![0]);
    assert_eq!(decode(&block).count(), 0);
    assert_eq!(validate(&block), Ok(0));
}

#[test]
fn decode_yields_values_in_order() {
    let values: [&[u8]; 3] = [b"red", b"", b"green"];
    let block = encode(&values);
    assert_eq!(block.len(), encoded_len(&values));

    let decoded: Vec<&[u8]> = decode(&block).collect::<Result<_, _>>().unwrap();
    assert_eq!(decoded, values.to_vec());
    assert_eq!(validate(&block), Ok(3));
}

#[test]
fn decode_is_restartable() {
    let block = encode(&[b"a".as_slice(), b"b".as_slice()]);
    let first: Vec<_> = decode(&block).collect();
    let second: Vec<_> = decode(&block).collect();
    assert_eq!(first, second);

    // A cloned iterator continues independently from where it was cloned.
    let mut it = decode(&block);
    it.next();
    let rest = it.clone();
    assert_eq!(it.count(), 1);
    assert_eq!(rest.count(), 1);
}

#[test]
fn remaining_counts_down() {
    let block = encode(&[b"x".as_slice(), b"y".as_slice()]);
    let mut it = decode(&block);
    assert_eq!(it.remaining(), 2);
    it.next();
    assert_eq!(it.remaining(), 1);
    it.next();
    assert_eq!(it.remaining(), 0);
    assert!(it.next().is_none());
}

#[test]
fn encode_into_appends() {
    let mut out = vec![0xee];
    encode_into(&mut out, &[b"v".as_slice()]);
    assert_eq!(out, vec![0xee, 1, 1, b'v']);
}

#[test]
fn large_value_uses_multibyte_prefix() {
    let big = vec![7u8; 300];
    let block = encode(&[big.as_slice()]);
    // count(1) + len varint(2) + payload
    assert_eq!(block.len(), 1 + 2 + 300);
    let decoded: Vec<&[u8]> = decode(&block).collect::<Result<_, _>>().unwrap();
    assert_eq!(decoded, vec![big.as_slice()]);
}

// -------------------- Corruption --------------------

#[test]
fn length_prefix_past_boundary_is_corrupt() {
    let mut block = encode(&[b"apple".as_slice()]);
    block.truncate(block.len() - 2);

    let results: Vec<_> = decode(&block).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(CodecError::CorruptRecord { offset: 1, .. })
    ));
    assert!(validate(&block).is_err());
}

#[test]
fn read_prefixed_past_end_is_corrupt() {
    let mut pos = 2;
    assert_eq!(
        read_prefixed(b"\x00", &mut pos),
        Err(CodecError::CorruptRecord {
            offset: 2,
            reason: "position past block"
        })
    );
    assert_eq!(pos, 2);

    // Exactly at the end is a truncated prefix, not an out-of-range position.
    let mut pos = 1;
    assert!(matches!(
        read_prefixed(b"\x00", &mut pos),
        Err(CodecError::CorruptRecord {
            reason: "truncated length prefix",
            ..
        })
    ));
}

#[test]
fn count_larger_than_records_is_corrupt() {
    let mut block = Vec::new();
    put_varint(&mut block, 3);
    write_prefixed(&mut block, b"only");

    let results: Vec<_> = decode(&block).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
}

#[test]
fn truncated_count_prefix_reports_once() {
    let results: Vec<_> = decode(&[]).collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());

    let results: Vec<_> = decode(&[0x80]).collect();
    assert_eq!(results.len(), 1);
}

#[test]
fn trailing_bytes_fail_validation() {
    let mut block = encode(&[b"v".as_slice()]);
    block.push(0);
    // Iteration only reads declared records...
    assert_eq!(decode(&block).filter(Result::is_ok).count(), 1);
    // ...but validation requires the block to be consumed exactly.
    let err = validate(&block).unwrap_err();
    assert!(err.to_string().contains("trailing"));
}

#[test]
fn iterator_is_fused_after_error() {
    let block = [2u8, 9, b'a'];
    let mut it = decode(&block);
    assert!(it.next().unwrap().is_err());
    assert!(it.next().is_none());
    assert!(it.next().is_none());
}

proptest! {
    #[test]
    fn any_value_list_validates(values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32)) {
        let block = encode(&values);
        prop_assert_eq!(validate(&block), Ok(values.len() as u64));
        let decoded: Vec<&[u8]> = decode(&block).collect::<Result<_, _>>().unwrap();
        let expected: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn truncation_never_panics(values in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 1..8), cut in 1usize..64) {
        let block = encode(&values);
        let cut = cut.min(block.len());
        let short = &block[..block.len() - cut];
        prop_assert!(validate(short).is_err());
    }
}
