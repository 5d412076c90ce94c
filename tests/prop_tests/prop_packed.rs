use proptest::prelude::*;
use revlite::packed::{self, PackedStream};
use std::io::Write;

proptest! {
    #[test]
    fn unsigned_round_trip(value in any::<u64>()) {
        let mut encoded = Vec::new();
        packed::write_uint(&mut encoded, value);
        prop_assert!(encoded.len() <= 10);
        let (decoded, len) = packed::read_uint(&encoded).unwrap();
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(len, encoded.len());
    }

    #[test]
    fn signed_round_trip(value in any::<i64>()) {
        prop_assert_eq!(packed::unzigzag(packed::zigzag(value)), value);
    }

    #[test]
    fn concatenated_values_decode_in_order(values in proptest::collection::vec(any::<u64>(), 1..64)) {
        let mut encoded = Vec::new();
        for &v in &values {
            packed::write_uint(&mut encoded, v);
        }
        let mut pos = 0;
        for &v in &values {
            let (decoded, len) = packed::read_uint(&encoded[pos..]).unwrap();
            prop_assert_eq!(decoded, v);
            pos += len;
        }
        prop_assert_eq!(pos, encoded.len());
    }

    #[test]
    fn stream_decodes_any_sequence(
        values in proptest::collection::vec(any::<u64>(), 1..512),
        block_size in 16u64..4096,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packed");
        let mut bytes = Vec::new();
        for &v in &values {
            packed::write_uint(&mut bytes, v);
        }
        std::fs::File::create(&path).unwrap().write_all(&bytes).unwrap();

        let mut stream = PackedStream::open(&path, block_size).unwrap();
        for &v in &values {
            prop_assert_eq!(stream.get().unwrap(), v);
        }
        prop_assert!(stream.get().is_err());
    }
}

#[test]
fn signed_extremes_round_trip() {
    for value in [0i64, 1, -1, i64::MAX, i64::MIN, 2, -2] {
        assert_eq!(packed::unzigzag(packed::zigzag(value)), value);
    }
    for value in [0u64, 1, u64::MAX, (1 << 63) - 1] {
        let mut encoded = Vec::new();
        packed::write_uint(&mut encoded, value);
        assert_eq!(packed::read_uint(&encoded).unwrap().0, value);
    }
}
