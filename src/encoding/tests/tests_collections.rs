//! Tests for variable-length collections: byte vectors and `Vec<T>`.

#[cfg(test)]
mod tests {
    use crate::encoding::{decode_from_slice, decode_vec, encode_to_vec, encode_vec};

    /// # Scenario
    /// Byte vectors carry a u32 length prefix and round-trip, including
    /// the empty vector.
    #[test]
    fn byte_vectors_round_trip() {
        for v in [Vec::new(), vec![0u8], vec![7u8; 300]] {
            let bytes = encode_to_vec(&v).unwrap();
            assert_eq!(bytes.len(), 4 + v.len());
            let (decoded, consumed) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, bytes.len());
        }
    }

    /// # Scenario
    /// A borrowed slice encodes identically to the owned vector.
    #[test]
    fn slices_match_owned_encoding() {
        let owned = vec![1u8, 2, 3];
        let slice: &[u8] = &owned;
        let mut a = Vec::new();
        let mut b = Vec::new();
        crate::encoding::Encode::encode_to(&owned, &mut a).unwrap();
        crate::encoding::Encode::encode_to(&slice, &mut b).unwrap();
        assert_eq!(a, b);
    }

    /// # Scenario
    /// `encode_vec`/`decode_vec` round-trip vectors of structured items
    /// and report the exact number of bytes consumed.
    #[test]
    fn struct_vectors_round_trip() {
        let items: Vec<i64> = vec![-5, 0, 5, i64::MAX];
        let mut buf = Vec::new();
        encode_vec(&items, &mut buf).unwrap();
        assert_eq!(buf.len(), 4 + items.len() * 8);

        let (decoded, consumed) = decode_vec::<i64>(&buf).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(consumed, buf.len());
    }

    /// # Scenario
    /// Multiple values decoded from one buffer via cursor advancing.
    #[test]
    fn cursor_walks_concatenated_values() {
        let mut buf = Vec::new();
        crate::encoding::Encode::encode_to(&3i32, &mut buf).unwrap();
        crate::encoding::Encode::encode_to(&true, &mut buf).unwrap();
        crate::encoding::Encode::encode_to(&9u64, &mut buf).unwrap();

        let mut off = 0;
        let (a, n) = decode_from_slice::<i32>(&buf[off..]).unwrap();
        off += n;
        let (b, n) = decode_from_slice::<bool>(&buf[off..]).unwrap();
        off += n;
        let (c, n) = decode_from_slice::<u64>(&buf[off..]).unwrap();
        off += n;

        assert_eq!((a, b, c), (3, true, 9));
        assert_eq!(off, buf.len());
    }
}
