//! Bit-string helpers shared by every stage of the pipeline.
//!
//! Keys travel as `Vec<bool>`. Packing into bytes is big-endian within each
//! byte (the first bit is the most significant), and the final byte is
//! zero-padded on the right.

/// Packs bits into bytes, MSB first. The last byte is zero-padded.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << (7 - i)))
        })
        .collect()
}

/// Unpacks bytes into bits, MSB first.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |i| byte & (1 << i) != 0))
        .collect()
}

/// Unpacks bytes and drops the padding beyond `num_bits`.
pub fn bytes_to_bits_truncated(bytes: &[u8], num_bits: usize) -> Vec<bool> {
    let mut bits = bytes_to_bits(bytes);
    bits.truncate(num_bits);
    bits
}

/// Big-endian integer value of up to 128 bits.
pub fn bits_to_int(bits: &[bool]) -> u128 {
    debug_assert!(bits.len() <= 128);
    bits.iter().fold(0u128, |acc, &bit| (acc << 1) | bit as u128)
}

/// The low `num_bits` bits of `value`, most significant first.
pub fn int_to_bits(value: u128, num_bits: usize) -> Vec<bool> {
    (0..num_bits)
        .rev()
        .map(|i| i < 128 && (value >> i) & 1 == 1)
        .collect()
}

/// Splits into fixed-size chunks; the last chunk is padded with zeros.
pub fn chunk_bits(bits: &[bool], chunk_size: usize) -> Vec<Vec<bool>> {
    if chunk_size == 0 {
        return Vec::new();
    }
    bits.chunks(chunk_size)
        .map(|chunk| {
            let mut padded = chunk.to_vec();
            padded.resize(chunk_size, false);
            padded
        })
        .collect()
}

/// Chunks a key into big-endian integers of `element_bits` each.
pub fn bits_to_field_elements(bits: &[bool], element_bits: usize) -> Vec<u128> {
    chunk_bits(bits, element_bits)
        .iter()
        .map(|chunk| bits_to_int(chunk))
        .collect()
}

/// XOR of all bits.
pub fn parity(bits: &[bool]) -> bool {
    bits.iter().fold(false, |acc, &bit| acc ^ bit)
}

/// XOR of the bits at `indices`.
pub fn parity_at(bits: &[bool], indices: &[usize]) -> bool {
    indices.iter().fold(false, |acc, &i| acc ^ bits[i])
}

/// Number of positions where the two strings differ.
pub fn hamming_distance(a: &[bool], b: &[bool]) -> usize {
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count()
}

/// Hex rendering used in log lines and the wire format.
pub fn to_hex(bits: &[bool]) -> String {
    hex::encode(bits_to_bytes(bits))
}

/// Serde adapter that ships a bit vector as `{ "len": n, "hex": "..." }`
/// instead of a JSON array of booleans.
pub mod packed {
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Packed {
        len: usize,
        hex: String,
    }

    pub fn serialize<S: Serializer>(bits: &[bool], serializer: S) -> Result<S::Ok, S::Error> {
        Packed {
            len: bits.len(),
            hex: super::to_hex(bits),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<bool>, D::Error> {
        let packed = Packed::deserialize(deserializer)?;
        let bytes = hex::decode(&packed.hex).map_err(D::Error::custom)?;
        let expected = packed.len / 8 + usize::from(packed.len % 8 != 0);
        if bytes.len() != expected {
            return Err(D::Error::custom(format!(
                "packed bit string of length {} carries {} bytes",
                packed.len,
                bytes.len()
            )));
        }
        Ok(super::bytes_to_bits_truncated(&bytes, packed.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn packs_msb_first() {
        let bits = [true, false, true, true, false, false, false, true];
        assert_eq!(bits_to_bytes(&bits), vec![0b1011_0001]);
    }

    #[test]
    fn pads_last_byte_with_zeros() {
        let bits = [true, true, true];
        assert_eq!(bits_to_bytes(&bits), vec![0b1110_0000]);
        assert_eq!(bytes_to_bits(&[0b1110_0000]).len(), 8);
    }

    #[test]
    fn int_conversion_is_big_endian() {
        assert_eq!(bits_to_int(&[true, false, true, true]), 11);
        assert_eq!(int_to_bits(11, 4), vec![true, false, true, true]);
        assert_eq!(int_to_bits(1, 6), vec![false, false, false, false, false, true]);
    }

    #[test]
    fn chunking_pads_final_chunk() {
        let bits = [true, false, true];
        assert_eq!(chunk_bits(&bits, 4), vec![vec![true, false, true, false]]);
        assert!(chunk_bits(&[], 4).is_empty());
        assert_eq!(bits_to_field_elements(&bits, 4), vec![0b1010]);
    }

    #[test]
    fn parity_helpers() {
        let bits = [true, true, false, true];
        assert!(parity(&bits));
        assert!(!parity_at(&bits, &[0, 1]));
        assert!(parity_at(&bits, &[0, 2]));
        assert_eq!(hamming_distance(&bits, &[true, false, false, false]), 2);
    }

    proptest! {
        #[test]
        fn byte_round_trip_recovers_bits(bits in proptest::collection::vec(any::<bool>(), 0..300)) {
            let bytes = bits_to_bytes(&bits);
            prop_assert_eq!(bytes.len(), (bits.len() + 7) / 8);
            prop_assert_eq!(bytes_to_bits_truncated(&bytes, bits.len()), bits);
        }

        #[test]
        fn int_round_trip(value in any::<u64>()) {
            prop_assert_eq!(bits_to_int(&int_to_bits(value as u128, 64)), value as u128);
        }
    }
}
