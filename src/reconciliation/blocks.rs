//! Block geometry for Cascade: sizes, per-pass permutations and partitioning.
//!
//! Both parties must derive the same blocks, so everything here is a pure
//! function of the shared seed, the pass index and the key length.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use crate::errors::ParameterError;

/// Smallest block Cascade will ever use.
pub const MIN_BLOCK_SIZE: usize = 4;

/// Block size for which one error per block is expected: `max(4, ceil(0.73 / qber))`.
pub fn optimal_block_size(qber: f64) -> Result<usize, ParameterError> {
    if !(qber > 0.0 && qber < 0.5) {
        return Err(ParameterError::OutOfRange {
            name: "qber",
            range: "(0, 0.5)",
            value: qber,
        });
    }
    Ok(((0.73 / qber).ceil() as usize).max(MIN_BLOCK_SIZE))
}

/// First-pass block size. An explicit override wins; otherwise a positive
/// QBER estimate picks the optimal size, and an unknown or zero QBER falls
/// back to quarter-key blocks to keep leakage low.
pub fn initial_block_size(
    key_len: usize,
    qber_estimate: Option<f64>,
    override_size: Option<usize>,
) -> Result<usize, ParameterError> {
    if let Some(size) = override_size {
        return Ok(size.max(MIN_BLOCK_SIZE));
    }
    match qber_estimate {
        Some(qber) if qber > 0.0 => optimal_block_size(qber),
        Some(qber) if qber < 0.0 => Err(ParameterError::OutOfRange {
            name: "qber",
            range: "[0, 0.5)",
            value: qber,
        }),
        _ => Ok((key_len / 4).max(MIN_BLOCK_SIZE)),
    }
}

fn pass_rng(seed: u64, pass: usize) -> ChaCha20Rng {
    let mut hasher = Sha256::new();
    hasher.update(b"cascade-permutation");
    hasher.update(seed.to_le_bytes());
    hasher.update((pass as u64).to_le_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    ChaCha20Rng::from_seed(key)
}

/// The pass-specific permutation of `0..n`.
pub fn permute_indices(n: usize, seed: u64, pass: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut pass_rng(seed, pass));
    indices
}

/// Cuts a permutation into contiguous blocks of `block_size`; the last one may be shorter.
pub fn split_into_blocks(permutation: &[usize], block_size: usize) -> Vec<Vec<usize>> {
    if block_size == 0 {
        return Vec::new();
    }
    permutation.chunks(block_size).map(<[usize]>::to_vec).collect()
}

/// Blocks for one pass, as lists of original key indices.
pub fn pass_blocks(n: usize, seed: u64, pass: usize, block_size: usize) -> Vec<Vec<usize>> {
    split_into_blocks(&permute_indices(n, seed, pass), block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_from_qber() {
        assert_eq!(optimal_block_size(0.05).unwrap(), 15);
        assert_eq!(optimal_block_size(0.02).unwrap(), 37);
        assert_eq!(optimal_block_size(0.3).unwrap(), 4);
        assert!(optimal_block_size(0.0).is_err());
        assert!(optimal_block_size(0.5).is_err());
    }

    #[test]
    fn initial_size_fallbacks() {
        assert_eq!(initial_block_size(1000, None, Some(2)).unwrap(), 4);
        assert_eq!(initial_block_size(1000, Some(0.05), Some(64)).unwrap(), 64);
        assert_eq!(initial_block_size(1000, Some(0.05), None).unwrap(), 15);
        assert_eq!(initial_block_size(1000, Some(0.0), None).unwrap(), 250);
        assert_eq!(initial_block_size(1000, None, None).unwrap(), 250);
        assert_eq!(initial_block_size(8, None, None).unwrap(), 4);
        assert!(initial_block_size(1000, Some(-0.1), None).is_err());
    }

    #[test]
    fn permutation_is_shared_and_pass_specific() {
        let p0 = permute_indices(200, 42, 0);
        assert_eq!(p0, permute_indices(200, 42, 0));
        assert_ne!(p0, permute_indices(200, 42, 1));
        assert_ne!(p0, permute_indices(200, 43, 0));

        let mut sorted = p0.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn blocks_cover_every_index_once() {
        let blocks = pass_blocks(103, 7, 2, 10);
        assert_eq!(blocks.len(), 11);
        assert_eq!(blocks.last().map(Vec::len), Some(3));
        let mut all: Vec<usize> = blocks.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..103).collect::<Vec<_>>());
        assert!(split_into_blocks(&[1, 2, 3], 0).is_empty());
    }
}
