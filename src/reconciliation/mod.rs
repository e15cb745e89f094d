pub mod blocks;
pub mod cascade;

pub use blocks::{initial_block_size, optimal_block_size, permute_indices, split_into_blocks};
pub use cascade::{CascadeOutcome, CascadeParams, CascadeSession, CascadeState, DEFAULT_NUM_PASSES};
