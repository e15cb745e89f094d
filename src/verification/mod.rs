pub mod polynomial_hash;
pub mod verifier;

pub use polynomial_hash::{
    collision_probability, generate_hash_salt, minimum_tag_bits_for_security, polynomial_hash,
    polynomial_hash_with_length, verify_hash,
};
pub use verifier::{verify_keys_match, verify_local, KeyVerifier, VerificationOutcome, VerificationResult};
