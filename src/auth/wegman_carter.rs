//! Wegman–Carter tags built from a Toeplitz hash and a one-time-pad mask.
//!
//! `tag = (T_S · M mod 2) ⊕ r`, where the Toeplitz seed `S` is expanded from
//! the pre-shared key with HMAC-SHA256 in counter mode and the mask `r` is
//! derived from the key and the message itself. Forgery succeeds with
//! probability at most `2^-tag_bits`.

use ring::hmac;
use subtle::ConstantTimeEq;

use crate::bits::{bits_to_bytes, bytes_to_bits};
use crate::errors::ParameterError;
use crate::toeplitz::ToeplitzSeed;

pub const DEFAULT_TAG_BITS: usize = 64;

/// The mask is cut from a single SHA-256 output.
pub const MAX_TAG_BITS: usize = 256;

/// Pre-shared authentication secret. There is no default value.
#[derive(Clone)]
pub struct AuthKey(Vec<u8>);

impl AuthKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, ParameterError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ParameterError::Empty("Authentication key"));
        }
        Ok(AuthKey(bytes))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, ParameterError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| ParameterError::Config(format!("auth key is not valid hex: {e}")))?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn hmac_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.0)
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey({} bytes)", self.0.len())
    }
}

pub fn tag_len_bytes(tag_bits: usize) -> usize {
    (tag_bits + 7) / 8
}

fn check_tag_bits(tag_bits: usize) -> Result<(), ParameterError> {
    if tag_bits == 0 || tag_bits > MAX_TAG_BITS {
        return Err(ParameterError::OutOfRange {
            name: "tag_bits",
            range: "[1, 256]",
            value: tag_bits as f64,
        });
    }
    Ok(())
}

/// Expands the key into `message_bits + tag_bits - 1` seed bits (plus one
/// spare byte) with HMAC(key, "toeplitz_seed_{counter}").
pub fn derive_toeplitz_seed(key: &AuthKey, message_bits: usize, tag_bits: usize) -> Vec<bool> {
    let seed_bits_needed = message_bits + tag_bits - 1;
    let seed_bytes_needed = (seed_bits_needed + 7) / 8 + 1;

    let hmac_key = key.hmac_key();
    let mut seed_bytes = Vec::with_capacity(seed_bytes_needed + 32);
    let mut counter = 0u64;
    while seed_bytes.len() < seed_bytes_needed {
        let label = format!("toeplitz_seed_{counter}");
        seed_bytes.extend_from_slice(hmac::sign(&hmac_key, label.as_bytes()).as_ref());
        counter += 1;
    }
    seed_bytes.truncate(seed_bytes_needed);
    bytes_to_bits(&seed_bytes)
}

/// Per-message pad: the first `tag_bits` bits of HMAC(key, "otp_mask_" ‖ message).
pub fn derive_otp_mask(key: &AuthKey, message: &[u8], tag_bits: usize) -> Vec<bool> {
    let mut ctx = hmac::Context::with_key(&key.hmac_key());
    ctx.update(b"otp_mask_");
    ctx.update(message);
    let mut mask = bytes_to_bits(ctx.sign().as_ref());
    mask.truncate(tag_bits);
    mask
}

/// Computes the tag for `message`, packed MSB-first into `ceil(tag_bits / 8)` bytes.
pub fn generate_auth_tag(message: &[u8], key: &AuthKey, tag_bits: usize) -> Result<Vec<u8>, ParameterError> {
    check_tag_bits(tag_bits)?;

    let message_bits = bytes_to_bits(message);
    if message_bits.is_empty() {
        let digest = hmac::sign(&key.hmac_key(), b"empty_message_tag");
        return Ok(digest.as_ref()[..tag_len_bytes(tag_bits)].to_vec());
    }

    let seed_bits = derive_toeplitz_seed(key, message_bits.len(), tag_bits);
    let toeplitz = ToeplitzSeed::new(seed_bits, tag_bits, message_bits.len())?;
    let hashed = toeplitz.hash(&message_bits)?;

    let mask = derive_otp_mask(key, message, tag_bits);
    let tag: Vec<bool> = hashed.iter().zip(mask.iter()).map(|(&h, &r)| h ^ r).collect();
    Ok(bits_to_bytes(&tag))
}

/// Recomputes the tag and compares in constant time.
pub fn verify_auth_tag(message: &[u8], tag: &[u8], key: &AuthKey, tag_bits: usize) -> Result<bool, ParameterError> {
    let expected = generate_auth_tag(message, key, tag_bits)?;
    Ok(expected.ct_eq(tag).into())
}

/// Keyed authenticator that also counts the messages it has processed.
#[derive(Debug, Clone)]
pub struct ToeplitzAuthenticator {
    key: AuthKey,
    tag_bits: usize,
    message_counter: u64,
}

impl ToeplitzAuthenticator {
    pub fn new(key: AuthKey, tag_bits: usize) -> Result<Self, ParameterError> {
        check_tag_bits(tag_bits)?;
        Ok(ToeplitzAuthenticator {
            key,
            tag_bits,
            message_counter: 0,
        })
    }

    pub fn tag_bits(&self) -> usize {
        self.tag_bits
    }

    pub fn tag_len_bytes(&self) -> usize {
        tag_len_bytes(self.tag_bits)
    }

    pub fn message_counter(&self) -> u64 {
        self.message_counter
    }

    pub fn authenticate(&mut self, message: &[u8]) -> Result<Vec<u8>, ParameterError> {
        let tag = generate_auth_tag(message, &self.key, self.tag_bits)?;
        self.message_counter += 1;
        Ok(tag)
    }

    pub fn verify(&mut self, message: &[u8], tag: &[u8]) -> Result<bool, ParameterError> {
        let valid = verify_auth_tag(message, tag, &self.key, self.tag_bits)?;
        self.message_counter += 1;
        Ok(valid)
    }

    pub fn reset_counter(&mut self) {
        self.message_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn key() -> AuthKey {
        AuthKey::new(b"pre-shared wegman-carter key".to_vec()).unwrap()
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(AuthKey::new(Vec::new()).is_err());
        assert!(AuthKey::from_hex("zz").is_err());
        assert_eq!(AuthKey::from_hex("00ff").unwrap().as_bytes(), &[0x00, 0xff]);
    }

    #[test]
    fn generated_tags_verify() {
        let key = key();
        for message in [&b"CASCADE_PARITIES|[true,false]"[..], b"x", b""] {
            let tag = generate_auth_tag(message, &key, 64).unwrap();
            assert_eq!(tag.len(), 8);
            assert!(verify_auth_tag(message, &tag, &key, 64).unwrap());
        }
    }

    #[test]
    fn odd_tag_sizes_pad_to_whole_bytes() {
        let tag = generate_auth_tag(b"hello", &key(), 20).unwrap();
        assert_eq!(tag.len(), 3);
        assert_eq!(tag[2] & 0x0F, 0);
    }

    #[test]
    fn tag_size_is_bounded() {
        assert!(generate_auth_tag(b"m", &key(), 0).is_err());
        assert!(generate_auth_tag(b"m", &key(), 257).is_err());
        assert!(generate_auth_tag(b"m", &key(), 256).is_ok());
    }

    #[test]
    fn seed_expansion_covers_message() {
        let bits = derive_toeplitz_seed(&key(), 1000, 64);
        assert!(bits.len() >= 1000 + 64 - 1);
        assert_eq!(bits, derive_toeplitz_seed(&key(), 1000, 64));
    }

    #[test]
    fn flipping_message_bits_changes_tag() {
        let key = key();
        let mut rng = rand::thread_rng();
        let message: Vec<u8> = (0..64).map(|_| rng.gen()).collect();
        let tag = generate_auth_tag(&message, &key, 64).unwrap();

        let mut changed = 0;
        for byte in 0..message.len() {
            let mut tampered = message.clone();
            tampered[byte] ^= 1 << rng.gen_range(0..8);
            if !verify_auth_tag(&tampered, &tag, &key, 64).unwrap() {
                changed += 1;
            }
        }
        assert_eq!(changed, message.len());
    }

    #[test]
    fn different_keys_give_different_tags() {
        let other = AuthKey::new(b"another key".to_vec()).unwrap();
        let message = b"VERIFY_HASH|{\"salt\":\"01\"}";
        let tag = generate_auth_tag(message, &key(), 64).unwrap();
        assert!(!verify_auth_tag(message, &tag, &other, 64).unwrap());
    }

    #[test]
    fn authenticator_counts_messages() {
        let mut auth = ToeplitzAuthenticator::new(key(), 64).unwrap();
        let tag = auth.authenticate(b"ping").unwrap();
        assert!(auth.verify(b"ping", &tag).unwrap());
        assert!(!auth.verify(b"pong", &tag).unwrap());
        assert_eq!(auth.message_counter(), 3);
        auth.reset_counter();
        assert_eq!(auth.message_counter(), 0);
    }
}
