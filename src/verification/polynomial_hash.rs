//! Polynomial evaluation hashing over GF(2^n).
//!
//! The key is cut into field elements `m_1..m_L` and evaluated at the salt
//! `r` with Horner's rule, followed by one extra multiply so that the
//! polynomial never degenerates to a constant:
//!
//! `H_r(K) = (((m_1·r + m_2)·r + …)·r + m_L)·r`
//!
//! Two distinct keys of `L` elements collide for at most `L` values of `r`,
//! so the collision probability for a uniform salt is `L / 2^n`.

use rand::Rng;

use crate::bits::bits_to_field_elements;
use crate::errors::ParameterError;
use crate::galois::FieldSize;

fn check_inputs(key: &[bool], salt: u128, field: FieldSize) -> Result<(), ParameterError> {
    if key.is_empty() {
        return Err(ParameterError::Empty("Key"));
    }
    if salt == 0 || !field.contains(salt) {
        return Err(ParameterError::InvalidSalt);
    }
    Ok(())
}

fn horner(elements: &[u128], salt: u128, field: FieldSize) -> u128 {
    let folded = elements
        .iter()
        .skip(1)
        .fold(elements.first().copied().unwrap_or(0), |acc, &m| {
            field.add(field.multiply(acc, salt), m)
        });
    field.multiply(folded, salt)
}

pub fn polynomial_hash(key: &[bool], salt: u128, field: FieldSize) -> Result<u128, ParameterError> {
    check_inputs(key, salt, field)?;
    let elements = bits_to_field_elements(key, field.bits() as usize);
    Ok(horner(&elements, salt, field))
}

/// Like [`polynomial_hash`] but appends `|K| mod 2^n` as a final element, so
/// keys that differ only in trailing zero padding hash differently.
pub fn polynomial_hash_with_length(key: &[bool], salt: u128, field: FieldSize) -> Result<u128, ParameterError> {
    check_inputs(key, salt, field)?;
    let mut elements = bits_to_field_elements(key, field.bits() as usize);
    let length = match field {
        FieldSize::Gf64 => key.len() as u64 as u128,
        FieldSize::Gf128 => key.len() as u128,
    };
    elements.push(length);
    Ok(horner(&elements, salt, field))
}

pub fn generate_hash_salt<R: Rng + ?Sized>(field: FieldSize, rng: &mut R) -> u128 {
    field.random_nonzero(rng)
}

pub fn verify_hash(key: &[bool], salt: u128, expected: u128, field: FieldSize) -> Result<bool, ParameterError> {
    Ok(polynomial_hash(key, salt, field)? == expected)
}

/// `ceil(key_bits / n) / 2^n`.
pub fn collision_probability(key_bits: usize, field: FieldSize) -> f64 {
    let n = field.bits() as usize;
    let elements = (key_bits + n - 1) / n;
    elements as f64 / 2f64.powi(field.bits() as i32)
}

/// Tag size needed to keep the collision probability below `target`,
/// counting conservatively one field element per key bit.
pub fn minimum_tag_bits_for_security(key_bits: usize, target: f64) -> Result<u32, ParameterError> {
    if key_bits == 0 {
        return Err(ParameterError::Empty("Key"));
    }
    if !(target > 0.0 && target < 1.0) {
        return Err(ParameterError::OutOfRange {
            name: "target collision probability",
            range: "(0, 1)",
            value: target,
        });
    }
    let required = (key_bits as f64).log2() - target.log2();
    Ok(required.ceil().max(0.0) as u32)
}
