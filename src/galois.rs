//! Arithmetic in GF(2^64) and GF(2^128).
//!
//! Addition is XOR. Multiplication is carry-less shift-and-add, reduced by the
//! low-order terms of a fixed irreducible polynomial:
//!
//! - GF(2^64):  x^64 + x^4 + x^3 + x + 1  → reduction constant `0x1B`
//! - GF(2^128): x^128 + x^7 + x^2 + x + 1 → reduction constant `0x87`
//!
//! Both parties must derive identical field values, so everything here is
//! deterministic and branch-for-branch the same on every platform.

use num_traits::{PrimInt, Unsigned};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::ParameterError;

/// A binary extension field whose elements fit exactly in `Self`.
pub trait BinaryField: PrimInt + Unsigned {
    const DEGREE: u32;
    const REDUCTION: Self;
}

impl BinaryField for u64 {
    const DEGREE: u32 = 64;
    const REDUCTION: u64 = 0x1B;
}

impl BinaryField for u128 {
    const DEGREE: u32 = 128;
    const REDUCTION: u128 = 0x87;
}

pub fn gf_add<F: BinaryField>(a: F, b: F) -> F {
    a ^ b
}

/// Carry-less multiplication: walk the bits of `b` from the least significant
/// end, accumulating `a` when a bit is set, and multiply `a` by x each step.
pub fn gf_multiply<F: BinaryField>(mut a: F, mut b: F) -> F {
    let top = (F::DEGREE - 1) as usize;
    let mut acc = F::zero();
    while !b.is_zero() {
        if b & F::one() == F::one() {
            acc = acc ^ a;
        }
        b = b >> 1;
        let carry = (a >> top) & F::one() == F::one();
        a = a << 1;
        if carry {
            a = a ^ F::REDUCTION;
        }
    }
    acc
}

/// Square-and-multiply. `gf_power(a, 0) == 1` for every `a`, zero included.
pub fn gf_power<F: BinaryField>(mut base: F, mut exponent: u64) -> F {
    let mut result = F::one();
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = gf_multiply(result, base);
        }
        base = gf_multiply(base, base);
        exponent >>= 1;
    }
    result
}

/// Runtime choice of field, for values that travel in a `u128`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FieldSize {
    Gf64,
    Gf128,
}

impl FieldSize {
    pub fn bits(self) -> u32 {
        match self {
            FieldSize::Gf64 => 64,
            FieldSize::Gf128 => 128,
        }
    }

    pub fn from_bits(bits: u32) -> Result<Self, ParameterError> {
        match bits {
            64 => Ok(FieldSize::Gf64),
            128 => Ok(FieldSize::Gf128),
            other => Err(ParameterError::UnsupportedField(other)),
        }
    }

    /// True when `0 <= value < 2^n`.
    pub fn contains(self, value: u128) -> bool {
        match self {
            FieldSize::Gf64 => value <= u64::MAX as u128,
            FieldSize::Gf128 => true,
        }
    }

    pub fn add(self, a: u128, b: u128) -> u128 {
        a ^ b
    }

    /// Callers must pass elements of this field (see [`FieldSize::contains`]).
    pub fn multiply(self, a: u128, b: u128) -> u128 {
        match self {
            FieldSize::Gf64 => gf_multiply(a as u64, b as u64) as u128,
            FieldSize::Gf128 => gf_multiply(a, b),
        }
    }

    pub fn power(self, base: u128, exponent: u64) -> u128 {
        match self {
            FieldSize::Gf64 => gf_power(base as u64, exponent) as u128,
            FieldSize::Gf128 => gf_power(base, exponent),
        }
    }

    /// Uniform non-zero element.
    pub fn random_nonzero<R: Rng + ?Sized>(self, rng: &mut R) -> u128 {
        loop {
            let value = match self {
                FieldSize::Gf64 => rng.gen::<u64>() as u128,
                FieldSize::Gf128 => rng.gen::<u128>(),
            };
            if value != 0 {
                return value;
            }
        }
    }
}

impl TryFrom<u32> for FieldSize {
    type Error = ParameterError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        FieldSize::from_bits(bits)
    }
}

impl From<FieldSize> for u32 {
    fn from(field: FieldSize) -> u32 {
        field.bits()
    }
}
