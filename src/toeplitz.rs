//! Toeplitz-matrix hashing over GF(2).
//!
//! A `rows × cols` Toeplitz matrix is fixed by `rows + cols - 1` seed bits:
//! the first column is `seed[0..rows]` and the first row is
//! `seed[rows-1..rows+cols-1]`. Entry `(i, j)` is therefore `seed[i - j]` on
//! and below the diagonal, `seed[rows - 1 + j - i]` above it. The matrix is
//! never materialised.

use rand::Rng;

use crate::errors::ParameterError;

pub fn seed_length(rows: usize, cols: usize) -> usize {
    (rows + cols).saturating_sub(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToeplitzSeed {
    bits: Vec<bool>,
    rows: usize,
    cols: usize,
}

impl ToeplitzSeed {
    /// Wraps seed bits for a `rows × cols` matrix. Extra trailing bits are
    /// ignored; too few is an error.
    pub fn new(bits: Vec<bool>, rows: usize, cols: usize) -> Result<Self, ParameterError> {
        if rows == 0 || cols == 0 {
            return Err(ParameterError::Empty("Toeplitz matrix shape"));
        }
        let needed = seed_length(rows, cols);
        if bits.len() < needed {
            return Err(ParameterError::LengthMismatch {
                what: "Toeplitz seed",
                expected: needed,
                got: bits.len(),
            });
        }
        Ok(ToeplitzSeed { bits, rows, cols })
    }

    /// Like [`ToeplitzSeed::new`] but the length must match exactly.
    pub fn exact(bits: Vec<bool>, rows: usize, cols: usize) -> Result<Self, ParameterError> {
        let needed = seed_length(rows, cols);
        if bits.len() != needed {
            return Err(ParameterError::LengthMismatch {
                what: "Toeplitz seed",
                expected: needed,
                got: bits.len(),
            });
        }
        Self::new(bits, rows, cols)
    }

    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Result<Self, ParameterError> {
        let bits = (0..seed_length(rows, cols)).map(|_| rng.gen()).collect();
        Self::new(bits, rows, cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn into_bits(self) -> Vec<bool> {
        self.bits
    }

    pub fn entry(&self, i: usize, j: usize) -> bool {
        if i >= j {
            self.bits[i - j]
        } else {
            self.bits[self.rows - 1 + j - i]
        }
    }

    pub fn first_column(&self) -> &[bool] {
        &self.bits[..self.rows]
    }

    pub fn first_row(&self) -> Vec<bool> {
        (0..self.cols).map(|j| self.entry(0, j)).collect()
    }

    /// Dense rows, for inspection in tests and small examples.
    pub fn to_matrix(&self) -> Vec<Vec<bool>> {
        (0..self.rows)
            .map(|i| (0..self.cols).map(|j| self.entry(i, j)).collect())
            .collect()
    }

    /// `T · input mod 2`.
    pub fn hash(&self, input: &[bool]) -> Result<Vec<bool>, ParameterError> {
        if input.len() != self.cols {
            return Err(ParameterError::LengthMismatch {
                what: "Toeplitz input",
                expected: self.cols,
                got: input.len(),
            });
        }
        let ones: Vec<usize> = input
            .iter()
            .enumerate()
            .filter_map(|(j, &bit)| bit.then_some(j))
            .collect();

        let hashed = (0..self.rows)
            .map(|i| ones.iter().fold(false, |acc, &j| acc ^ self.entry(i, j)))
            .collect();
        Ok(hashed)
    }
}
