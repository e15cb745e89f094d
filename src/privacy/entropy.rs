//! Binary entropy and the Devetak–Winter key-length bound.
//!
//! `ℓ = floor(n·(1 − h(q))·f − leak_EC − leak_ver − 2·log2(1/ε))`, clamped
//! at zero and forced to zero once the QBER reaches the Shor–Preskill bound.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::ParameterError;

/// Shor–Preskill bound for BB84 with one-way post-processing.
pub const QBER_THRESHOLD: f64 = 0.11;
pub const DEFAULT_EPSILON_SEC: f64 = 1e-12;

const NEWTON_TOLERANCE: f64 = 1e-12;
const NEWTON_MAX_ITERATIONS: usize = 100;
const PROBABILITY_FLOOR: f64 = 1e-15;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyBranch {
    /// Solution in `[0, 0.5]`.
    Lower,
    /// Solution in `[0.5, 1]`.
    Upper,
}

/// Breakdown of one key-length computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLengthEstimate {
    pub final_length: usize,
    /// Length before flooring and clamping; may be negative.
    pub raw_length: f64,
    /// `n·(1 − h(q))·f`.
    pub secrecy_capacity: f64,
    /// Leakage plus security margin.
    pub total_leakage: f64,
    pub is_secure: bool,
    pub qber: f64,
    pub security_parameter: f64,
}

fn out_of_range(name: &'static str, range: &'static str, value: f64) -> ParameterError {
    ParameterError::OutOfRange { name, range, value }
}

/// `h(p) = −p·log2(p) − (1−p)·log2(1−p)`, with `h(0) = h(1) = 0`.
pub fn binary_entropy(p: f64) -> Result<f64, ParameterError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(out_of_range("probability", "[0, 1]", p));
    }
    if p == 0.0 || p == 1.0 {
        return Ok(0.0);
    }
    Ok(-p * p.log2() - (1.0 - p) * (1.0 - p).log2())
}

/// `h'(p) = log2((1−p)/p)` on the open interval `(0, 1)`.
pub fn binary_entropy_derivative(p: f64) -> Result<f64, ParameterError> {
    if !(p > 0.0 && p < 1.0) {
        return Err(out_of_range("probability", "(0, 1)", p));
    }
    Ok(((1.0 - p) / p).log2())
}

/// Solves `h(p) = value` with Newton–Raphson on the requested branch.
pub fn inverse_binary_entropy(value: f64, branch: EntropyBranch) -> Result<f64, ParameterError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(out_of_range("entropy", "[0, 1]", value));
    }
    if value <= PROBABILITY_FLOOR {
        return Ok(match branch {
            EntropyBranch::Lower => 0.0,
            EntropyBranch::Upper => 1.0,
        });
    }
    if (value - 1.0).abs() < PROBABILITY_FLOOR {
        return Ok(0.5);
    }

    let mut p = match branch {
        EntropyBranch::Lower => 0.1,
        EntropyBranch::Upper => 0.9,
    };
    for _ in 0..NEWTON_MAX_ITERATIONS {
        let error = binary_entropy(p)? - value;
        if error.abs() < NEWTON_TOLERANCE {
            break;
        }
        let slope = binary_entropy_derivative(p)?;
        if slope.abs() < PROBABILITY_FLOOR {
            break;
        }
        p = (p - error / slope).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
    }
    Ok(p)
}

/// `1 − h(q)` bits of secrecy per sifted bit; zero from `q = 0.5` on.
pub fn secrecy_capacity(qber: f64) -> Result<f64, ParameterError> {
    if qber < 0.0 || qber.is_nan() {
        return Err(out_of_range("qber", "[0, inf)", qber));
    }
    if qber >= 0.5 {
        return Ok(0.0);
    }
    Ok(1.0 - binary_entropy(qber)?)
}

pub fn is_qber_secure(qber: f64, threshold: f64) -> bool {
    qber < threshold
}

/// Bits sacrificed for an ε-secure key: `2·log2(1/ε)`.
pub fn security_margin(epsilon_sec: f64) -> Result<f64, ParameterError> {
    check_epsilon(epsilon_sec)?;
    Ok(2.0 * (1.0 / epsilon_sec).log2())
}

fn check_epsilon(epsilon_sec: f64) -> Result<(), ParameterError> {
    if !(epsilon_sec > 0.0 && epsilon_sec <= 1.0) {
        return Err(out_of_range("epsilon_sec", "(0, 1]", epsilon_sec));
    }
    Ok(())
}

fn check_key_length_inputs(qber: f64, epsilon_sec: f64, efficiency: f64) -> Result<(), ParameterError> {
    if !(0.0..=0.5).contains(&qber) {
        return Err(out_of_range("qber", "[0, 0.5]", qber));
    }
    check_epsilon(epsilon_sec)?;
    if !(efficiency > 0.0 && efficiency <= 1.0) {
        return Err(out_of_range("efficiency_factor", "(0, 1]", efficiency));
    }
    Ok(())
}

pub fn final_key_length(
    reconciled_length: usize,
    qber: f64,
    leakage_ec: usize,
    leakage_ver: usize,
    epsilon_sec: f64,
    efficiency: f64,
) -> Result<usize, ParameterError> {
    Ok(final_key_length_detailed(reconciled_length, qber, leakage_ec, leakage_ver, epsilon_sec, efficiency)?.final_length)
}

pub fn final_key_length_detailed(
    reconciled_length: usize,
    qber: f64,
    leakage_ec: usize,
    leakage_ver: usize,
    epsilon_sec: f64,
    efficiency: f64,
) -> Result<KeyLengthEstimate, ParameterError> {
    check_key_length_inputs(qber, epsilon_sec, efficiency)?;

    if !is_qber_secure(qber, QBER_THRESHOLD) {
        return Ok(KeyLengthEstimate {
            final_length: 0,
            raw_length: 0.0,
            secrecy_capacity: 0.0,
            total_leakage: 0.0,
            is_secure: false,
            qber,
            security_parameter: epsilon_sec,
        });
    }

    let available = reconciled_length as f64 * secrecy_capacity(qber)? * efficiency;
    let total_leakage = leakage_ec as f64 + leakage_ver as f64 + security_margin(epsilon_sec)?;
    let raw_length = available - total_leakage;
    let final_length = if raw_length > 0.0 { raw_length.floor() as usize } else { 0 };
    debug!(
        "key length: n={} q={:.4} available={:.2} leakage={:.2} -> {}",
        reconciled_length, qber, available, total_leakage, final_length
    );

    Ok(KeyLengthEstimate {
        final_length,
        raw_length,
        secrecy_capacity: available,
        total_leakage,
        is_secure: final_length > 0,
        qber,
        security_parameter: epsilon_sec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn entropy_values() {
        assert_eq!(binary_entropy(0.0).unwrap(), 0.0);
        assert_eq!(binary_entropy(1.0).unwrap(), 0.0);
        assert!(close(binary_entropy(0.5).unwrap(), 1.0, 1e-15));
        assert!(close(binary_entropy(0.05).unwrap(), 0.286_396_96, 1e-7));
        assert!(close(binary_entropy(0.3).unwrap(), binary_entropy(0.7).unwrap(), 1e-12));
        assert!(binary_entropy(-0.1).is_err());
        assert!(binary_entropy(1.1).is_err());
    }

    #[test]
    fn derivative_domain() {
        assert!(close(binary_entropy_derivative(0.5).unwrap(), 0.0, 1e-15));
        assert!(close(binary_entropy_derivative(0.2).unwrap(), 2.0, 1e-12));
        assert!(binary_entropy_derivative(0.0).is_err());
        assert!(binary_entropy_derivative(1.0).is_err());
    }

    #[test]
    fn inverse_entropy_on_both_branches() {
        let h = binary_entropy(0.05).unwrap();
        assert!(close(inverse_binary_entropy(h, EntropyBranch::Lower).unwrap(), 0.05, 1e-9));
        assert!(close(inverse_binary_entropy(h, EntropyBranch::Upper).unwrap(), 0.95, 1e-9));
        assert_eq!(inverse_binary_entropy(0.0, EntropyBranch::Lower).unwrap(), 0.0);
        assert_eq!(inverse_binary_entropy(0.0, EntropyBranch::Upper).unwrap(), 1.0);
        assert_eq!(inverse_binary_entropy(1.0, EntropyBranch::Lower).unwrap(), 0.5);
        assert!(inverse_binary_entropy(1.5, EntropyBranch::Lower).is_err());
    }

    #[test]
    fn capacity_and_margin() {
        assert_eq!(secrecy_capacity(0.0).unwrap(), 1.0);
        assert_eq!(secrecy_capacity(0.5).unwrap(), 0.0);
        assert_eq!(secrecy_capacity(0.7).unwrap(), 0.0);
        assert!(secrecy_capacity(-0.01).is_err());
        assert!(close(security_margin(1e-12).unwrap(), 79.726, 1e-3));
        assert_eq!(security_margin(1.0).unwrap(), 0.0);
        assert!(security_margin(0.0).is_err());
        assert!(is_qber_secure(0.1, QBER_THRESHOLD));
        assert!(!is_qber_secure(0.11, QBER_THRESHOLD));
    }

    #[test]
    fn reference_key_length() {
        assert_eq!(final_key_length(10_000, 0.05, 500, 64, 1e-12, 1.0).unwrap(), 6492);
        assert_eq!(final_key_length(10_000, 0.11, 500, 64, 1e-12, 1.0).unwrap(), 0);
        assert_eq!(final_key_length(100, 0.05, 500, 64, 1e-12, 1.0).unwrap(), 0);
    }

    #[test]
    fn detailed_estimate_breaks_down_the_bound() {
        let est = final_key_length_detailed(10_000, 0.05, 500, 64, 1e-12, 1.0).unwrap();
        assert_eq!(est.final_length, 6492);
        assert!(close(est.secrecy_capacity, 7136.03, 0.01));
        assert!(close(est.total_leakage, 643.726, 1e-3));
        assert!(close(est.raw_length, 6492.31, 0.01));
        assert!(est.is_secure);

        let insecure = final_key_length_detailed(10_000, 0.2, 0, 0, 1e-12, 1.0).unwrap();
        assert!(!insecure.is_secure);
        assert_eq!(insecure.final_length, 0);
    }

    #[test]
    fn efficiency_scales_capacity() {
        let full = final_key_length(10_000, 0.02, 0, 0, 1e-12, 1.0).unwrap();
        let half = final_key_length(10_000, 0.02, 0, 0, 1e-12, 0.5).unwrap();
        assert!(half < full);
        assert!(final_key_length(10_000, 0.02, 0, 0, 1e-12, 0.0).is_err());
        assert!(final_key_length(10_000, 0.02, 0, 0, 1e-12, 1.5).is_err());
        assert!(final_key_length(10_000, 0.6, 0, 0, 1e-12, 1.0).is_err());
    }
}
