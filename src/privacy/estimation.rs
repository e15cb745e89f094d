//! QBER estimators.
//!
//! Sampling disclosed test bits gives a point estimate; the Cascade error
//! count refines it after reconciliation. Intervals are exact
//! Clopper–Pearson bounds from beta quantiles.

use serde::{Deserialize, Serialize};

use crate::bits::hamming_distance;
use crate::errors::ParameterError;
use crate::privacy::entropy::QBER_THRESHOLD;
use crate::privacy::stats::{beta_quantile, normal_quantile};

pub const DEFAULT_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QberSource {
    Sampling,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QberEstimate {
    pub qber: f64,
    pub confidence_interval: (f64, f64),
    pub confidence_level: f64,
    pub sample_size: usize,
    pub error_count: usize,
    /// The upper confidence bound is below the security threshold.
    pub is_secure: bool,
    pub source: QberSource,
}

fn check_sample(alice: &[bool], bob: &[bool]) -> Result<(), ParameterError> {
    if alice.len() != bob.len() {
        return Err(ParameterError::LengthMismatch {
            what: "QBER sample",
            expected: alice.len(),
            got: bob.len(),
        });
    }
    Ok(())
}

pub fn count_sample_errors(alice: &[bool], bob: &[bool]) -> Result<usize, ParameterError> {
    check_sample(alice, bob)?;
    Ok(hamming_distance(alice, bob))
}

pub fn estimate_qber_from_sample(alice: &[bool], bob: &[bool]) -> Result<f64, ParameterError> {
    check_sample(alice, bob)?;
    if alice.is_empty() {
        return Err(ParameterError::Empty("QBER sample"));
    }
    Ok(hamming_distance(alice, bob) as f64 / alice.len() as f64)
}

/// `(sample_errors + cascade_errors) / total_bits`.
pub fn estimate_qber_from_cascade(
    total_bits: usize,
    sample_errors: usize,
    cascade_errors: usize,
) -> Result<f64, ParameterError> {
    if total_bits == 0 {
        return Err(ParameterError::Empty("Key"));
    }
    Ok((sample_errors + cascade_errors) as f64 / total_bits as f64)
}

/// Two-sided Clopper–Pearson interval for `errors` out of `sample_size`.
pub fn confidence_interval(
    errors: usize,
    sample_size: usize,
    confidence_level: f64,
) -> Result<(f64, f64), ParameterError> {
    if sample_size == 0 {
        return Err(ParameterError::Empty("QBER sample"));
    }
    if errors > sample_size {
        return Err(ParameterError::OutOfRange {
            name: "error count",
            range: "[0, sample_size]",
            value: errors as f64,
        });
    }
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(ParameterError::OutOfRange {
            name: "confidence_level",
            range: "(0, 1)",
            value: confidence_level,
        });
    }

    let alpha = 1.0 - confidence_level;
    let (k, n) = (errors as f64, sample_size as f64);
    let lower = if errors == 0 {
        0.0
    } else {
        beta_quantile(alpha / 2.0, k, n - k + 1.0)
    };
    let upper = if errors == sample_size {
        1.0
    } else {
        beta_quantile(1.0 - alpha / 2.0, k + 1.0, n - k)
    };
    Ok((lower, upper))
}

/// Combined estimate with its interval. The interval is computed over
/// `sample_size` bits (the whole key when `None`), with the error count
/// capped at that size.
pub fn estimate_qber_detailed(
    total_bits: usize,
    sample_errors: usize,
    cascade_errors: usize,
    sample_size: Option<usize>,
    confidence_level: f64,
) -> Result<QberEstimate, ParameterError> {
    let qber = estimate_qber_from_cascade(total_bits, sample_errors, cascade_errors)?;
    let sample_size = sample_size.unwrap_or(total_bits);
    let error_count = sample_errors + cascade_errors;
    let interval = confidence_interval(error_count.min(sample_size), sample_size, confidence_level)?;
    Ok(QberEstimate {
        qber,
        confidence_interval: interval,
        confidence_level,
        sample_size,
        error_count,
        is_secure: interval.1 < QBER_THRESHOLD,
        source: if cascade_errors > 0 {
            QberSource::Combined
        } else {
            QberSource::Sampling
        },
    })
}

/// Inflates a sampled QBER slightly when only a small fraction was disclosed.
pub fn estimate_qber_with_correction(observed: f64, sample_fraction: f64) -> Result<f64, ParameterError> {
    if !(sample_fraction > 0.0 && sample_fraction < 1.0) {
        return Err(ParameterError::OutOfRange {
            name: "sample_fraction",
            range: "(0, 1)",
            value: sample_fraction,
        });
    }
    let correction = 1.0 + 0.01 * (1.0 - sample_fraction) / sample_fraction;
    Ok((observed * correction).min(0.5))
}

/// Normal-approximation sample size for estimating the QBER to within
/// `precision`, capped at the key length and never below 100.
pub fn optimal_sample_size(
    total_bits: usize,
    precision: f64,
    confidence_level: f64,
    expected_qber: f64,
) -> Result<usize, ParameterError> {
    if total_bits == 0 {
        return Err(ParameterError::Empty("Key"));
    }
    if !(precision > 0.0) {
        return Err(ParameterError::OutOfRange {
            name: "precision",
            range: "(0, inf)",
            value: precision,
        });
    }
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(ParameterError::OutOfRange {
            name: "confidence_level",
            range: "(0, 1)",
            value: confidence_level,
        });
    }
    let z = normal_quantile(1.0 - (1.0 - confidence_level) / 2.0);
    let variance = expected_qber * (1.0 - expected_qber);
    let required = (z * z * variance / (precision * precision)).ceil() as usize;
    Ok(required.min(total_bits).max(100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_estimates() {
        let alice = [true, true, false, false, true, false, true, false];
        let bob = [true, false, false, false, true, false, true, true];
        assert_eq!(count_sample_errors(&alice, &bob).unwrap(), 2);
        assert_eq!(estimate_qber_from_sample(&alice, &bob).unwrap(), 0.25);
        assert!(estimate_qber_from_sample(&alice, &bob[..4]).is_err());
        assert!(estimate_qber_from_sample(&[], &[]).is_err());
    }

    #[test]
    fn cascade_refinement() {
        assert_eq!(estimate_qber_from_cascade(1000, 10, 40).unwrap(), 0.05);
        assert!(estimate_qber_from_cascade(0, 0, 0).is_err());
    }

    #[test]
    fn clopper_pearson_edges() {
        let (lo, hi) = confidence_interval(0, 100, 0.95).unwrap();
        assert_eq!(lo, 0.0);
        assert!((hi - (1.0 - 0.025f64.powf(0.01))).abs() < 1e-9);

        let (lo, hi) = confidence_interval(100, 100, 0.95).unwrap();
        assert!((lo - 0.025f64.powf(0.01)).abs() < 1e-9);
        assert_eq!(hi, 1.0);
    }

    #[test]
    fn clopper_pearson_interior() {
        let (lo, hi) = confidence_interval(5, 100, 0.95).unwrap();
        assert!((lo - 0.016_4).abs() < 5e-4, "lower {lo}");
        assert!((hi - 0.112_8).abs() < 5e-4, "upper {hi}");
        let (lo99, hi99) = confidence_interval(5, 100, 0.99).unwrap();
        assert!(lo99 < lo && hi99 > hi);
    }

    #[test]
    fn interval_rejects_bad_inputs() {
        assert!(confidence_interval(1, 0, 0.95).is_err());
        assert!(confidence_interval(11, 10, 0.95).is_err());
        assert!(confidence_interval(1, 10, 1.0).is_err());
    }

    #[test]
    fn detailed_estimate() {
        let est = estimate_qber_detailed(10_000, 10, 190, None, DEFAULT_CONFIDENCE).unwrap();
        assert_eq!(est.qber, 0.02);
        assert_eq!(est.error_count, 200);
        assert_eq!(est.source, QberSource::Combined);
        assert!(est.is_secure);
        assert!(est.confidence_interval.0 < 0.02 && 0.02 < est.confidence_interval.1);

        let sampled = estimate_qber_detailed(1000, 30, 0, Some(20), DEFAULT_CONFIDENCE).unwrap();
        assert_eq!(sampled.source, QberSource::Sampling);
        assert_eq!(sampled.confidence_interval.1, 1.0);
        assert!(!sampled.is_secure);
    }

    #[test]
    fn correction_and_sample_size() {
        let corrected = estimate_qber_with_correction(0.05, 0.1).unwrap();
        assert!((corrected - 0.05 * 1.09).abs() < 1e-12);
        assert_eq!(estimate_qber_with_correction(0.49, 0.001).unwrap(), 0.5);
        assert!(estimate_qber_with_correction(0.05, 1.0).is_err());

        assert_eq!(optimal_sample_size(100_000, 0.01, 0.95, 0.05).unwrap(), 1825);
        assert_eq!(optimal_sample_size(500, 0.01, 0.95, 0.05).unwrap(), 500);
        assert_eq!(optimal_sample_size(50, 0.01, 0.95, 0.05).unwrap(), 100);
        assert!(optimal_sample_size(0, 0.01, 0.95, 0.05).is_err());
    }
}
