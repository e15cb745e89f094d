//! Toeplitz privacy amplification.
//!
//! A public random seed of `n + ℓ − 1` bits fixes an `ℓ × n` Toeplitz matrix
//! `T`, and the secret key is `T · K mod 2`. The seed need not be secret,
//! only shared; by the Leftover Hash Lemma the output is ε-close to uniform
//! when `ℓ` respects the Devetak–Winter bound.

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::ParameterError;
use crate::privacy::entropy::{final_key_length, security_margin, DEFAULT_EPSILON_SEC, QBER_THRESHOLD};
use crate::toeplitz::ToeplitzSeed;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplificationResult {
    #[serde(with = "crate::bits::packed")]
    pub secret_key: Vec<bool>,
    pub input_length: usize,
    pub output_length: usize,
    pub compression_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toeplitz_seed: Option<SeedBits>,
    pub success: bool,
    pub error_message: Option<String>,
    pub leakage_ec: usize,
    pub leakage_ver: usize,
    /// `2·log2(1/ε)` bits sacrificed on top of the measured leakage.
    pub security_margin: f64,
    pub qber: f64,
    pub security_parameter: f64,
}

/// Seed bits in their packed wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedBits(#[serde(with = "crate::bits::packed")] pub Vec<bool>);

impl AmplificationResult {
    fn failed(input_length: usize, output_length: usize, message: String, ctx: &FailureContext) -> Self {
        AmplificationResult {
            secret_key: Vec::new(),
            input_length,
            output_length,
            compression_ratio: 0.0,
            toeplitz_seed: None,
            success: false,
            error_message: Some(message),
            leakage_ec: ctx.leakage_ec,
            leakage_ver: ctx.leakage_ver,
            security_margin: ctx.security_margin,
            qber: ctx.qber,
            security_parameter: ctx.epsilon_sec,
        }
    }
}

struct FailureContext {
    qber: f64,
    leakage_ec: usize,
    leakage_ver: usize,
    security_margin: f64,
    epsilon_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrivacyAmplifier {
    epsilon_sec: f64,
    efficiency_factor: f64,
    qber_threshold: f64,
}

impl PrivacyAmplifier {
    pub fn new(epsilon_sec: f64) -> Result<Self, ParameterError> {
        security_margin(epsilon_sec)?;
        Ok(PrivacyAmplifier {
            epsilon_sec,
            efficiency_factor: 1.0,
            qber_threshold: QBER_THRESHOLD,
        })
    }

    pub fn with_efficiency(mut self, efficiency_factor: f64) -> Result<Self, ParameterError> {
        if !(efficiency_factor > 0.0 && efficiency_factor <= 1.0) {
            return Err(ParameterError::OutOfRange {
                name: "efficiency_factor",
                range: "(0, 1]",
                value: efficiency_factor,
            });
        }
        self.efficiency_factor = efficiency_factor;
        Ok(self)
    }

    /// Lowers the abort threshold below the Shor–Preskill bound.
    pub fn with_qber_threshold(mut self, threshold: f64) -> Result<Self, ParameterError> {
        if !(threshold > 0.0 && threshold <= QBER_THRESHOLD) {
            return Err(ParameterError::OutOfRange {
                name: "qber_threshold",
                range: "(0, 0.11]",
                value: threshold,
            });
        }
        self.qber_threshold = threshold;
        Ok(self)
    }

    pub fn epsilon_sec(&self) -> f64 {
        self.epsilon_sec
    }

    pub fn compute_output_length(
        &self,
        input_length: usize,
        qber: f64,
        leakage_ec: usize,
        leakage_ver: usize,
    ) -> Result<usize, ParameterError> {
        if qber >= self.qber_threshold {
            return Ok(0);
        }
        final_key_length(
            input_length,
            qber,
            leakage_ec,
            leakage_ver,
            self.epsilon_sec,
            self.efficiency_factor,
        )
    }

    pub fn generate_seed<R: Rng + ?Sized>(
        &self,
        input_length: usize,
        output_length: usize,
        rng: &mut R,
    ) -> Result<ToeplitzSeed, ParameterError> {
        ToeplitzSeed::random(output_length, input_length, rng)
    }

    /// `T · key mod 2` for the `output_length × |key|` matrix fixed by `seed`,
    /// which must be exactly `|key| + output_length − 1` bits long.
    pub fn amplify(&self, key: &[bool], seed: &[bool], output_length: usize) -> Result<Vec<bool>, ParameterError> {
        if key.is_empty() {
            return Err(ParameterError::Empty("Key"));
        }
        if output_length == 0 {
            return Err(ParameterError::Empty("Output key"));
        }
        if output_length > key.len() {
            return Err(ParameterError::OutputTooLong {
                output: output_length,
                input: key.len(),
            });
        }
        let matrix = ToeplitzSeed::exact(seed.to_vec(), output_length, key.len())?;
        matrix.hash(key)
    }

    /// Computes the output length, draws a seed unless one is supplied and
    /// amplifies. Policy failures are reported in the result, never as errors.
    pub fn amplify_with_result<R: Rng + ?Sized>(
        &self,
        key: &[bool],
        qber: f64,
        leakage_ec: usize,
        leakage_ver: usize,
        seed: Option<&[bool]>,
        rng: &mut R,
    ) -> Result<AmplificationResult, ParameterError> {
        let input_length = key.len();
        let ctx = FailureContext {
            qber,
            leakage_ec,
            leakage_ver,
            security_margin: security_margin(self.epsilon_sec)?,
            epsilon_sec: self.epsilon_sec,
        };

        if qber >= self.qber_threshold {
            warn!("QBER {:.4} at or above threshold {}", qber, self.qber_threshold);
            return Ok(AmplificationResult::failed(
                input_length,
                0,
                format!("QBER ({:.4}) exceeds threshold ({})", qber, self.qber_threshold),
                &ctx,
            ));
        }

        let output_length = self.compute_output_length(input_length, qber, leakage_ec, leakage_ver)?;
        if output_length == 0 {
            return Ok(AmplificationResult::failed(
                input_length,
                0,
                "Computed output length is zero or negative".to_string(),
                &ctx,
            ));
        }

        let seed = match seed {
            Some(bits) if bits.len() != input_length + output_length - 1 => {
                let mut failed = AmplificationResult::failed(
                    input_length,
                    output_length,
                    "Invalid Toeplitz seed".to_string(),
                    &ctx,
                );
                failed.toeplitz_seed = Some(SeedBits(bits.to_vec()));
                return Ok(failed);
            }
            Some(bits) => bits.to_vec(),
            None => self.generate_seed(input_length, output_length, rng)?.into_bits(),
        };

        let secret_key = self.amplify(key, &seed, output_length)?;
        debug!("amplified {} -> {} bits", input_length, output_length);
        Ok(AmplificationResult {
            secret_key,
            input_length,
            output_length,
            compression_ratio: output_length as f64 / input_length as f64,
            toeplitz_seed: Some(SeedBits(seed)),
            success: true,
            error_message: None,
            leakage_ec,
            leakage_ver,
            security_margin: ctx.security_margin,
            qber,
            security_parameter: self.epsilon_sec,
        })
    }

    /// Amplifies to a caller-chosen length, returning the key and the seed used.
    pub fn amplify_fixed_length<R: Rng + ?Sized>(
        &self,
        key: &[bool],
        output_length: usize,
        seed: Option<&[bool]>,
        rng: &mut R,
    ) -> Result<(Vec<bool>, Vec<bool>), ParameterError> {
        let seed = match seed {
            Some(bits) => bits.to_vec(),
            None => self.generate_seed(key.len(), output_length, rng)?.into_bits(),
        };
        let secret = self.amplify(key, &seed, output_length)?;
        Ok((secret, seed))
    }
}

impl Default for PrivacyAmplifier {
    fn default() -> Self {
        PrivacyAmplifier {
            epsilon_sec: DEFAULT_EPSILON_SEC,
            efficiency_factor: 1.0,
            qber_threshold: QBER_THRESHOLD,
        }
    }
}
