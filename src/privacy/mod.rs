pub mod amplifier;
pub mod entropy;
pub mod estimation;
mod stats;

pub use amplifier::{AmplificationResult, PrivacyAmplifier};
pub use entropy::{
    binary_entropy, binary_entropy_derivative, final_key_length, final_key_length_detailed,
    inverse_binary_entropy, is_qber_secure, secrecy_capacity, security_margin, EntropyBranch,
    KeyLengthEstimate, DEFAULT_EPSILON_SEC, QBER_THRESHOLD,
};
pub use estimation::{
    confidence_interval, count_sample_errors, estimate_qber_detailed, estimate_qber_from_cascade,
    estimate_qber_from_sample, estimate_qber_with_correction, optimal_sample_size, QberEstimate, QberSource,
};
