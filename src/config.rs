//! Session configuration.
//!
//! The authentication key and the Cascade permutation seed have no defaults
//! and must be supplied by the caller; everything else falls back to the
//! standard BB84 parameters.

use serde::{Deserialize, Serialize};

use crate::auth::wegman_carter::{AuthKey, DEFAULT_TAG_BITS, MAX_TAG_BITS};
use crate::errors::ParameterError;
use crate::galois::FieldSize;
use crate::privacy::amplifier::PrivacyAmplifier;
use crate::privacy::entropy::{DEFAULT_EPSILON_SEC, QBER_THRESHOLD};
use crate::reconciliation::cascade::DEFAULT_NUM_PASSES;

/// Sifted keys shorter than this are not worth reconciling.
pub const MIN_KEY_LENGTH: usize = 32;

fn default_num_passes() -> usize {
    DEFAULT_NUM_PASSES
}

fn default_verification_field() -> FieldSize {
    FieldSize::Gf128
}

fn default_auth_tag_bits() -> usize {
    DEFAULT_TAG_BITS
}

fn default_epsilon_sec() -> f64 {
    DEFAULT_EPSILON_SEC
}

fn default_qber_threshold() -> f64 {
    QBER_THRESHOLD
}

fn default_min_key_length() -> usize {
    MIN_KEY_LENGTH
}

fn default_efficiency_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessingConfig {
    /// Pre-shared Wegman–Carter key, hex encoded in serialized form.
    #[serde(with = "auth_key_hex")]
    pub auth_key: AuthKey,
    /// Shared seed for the per-pass Cascade permutations.
    pub cascade_seed: u64,
    #[serde(default = "default_num_passes")]
    pub num_passes: usize,
    /// Forces the first-pass block size instead of deriving it from the QBER.
    #[serde(default)]
    pub initial_block_size: Option<usize>,
    #[serde(default = "default_verification_field")]
    pub verification_field: FieldSize,
    #[serde(default = "default_auth_tag_bits")]
    pub auth_tag_bits: usize,
    #[serde(default = "default_epsilon_sec")]
    pub epsilon_sec: f64,
    #[serde(default = "default_qber_threshold")]
    pub qber_threshold: f64,
    #[serde(default = "default_min_key_length")]
    pub min_key_length: usize,
    #[serde(default = "default_efficiency_factor")]
    pub efficiency_factor: f64,
}

impl PostProcessingConfig {
    pub fn new(auth_key: AuthKey, cascade_seed: u64) -> Self {
        PostProcessingConfig {
            auth_key,
            cascade_seed,
            num_passes: default_num_passes(),
            initial_block_size: None,
            verification_field: default_verification_field(),
            auth_tag_bits: default_auth_tag_bits(),
            epsilon_sec: default_epsilon_sec(),
            qber_threshold: default_qber_threshold(),
            min_key_length: default_min_key_length(),
            efficiency_factor: default_efficiency_factor(),
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ParameterError> {
        let config: PostProcessingConfig =
            serde_json::from_str(json).map_err(|e| ParameterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ParameterError> {
        serde_json::to_string_pretty(self).map_err(|e| ParameterError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.num_passes == 0 {
            return Err(ParameterError::Config("num_passes must be at least 1".into()));
        }
        if self.auth_tag_bits == 0 || self.auth_tag_bits > MAX_TAG_BITS {
            return Err(ParameterError::OutOfRange {
                name: "auth_tag_bits",
                range: "[1, 256]",
                value: self.auth_tag_bits as f64,
            });
        }
        if self.min_key_length == 0 {
            return Err(ParameterError::Config("min_key_length must be at least 1".into()));
        }
        // the amplifier checks epsilon, efficiency and threshold ranges
        self.amplifier().map(|_| ())
    }

    pub fn amplifier(&self) -> Result<PrivacyAmplifier, ParameterError> {
        PrivacyAmplifier::new(self.epsilon_sec)?
            .with_efficiency(self.efficiency_factor)?
            .with_qber_threshold(self.qber_threshold)
    }
}

pub(crate) mod auth_key_hex {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::auth::wegman_carter::AuthKey;

    pub fn serialize<S: Serializer>(key: &AuthKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AuthKey, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        AuthKey::from_hex(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AuthKey {
        AuthKey::from_hex("00112233445566778899aabbccddeeff").unwrap()
    }

    #[test]
    fn defaults_are_standard_bb84() {
        let config = PostProcessingConfig::new(key(), 42);
        assert_eq!(config.num_passes, 4);
        assert_eq!(config.verification_field, FieldSize::Gf128);
        assert_eq!(config.auth_tag_bits, 64);
        assert_eq!(config.qber_threshold, 0.11);
        assert_eq!(config.min_key_length, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_fills_in_defaults() {
        let config = PostProcessingConfig::from_json_str(
            r#"{"auth_key": "0a0b0c", "cascade_seed": 7, "verification_field": 64}"#,
        )
        .unwrap();
        assert_eq!(config.auth_key.as_bytes(), &[0x0a, 0x0b, 0x0c]);
        assert_eq!(config.cascade_seed, 7);
        assert_eq!(config.verification_field, FieldSize::Gf64);
        assert_eq!(config.epsilon_sec, 1e-12);
    }

    #[test]
    fn key_material_is_mandatory() {
        assert!(PostProcessingConfig::from_json_str(r#"{"cascade_seed": 7}"#).is_err());
        assert!(PostProcessingConfig::from_json_str(r#"{"auth_key": "", "cascade_seed": 7}"#).is_err());
        assert!(PostProcessingConfig::from_json_str(r#"{"auth_key": "0a"}"#).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let mut config = PostProcessingConfig::new(key(), 99);
        config.initial_block_size = Some(16);
        let json = config.to_json_string().unwrap();
        assert!(json.contains("00112233445566778899aabbccddeeff"));
        let parsed = PostProcessingConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.initial_block_size, Some(16));
        assert_eq!(parsed.auth_key.as_bytes(), config.auth_key.as_bytes());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = PostProcessingConfig::new(key(), 1);
        config.qber_threshold = 0.2;
        assert!(config.validate().is_err());

        let mut config = PostProcessingConfig::new(key(), 1);
        config.epsilon_sec = 0.0;
        assert!(config.validate().is_err());

        let mut config = PostProcessingConfig::new(key(), 1);
        config.auth_tag_bits = 512;
        assert!(config.validate().is_err());

        let mut config = PostProcessingConfig::new(key(), 1);
        config.num_passes = 0;
        assert!(config.validate().is_err());

        assert!(PostProcessingConfig::from_json_str(
            r#"{"auth_key": "0a", "cascade_seed": 7, "verification_field": 32}"#
        )
        .is_err());
    }
}
