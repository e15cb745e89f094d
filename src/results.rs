use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::QkdError;

/// Machine-readable reason a session produced no key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    QberTooHigh,
    KeyTooShort,
    VerificationFailed,
    InsufficientSecrecy,
    ProtocolError,
}

impl FailureCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCode::QberTooHigh => "qber_too_high",
            FailureCode::KeyTooShort => "key_too_short",
            FailureCode::VerificationFailed => "verification_failed",
            FailureCode::InsufficientSecrecy => "insufficient_secrecy",
            FailureCode::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: FailureCode,
    pub message: String,
}

/// What one party ends a session with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QkdResult {
    pub success: bool,
    #[serde(with = "crate::bits::packed")]
    pub secret_key: Vec<bool>,
    pub qber: f64,
    pub key_length: usize,
    /// Error-correction plus verification leakage, in bits.
    pub leakage: usize,
    pub errors_corrected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl QkdResult {
    pub fn success(secret_key: Vec<bool>, qber: f64, leakage: usize, errors_corrected: usize) -> Self {
        QkdResult {
            success: true,
            key_length: secret_key.len(),
            secret_key,
            qber,
            leakage,
            errors_corrected,
            failure: None,
        }
    }

    pub fn failure(code: FailureCode, message: impl Into<String>) -> Self {
        QkdResult {
            success: false,
            secret_key: Vec::new(),
            qber: 0.0,
            key_length: 0,
            leakage: 0,
            errors_corrected: 0,
            failure: Some(Failure {
                code,
                message: message.into(),
            }),
        }
    }

    /// A session that aborted with an error, for batch reporting.
    pub fn from_error(err: &QkdError) -> Self {
        QkdResult::failure(FailureCode::ProtocolError, err.to_string())
    }

    pub fn with_qber(mut self, qber: f64) -> Self {
        self.qber = qber;
        self
    }

    pub fn with_leakage(mut self, leakage: usize, errors_corrected: usize) -> Self {
        self.leakage = leakage;
        self.errors_corrected = errors_corrected;
        self
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        self.failure.as_ref().map(|f| f.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AuthError;

    #[test]
    fn failure_codes_serialize_as_snake_case() {
        let result = QkdResult::failure(FailureCode::InsufficientSecrecy, "no room");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""code":"insufficient_secrecy""#));
        assert_eq!(FailureCode::QberTooHigh.to_string(), "qber_too_high");
        let back: QkdResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn success_records_key_length() {
        let result = QkdResult::success(vec![true, false, true], 0.02, 400, 12);
        assert!(result.success);
        assert_eq!(result.key_length, 3);
        assert_eq!(result.failure_code(), None);
    }

    #[test]
    fn errors_become_protocol_failures() {
        let err = QkdError::from(AuthError::Integrity {
            header: "PA_SEED".into(),
        });
        let result = QkdResult::from_error(&err);
        assert_eq!(result.failure_code(), Some(FailureCode::ProtocolError));
        assert!(result.failure.unwrap().message.contains("PA_SEED"));
    }
}
