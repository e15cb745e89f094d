use thiserror::Error;

/// Failures of the message-authentication layer. Both are fatal for the
/// session and must never be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication tag mismatch for message '{header}'")]
    Integrity { header: String },

    #[error("Malformed envelope: {0}")]
    Security(String),
}

/// Precondition violations: a caller passed something out of range.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("{name} must be in {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("Length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Output length ({output}) cannot exceed input length ({input})")]
    OutputTooLong { output: usize, input: usize },

    #[error("Salt must be a non-zero element of the field")]
    InvalidSalt,

    #[error("Unsupported field size: {0} bits (expected 64 or 128)")]
    UnsupportedField(u32),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum QkdError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl QkdError {
    pub fn protocol(message: impl Into<String>) -> Self {
        QkdError::Protocol(message.into())
    }

    /// True for failures that indicate tampering rather than a local bug.
    pub fn is_security_failure(&self) -> bool {
        matches!(self, QkdError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, QkdError>;
