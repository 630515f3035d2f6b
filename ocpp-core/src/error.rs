//! Error types and failure codes for the station engine.

use thiserror::Error;

/// Failure codes carried by a failed response envelope.
///
/// Business outcomes (Accepted/Rejected/Unknown...) are typed response
/// statuses; these codes only describe exchanges that did not reach, or
/// did not survive, a business handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The command targeted a different station id.
    IdentityMismatch,
    /// Request or response failed the cryptographic check.
    SignatureError,
    /// No transport is attached, or the transport could not deliver.
    Unreachable,
    /// A business rule declined and the kind has no typed status for it.
    DomainRejection,
    /// Uncaught failure at an invocation boundary.
    GenericServerError,
    /// No correlated response arrived within the call timeout.
    Timeout,
    /// Payload did not decode into the command's typed shape.
    FormatViolation,
    /// No handler is registered for the command kind.
    NotImplemented,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityMismatch => write!(f, "identity_mismatch"),
            Self::SignatureError => write!(f, "signature_error"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::DomainRejection => write!(f, "domain_rejection"),
            Self::GenericServerError => write!(f, "generic_server_error"),
            Self::Timeout => write!(f, "timeout"),
            Self::FormatViolation => write!(f, "format_violation"),
            Self::NotImplemented => write!(f, "not_implemented"),
        }
    }
}

/// A failure outcome: code plus human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Failure {
    pub code: FailureCode,
    pub detail: String,
}

impl Failure {
    pub fn new(code: FailureCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn domain(detail: impl Into<String>) -> Self {
        Self::new(FailureCode::DomainRejection, detail)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl From<OcppError> for Failure {
    fn from(error: OcppError) -> Self {
        let code = match &error {
            OcppError::Rejected { code, .. } => *code,
            OcppError::Timeout => FailureCode::Timeout,
            OcppError::Transport(_) | OcppError::ConnectionClosed => FailureCode::Unreachable,
            OcppError::Crypto(_) | OcppError::SignatureInvalid => FailureCode::SignatureError,
            OcppError::Serialization(_) | OcppError::Validation(_) => FailureCode::FormatViolation,
            OcppError::Protocol(_) | OcppError::Certificate(_) => FailureCode::GenericServerError,
        };
        Self::new(code, error.to_string())
    }
}

/// Station engine errors.
#[derive(Debug, Error)]
pub enum OcppError {
    /// Protocol-level error (malformed frame, invalid state transition).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Validation error (payload shape, limits).
    #[error("validation error: {0}")]
    Validation(String),

    /// Cryptographic error (key material, signature encoding).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Transport error (connection, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store or business rule declined the operation.
    #[error("rejected: {code} - {reason}")]
    Rejected { code: FailureCode, reason: String },

    /// Certificate could not be parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// No correlated response within the deadline.
    #[error("timed out waiting for response")]
    Timeout,

    /// The duplex channel closed while a request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureInvalid,
}

impl OcppError {
    pub fn domain(reason: impl Into<String>) -> Self {
        Self::Rejected {
            code: FailureCode::DomainRejection,
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations.
pub type OcppResult<T> = Result<T, OcppError>;
