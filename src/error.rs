//! Inference engine delivery errors.

use thiserror::Error;

/// Why a request to the inference engine failed.
///
/// None of these are fatal to the cache: the scheduler logs them and retries
/// delivery on the next refresh.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connection refused, DNS failure, or another transport error.
    #[error("inference engine unreachable: {0}")]
    Unreachable(String),
    /// The request exceeded the configured timeout.
    #[error("inference engine timed out after {0}s")]
    Timeout(u64),
    /// The engine answered with a non-success status.
    #[error("inference engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// `/v1/models` listed no model and none is configured.
    #[error("inference engine reports no models")]
    NoModel,
    /// The response body could not be decoded.
    #[error("invalid response from inference engine: {0}")]
    InvalidResponse(String),
}

impl DeliveryError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout(timeout_secs)
        } else if err.is_decode() {
            DeliveryError::InvalidResponse(err.to_string())
        } else {
            DeliveryError::Unreachable(err.to_string())
        }
    }
}

/// Result type for engine operations.
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_includes_code_and_body() {
        let err = DeliveryError::Status {
            status: 503,
            body: "loading model".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "inference engine returned HTTP 503: loading model"
        );
    }

    #[test]
    fn timeout_display() {
        assert_eq!(
            DeliveryError::Timeout(30).to_string(),
            "inference engine timed out after 30s"
        );
    }
}
