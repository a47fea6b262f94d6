//! Error taxonomy for the broker.
//!
//! Authentication and enumeration failures abort a discovery run. Cache
//! failures never leave [`crate::cache`]: the store logs them and degrades
//! to a cache miss or a skipped write.

use thiserror::Error;

use crate::context::Interruption;

/// Errors surfaced by a discovery run
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Interactive or silent token acquisition failed
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A page fetch failed
    #[error("Enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),

    /// Bad authority URL, realm id or other configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Token acquisition failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No usable cached grant; the user would have to sign in again
    #[error("Interaction required ({code}): {description}")]
    InteractionRequired { code: String, description: String },

    /// The identity provider rejected the request
    #[error("Identity provider error ({code}): {description}")]
    Provider { code: String, description: String },

    /// Nobody completed the device code sign-in in time
    #[error("Device code expired before sign-in completed")]
    DeviceCodeExpired,

    /// The token response could not be understood
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    /// The identity provider could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Interrupted(#[from] Interruption),
}

impl AuthError {
    pub fn interaction_required(description: impl Into<String>) -> Self {
        AuthError::InteractionRequired {
            code: "no_cached_grant".to_string(),
            description: description.into(),
        }
    }
}

/// Page fetch failures
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// Non-success HTTP status from the listing endpoint
    #[error("Listing returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The listing endpoint could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    /// The page body did not match the list envelope
    #[error("Failed to decode page: {0}")]
    Decode(String),

    #[error(transparent)]
    Interrupted(#[from] Interruption),
}

/// Marshal/unmarshal failures reported to the cache store
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Failed to marshal cache state: {0}")]
    MarshalFailed(String),

    #[error("Failed to unmarshal cache state: {0}")]
    UnmarshalFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_wraps_into_broker_error() {
        let err: BrokerError = AuthError::DeviceCodeExpired.into();
        assert!(matches!(err, BrokerError::Auth(AuthError::DeviceCodeExpired)));
        assert!(err.to_string().contains("Device code expired"));
    }

    #[test]
    fn test_interruption_is_transparent() {
        let err = AuthError::from(Interruption::Cancelled);
        assert_eq!(err.to_string(), Interruption::Cancelled.to_string());
    }

    #[test]
    fn test_status_error_display() {
        let err = EnumerationError::Status {
            status: 403,
            body: "AuthorizationFailed".to_string(),
        };
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("AuthorizationFailed"));
    }
}
