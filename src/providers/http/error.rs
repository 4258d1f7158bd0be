use thiserror::Error;

use crate::providers::ProviderError;

/// Errors from the REST provider API.
///
/// SECURITY: Error messages must NEVER contain the bearer token.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Token rejected (401/403)
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network-level error (connection failed, timeout, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    /// 409 on delete: something still uses the resource.
    #[error("{kind} '{id}' is still in use: {message}")]
    InUse {
        kind: String,
        id: String,
        message: String,
    },

    #[error("unexpected response: {message}")]
    Decode { message: String },
}

impl From<HttpError> for ProviderError {
    fn from(err: HttpError) -> Self {
        let message = err.to_string();
        match err {
            HttpError::Auth { .. } => ProviderError::Auth(message),
            HttpError::Network(_) | HttpError::RateLimited { .. } => {
                ProviderError::Transient(message)
            }
            HttpError::Api { status, .. } if status >= 500 => ProviderError::Transient(message),
            HttpError::Api { .. } | HttpError::Decode { .. } => ProviderError::Permanent(message),
            HttpError::NotFound { .. } => ProviderError::NotFound(message),
            HttpError::InUse { .. } => ProviderError::DependencyViolation(message),
        }
    }
}
