use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiRequestFailed(#[from] reqwest::Error),

    #[error("Provider error {status}: {message}")]
    ProviderError { status: u16, message: String },

    #[error("Rate limited (429): {0}")]
    RateLimit(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimit(_) => true,
            LlmError::ProviderError { status, .. } => *status == 429,
            LlmError::ApiRequestFailed(e) => e.status().map(|s| s.as_u16() == 429).unwrap_or(false),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            LlmError::ProviderError { status, .. } => Some(*status),
            LlmError::ApiRequestFailed(e) => e.status().map(|s| s.as_u16()),
            LlmError::RateLimit(_) => Some(429),
            _ => None,
        }
    }

    /// Map a non-success HTTP status and body into the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 {
            LlmError::RateLimit(body)
        } else {
            LlmError::ProviderError {
                status,
                message: body,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let limited = LlmError::from_status(429, "slow down".into());
        assert!(limited.is_rate_limit());
        assert_eq!(limited.status_code(), Some(429));

        let server = LlmError::from_status(500, "boom".into());
        assert!(!server.is_rate_limit());
        assert_eq!(server.status_code(), Some(500));
        assert_eq!(server.to_string(), "Provider error 500: boom");
    }
}
