use thiserror::Error;

/// Unified error type for the Jobscout application
///
/// Network and API failures are classified at the point they are first
/// observed (HTTP status code or typed transport error), never by inspecting
/// error messages later.
#[derive(Error, Debug)]
pub enum ScoutError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Transient network errors (timeout, connect failure, 5xx).
    // Safe to retry with backoff on the same resource.
    #[error("Transient network error: {0}")]
    Transient(String),

    // 429 from the API. Retryable like Transient, but kept as its own kind
    // so retry schedules can back off harder.
    #[error("Rate limited by API")]
    RateLimited,

    // Credential errors. Permanent for the current quota period; the caller
    // must rotate to a different credential instead of retrying.
    #[error("Credential rejected by API (invalid or expired)")]
    CredentialInvalid,

    #[error("Credential quota exhausted")]
    CreditsExhausted,

    #[error("No credential with remaining quota")]
    NoCredentialAvailable,

    // Proxy pool errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("All {0} proxy sources failed")]
    AllSourcesFailed(usize),

    // API response errors
    #[error("Malformed API response: {0}")]
    MalformedResponse(String),

    #[error("Unexpected API status {status}")]
    UnexpectedStatus { status: u16 },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Jobscout operations
pub type Result<T> = std::result::Result<T, ScoutError>;

impl ScoutError {
    /// Whether this error is safe to retry on the same resource
    pub fn is_transient(&self) -> bool {
        matches!(self, ScoutError::Transient(_) | ScoutError::RateLimited)
    }

    /// Whether this error means the credential in use must be retired
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            ScoutError::CredentialInvalid | ScoutError::CreditsExhausted
        )
    }

    /// Whether this error terminates the current run (no resource left to
    /// rotate to)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScoutError::NoCredentialAvailable | ScoutError::NoProxiesAvailable
        )
    }
}

// Convert transport-level reqwest errors, classifying transient kinds up front
impl From<reqwest::Error> for ScoutError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ScoutError::Transient(err.to_string())
        } else if err.is_decode() {
            ScoutError::MalformedResponse(err.to_string())
        } else {
            ScoutError::Http(err.to_string())
        }
    }
}

// Convert JSON serialization errors
impl From<serde_json::Error> for ScoutError {
    fn from(err: serde_json::Error) -> Self {
        ScoutError::MalformedResponse(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for ScoutError {
    fn from(err: url::ParseError) -> Self {
        ScoutError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ScoutError::Transient("timeout".to_string()).is_transient());
        assert!(ScoutError::RateLimited.is_transient());
        assert!(!ScoutError::CredentialInvalid.is_transient());
        assert!(!ScoutError::CreditsExhausted.is_transient());
        assert!(!ScoutError::UnexpectedStatus { status: 404 }.is_transient());
    }

    #[test]
    fn test_credential_failure_classification() {
        assert!(ScoutError::CredentialInvalid.is_credential_failure());
        assert!(ScoutError::CreditsExhausted.is_credential_failure());
        assert!(!ScoutError::Transient("5xx".to_string()).is_credential_failure());
        assert!(!ScoutError::NoCredentialAvailable.is_credential_failure());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(ScoutError::NoCredentialAvailable.is_terminal());
        assert!(ScoutError::NoProxiesAvailable.is_terminal());
        assert!(!ScoutError::Transient("429".to_string()).is_terminal());
    }
}
