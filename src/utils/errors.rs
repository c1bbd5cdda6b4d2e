use thiserror::Error;

/// Errors raised while fetching a rate from an external source
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },
    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl SourceError {
    /// Network, timeout, 429 and 5xx failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Network(_)
                | SourceError::Timeout(_)
                | SourceError::RateLimited { .. }
                | SourceError::Server { .. }
        )
    }
}

/// Errors raised by the persistent key/value store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store read failed: {0}")]
    Read(String),
    #[error("Store write failed: {0}")]
    Write(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the rate cache
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] SourceError),
}

impl CacheError {
    /// Wire error code carried in a PriceResponse
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::Fetch(SourceError::Validation(_)) => codes::VALIDATION_FAILED,
            CacheError::Fetch(_) => codes::FETCH_FAILED,
        }
    }
}

/// Errors surfaced to the page side of the messaging protocol
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Price request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("No receiver for price request")]
    NoReceiver,
    #[error("Price request failed [{code}]: {message}")]
    Remote { code: String, message: String },
    #[error("Invalid price response: {0}")]
    InvalidResponse(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised while reading or mutating a DOM node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("Access to node {0} is restricted")]
    Restricted(u64),
    #[error("Node {0} not found")]
    NotFound(u64),
    #[error("Write rejected on node {0}")]
    WriteRejected(u64),
}

/// Error codes used on the wire
pub mod codes {
    pub const FETCH_FAILED: &str = "FETCH_FAILED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Extract a clean message from a nested error string
///
/// Removes prefixes like:
/// "Fetch failed: Validation failed: rate must be positive"
///
/// Returns only the innermost message:
/// "rate must be positive"
pub fn extract_clean_error(error_msg: &str) -> String {
    match error_msg.rfind(": ") {
        Some(last_colon) if last_colon + 2 < error_msg.len() => {
            error_msg[last_colon + 2..].trim().to_string()
        }
        _ => error_msg.to_string(),
    }
}
