//! Error kinds shared by every engine component.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KgError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{service} failed: {message}")]
    ExternalServiceFailure { service: String, message: String },

    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("{operation} timed out after {}ms", elapsed.as_millis())]
    Timeout { operation: String, elapsed: Duration },

    #[error("data integrity warning: {0}")]
    DataIntegrityWarning(String),

    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KgError>;

impl KgError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalServiceFailure {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Only transient collaborator failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalServiceFailure { .. } | Self::Timeout { .. })
    }

    /// Stable machine-readable name, used in reports and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ExternalServiceFailure { .. } => "external_service_failure",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::Timeout { .. } => "timeout",
            Self::DataIntegrityWarning(_) => "data_integrity_warning",
            Self::CacheCorruption(_) => "cache_corruption",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
        }
    }
}

/// Run `fut` under a deadline, mapping expiry to [`KgError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(KgError::timeout(operation, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(KgError::external("embedder", "503").is_retryable());
        assert!(KgError::timeout("embed", Duration::from_secs(1)).is_retryable());
        assert!(!KgError::invalid("empty").is_retryable());
        assert!(!KgError::DimensionMismatch { left: 3, right: 4 }.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = KgError::timeout("vector search", Duration::from_millis(250));
        assert_eq!(err.to_string(), "vector search timed out after 250ms");
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(KgError::Timeout { .. })));
    }
}
