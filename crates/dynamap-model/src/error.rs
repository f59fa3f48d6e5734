//! Errors reported by a store client.
//!
//! A store client maps whatever its transport returns onto [`StoreError`].
//! The mapper never re-codes these; they reach the caller as they were
//! reported.

use std::fmt;

/// Well-known store error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum StoreErrorCode {
    /// Table or index not found.
    ResourceNotFoundException,
    /// A condition expression evaluated to false.
    ConditionalCheckFailedException,
    /// Provisioned throughput exceeded.
    ProvisionedThroughputExceededException,
    /// Account-level request limit exceeded.
    RequestLimitExceeded,
    /// Request rate too high.
    ThrottlingException,
    /// Transaction canceled.
    TransactionCanceledException,
    /// Validation error.
    #[default]
    ValidationException,
    /// Internal server error.
    InternalServerError,
    /// Transport-level failure (connection reset, timeout, ...).
    TransportError,
}

impl StoreErrorCode {
    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::RequestLimitExceeded => "RequestLimitExceeded",
            Self::ThrottlingException => "ThrottlingException",
            Self::TransactionCanceledException => "TransactionCanceledException",
            Self::ValidationException => "ValidationException",
            Self::InternalServerError => "InternalServerError",
            Self::TransportError => "TransportError",
        }
    }

    /// Parse a code from the `__type` field of an error response.
    ///
    /// Accepts both the short form and the fully-qualified
    /// `namespace#Code` form. Unknown codes map to `None`.
    #[must_use]
    pub fn from_error_type(error_type: &str) -> Option<Self> {
        let short = error_type.rsplit('#').next().unwrap_or(error_type);
        let code = match short {
            "ResourceNotFoundException" => Self::ResourceNotFoundException,
            "ConditionalCheckFailedException" => Self::ConditionalCheckFailedException,
            "ProvisionedThroughputExceededException" => {
                Self::ProvisionedThroughputExceededException
            }
            "RequestLimitExceeded" => Self::RequestLimitExceeded,
            "ThrottlingException" => Self::ThrottlingException,
            "TransactionCanceledException" => Self::TransactionCanceledException,
            "ValidationException" => Self::ValidationException,
            "InternalServerError" => Self::InternalServerError,
            _ => return None,
        };
        Some(code)
    }

    /// Whether resubmitting the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProvisionedThroughputExceededException
                | Self::RequestLimitExceeded
                | Self::ThrottlingException
                | Self::InternalServerError
        )
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error reported by the store.
#[derive(Debug)]
pub struct StoreError {
    /// The error code.
    pub code: StoreErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The underlying source error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreError({}): {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl StoreError {
    /// Create a new `StoreError` from an error code.
    #[must_use]
    pub fn new(code: StoreErrorCode) -> Self {
        Self {
            message: code.as_str().to_owned(),
            code,
            source: None,
        }
    }

    /// Create a new `StoreError` with a custom message.
    #[must_use]
    pub fn with_message(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            source: None,
        }
    }

    /// Set the source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether resubmitting the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Condition expression evaluated to false.
    #[must_use]
    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ConditionalCheckFailedException, message)
    }

    /// Table or index not found.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ResourceNotFoundException, message)
    }

    /// Request was throttled.
    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ThrottlingException, message)
    }

    /// Validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ValidationException, message)
    }
}

/// Create a `StoreError` from an error code.
///
/// # Examples
///
/// ```
/// use dynamap_model::store_error;
/// use dynamap_model::error::StoreErrorCode;
///
/// let err = store_error!(ValidationException);
/// assert_eq!(err.code, StoreErrorCode::ValidationException);
///
/// let err = store_error!(ResourceNotFoundException, "Table not found");
/// assert_eq!(err.message, "Table not found");
/// ```
#[macro_export]
macro_rules! store_error {
    ($code:ident) => {
        $crate::error::StoreError::new($crate::error::StoreErrorCode::$code)
    };
    ($code:ident, $msg:expr) => {
        $crate::error::StoreError::with_message($crate::error::StoreErrorCode::$code, $msg)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_qualified_error_type() {
        let code = StoreErrorCode::from_error_type(
            "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException",
        );
        assert_eq!(code, Some(StoreErrorCode::ConditionalCheckFailedException));
        assert_eq!(StoreErrorCode::from_error_type("Bogus"), None);
    }

    #[test]
    fn test_should_classify_throttling_as_retryable() {
        assert!(StoreError::throttled("slow down").is_retryable());
        assert!(store_error!(ProvisionedThroughputExceededException).is_retryable());
        assert!(!StoreError::conditional_check_failed("exists").is_retryable());
        assert!(!StoreError::validation("bad").is_retryable());
    }

    #[test]
    fn test_should_format_code_and_message() {
        let err = StoreError::resource_not_found("Table: t not found");
        assert_eq!(
            err.to_string(),
            "StoreError(ResourceNotFoundException): Table: t not found"
        );
    }
}
