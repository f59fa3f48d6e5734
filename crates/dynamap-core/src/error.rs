//! Error type for mapper operations.
//!
//! Everything except [`MapperError::Store`] is a schema or programmer error
//! raised synchronously at the point of violation. Store errors are carried
//! through exactly as the client reported them.

use dynamap_model::StoreError;

/// Errors raised by the mapper.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// The index catalog itself is malformed.
    #[error("invalid index catalog: {0}")]
    InvalidCatalog(String),

    /// An index binding is inconsistent with the catalog or the schema.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// A joined attribute collides with a declared or supplied attribute.
    #[error("derived attribute conflict on '{attribute}': {message}")]
    DerivedAttributeConflict {
        /// The joined attribute name.
        attribute: String,
        /// Explanation.
        message: String,
    },

    /// No index satisfies the request.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// The expression kind is not one of the supported kinds.
    #[error(
        "unsupported expression kind '{0}': must be one of KeyConditionExpression, \
         FilterExpression or ConditionExpression"
    )]
    UnsupportedExpressionKind(String),

    /// The key condition cannot be sent to the store as a key condition.
    #[error("invalid key condition: {0}")]
    InvalidKeyCondition(String),

    /// An immutable attribute or a primary key attribute would change.
    #[error("attribute '{attribute}' is immutable: {message}")]
    ImmutableKeyUpdate {
        /// The attribute name.
        attribute: String,
        /// Explanation.
        message: String,
    },

    /// A derived or index-key attribute was written directly.
    #[error("attribute '{attribute}' cannot be set directly: {message}")]
    ProtectedAttributeWrite {
        /// The attribute name.
        attribute: String,
        /// Explanation.
        message: String,
    },

    /// The attribute is not declared by the schema.
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    /// A required attribute was not supplied at construction.
    #[error("missing required attribute '{0}'")]
    MissingRequiredAttribute(String),

    /// A key value needed to address an item is absent.
    #[error("missing value for key attribute '{0}'")]
    MissingKeyValue(String),

    /// A value cannot be converted to or from its wire form.
    #[error("value codec error: {0}")]
    ValueCodec(String),

    /// A batch read still had unprocessed keys after every retry.
    #[error("batch get gave up after {attempts} attempts with {remaining} keys unprocessed")]
    BatchRetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Keys still unprocessed.
        remaining: usize,
    },

    /// The store rejected the request.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MapperError {
    /// The store error, if this error came from the store.
    #[must_use]
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn protected(attribute: &str, message: impl Into<String>) -> Self {
        Self::ProtectedAttributeWrite {
            attribute: attribute.to_owned(),
            message: message.into(),
        }
    }

    pub(crate) fn immutable(attribute: &str, message: impl Into<String>) -> Self {
        Self::ImmutableKeyUpdate {
            attribute: attribute.to_owned(),
            message: message.into(),
        }
    }

    pub(crate) fn derived_conflict(attribute: &str, message: impl Into<String>) -> Self {
        Self::DerivedAttributeConflict {
            attribute: attribute.to_owned(),
            message: message.into(),
        }
    }
}

/// Convenience result type for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;
