use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The role-data source failed while building a user context.
    #[error("role data unavailable: {0}")]
    RoleDataUnavailable(#[source] StoreError),
    /// The persisted packed form could not be read or written.
    #[error("rule persistence error: {0}")]
    Persistence(#[source] StoreError),
    /// A packed rule set is structurally invalid.
    #[error("malformed rule set: {0}")]
    MalformedRuleSet(String),
    /// A condition document could not be parsed.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
}

impl Error {
    /// Returns true when the error came from an external store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::RoleDataUnavailable(_) | Self::Persistence(_))
    }
}
