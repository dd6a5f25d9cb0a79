use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure reported by an injected store client.
///
/// Store implementations map their backend's responses onto these variants;
/// the mutators only ever branch on the classification.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreError {
    /// The conditional write presented a version token that is no longer current.
    #[error("version token is stale")]
    StaleVersion,

    /// The rule being created already exists.
    #[error("rule already exists")]
    Duplicate,

    /// The rule being deleted does not exist.
    #[error("rule not found")]
    NotFound,

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn other(msg: impl Into<String>) -> Self {
        StoreError::Other(msg.into())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessError {
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("gave up acquiring the allow-list after {attempts} conflicting writes")]
    LockExhausted { attempts: u32 },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("address resolution failed: {0}")]
    Resolver(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AccessError {
    /// Whether the grant lost every compare-and-swap round, as opposed to failing outright.
    pub fn is_lock_exhausted(&self) -> bool {
        matches!(self, AccessError::LockExhausted { .. })
    }
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        AccessError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        AccessError::InvalidConfig(err.to_string())
    }
}
