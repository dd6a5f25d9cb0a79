//! Versioned allow-list resources.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identity of an externally owned allow-list resource.
///
/// `scope` is whatever groups resources in the backing account (a resource
/// group, project or similar); `region` is kept so a revoke can be routed to
/// the same endpoint the grant used.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
pub struct AllowListRef {
    id: String,
    name: String,
    scope: String,
    region: String,
}

impl AllowListRef {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        scope: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scope: scope.into(),
            region: region.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl Display for AllowListRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}@{} ({})", self.scope, self.name, self.region, self.id)
    }
}

/// Opaque compare-and-swap token handed out by a read and required by the next write.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VersionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// The result of a single read: the current entries in store order plus the token for them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AllowListSnapshot {
    pub entries: Vec<String>,
    pub version: VersionToken,
}

impl AllowListSnapshot {
    pub fn new(entries: Vec<String>, version: VersionToken) -> Self {
        Self { entries, version }
    }
}
