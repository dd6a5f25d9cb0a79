//! The single managed allow-list entry, in CIDR form.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AccessError;

/// Prefix appended to a bare address so that it names exactly one host.
pub const SINGLE_HOST_PREFIX: &str = "/32";

/// A CIDR string as stored in an allow-list or used as a rule source.
///
/// Built from a caller-supplied address: a bare address such as `203.0.113.5`
/// becomes `203.0.113.5/32`, anything already carrying a prefix length is kept
/// verbatim. Membership is decided by exact string equality on this form, so
/// no further canonicalisation is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct CidrEntry(String);

impl CidrEntry {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `entries` holds this entry verbatim.
    pub fn is_in(&self, entries: &[String]) -> bool {
        entries.iter().any(|e| e == &self.0)
    }
}

impl FromStr for CidrEntry {
    type Err = AccessError;

    /// Accepts:
    /// - 203.0.113.5
    /// - 203.0.113.0/24
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AccessError::InvalidEntry(
                "empty address (expected an IP address or CIDR block)".to_string(),
            ));
        }

        if trimmed.contains('/') {
            Ok(CidrEntry(trimmed.to_string()))
        } else {
            Ok(CidrEntry(format!("{trimmed}{SINGLE_HOST_PREFIX}")))
        }
    }
}

impl TryFrom<&str> for CidrEntry {
    type Error = AccessError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Display for CidrEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CidrEntry {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
