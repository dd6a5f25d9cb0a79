//! Results of grant and revoke operations, and the records that tie them together.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display as StrumDisplay};
use utoipa::ToSchema;

use crate::error::AccessError;

use super::allow_list::AllowListRef;
use super::entry::CidrEntry;
use super::rule::IngressRule;

/// What a successful operation did to the resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, StrumDisplay, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    /// A write was issued and accepted.
    Applied,
    /// The resource was already in the requested state; nothing was written.
    AlreadySatisfied,
}

/// Why a contained revoke did not complete.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, StrumDisplay, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// Every compare-and-swap round lost to a concurrent writer.
    LockExhausted,
    /// Every attempt on the unversioned path failed.
    RetriesExhausted,
    /// The store failed in a way retrying cannot fix.
    Store,
    /// The entry could not be normalised.
    InvalidEntry,
}

impl From<&AccessError> for FailureKind {
    fn from(err: &AccessError) -> Self {
        match err {
            AccessError::LockExhausted { .. } => FailureKind::LockExhausted,
            AccessError::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
            AccessError::InvalidEntry(_) => FailureKind::InvalidEntry,
            _ => FailureKind::Store,
        }
    }
}

/// Outcome of a revoke. Revokes never fail the caller, so failure is data here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum RevokeOutcome {
    Applied,
    AlreadySatisfied,
    Failed(FailureKind),
}

impl RevokeOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RevokeOutcome::Failed(_))
    }
}

impl From<Outcome> for RevokeOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Applied => RevokeOutcome::Applied,
            Outcome::AlreadySatisfied => RevokeOutcome::AlreadySatisfied,
        }
    }
}

impl Display for RevokeOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RevokeOutcome::Applied => write!(f, "applied"),
            RevokeOutcome::AlreadySatisfied => write!(f, "already_satisfied"),
            RevokeOutcome::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

/// Everything needed to undo one grant.
///
/// Produced by a grant, held by the caller for the duration of the run and
/// handed back to the matching revoke.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantRecord {
    AllowList {
        resource: AllowListRef,
        entry: CidrEntry,
    },
    IngressRule {
        rule: IngressRule,
    },
}

impl GrantRecord {
    /// The finalised CIDR this grant added.
    pub fn entry(&self) -> &CidrEntry {
        match self {
            GrantRecord::AllowList { entry, .. } => entry,
            GrantRecord::IngressRule { rule } => &rule.source,
        }
    }
}

impl Display for GrantRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            GrantRecord::AllowList { resource, entry } => write!(f, "{entry} in {resource}"),
            GrantRecord::IngressRule { rule } => write!(f, "{rule}"),
        }
    }
}

/// A successful grant: what happened, and how to reverse it.
///
/// The record is produced even when the entry was already present, since
/// the caller asked for access and owns the matching revoke.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Granted {
    pub outcome: Outcome,
    pub record: GrantRecord,
}
