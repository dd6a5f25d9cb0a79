//! Data model for allow-list entries, ingress rules and grant records.
//!
//! Canonical string forms:
//! - Entry: `203.0.113.5/32` (bare addresses gain `/32`, blocks are kept verbatim)
//! - Allow-list: `scope/name@region (id)`
//! - Ingress rule: `resource tcp/22 from 203.0.113.5/32`

mod allow_list;
mod entry;
mod outcome;
mod rule;

pub use allow_list::{AllowListRef, AllowListSnapshot, VersionToken};
pub use entry::{CidrEntry, SINGLE_HOST_PREFIX};
pub use outcome::{FailureKind, GrantRecord, Granted, Outcome, RevokeOutcome};
pub use rule::{IngressRule, Protocol};
