// src/lib.rs
//! Temporary ingress access for short-lived workloads.
//!
//! A caller's address is granted on shared allow-lists (versioned, updated by
//! compare-and-swap) and on per-resource ingress rules (unversioned, updated
//! by idempotent create/delete), and revoked again when the work is done.
//! Store clients are supplied by the caller through the traits in this crate.

pub use bracket::{AccessBracket, BracketRun, Revoked, RuleTarget};
pub use config::{AccessConfig, DEFAULT_RULE_DESCRIPTION, DEFAULT_RULE_PORT, RuleTemplate};
pub use error::{AccessError, StoreError};
pub use retry::RetryPolicy;
pub use traits::{AddressResolver, AllowListStore, RuleStore};
pub use types::{
    AllowListRef, AllowListSnapshot, CidrEntry, FailureKind, GrantRecord, Granted, IngressRule, Outcome, Protocol,
    RevokeOutcome, SINGLE_HOST_PREFIX, VersionToken,
};
pub use unversioned::UnversionedRuleMutator;
pub use versioned::VersionedSetMutator;

mod bracket;
mod config;
mod error;
pub mod memory;
#[cfg(feature = "observability")]
pub mod metrics;
mod retry;
mod traits;
mod types;
mod unversioned;
mod versioned;
