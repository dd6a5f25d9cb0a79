//! Vendor-agnostic mutation metrics via a pluggable sink.
//!
//! **Note:** This module is only available when the `observability` feature is enabled.
//!
//! ## Usage
//!
//! Implement [`MetricsSink`] and install it once at startup:
//!
//! ```ignore
//! use cidrgate_core::metrics::{MetricsSink, MutationStats};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! struct ConflictCounter {
//!     retries: AtomicU64,
//! }
//!
//! impl MetricsSink for ConflictCounter {
//!     fn on_mutation(&self, stats: &MutationStats) {
//!         self.retries
//!             .fetch_add(u64::from(stats.attempts.saturating_sub(1)), Ordering::Relaxed);
//!     }
//! }
//!
//! cidrgate_core::metrics::set_sink(Arc::new(ConflictCounter { retries: AtomicU64::new(0) }));
//! ```

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use strum_macros::{AsRefStr, Display};
use tracing::warn;

/// Which mutation protocol produced the stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MutationPath {
    /// Compare-and-swap on a versioned allow-list.
    Versioned,
    /// Create/delete of a single ingress rule.
    Unversioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Grant,
    Revoke,
}

/// Snapshot of one completed grant or revoke, passed to [`MetricsSink::on_mutation`].
#[derive(Debug, Clone, Serialize)]
pub struct MutationStats {
    pub path: MutationPath,
    pub operation: Operation,
    /// `applied`, `already_satisfied`, or `failed(<kind>)`.
    pub outcome: String,
    /// Store round trips taken, including the successful one.
    pub attempts: u32,
    /// Wall-clock time including backoff sleeps.
    pub duration: Duration,
}

/// Emitted for every attempt that is followed by another one.
#[derive(Debug, Clone, Serialize)]
pub struct RetryStats {
    pub path: MutationPath,
    pub operation: Operation,
    /// 0-indexed attempt that failed.
    pub attempt: u32,
    pub reason: String,
}

/// Trait for consuming mutation metrics.
///
/// Implementations must be thread-safe and should not block; they are called
/// inline from the mutators.
pub trait MetricsSink: Send + Sync {
    /// Called once per grant or revoke, whatever the outcome.
    fn on_mutation(&self, stats: &MutationStats);

    /// Called before each backoff sleep. The default implementation does nothing.
    fn on_retry(&self, _stats: &RetryStats) {}
}

static SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// Set the global metrics sink.
///
/// Until a sink is set, stats are dropped. The sink cannot be replaced
/// afterwards; later calls are ignored with a warning.
pub fn set_sink(sink: Arc<dyn MetricsSink>) {
    if SINK.set(sink).is_err() {
        warn!(
            "Metrics sink was already initialized. Ignoring subsequent set_sink call."
        );
    }
}

pub(crate) fn record_mutation(
    path: MutationPath,
    operation: Operation,
    outcome: String,
    attempts: u32,
    duration: Duration,
) {
    if let Some(sink) = SINK.get() {
        sink.on_mutation(&MutationStats {
            path,
            operation,
            outcome,
            attempts,
            duration,
        });
    }
}

pub(crate) fn record_retry(path: MutationPath, operation: Operation, attempt: u32, reason: String) {
    if let Some(sink) = SINK.get() {
        sink.on_retry(&RetryStats {
            path,
            operation,
            attempt,
            reason,
        });
    }
}
