//! Read-modify-conditional-write of a versioned allow-list.
//!
//! Every attempt starts from a fresh read, and the write presents the version
//! token from that read. A concurrent writer therefore turns into a
//! [`StoreError::StaleVersion`] and a retry, never a lost update. Any other
//! store failure ends the operation on the spot.

use tracing::{debug, info, warn};

use crate::error::{AccessError, StoreError};
#[cfg(feature = "observability")]
use crate::metrics::{self, MutationPath, Operation};
use crate::retry::RetryPolicy;
use crate::traits::AllowListStore;
use crate::types::{AllowListRef, CidrEntry, GrantRecord, Granted, Outcome, RevokeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Change {
    Add,
    Remove,
}

impl Change {
    /// The entry list to write, or `None` when the list already has the desired membership.
    fn apply(self, entries: &[String], entry: &CidrEntry) -> Option<Vec<String>> {
        match (self, entry.is_in(entries)) {
            (Change::Add, true) | (Change::Remove, false) => None,
            (Change::Add, false) => {
                let mut next = entries.to_vec();
                next.push(entry.to_string());
                Some(next)
            }
            (Change::Remove, true) => Some(
                entries
                    .iter()
                    .filter(|e| e.as_str() != entry.as_str())
                    .cloned()
                    .collect(),
            ),
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Change::Add => "Grant",
            Change::Remove => "Revoke",
        }
    }

    #[cfg(feature = "observability")]
    pub(crate) fn operation(self) -> Operation {
        match self {
            Change::Add => Operation::Grant,
            Change::Remove => Operation::Revoke,
        }
    }
}

/// Adds and removes one CIDR entry in a shared, versioned allow-list.
pub struct VersionedSetMutator<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S: AllowListStore> VersionedSetMutator<S> {
    /// A mutator with the default policy: 10 attempts, `1s * 2^k` plus up to 1s of jitter.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RetryPolicy::versioned())
    }

    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Ensure `address` is in the allow-list.
    ///
    /// Fails with [`AccessError::LockExhausted`] when every attempt lost the
    /// compare-and-swap, and with [`AccessError::Store`] on the first failure
    /// of any other kind.
    pub async fn grant(&self, resource: &AllowListRef, address: &str) -> Result<Granted, AccessError> {
        let entry: CidrEntry = address.parse()?;

        #[cfg(feature = "observability")]
        let started = std::time::Instant::now();
        let mut attempts = 0;
        let result = self.run(resource, &entry, Change::Add, &mut attempts).await;

        #[cfg(feature = "observability")]
        metrics::record_mutation(
            MutationPath::Versioned,
            Operation::Grant,
            match &result {
                Ok(outcome) => outcome.to_string(),
                Err(err) => format!("failed({})", crate::types::FailureKind::from(err)),
            },
            attempts,
            started.elapsed(),
        );

        let outcome = result?;
        Ok(Granted {
            outcome,
            record: GrantRecord::AllowList {
                resource: resource.clone(),
                entry,
            },
        })
    }

    /// Ensure `address` is not in the allow-list.
    ///
    /// Never fails: a revoke that cannot complete is logged as a warning and
    /// reported as [`RevokeOutcome::Failed`].
    pub async fn revoke(&self, resource: &AllowListRef, address: &str) -> RevokeOutcome {
        let entry: CidrEntry = match address.parse() {
            Ok(entry) => entry,
            Err(err) => {
                warn!(event = "Revoke", phase = "Abandoned", resource = %resource, error = %err);
                return RevokeOutcome::Failed((&err).into());
            }
        };

        #[cfg(feature = "observability")]
        let started = std::time::Instant::now();
        let mut attempts = 0;
        let outcome = match self.run(resource, &entry, Change::Remove, &mut attempts).await {
            Ok(outcome) => outcome.into(),
            Err(err) => {
                warn!(
                    event = "Revoke",
                    phase = "Abandoned",
                    resource = %resource,
                    entry = %entry,
                    attempts,
                    error = %err,
                    "allow-list entry left in place"
                );
                RevokeOutcome::Failed((&err).into())
            }
        };

        #[cfg(feature = "observability")]
        metrics::record_mutation(
            MutationPath::Versioned,
            Operation::Revoke,
            outcome.to_string(),
            attempts,
            started.elapsed(),
        );

        outcome
    }

    async fn run(
        &self,
        resource: &AllowListRef,
        entry: &CidrEntry,
        change: Change,
        attempts: &mut u32,
    ) -> Result<Outcome, AccessError> {
        for attempt in 0..self.policy.max_attempts {
            *attempts = attempt + 1;

            let snapshot = self.store.read(resource).await?;
            debug!(
                event = change.as_str(),
                phase = "Read",
                resource = %resource,
                attempt = *attempts,
                version = %snapshot.version,
                entries = snapshot.entries.len()
            );

            let Some(next) = change.apply(&snapshot.entries, entry) else {
                info!(
                    event = change.as_str(),
                    phase = "AlreadySatisfied",
                    resource = %resource,
                    entry = %entry
                );
                return Ok(Outcome::AlreadySatisfied);
            };

            match self
                .store
                .conditional_write(resource, &next, &snapshot.version)
                .await
            {
                Ok(()) => {
                    info!(
                        event = change.as_str(),
                        phase = "Applied",
                        resource = %resource,
                        entry = %entry,
                        attempt = *attempts
                    );
                    return Ok(Outcome::Applied);
                }
                Err(StoreError::StaleVersion) => {
                    warn!(
                        event = change.as_str(),
                        phase = "Conflict",
                        resource = %resource,
                        attempt = *attempts,
                        max_attempts = self.policy.max_attempts,
                        "allow-list changed since read"
                    );
                    if self.policy.has_attempt_after(attempt) {
                        #[cfg(feature = "observability")]
                        metrics::record_retry(
                            MutationPath::Versioned,
                            change.operation(),
                            attempt,
                            StoreError::StaleVersion.to_string(),
                        );
                        self.policy.backoff(attempt).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AccessError::LockExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureKind, VersionToken};
    use crate::memory::InMemoryAllowList;
    use crate::tests::fakes::{ScriptedAllowList, WriteScript, YieldAfterRead};
    use std::time::Duration;
    use tokio::time::Instant;
    use yare::parameterized;

    fn resource() -> AllowListRef {
        AllowListRef::new("ipset-123", "ci-runners", "build", "eu-west-1")
    }

    fn store_with(entries: &[&str]) -> ScriptedAllowList {
        ScriptedAllowList::new(entries.iter().map(|e| e.to_string()).collect())
    }

    #[parameterized(
        bare_address = { "203.0.113.5", "203.0.113.5/32" },
        cidr_block = { "203.0.113.0/24", "203.0.113.0/24" },
    )]
    fn test_change_add_normalized(input: &str, stored: &str) {
        let entry: CidrEntry = input.parse().unwrap();
        let next = Change::Add.apply(&["10.0.0.0/8".to_string()], &entry).unwrap();
        assert_eq!(next, vec!["10.0.0.0/8".to_string(), stored.to_string()]);
    }

    #[test]
    fn test_change_remove_drops_every_exact_match() {
        let entry: CidrEntry = "192.0.2.1".parse().unwrap();
        let entries = vec![
            "192.0.2.1/32".to_string(),
            "10.0.0.0/8".to_string(),
            "192.0.2.1/32".to_string(),
        ];
        let next = Change::Remove.apply(&entries, &entry).unwrap();
        assert_eq!(next, vec!["10.0.0.0/8".to_string()]);
        assert!(Change::Remove.apply(&next, &entry).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_writes_normalized_entry() {
        let mutator = VersionedSetMutator::new(store_with(&["10.0.0.0/8"]));
        let granted = mutator.grant(&resource(), "203.0.113.5").await.unwrap();

        assert_eq!(granted.outcome, Outcome::Applied);
        assert_eq!(granted.record.entry().as_str(), "203.0.113.5/32");
        assert_eq!(
            mutator.store().entries(),
            vec!["10.0.0.0/8".to_string(), "203.0.113.5/32".to_string()]
        );
        assert_eq!(mutator.store().write_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_twice_writes_once() {
        let mutator = VersionedSetMutator::new(store_with(&[]));
        let first = mutator.grant(&resource(), "203.0.113.5").await.unwrap();
        let second = mutator.grant(&resource(), "203.0.113.5/32").await.unwrap();

        assert_eq!(first.outcome, Outcome::Applied);
        assert_eq!(second.outcome, Outcome::AlreadySatisfied);
        assert_eq!(first.record, second.record);
        assert_eq!(mutator.store().entries(), vec!["203.0.113.5/32".to_string()]);
        assert_eq!(mutator.store().write_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_absent_entry_is_noop() {
        let mutator = VersionedSetMutator::new(store_with(&["10.0.0.0/8"]));
        let outcome = mutator.revoke(&resource(), "203.0.113.5").await;

        assert_eq!(outcome, RevokeOutcome::AlreadySatisfied);
        assert_eq!(mutator.store().write_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_removes_entry() {
        let mutator = VersionedSetMutator::new(store_with(&["10.0.0.0/8", "203.0.113.5/32"]));
        let outcome = mutator.revoke(&resource(), "203.0.113.5").await;

        assert_eq!(outcome, RevokeOutcome::Applied);
        assert_eq!(mutator.store().entries(), vec!["10.0.0.0/8".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_retries_through_conflicts() {
        // Another writer sneaks in an entry before each of the first three writes.
        let store = store_with(&["10.0.0.0/8"]).with_script(vec![
            WriteScript::ConcurrentAppend("198.51.100.1/32".to_string()),
            WriteScript::ConcurrentAppend("198.51.100.2/32".to_string()),
            WriteScript::ConcurrentAppend("198.51.100.3/32".to_string()),
        ]);
        let mutator = VersionedSetMutator::new(store);

        let granted = mutator.grant(&resource(), "203.0.113.5").await.unwrap();

        assert_eq!(granted.outcome, Outcome::Applied);
        assert_eq!(mutator.store().write_calls(), 4);
        assert_eq!(mutator.store().read_calls(), 4);
        assert_eq!(
            mutator.store().entries(),
            vec![
                "10.0.0.0/8".to_string(),
                "198.51.100.1/32".to_string(),
                "198.51.100.2/32".to_string(),
                "198.51.100.3/32".to_string(),
                "203.0.113.5/32".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_write_presents_token_from_preceding_read() {
        let store = store_with(&[]).with_script(vec![WriteScript::ConcurrentAppend(
            "198.51.100.1/32".to_string(),
        )]);
        let mutator = VersionedSetMutator::new(store);
        mutator.grant(&resource(), "203.0.113.5").await.unwrap();

        let presented = mutator.store().presented_tokens();
        assert_eq!(presented, vec![VersionToken::new("v0"), VersionToken::new("v1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_fails_after_ten_conflicts() {
        let store = store_with(&[]).with_script(vec![WriteScript::AlwaysStale]);
        let mutator = VersionedSetMutator::new(store);

        let err = mutator.grant(&resource(), "203.0.113.5").await.unwrap_err();

        assert_eq!(err, AccessError::LockExhausted { attempts: 10 });
        assert!(err.is_lock_exhausted());
        assert_eq!(mutator.store().write_calls(), 10);
        assert!(mutator.store().entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_contains_lock_exhaustion() {
        let store = store_with(&["203.0.113.5/32"]).with_script(vec![WriteScript::AlwaysStale]);
        let mutator = VersionedSetMutator::new(store);

        let outcome = mutator.revoke(&resource(), "203.0.113.5").await;

        assert_eq!(outcome, RevokeOutcome::Failed(FailureKind::LockExhausted));
        assert_eq!(mutator.store().write_calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_lock_error_aborts_immediately() {
        let store = store_with(&[]).with_script(vec![WriteScript::Fail(StoreError::other(
            "authorization failed",
        ))]);
        let mutator = VersionedSetMutator::new(store);

        let err = mutator.grant(&resource(), "203.0.113.5").await.unwrap_err();

        assert!(matches!(err, AccessError::Store(_)));
        assert!(!err.is_lock_exhausted());
        assert_eq!(mutator.store().write_calls(), 1);
        assert_eq!(mutator.store().read_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_aborts_immediately() {
        let store = store_with(&[]).failing_reads(StoreError::other("resource not found"));
        let mutator = VersionedSetMutator::new(store);

        let err = mutator.grant(&resource(), "203.0.113.5").await.unwrap_err();
        assert!(matches!(err, AccessError::Store(_)));
        assert_eq!(mutator.store().read_calls(), 1);
        assert_eq!(mutator.store().write_calls(), 0);

        let outcome = mutator.revoke(&resource(), "203.0.113.5").await;
        assert_eq!(outcome, RevokeOutcome::Failed(FailureKind::Store));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_entry_is_rejected_before_any_read() {
        let mutator = VersionedSetMutator::new(store_with(&[]));
        let err = mutator.grant(&resource(), "  ").await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidEntry(_)));
        assert_eq!(mutator.store().read_calls(), 0);

        let outcome = mutator.revoke(&resource(), "").await;
        assert_eq!(outcome, RevokeOutcome::Failed(FailureKind::InvalidEntry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_jittered_exponential() {
        let store = store_with(&[]).with_script(vec![WriteScript::AlwaysStale]);
        let mutator = VersionedSetMutator::with_policy(
            store,
            RetryPolicy {
                max_attempts: 4,
                ..RetryPolicy::versioned()
            },
        );

        let started = Instant::now();
        mutator.grant(&resource(), "203.0.113.5").await.unwrap_err();

        // Sleeps follow attempts 0, 1 and 2 only: 1s + 2s + 4s plus < 1s jitter each.
        let gaps = mutator.store().write_gaps();
        assert_eq!(gaps.len(), 3);
        for (k, gap) in gaps.iter().enumerate() {
            let floor = Duration::from_millis(1_000 << k);
            assert!(*gap >= floor, "gap {k} = {gap:?}");
            assert!(*gap <= floor + Duration::from_millis(1_000), "gap {k} = {gap:?}");
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mutators_both_land() {
        let shared = InMemoryAllowList::new().with_entries("ipset-123", vec!["10.0.0.0/8".to_string()]);
        let first = VersionedSetMutator::new(YieldAfterRead(shared.clone()));
        let second = VersionedSetMutator::new(YieldAfterRead(shared.clone()));

        let (res_a, res_b) = (resource(), resource());
        let (a, b) = tokio::join!(
            first.grant(&res_a, "203.0.113.5"),
            second.grant(&res_b, "198.51.100.9"),
        );

        assert_eq!(a.unwrap().outcome, Outcome::Applied);
        assert_eq!(b.unwrap().outcome, Outcome::Applied);
        let entries = shared.entries("ipset-123");
        for expected in ["10.0.0.0/8", "203.0.113.5/32", "198.51.100.9/32"] {
            assert_eq!(entries.iter().filter(|e| *e == expected).count(), 1, "{entries:?}");
        }
        assert_eq!(entries.len(), 3);
        // Both read v0; the loser retried from a fresh read, so exactly two writes landed.
        assert_eq!(shared.version("ipset-123"), Some(VersionToken::new("v2")));
    }
}
