//! Bracketing a unit of work with grant and revoke.
//!
//! [`AccessBracket`] resolves the caller's address once, grants it on every
//! configured target, awaits the caller's work and then revokes every record
//! it produced, whatever the work returned. Allow-list grants and rule grants
//! run concurrently; within each kind targets are processed in order.
//!
//! A failed grant rolls back the grants that already went through before the
//! error is returned, so a failed [`AccessBracket::run`] leaves nothing behind
//! for the caller to clean up.

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AccessConfig;
use crate::error::AccessError;
use crate::traits::{AddressResolver, AllowListStore, RuleStore};
use crate::types::{AllowListRef, FailureKind, GrantRecord, Granted, RevokeOutcome};
use crate::unversioned::UnversionedRuleMutator;
use crate::versioned::VersionedSetMutator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    pub resource_id: String,
    pub description: String,
}

/// One revoke performed by the bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revoked {
    pub record: GrantRecord,
    pub outcome: RevokeOutcome,
}

#[derive(Debug)]
pub struct BracketRun<T> {
    pub address: String,
    pub granted: Vec<Granted>,
    pub output: T,
    pub revoked: Vec<Revoked>,
}

impl<T> BracketRun<T> {
    /// Whether any cleanup was left undone. Informational only.
    pub fn has_dangling_access(&self) -> bool {
        self.revoked.iter().any(|r| r.outcome.is_failed())
    }
}

type Grants = (Vec<Granted>, Option<AccessError>);

pub struct AccessBracket {
    config: AccessConfig,
    versioned: Option<VersionedSetMutator<Arc<dyn AllowListStore>>>,
    unversioned: Option<UnversionedRuleMutator<Arc<dyn RuleStore>>>,
    allow_lists: Vec<AllowListRef>,
    rules: Vec<RuleTarget>,
}

impl AccessBracket {
    pub fn new(config: AccessConfig) -> Self {
        Self {
            config,
            versioned: None,
            unversioned: None,
            allow_lists: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn allow_list_store(mut self, store: Arc<dyn AllowListStore>) -> Self {
        self.versioned = Some(VersionedSetMutator::with_policy(store, self.config.versioned));
        self
    }

    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.unversioned = Some(UnversionedRuleMutator::with_config(
            store,
            self.config.unversioned,
            self.config.rule.clone(),
        ));
        self
    }

    pub fn allow_list(mut self, resource: AllowListRef) -> Self {
        self.allow_lists.push(resource);
        self
    }

    pub fn ingress_rule(mut self, resource_id: impl Into<String>, description: impl Into<String>) -> Self {
        self.rules.push(RuleTarget {
            resource_id: resource_id.into(),
            description: description.into(),
        });
        self
    }

    fn validate(&self) -> Result<(), AccessError> {
        self.config.validate()?;
        if self.allow_lists.is_empty() && self.rules.is_empty() {
            return Err(AccessError::InvalidConfig("no access targets configured".to_string()));
        }
        if !self.allow_lists.is_empty() && self.versioned.is_none() {
            return Err(AccessError::InvalidConfig(
                "allow-list targets configured without an allow-list store".to_string(),
            ));
        }
        if !self.rules.is_empty() && self.unversioned.is_none() {
            return Err(AccessError::InvalidConfig(
                "ingress rule targets configured without a rule store".to_string(),
            ));
        }
        Ok(())
    }

    /// Grant `address` on every target, rolling back on the first failure.
    pub async fn grant(&self, address: &str) -> Result<Vec<Granted>, AccessError> {
        self.validate()?;

        let (lists, rules) = tokio::join!(self.grant_allow_lists(address), self.grant_rules(address));

        let mut granted = Vec::new();
        let mut failure = None;
        for (part, err) in [lists, rules] {
            granted.extend(part);
            if failure.is_none() {
                failure = err;
            }
        }

        if let Some(err) = failure {
            warn!(
                event = "Bracket",
                phase = "RollBack",
                error = %err,
                granted = granted.len()
            );
            let records: Vec<GrantRecord> = granted.into_iter().map(|g| g.record).collect();
            self.revoke(&records).await;
            return Err(err);
        }

        Ok(granted)
    }

    async fn grant_allow_lists(&self, address: &str) -> Grants {
        let mut granted = Vec::new();
        let Some(mutator) = &self.versioned else {
            return (granted, None);
        };
        for resource in &self.allow_lists {
            match mutator.grant(resource, address).await {
                Ok(g) => granted.push(g),
                Err(err) => return (granted, Some(err)),
            }
        }
        (granted, None)
    }

    async fn grant_rules(&self, address: &str) -> Grants {
        let mut granted = Vec::new();
        let Some(mutator) = &self.unversioned else {
            return (granted, None);
        };
        for target in &self.rules {
            match mutator
                .grant(&target.resource_id, address, &target.description)
                .await
            {
                Ok(g) => granted.push(g),
                Err(err) => return (granted, Some(err)),
            }
        }
        (granted, None)
    }

    /// Revoke `records` in reverse grant order. Never fails.
    pub async fn revoke(&self, records: &[GrantRecord]) -> Vec<Revoked> {
        let mut revoked = Vec::with_capacity(records.len());
        for record in records.iter().rev() {
            let outcome = match (record, &self.versioned, &self.unversioned) {
                (GrantRecord::AllowList { resource, entry }, Some(mutator), _) => {
                    mutator.revoke(resource, entry.as_str()).await
                }
                (GrantRecord::IngressRule { rule }, _, Some(mutator)) => mutator.revoke_rule(rule).await,
                _ => {
                    warn!(
                        event = "Revoke",
                        phase = "Abandoned",
                        record = %record,
                        "no store configured for this kind of grant"
                    );
                    RevokeOutcome::Failed(FailureKind::Store)
                }
            };
            revoked.push(Revoked {
                record: record.clone(),
                outcome,
            });
        }
        revoked
    }

    /// Resolve, grant, await `work`, revoke.
    ///
    /// Errors only come from resolution or granting, both of which happen
    /// before `work` starts. Once `work` has run its output is always
    /// returned; revoke problems are reported in [`BracketRun::revoked`].
    /// If `work` panics, the grants are revoked before the panic resumes.
    pub async fn run<F, T>(&self, resolver: &dyn AddressResolver, work: F) -> Result<BracketRun<T>, AccessError>
    where
        F: Future<Output = T>,
    {
        let address = resolver
            .resolve()
            .await
            .map_err(|e| AccessError::Resolver(e.to_string()))?;
        info!(event = "Bracket", phase = "Resolved", address = %address);

        let granted = self.grant(&address).await?;
        info!(event = "Bracket", phase = "Granted", grants = granted.len());

        let output = AssertUnwindSafe(work).catch_unwind().await;

        let records: Vec<GrantRecord> = granted.iter().map(|g| g.record.clone()).collect();
        let revoked = self.revoke(&records).await;
        info!(
            event = "Bracket",
            phase = "Revoked",
            revokes = revoked.len(),
            failed = revoked.iter().filter(|r| r.outcome.is_failed()).count()
        );

        let output = match output {
            Ok(output) => output,
            Err(payload) => {
                warn!(event = "Bracket", phase = "WorkPanicked", address = %address);
                resume_unwind(payload)
            }
        };

        Ok(BracketRun {
            address,
            granted,
            output,
            revoked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::{InMemoryAllowList, InMemoryRuleStore};
    use crate::tests::fakes::{FixedResolver, ScriptedRuleStore, fake_allow_list_ref};
    use crate::types::Outcome;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn allow_list_store() -> InMemoryAllowList {
        InMemoryAllowList::new().with_entries(fake_allow_list_ref().id(), vec!["10.0.0.0/8".to_string()])
    }

    fn resolver() -> FixedResolver {
        FixedResolver(Ok("203.0.113.5".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_grants_then_revokes() {
        let lists = allow_list_store();
        let rules = InMemoryRuleStore::new();
        let bracket = AccessBracket::new(AccessConfig::default())
            .allow_list_store(Arc::new(lists.clone()))
            .rule_store(Arc::new(rules.clone()))
            .allow_list(fake_allow_list_ref())
            .ingress_rule("sg-0abc", "ci job 42");

        let run = bracket
            .run(&resolver(), async {
                assert!(lists.entries(fake_allow_list_ref().id()).contains(&"203.0.113.5/32".to_string()));
                assert_eq!(rules.rules().len(), 1);
                "done"
            })
            .await
            .unwrap();

        assert_eq!(run.output, "done");
        assert_eq!(run.address, "203.0.113.5");
        assert_eq!(run.granted.len(), 2);
        assert!(run.granted.iter().all(|g| g.outcome == Outcome::Applied));
        assert_eq!(run.revoked.len(), 2);
        assert!(run.revoked.iter().all(|r| r.outcome == RevokeOutcome::Applied));
        assert!(!run.has_dangling_access());
        assert_eq!(lists.entries(fake_allow_list_ref().id()), vec!["10.0.0.0/8".to_string()]);
        assert!(rules.rules().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_work_is_still_revoked() {
        let lists = allow_list_store();
        let rules = InMemoryRuleStore::new();
        let bracket = AccessBracket::new(AccessConfig::default())
            .allow_list_store(Arc::new(lists.clone()))
            .rule_store(Arc::new(rules.clone()))
            .allow_list(fake_allow_list_ref())
            .ingress_rule("sg-0abc", "ci");

        let result = AssertUnwindSafe(bracket.run::<_, ()>(&resolver(), async { panic!("job crashed") }))
            .catch_unwind()
            .await;

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"job crashed"));
        assert_eq!(lists.entries(fake_allow_list_ref().id()), vec!["10.0.0.0/8".to_string()]);
        assert!(rules.rules().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolver_failure_grants_nothing() {
        let lists = allow_list_store();
        let bracket = AccessBracket::new(AccessConfig::default())
            .allow_list_store(Arc::new(lists.clone()))
            .allow_list(fake_allow_list_ref());
        let ran = AtomicBool::new(false);

        let err = bracket
            .run(&FixedResolver(Err(StoreError::other("lookup timed out"))), async {
                ran.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AccessError::Resolver(_)));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(lists.entries(fake_allow_list_ref().id()), vec!["10.0.0.0/8".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_grant_rolls_back_and_skips_work() {
        let lists = allow_list_store();
        let rules = Arc::new(
            ScriptedRuleStore::new().with_creates(vec![Err(StoreError::other("forbidden")); 5]),
        );
        let bracket = AccessBracket::new(AccessConfig::default())
            .allow_list_store(Arc::new(lists.clone()))
            .rule_store(rules.clone())
            .allow_list(fake_allow_list_ref())
            .ingress_rule("sg-0abc", "ci");
        let ran = AtomicBool::new(false);

        let err = bracket
            .run(&resolver(), async {
                ran.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AccessError::RetriesExhausted { attempts: 5, .. }));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(lists.entries(fake_allow_list_ref().id()), vec!["10.0.0.0/8".to_string()]);
        assert_eq!(rules.create_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_failure_does_not_mask_output() {
        let rules = Arc::new(
            ScriptedRuleStore::new().with_deletes(vec![Err(StoreError::other("throttled")); 5]),
        );
        let bracket = AccessBracket::new(AccessConfig::default())
            .rule_store(rules.clone())
            .ingress_rule("sg-0abc", "ci");

        let run = bracket
            .run(&resolver(), async { Err::<(), _>("job failed") })
            .await
            .unwrap();

        assert_eq!(run.output, Err("job failed"));
        assert_eq!(
            run.revoked[0].outcome,
            RevokeOutcome::Failed(FailureKind::RetriesExhausted)
        );
        assert!(run.has_dangling_access());
    }

    #[tokio::test]
    async fn test_missing_store_is_rejected() {
        let bracket = AccessBracket::new(AccessConfig::default()).ingress_rule("sg-0abc", "ci");
        let err = bracket.grant("203.0.113.5").await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidConfig(_)));

        let bracket = AccessBracket::new(AccessConfig::default());
        let err = bracket.grant("203.0.113.5").await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_revoke_without_matching_store_is_contained() {
        let bracket = AccessBracket::new(AccessConfig::default());
        let record = GrantRecord::AllowList {
            resource: fake_allow_list_ref(),
            entry: "203.0.113.5".parse().unwrap(),
        };
        let revoked = bracket.revoke(&[record]).await;
        assert_eq!(revoked[0].outcome, RevokeOutcome::Failed(FailureKind::Store));
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_runs_in_reverse_order() {
        let lists = InMemoryAllowList::new()
            .with_entries("ipset-a", vec![])
            .with_entries("ipset-b", vec![]);
        let first = AllowListRef::new("ipset-a", "a", "build", "eu-west-1");
        let second = AllowListRef::new("ipset-b", "b", "build", "eu-west-1");
        let bracket = AccessBracket::new(AccessConfig::default())
            .allow_list_store(Arc::new(lists))
            .allow_list(first.clone())
            .allow_list(second.clone());

        let run = bracket.run(&resolver(), async {}).await.unwrap();

        let order: Vec<&str> = run
            .revoked
            .iter()
            .map(|r| match &r.record {
                GrantRecord::AllowList { resource, .. } => resource.id(),
                GrantRecord::IngressRule { rule } => rule.resource_id.as_str(),
            })
            .collect();
        assert_eq!(order, vec!["ipset-b", "ipset-a"]);
    }
}
