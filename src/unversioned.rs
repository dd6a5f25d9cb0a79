//! Create/delete of a single ingress rule on a resource without version tokens.
//!
//! The store itself reports "already exists" and "not found", which are the
//! desired end states and end the operation successfully. Everything else is
//! retried on a fixed, unjittered schedule.

use tracing::{info, warn};

use crate::config::RuleTemplate;
use crate::error::{AccessError, StoreError};
#[cfg(feature = "observability")]
use crate::metrics::{self, MutationPath, Operation};
use crate::retry::RetryPolicy;
use crate::traits::RuleStore;
use crate::types::{CidrEntry, FailureKind, GrantRecord, Granted, IngressRule, Outcome, RevokeOutcome};
use crate::versioned::Change;

/// Adds and removes one ingress rule for the managed entry.
pub struct UnversionedRuleMutator<S> {
    store: S,
    policy: RetryPolicy,
    template: RuleTemplate,
}

impl<S: RuleStore> UnversionedRuleMutator<S> {
    /// A mutator creating TCP/22 rules, retrying 5 times at `1s * 2^k`.
    pub fn new(store: S) -> Self {
        Self::with_config(store, RetryPolicy::unversioned(), RuleTemplate::default())
    }

    pub fn with_config(store: S, policy: RetryPolicy, template: RuleTemplate) -> Self {
        Self {
            store,
            policy,
            template,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The exact rule a grant for `address` would create.
    ///
    /// An empty `description` falls back to the template's.
    pub fn rule_for(
        &self,
        resource_id: &str,
        address: &str,
        description: &str,
    ) -> Result<IngressRule, AccessError> {
        let source: CidrEntry = address.parse()?;
        let description = if description.is_empty() {
            self.template.description.clone()
        } else {
            description.to_string()
        };
        Ok(IngressRule {
            resource_id: resource_id.to_string(),
            protocol: self.template.protocol,
            from_port: self.template.from_port,
            to_port: self.template.to_port,
            source,
            description,
        })
    }

    pub async fn grant(
        &self,
        resource_id: &str,
        address: &str,
        description: &str,
    ) -> Result<Granted, AccessError> {
        let rule = self.rule_for(resource_id, address, description)?;

        #[cfg(feature = "observability")]
        let started = std::time::Instant::now();
        let mut attempts = 0;
        let result = self.run(&rule, Change::Add, &mut attempts).await;

        #[cfg(feature = "observability")]
        metrics::record_mutation(
            MutationPath::Unversioned,
            Operation::Grant,
            match &result {
                Ok(outcome) => outcome.to_string(),
                Err(err) => format!("failed({})", FailureKind::from(err)),
            },
            attempts,
            started.elapsed(),
        );

        let outcome = result?;
        Ok(Granted {
            outcome,
            record: GrantRecord::IngressRule { rule },
        })
    }

    /// Remove the rule a grant with the same arguments would have created.
    pub async fn revoke(&self, resource_id: &str, address: &str, description: &str) -> RevokeOutcome {
        match self.rule_for(resource_id, address, description) {
            Ok(rule) => self.revoke_rule(&rule).await,
            Err(err) => {
                warn!(event = "Revoke", phase = "Abandoned", resource = resource_id, error = %err);
                RevokeOutcome::Failed(FailureKind::from(&err))
            }
        }
    }

    /// Remove exactly `rule`, typically taken from a [`GrantRecord`].
    ///
    /// Never fails; exhausting the retries is logged and reported as
    /// [`RevokeOutcome::Failed`].
    pub async fn revoke_rule(&self, rule: &IngressRule) -> RevokeOutcome {
        #[cfg(feature = "observability")]
        let started = std::time::Instant::now();
        let mut attempts = 0;
        let outcome = match self.run(rule, Change::Remove, &mut attempts).await {
            Ok(outcome) => outcome.into(),
            Err(err) => {
                warn!(
                    event = "Revoke",
                    phase = "Abandoned",
                    rule = %rule,
                    attempts,
                    error = %err,
                    "ingress rule left in place"
                );
                RevokeOutcome::Failed(FailureKind::from(&err))
            }
        };

        #[cfg(feature = "observability")]
        metrics::record_mutation(
            MutationPath::Unversioned,
            Operation::Revoke,
            outcome.to_string(),
            attempts,
            started.elapsed(),
        );

        outcome
    }

    async fn run(
        &self,
        rule: &IngressRule,
        change: Change,
        attempts: &mut u32,
    ) -> Result<Outcome, AccessError> {
        let mut last = String::new();

        for attempt in 0..self.policy.max_attempts {
            *attempts = attempt + 1;

            let result = match change {
                Change::Add => self.store.create_rule(rule).await,
                Change::Remove => self.store.delete_rule(rule).await,
            };

            match result {
                Ok(()) => {
                    info!(event = change.as_str(), phase = "Applied", rule = %rule, attempt = *attempts);
                    return Ok(Outcome::Applied);
                }
                Err(StoreError::Duplicate) if change == Change::Add => {
                    info!(event = change.as_str(), phase = "AlreadySatisfied", rule = %rule);
                    return Ok(Outcome::AlreadySatisfied);
                }
                Err(StoreError::NotFound) if change == Change::Remove => {
                    info!(event = change.as_str(), phase = "AlreadySatisfied", rule = %rule);
                    return Ok(Outcome::AlreadySatisfied);
                }
                Err(err) => {
                    warn!(
                        event = change.as_str(),
                        phase = "Failed",
                        rule = %rule,
                        attempt = *attempts,
                        max_attempts = self.policy.max_attempts,
                        error = %err
                    );
                    last = err.to_string();
                    if self.policy.has_attempt_after(attempt) {
                        #[cfg(feature = "observability")]
                        metrics::record_retry(
                            MutationPath::Unversioned,
                            change.operation(),
                            attempt,
                            last.clone(),
                        );
                        self.policy.backoff(attempt).await;
                    }
                }
            }
        }

        Err(AccessError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last,
        })
    }
}
