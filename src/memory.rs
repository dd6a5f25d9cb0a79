//! In-process stores with the same semantics as the cloud-backed ones.
//!
//! [`InMemoryAllowList`] bumps a version counter on every accepted write and
//! rejects writes carrying an older token, so it exercises the full
//! compare-and-swap path. [`InMemoryRuleStore`] reports duplicates and
//! missing rules exactly as a rule API would. Both are cheap to clone and
//! share state between clones.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use itertools::Itertools;

use crate::error::StoreError;
use crate::traits::{AllowListStore, RuleStore};
use crate::types::{AllowListRef, AllowListSnapshot, IngressRule, VersionToken};

#[derive(Debug, Default)]
struct VersionedList {
    entries: Vec<String>,
    version: u64,
}

impl VersionedList {
    fn token(&self) -> VersionToken {
        VersionToken::new(format!("v{}", self.version))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Versioned allow-lists keyed by resource id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAllowList {
    lists: Arc<Mutex<HashMap<String, VersionedList>>>,
}

impl InMemoryAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) the list for `resource_id` at version 0.
    pub fn with_entries(self, resource_id: impl Into<String>, entries: Vec<String>) -> Self {
        lock(&self.lists).insert(
            resource_id.into(),
            VersionedList {
                entries,
                version: 0,
            },
        );
        self
    }

    pub fn entries(&self, resource_id: &str) -> Vec<String> {
        lock(&self.lists)
            .get(resource_id)
            .map(|l| l.entries.clone())
            .unwrap_or_default()
    }

    pub fn version(&self, resource_id: &str) -> Option<VersionToken> {
        lock(&self.lists).get(resource_id).map(VersionedList::token)
    }

    /// Unconditionally replace the entries, as a writer outside this process would.
    pub fn overwrite(&self, resource_id: &str, entries: Vec<String>) -> Result<(), StoreError> {
        let mut lists = lock(&self.lists);
        let list = lists
            .get_mut(resource_id)
            .ok_or_else(|| not_found(resource_id))?;
        list.entries = entries;
        list.version += 1;
        Ok(())
    }
}

fn not_found(resource_id: &str) -> StoreError {
    StoreError::other(format!("allow-list {resource_id} does not exist"))
}

#[async_trait]
impl AllowListStore for InMemoryAllowList {
    async fn read(&self, resource: &AllowListRef) -> Result<AllowListSnapshot, StoreError> {
        let lists = lock(&self.lists);
        let list = lists
            .get(resource.id())
            .ok_or_else(|| not_found(resource.id()))?;
        Ok(AllowListSnapshot::new(list.entries.clone(), list.token()))
    }

    async fn conditional_write(
        &self,
        resource: &AllowListRef,
        entries: &[String],
        version: &VersionToken,
    ) -> Result<(), StoreError> {
        let mut lists = lock(&self.lists);
        let list = lists
            .get_mut(resource.id())
            .ok_or_else(|| not_found(resource.id()))?;
        if &list.token() != version {
            return Err(StoreError::StaleVersion);
        }
        list.entries = entries.to_vec();
        list.version += 1;
        Ok(())
    }
}

/// A flat set of ingress rules.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<Mutex<HashSet<IngressRule>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, rule: &IngressRule) -> bool {
        lock(&self.rules).contains(rule)
    }

    /// All rules, ordered by their display form.
    pub fn rules(&self) -> Vec<IngressRule> {
        lock(&self.rules)
            .iter()
            .cloned()
            .sorted_by_key(|r| r.to_string())
            .collect()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn create_rule(&self, rule: &IngressRule) -> Result<(), StoreError> {
        if lock(&self.rules).insert(rule.clone()) {
            Ok(())
        } else {
            Err(StoreError::Duplicate)
        }
    }

    async fn delete_rule(&self, rule: &IngressRule) -> Result<(), StoreError> {
        if lock(&self.rules).remove(rule) {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }
}
