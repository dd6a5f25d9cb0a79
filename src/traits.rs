use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{AllowListRef, AllowListSnapshot, IngressRule, VersionToken};

/// Client for a versioned allow-list store.
///
/// Implementations wrap whatever cloud API owns the resource. They are
/// constructed by the caller (credentials included) and injected into
/// [`VersionedSetMutator`](crate::VersionedSetMutator).
#[async_trait]
pub trait AllowListStore: Send + Sync {
    /// Fetch the current entries and the version token that goes with them.
    async fn read(&self, resource: &AllowListRef) -> Result<AllowListSnapshot, StoreError>;

    /// Replace the entries, but only if `version` is still current.
    ///
    /// A lost race must be reported as [`StoreError::StaleVersion`]; every
    /// other failure is treated as non-retryable.
    async fn conditional_write(
        &self,
        resource: &AllowListRef,
        entries: &[String],
        version: &VersionToken,
    ) -> Result<(), StoreError>;
}

/// Client for a store of individual ingress rules with no versioning.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Create the rule, or report [`StoreError::Duplicate`] if it already exists.
    async fn create_rule(&self, rule: &IngressRule) -> Result<(), StoreError>;

    /// Delete the rule, or report [`StoreError::NotFound`] if it is already gone.
    async fn delete_rule(&self, rule: &IngressRule) -> Result<(), StoreError>;
}

/// Looks up the caller's public address.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self) -> Result<String, StoreError>;
}

#[async_trait]
impl<T: AllowListStore + ?Sized> AllowListStore for Arc<T> {
    async fn read(&self, resource: &AllowListRef) -> Result<AllowListSnapshot, StoreError> {
        (**self).read(resource).await
    }

    async fn conditional_write(
        &self,
        resource: &AllowListRef,
        entries: &[String],
        version: &VersionToken,
    ) -> Result<(), StoreError> {
        (**self).conditional_write(resource, entries, version).await
    }
}

#[async_trait]
impl<T: RuleStore + ?Sized> RuleStore for Arc<T> {
    async fn create_rule(&self, rule: &IngressRule) -> Result<(), StoreError> {
        (**self).create_rule(rule).await
    }

    async fn delete_rule(&self, rule: &IngressRule) -> Result<(), StoreError> {
        (**self).delete_rule(rule).await
    }
}
