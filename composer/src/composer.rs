use crate::configuration::{ComposedConfiguration, ConfigurationFragment};
use crate::metrics_defs::{COMPOSER_MERGE, COMPOSER_REVOKE, COMPOSER_TENANTS};
use crate::types::TenantId;
use shared::{counter, gauge};
use std::sync::Arc;
use store::{ChangeFeed, FeedError, Modification, Subscription};

pub type ConfigurationEvent = store::ChangeEvent<TenantId, Arc<ComposedConfiguration>>;

/// Composes each tenant's configuration from the fragments contributed by
/// its origin resources.
///
/// Every merge and revoke is one atomic update of the backing
/// [`ChangeFeed`], so readers and subscribers only ever see whole composed
/// configurations. A tenant whose last layer is revoked disappears entirely.
#[derive(Clone)]
pub struct ConfigFragmentComposer {
    feed: ChangeFeed<TenantId, Arc<ComposedConfiguration>>,
}

impl ConfigFragmentComposer {
    pub fn new(capacity: usize) -> Self {
        ConfigFragmentComposer {
            feed: ChangeFeed::new(capacity),
        }
    }

    /// Adds the fragment's layer to its tenant, replacing a previous layer
    /// with the same fragment id. Always publishes a `Put`.
    pub fn merge(&self, fragment: ConfigurationFragment) -> Result<(), FeedError> {
        let ConfigurationFragment {
            fragment_id,
            tenant_id,
            properties,
        } = fragment;

        tracing::debug!(tenant = %tenant_id, fragment_id = %fragment_id, "merging fragment");
        self.feed.modify(tenant_id, move |current| {
            let mut next = current.map(|c| (**c).clone()).unwrap_or_default();
            next.insert_layer(fragment_id, properties);
            Modification::Put(Arc::new(next))
        })?;

        counter!(COMPOSER_MERGE).increment(1);
        gauge!(COMPOSER_TENANTS).set(self.feed.len() as f64);
        Ok(())
    }

    /// Removes one layer from the tenant. Publishes a `Remove` when it was
    /// the last layer and a `Put` otherwise. Returns `false`, publishing
    /// nothing, when the tenant has no such layer.
    pub fn revoke(&self, tenant_id: &TenantId, fragment_id: &str) -> Result<bool, FeedError> {
        let revoked = self.feed.modify(tenant_id.clone(), |current| {
            let Some(current) = current else {
                return Modification::Keep;
            };

            let mut next = (**current).clone();
            if !next.remove_layer(fragment_id) {
                Modification::Keep
            } else if next.is_empty() {
                Modification::Remove
            } else {
                Modification::Put(Arc::new(next))
            }
        })?;

        if revoked {
            tracing::debug!(tenant = %tenant_id, fragment_id, "revoked fragment");
            counter!(COMPOSER_REVOKE).increment(1);
            gauge!(COMPOSER_TENANTS).set(self.feed.len() as f64);
        } else {
            tracing::debug!(tenant = %tenant_id, fragment_id, "no layer to revoke");
        }
        Ok(revoked)
    }

    pub fn revoke_fragment(&self, fragment: &ConfigurationFragment) -> Result<bool, FeedError> {
        self.revoke(&fragment.tenant_id, &fragment.fragment_id)
    }

    /// Composed configuration of `tenant_id`, or `None` when it has no
    /// layers. Never-seen and fully-revoked tenants look the same.
    pub fn get_configuration(&self, tenant_id: &str) -> Option<Arc<ComposedConfiguration>> {
        self.feed.get(tenant_id)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.feed.keys()
    }

    /// Tenants holding a layer named `fragment_id`.
    pub fn owners(&self, fragment_id: &str) -> Vec<TenantId> {
        self.feed
            .keys()
            .into_iter()
            .filter(|tenant_id| {
                self.feed
                    .get(tenant_id)
                    .is_some_and(|config| config.layer(fragment_id).is_some())
            })
            .collect()
    }

    /// Snapshot of every tenant's composed configuration followed by live
    /// changes, keyed by tenant id.
    pub fn observe(&self) -> Subscription<TenantId, Arc<ComposedConfiguration>> {
        self.feed.observe()
    }

    pub fn close(&self) {
        self.feed.close();
    }
}
