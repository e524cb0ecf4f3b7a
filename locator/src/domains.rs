//! Derives domain ownership from composed tenant configuration.
//!
//! A tenant's `routing-domains` property is the comma-separated list of
//! hostnames it claims. The bridge follows the composer's change feed and
//! turns every configuration change into the matching [`DomainEvent`]. Its
//! events are meant for [`crate::DomainOrigin::Configuration`], so they never
//! displace registrations from the domain-ownership feed.

use crate::resolver::{DomainEvent, DomainRegistration};
use composer::{
    ComposedConfiguration, ConfigFragmentComposer, ConfigurationEvent, TenantId, keys,
};
use std::collections::HashSet;
use std::sync::Arc;
use store::{ChangeEvent, FeedError, Subscription};
use tokio::sync::mpsc;

type ConfigurationSubscription = Subscription<TenantId, Arc<ComposedConfiguration>>;

pub struct DomainBridge {
    composer: ConfigFragmentComposer,
    subscription: ConfigurationSubscription,
    tx: mpsc::Sender<DomainEvent>,
    // Tenants for which a registration has been forwarded.
    published: HashSet<TenantId>,
}

impl DomainBridge {
    /// Subscribes to `composer` immediately; events are forwarded once
    /// [`DomainBridge::run`] is polled.
    pub fn new(composer: ConfigFragmentComposer, tx: mpsc::Sender<DomainEvent>) -> Self {
        let subscription = composer.observe();
        DomainBridge {
            composer,
            subscription,
            tx,
            published: HashSet::new(),
        }
    }

    /// Domain event equivalent to a configuration change. A tenant without
    /// routing domains owns no hostnames.
    pub fn translate(event: ConfigurationEvent) -> DomainEvent {
        match event {
            ChangeEvent::Put { key, value } => {
                let domains = value.get_list(keys::ROUTING_DOMAINS);
                if domains.is_empty() {
                    DomainEvent::Delete(key)
                } else {
                    DomainEvent::Put(DomainRegistration::new(key, domains))
                }
            }
            ChangeEvent::Remove { key, .. } => DomainEvent::Delete(key),
            ChangeEvent::Clear => DomainEvent::Clear,
        }
    }

    /// Forwards events until the composer closes or the receiving side is
    /// dropped. A lagged subscription is replaced by a fresh one and tenants
    /// that vanished in the gap are deleted.
    pub async fn run(mut self) {
        loop {
            match self.subscription.recv().await {
                Some(Ok(event)) => {
                    if !self.forward(Self::translate(event)).await {
                        break;
                    }
                }
                Some(Err(FeedError::Lagged { missed })) => {
                    tracing::warn!(missed, "configuration feed lagged, resubscribing");
                    if !self.resubscribe().await {
                        break;
                    }
                }
                Some(Err(error)) => {
                    tracing::error!(%error, "configuration feed failed");
                    break;
                }
                None => break,
            }
        }
        tracing::debug!("domain bridge stopped");
    }

    async fn resubscribe(&mut self) -> bool {
        self.subscription = self.composer.observe();

        let current: HashSet<TenantId> = self.composer.tenants().into_iter().collect();
        let stale: Vec<TenantId> = self.published.difference(&current).cloned().collect();
        for tenant_id in stale {
            if !self.forward(DomainEvent::Delete(tenant_id)).await {
                return false;
            }
        }
        true
    }

    async fn forward(&mut self, event: DomainEvent) -> bool {
        match &event {
            DomainEvent::Put(registration) => {
                self.published.insert(registration.tenant_id.clone());
            }
            DomainEvent::Delete(tenant_id) => {
                // Nothing to withdraw for a tenant that never had domains.
                if !self.published.remove(tenant_id) {
                    return true;
                }
            }
            DomainEvent::Clear => self.published.clear(),
        }

        if self.tx.send(event).await.is_err() {
            tracing::debug!("domain event receiver dropped");
            return false;
        }
        true
    }
}
