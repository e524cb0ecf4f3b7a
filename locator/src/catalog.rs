use crate::instance::ServiceInstance;
use crate::metrics_defs::CATALOG_INSTANCES;
use composer::{DeploymentId, TenantId};
use shared::gauge;
use std::sync::Arc;
use store::{Index, MultiIndexStore, StoreError};
use tokio::sync::mpsc;

/// Discovery feed events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Add(ServiceInstance),
    Remove(String),
}

/// Backend instances indexed by tenant and by deployment.
#[derive(Clone)]
pub struct ServiceCatalog {
    instances: MultiIndexStore<String, ServiceInstance>,
    by_tenant: Index<TenantId, String, ServiceInstance>,
    by_deployment: Index<DeploymentId, String, ServiceInstance>,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceCatalog {
    pub fn new() -> Self {
        let instances = MultiIndexStore::new(|instance: &ServiceInstance| {
            let id = instance.instance_id.trim();
            (!id.is_empty()).then(|| instance.instance_id.clone())
        });
        let by_tenant = instances
            .create_multi_index(|instance: &ServiceInstance| [instance.tenant_id.clone()]);
        let by_deployment = instances
            .create_index(|instance: &ServiceInstance| Some(instance.deployment_id.clone()));

        ServiceCatalog {
            instances,
            by_tenant,
            by_deployment,
        }
    }

    /// Adds `instance`, replacing any instance with the same id. Returns the
    /// replaced instance.
    pub fn add(&self, instance: ServiceInstance) -> Result<Option<Arc<ServiceInstance>>, StoreError> {
        tracing::debug!(
            instance = %instance.instance_id,
            tenant = %instance.tenant_id,
            deployment = %instance.deployment_id,
            "adding service instance"
        );
        let previous = self.instances.add(instance)?;
        self.record_size();
        Ok(previous)
    }

    pub fn remove(&self, instance_id: &str) -> Option<Arc<ServiceInstance>> {
        let removed = self.instances.remove(instance_id);
        if removed.is_some() {
            tracing::debug!(instance = instance_id, "removed service instance");
            self.record_size();
        }
        removed
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<ServiceInstance>> {
        self.instances.get(instance_id)
    }

    /// Instances of `tenant_id` in the order they were added.
    pub fn find_by_tenant(&self, tenant_id: &str) -> Vec<Arc<ServiceInstance>> {
        self.by_tenant.lookup(tenant_id)
    }

    /// First registered instance of `deployment_id`.
    pub fn find_by_deployment(&self, deployment_id: &str) -> Option<Arc<ServiceInstance>> {
        self.by_deployment.lookup(deployment_id).into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn apply(&self, event: DiscoveryEvent) -> Result<(), StoreError> {
        match event {
            DiscoveryEvent::Add(instance) => {
                self.add(instance)?;
            }
            DiscoveryEvent::Remove(instance_id) => {
                self.remove(&instance_id);
            }
        }
        Ok(())
    }

    /// Applies discovery events until the sending side is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<DiscoveryEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(error) = self.apply(event) {
                tracing::error!(%error, "failed to apply discovery event");
            }
        }
        tracing::debug!("discovery feed closed");
    }

    fn record_size(&self) {
        gauge!(CATALOG_INSTANCES).set(self.instances.len() as f64);
    }
}
