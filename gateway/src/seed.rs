//! Static feed file replayed into the gateway's feeds at startup.
//!
//! ```yaml
//! resources:
//!   - kind: config_map
//!     uid: 0b6c
//!     labels: {gateway.io/tenant: acme, gateway.io/kind: gateway-config}
//!     data: {routing-domains: "acme.example"}
//! domains:
//!   - {tenant_id: globex, domains: [globex.example]}
//! instances:
//!   - {instance_id: i-1, tenant_id: acme, deployment_id: acme-blue, host: 10.0.0.7, port: 8080}
//! ```

use composer::sync::{Resource, ResourceEvent, ResourceKind};
use locator::{DiscoveryEvent, DomainEvent, DomainRegistration, ServiceInstance};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tokio::sync::mpsc;

#[derive(thiserror::Error, Debug)]
pub enum SeedError {
    #[error("could not load seed from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse seed: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("{0} feed closed while replaying seed")]
    FeedClosed(&'static str),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SeedResource {
    pub kind: ResourceKind,
    #[serde(flatten)]
    pub resource: Resource,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Seed {
    pub resources: Vec<SeedResource>,
    pub domains: Vec<DomainRegistration>,
    pub instances: Vec<ServiceInstance>,
}

/// Sending halves of every feed the gateway consumes.
#[derive(Clone)]
pub struct FeedSenders {
    pub resources: HashMap<ResourceKind, mpsc::Sender<ResourceEvent>>,
    pub domains: mpsc::Sender<DomainEvent>,
    pub discovery: mpsc::Sender<DiscoveryEvent>,
}

impl Seed {
    pub fn from_file(path: &Path) -> Result<Self, SeedError> {
        let file = File::open(path)?;
        let seed = serde_yaml::from_reader(file)?;

        Ok(seed)
    }

    /// Sends every seeded item as an add event. Returns once everything is
    /// queued; consumers apply the events asynchronously.
    pub async fn replay(&self, senders: &FeedSenders) -> Result<(), SeedError> {
        let Seed {
            resources,
            domains,
            instances,
        } = self;
        tracing::info!(
            resources = resources.len(),
            domains = domains.len(),
            instances = instances.len(),
            "replaying seed"
        );

        for SeedResource { kind, resource } in resources {
            let Some(tx) = senders.resources.get(kind) else {
                tracing::warn!(%kind, uid = %resource.uid, "no watch for seeded resource kind");
                continue;
            };
            tx.send(ResourceEvent::Added(resource.clone()))
                .await
                .map_err(|_| SeedError::FeedClosed(kind.as_str()))?;
        }

        for registration in domains {
            senders
                .domains
                .send(DomainEvent::Put(registration.clone()))
                .await
                .map_err(|_| SeedError::FeedClosed("domain"))?;
        }

        for instance in instances {
            senders
                .discovery
                .send(DiscoveryEvent::Add(instance.clone()))
                .await
                .map_err(|_| SeedError::FeedClosed("discovery"))?;
        }

        Ok(())
    }
}
