use crate::metrics_defs::{DOMAIN_COLLISION, DOMAIN_REGISTRATIONS};
use composer::TenantId;
use serde::Deserialize;
use shared::{counter, gauge};
use std::collections::BTreeSet;
use std::sync::Arc;
use store::{Index, MultiIndexStore, StoreError};
use tokio::sync::mpsc;

/// Full set of hostnames claimed by one tenant.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DomainRegistration {
    pub tenant_id: TenantId,
    pub domains: BTreeSet<String>,
}

impl DomainRegistration {
    /// Builds a registration from raw hostnames. Hostnames are normalized and
    /// blank entries dropped.
    pub fn new<I, S>(tenant_id: TenantId, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DomainRegistration {
            tenant_id,
            domains: domains
                .into_iter()
                .filter_map(|domain| normalize_host(domain.as_ref()))
                .collect(),
        }
    }
}

/// Source of a registration. Each source owns its own registrations: an
/// event from one source never replaces or removes those of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainOrigin {
    /// The domain-ownership feed.
    Feed,
    /// `routing-domains` in composed tenant configuration.
    Configuration,
}

/// Domain-ownership feed events. Ordered per tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    /// Replaces the tenant's whole domain set.
    Put(DomainRegistration),
    Delete(TenantId),
    Clear,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no tenant registered for host")]
    NoMatch,

    #[error("host {host} is claimed by more than one tenant")]
    Collision { host: String, tenants: Vec<TenantId> },
}

/// Lowercases `host` and strips surrounding whitespace, a `:port` suffix and
/// a trailing dot. Returns `None` for blank input.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    let host = match host.strip_prefix('[') {
        // Bracketed IPv6 literal, possibly followed by a port
        Some(rest) => rest.split_once(']').map(|(addr, _)| addr).unwrap_or(rest),
        None => match host.rsplit_once(':') {
            Some((name, port))
                if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
            {
                name
            }
            _ => host,
        },
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

type ClaimKey = (DomainOrigin, TenantId);

// A registration as published by one source.
struct Claim {
    origin: DomainOrigin,
    registration: Arc<DomainRegistration>,
}

/// Maps hostnames to tenants.
///
/// Registrations are held in a [`MultiIndexStore`] keyed by source and
/// tenant, with a multi-valued index from each domain to the claims on it.
/// Two sources claiming a hostname for the same tenant agree; a hostname
/// claimed by more than one tenant never resolves.
#[derive(Clone)]
pub struct DomainResolver {
    claims: MultiIndexStore<ClaimKey, Claim>,
    by_domain: Index<String, ClaimKey, Claim>,
}

impl Default for DomainResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainResolver {
    pub fn new() -> Self {
        let claims = MultiIndexStore::new(|claim: &Claim| {
            Some((claim.origin, claim.registration.tenant_id.clone()))
        });
        let by_domain =
            claims.create_multi_index(|claim: &Claim| claim.registration.domains.clone());

        DomainResolver { claims, by_domain }
    }

    /// Tenant owning `host`. Fails closed: unknown and contested hostnames
    /// are both unresolved.
    pub fn resolve(&self, host: &str) -> Result<TenantId, ResolveError> {
        let host = normalize_host(host).ok_or(ResolveError::NoMatch)?;
        let mut tenants: Vec<TenantId> = self
            .by_domain
            .lookup(host.as_str())
            .iter()
            .map(|claim| claim.registration.tenant_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        match tenants.len() {
            0 => Err(ResolveError::NoMatch),
            1 => Ok(tenants.swap_remove(0)),
            _ => {
                tracing::warn!(%host, ?tenants, "domain claimed by multiple tenants, refusing to resolve");
                counter!(DOMAIN_COLLISION).increment(1);
                Err(ResolveError::Collision { host, tenants })
            }
        }
    }

    /// Applies a domain-ownership feed event.
    pub fn apply(&self, event: DomainEvent) -> Result<(), StoreError> {
        self.apply_from(DomainOrigin::Feed, event)
    }

    /// Applies an event on behalf of `origin`. `Delete` and `Clear` only
    /// touch registrations that `origin` published.
    pub fn apply_from(&self, origin: DomainOrigin, event: DomainEvent) -> Result<(), StoreError> {
        match event {
            DomainEvent::Put(registration) => {
                // Normalize here too so deserialized registrations match lookups.
                let registration =
                    DomainRegistration::new(registration.tenant_id, registration.domains);
                tracing::debug!(
                    ?origin,
                    tenant = %registration.tenant_id,
                    domains = ?registration.domains,
                    "registering domains"
                );
                self.claims.add(Claim {
                    origin,
                    registration: Arc::new(registration),
                })?;
            }
            DomainEvent::Delete(tenant_id) => {
                if self.claims.remove(&(origin, tenant_id.clone())).is_some() {
                    tracing::debug!(?origin, tenant = %tenant_id, "removed domain registration");
                }
            }
            DomainEvent::Clear => {
                let removed = self.claims.retain(|claim| claim.origin != origin);
                tracing::info!(?origin, removed, "cleared domain registrations");
            }
        }

        gauge!(DOMAIN_REGISTRATIONS).set(self.claims.len() as f64);
        Ok(())
    }

    /// Registration published by `origin` for `tenant_id`.
    pub fn registration(
        &self,
        origin: DomainOrigin,
        tenant_id: &str,
    ) -> Option<Arc<DomainRegistration>> {
        let key = (origin, TenantId::new(tenant_id)?);
        self.claims
            .get(&key)
            .map(|claim| claim.registration.clone())
    }

    /// Every hostname claimed for `tenant_id`, across sources.
    pub fn domains(&self, tenant_id: &str) -> BTreeSet<String> {
        [DomainOrigin::Feed, DomainOrigin::Configuration]
            .into_iter()
            .filter_map(|origin| self.registration(origin, tenant_id))
            .flat_map(|registration| registration.domains.clone())
            .collect()
    }

    /// Number of registrations across sources.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Applies events from `origin` until the sending side is dropped.
    pub async fn run(self, origin: DomainOrigin, mut rx: mpsc::Receiver<DomainEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(error) = self.apply_from(origin, event) {
                tracing::error!(%error, ?origin, "failed to apply domain event");
            }
        }
        tracing::debug!(?origin, "domain feed closed");
    }
}
