use crate::catalog::ServiceCatalog;
use crate::instance::ServiceInstance;
use crate::metrics_defs::{ROUTE_MULTIPLE_CANDIDATES, ROUTE_UNRESOLVED};
use crate::resolver::{DomainResolver, ResolveError};
use composer::TenantId;
use shared::counter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error(transparent)]
    Unresolved(#[from] ResolveError),

    #[error("tenant {0} has no service instances")]
    NoInstances(TenantId),
}

impl RouteError {
    /// Short reason used as a metric tag.
    pub fn reason(&self) -> &'static str {
        match self {
            RouteError::Unresolved(ResolveError::NoMatch) => "no_match",
            RouteError::Unresolved(ResolveError::Collision { .. }) => "collision",
            RouteError::NoInstances(_) => "no_instances",
        }
    }
}

/// Produces one routing decision per request from the domain resolver and the
/// service catalog.
#[derive(Clone)]
pub struct RequestRouter {
    resolver: DomainResolver,
    catalog: ServiceCatalog,
}

impl RequestRouter {
    pub fn new(resolver: DomainResolver, catalog: ServiceCatalog) -> Self {
        RequestRouter { resolver, catalog }
    }

    pub fn resolver(&self) -> &DomainResolver {
        &self.resolver
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn route(&self, host: &str) -> Result<Arc<ServiceInstance>, RouteError> {
        let result = self.select(host);
        if let Err(error) = &result {
            tracing::debug!(host, %error, "request unresolved");
            counter!(ROUTE_UNRESOLVED, "reason" => error.reason()).increment(1);
        }
        result
    }

    fn select(&self, host: &str) -> Result<Arc<ServiceInstance>, RouteError> {
        let tenant_id = self.resolver.resolve(host)?;
        let mut candidates = self.catalog.find_by_tenant(tenant_id.as_str());

        if candidates.len() > 1 {
            tracing::debug!(
                tenant = %tenant_id,
                candidates = candidates.len(),
                "multiple instances available for tenant"
            );
            counter!(ROUTE_MULTIPLE_CANDIDATES).increment(1);
        }

        // Stable choice across routers observing the same catalog.
        candidates.sort_by(|a, b| {
            a.deployment_id
                .cmp(&b.deployment_id)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        candidates
            .into_iter()
            .next()
            .ok_or(RouteError::NoInstances(tenant_id))
    }
}
