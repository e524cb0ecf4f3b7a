//! Request routing for the gateway: which tenant owns a hostname, and which
//! backend instance serves that tenant.

mod catalog;
mod domains;
mod instance;
pub mod metrics_defs;
mod resolver;
mod router;

pub use catalog::{DiscoveryEvent, ServiceCatalog};
pub use domains::DomainBridge;
pub use instance::ServiceInstance;
pub use resolver::{
    DomainEvent, DomainOrigin, DomainRegistration, DomainResolver, ResolveError, normalize_host,
};
pub use router::{RequestRouter, RouteError};
