//! Metrics definitions for the locator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const DOMAIN_COLLISION: MetricDef = MetricDef {
    name: "domain.collision",
    metric_type: MetricType::Counter,
    description: "Lookups refused because the hostname is claimed by multiple tenants",
};

pub const DOMAIN_REGISTRATIONS: MetricDef = MetricDef {
    name: "domain.registrations",
    metric_type: MetricType::Gauge,
    description: "Number of tenants with a domain registration",
};

pub const ROUTE_UNRESOLVED: MetricDef = MetricDef {
    name: "route.unresolved",
    metric_type: MetricType::Counter,
    description: "Requests that could not be routed. Tagged with reason.",
};

pub const ROUTE_MULTIPLE_CANDIDATES: MetricDef = MetricDef {
    name: "route.multiple_candidates",
    metric_type: MetricType::Counter,
    description: "Requests routed while the tenant had more than one instance",
};

pub const CATALOG_INSTANCES: MetricDef = MetricDef {
    name: "catalog.instances",
    metric_type: MetricType::Gauge,
    description: "Number of service instances in the catalog",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DOMAIN_COLLISION,
    DOMAIN_REGISTRATIONS,
    ROUTE_UNRESOLVED,
    ROUTE_MULTIPLE_CANDIDATES,
    CATALOG_INSTANCES,
];
