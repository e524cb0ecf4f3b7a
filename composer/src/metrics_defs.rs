use shared::metrics_defs::{MetricDef, MetricType};

pub const COMPOSER_MERGE: MetricDef = MetricDef {
    name: "composer.merge",
    metric_type: MetricType::Counter,
    description: "Number of fragments merged into a composed configuration",
};

pub const COMPOSER_REVOKE: MetricDef = MetricDef {
    name: "composer.revoke",
    metric_type: MetricType::Counter,
    description: "Number of fragment layers revoked",
};

pub const COMPOSER_TENANTS: MetricDef = MetricDef {
    name: "composer.tenants",
    metric_type: MetricType::Gauge,
    description: "Number of tenants with a composed configuration",
};

pub const SYNC_SKIPPED: MetricDef = MetricDef {
    name: "sync.skipped",
    metric_type: MetricType::Counter,
    description: "Resource events ignored because the resource maps to no fragment. Tagged with kind.",
};

pub const SYNC_SUPPRESSED: MetricDef = MetricDef {
    name: "sync.suppressed",
    metric_type: MetricType::Counter,
    description: "Update events dropped because the mapped fragment did not change. Tagged with kind.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    COMPOSER_MERGE,
    COMPOSER_REVOKE,
    COMPOSER_TENANTS,
    SYNC_SKIPPED,
    SYNC_SUPPRESSED,
];
