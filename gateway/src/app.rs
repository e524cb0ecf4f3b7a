use crate::config::Config;
use crate::seed::{FeedSenders, Seed, SeedError};
use composer::sync::{FragmentMapper, ResourceKind, ResourceSyncAdapter};
use composer::{ConfigFragmentComposer, keys};
use locator::{
    DomainBridge, DomainOrigin, DomainRegistration, DomainResolver, RequestRouter, ServiceCatalog,
};
use shared::admin_service::{AdminService, Inspect};
use shared::http::run_http_service;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

// Buffered events per inbound feed channel.
const FEED_CHANNEL_SIZE: usize = 256;
const SEED_POLL_INTERVAL: Duration = Duration::from_millis(5);
const SEED_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error("seed was not applied within {0:?}")]
    SeedTimeout(Duration),
    #[error("admin listener failed: {0}")]
    Admin(#[from] std::io::Error),
}

/// Routing state exposed on the admin listener.
pub struct RoutingState {
    router: RequestRouter,
    ready: AtomicBool,
}

impl RoutingState {
    pub fn new(router: RequestRouter) -> Self {
        RoutingState {
            router,
            ready: AtomicBool::new(false),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }
}

impl Inspect for RoutingState {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn route(&self, host: &str) -> Result<serde_json::Value, String> {
        let instance = self.router.route(host).map_err(|e| e.to_string())?;
        let mut decision = serde_json::to_value(instance.as_ref()).map_err(|e| e.to_string())?;
        if let Some(fields) = decision.as_object_mut() {
            fields.insert("url".into(), instance.url().into());
        }
        Ok(decision)
    }
}

/// Every component of a running gateway, wired together.
pub struct Gateway {
    pub composer: ConfigFragmentComposer,
    pub adapter: ResourceSyncAdapter,
    pub state: Arc<RoutingState>,
    pub senders: FeedSenders,
    mapper: FragmentMapper,
}

impl Gateway {
    /// Builds the components and spawns their feed workers. Must be called
    /// from within a tokio runtime.
    pub fn start(config: &Config) -> Self {
        let composer = ConfigFragmentComposer::new(config.feed_capacity);
        let adapter = ResourceSyncAdapter::new(composer.clone(), config.labels.clone());

        let mut resources = HashMap::new();
        for kind in ResourceKind::ALL {
            let (tx, rx) = mpsc::channel(FEED_CHANNEL_SIZE);
            adapter.watch(kind, rx);
            resources.insert(kind, tx);
        }

        // The ownership feed and the configuration bridge each get their own
        // channel so their registrations stay apart in the resolver.
        let resolver = DomainResolver::new();
        let (domains, domain_rx) = mpsc::channel(FEED_CHANNEL_SIZE);
        tokio::spawn(resolver.clone().run(DomainOrigin::Feed, domain_rx));
        let (bridged, bridged_rx) = mpsc::channel(FEED_CHANNEL_SIZE);
        tokio::spawn(resolver.clone().run(DomainOrigin::Configuration, bridged_rx));
        tokio::spawn(DomainBridge::new(composer.clone(), bridged).run());

        let catalog = ServiceCatalog::new();
        let (discovery, discovery_rx) = mpsc::channel(FEED_CHANNEL_SIZE);
        tokio::spawn(catalog.clone().run(discovery_rx));

        Gateway {
            composer,
            adapter,
            state: Arc::new(RoutingState::new(RequestRouter::new(resolver, catalog))),
            senders: FeedSenders {
                resources,
                domains,
                discovery,
            },
            mapper: FragmentMapper::new(config.labels.clone()),
        }
    }

    /// Whether every item of `seed` is visible in the routing state,
    /// including the domains the bridge derives from seeded resources. Only
    /// the last occurrence of a repeated item counts.
    pub fn seed_applied(&self, seed: &Seed) -> bool {
        let router = &self.state.router;

        let instances = last_by(&seed.instances, |i| i.instance_id.as_str())
            .into_iter()
            .all(|instance| {
                router
                    .catalog()
                    .get(&instance.instance_id)
                    .is_some_and(|stored| *stored == *instance)
            });
        let domains = last_by(&seed.domains, |r| r.tenant_id.as_str())
            .into_iter()
            .all(|registration| {
                let expected =
                    DomainRegistration::new(registration.tenant_id.clone(), &registration.domains);
                router
                    .resolver()
                    .registration(DomainOrigin::Feed, expected.tenant_id.as_str())
                    .is_some_and(|stored| stored.domains == expected.domains)
            });
        let resources = last_by(&seed.resources, |r| r.resource.uid.as_str())
            .into_iter()
            .filter(|seeded| self.senders.resources.contains_key(&seeded.kind))
            .filter_map(|seeded| self.mapper.map(seeded.kind, &seeded.resource))
            .all(|fragment| {
                self.composer
                    .get_configuration(fragment.tenant_id.as_str())
                    .is_some_and(|config| {
                        config.layer(&fragment.fragment_id) == Some(&fragment.properties)
                    })
            });
        // Bridged domains trail the composer.
        let bridged = self.composer.tenants().into_iter().all(|tenant_id| {
            let expected = self
                .composer
                .get_configuration(tenant_id.as_str())
                .map(|config| {
                    DomainRegistration::new(
                        tenant_id.clone(),
                        config.get_list(keys::ROUTING_DOMAINS),
                    )
                    .domains
                })
                .unwrap_or_default();
            let stored = router
                .resolver()
                .registration(DomainOrigin::Configuration, tenant_id.as_str())
                .map(|registration| registration.domains.clone())
                .unwrap_or_default();
            stored == expected
        });

        instances && domains && resources && bridged
    }

    /// Replays `seed` into the feeds and waits until its effects are visible.
    pub async fn load_seed(&self, seed: &Seed) -> Result<(), GatewayError> {
        seed.replay(&self.senders).await?;

        tokio::time::timeout(SEED_TIMEOUT, async {
            while !self.seed_applied(seed) {
                tokio::time::sleep(SEED_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| GatewayError::SeedTimeout(SEED_TIMEOUT))
    }

    /// Stops every watch and completes configuration subscribers.
    pub fn shutdown(&self) {
        self.adapter.close();
        self.composer.close();
    }
}

// Last occurrence of each key, in no particular order.
fn last_by<'a, T, F>(items: &'a [T], key: F) -> Vec<&'a T>
where
    F: Fn(&'a T) -> &'a str,
{
    let mut seen = HashSet::new();
    items
        .iter()
        .rev()
        .filter(|item| seen.insert(key(*item)))
        .collect()
}

pub async fn run(config: Config) -> Result<(), GatewayError> {
    let gateway = Gateway::start(&config);

    let admin_service = AdminService::<_, std::io::Error>::new(gateway.state.clone());
    let listener = config.admin_listener.clone();
    let mut admin = tokio::spawn(async move {
        run_http_service(&listener.host, listener.port, admin_service).await
    });

    if let Some(path) = &config.seed {
        tracing::info!(path = %path.display(), "loading seed");
        gateway.load_seed(&Seed::from_file(path)?).await?;
    }
    gateway.state.mark_ready();
    tracing::info!("gateway ready");

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
        joined = &mut admin => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(GatewayError::Admin(error)),
            Err(error) => Err(GatewayError::Admin(std::io::Error::other(error))),
        },
    };

    admin.abort();
    gateway.shutdown();
    result
}
