use crate::composer::ConfigFragmentComposer;
use crate::metrics_defs::{SYNC_SKIPPED, SYNC_SUPPRESSED};
use crate::sync::mapper::{FragmentMapper, LabelSelector};
use crate::sync::resource::{ResourceEvent, ResourceKind};
use crate::sync::watch::{ChannelWatch, Watch};
use parking_lot::Mutex;
use shared::counter;
use std::sync::Arc;
use store::FeedError;
use tokio::sync::mpsc;

/// What a single resource event did to the composer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Merged,
    Revoked,
    /// Update whose mapped fragment is unchanged (resync noise).
    Suppressed,
    /// Resource maps to no fragment, or a delete found nothing to revoke.
    Skipped,
}

/// Translates resource events into composer calls. Cheap to clone; every
/// watch task holds its own copy.
#[derive(Clone)]
pub(crate) struct Syncer {
    composer: ConfigFragmentComposer,
    mapper: Arc<FragmentMapper>,
}

impl Syncer {
    pub(crate) fn handle(
        &self,
        kind: ResourceKind,
        event: ResourceEvent,
    ) -> Result<SyncOutcome, FeedError> {
        match event {
            ResourceEvent::Added(resource) => match self.mapper.map(kind, &resource) {
                Some(fragment) => {
                    self.composer.merge(fragment)?;
                    Ok(SyncOutcome::Merged)
                }
                None => Ok(skipped(kind, &resource.uid)),
            },
            ResourceEvent::Updated { old, new } => {
                let previous = self.mapper.map(kind, &old);
                let current = self.mapper.map(kind, &new);

                match (previous, current) {
                    (None, None) => Ok(skipped(kind, &new.uid)),
                    (Some(previous), Some(current)) if previous == current => {
                        tracing::trace!(%kind, uid = %new.uid, "suppressing unchanged update");
                        counter!(SYNC_SUPPRESSED, "kind" => kind.as_str()).increment(1);
                        Ok(SyncOutcome::Suppressed)
                    }
                    (previous, Some(current)) => {
                        // A relabelled resource leaves its old tenant first.
                        if let Some(previous) = previous
                            && previous.tenant_id != current.tenant_id
                        {
                            self.composer.revoke_fragment(&previous)?;
                        }
                        self.composer.merge(current)?;
                        Ok(SyncOutcome::Merged)
                    }
                    (Some(previous), None) => {
                        tracing::info!(%kind, uid = %new.uid, "resource no longer qualifies, revoking");
                        self.composer.revoke_fragment(&previous)?;
                        Ok(SyncOutcome::Revoked)
                    }
                }
            }
            ResourceEvent::Deleted {
                resource,
                final_state_unknown,
            } => {
                if final_state_unknown {
                    tracing::debug!(%kind, uid = %resource.uid, "delete with unknown final state");
                }
                // Uncertain deletes revoke like any other. Only the labels are
                // needed, so an undecodable final payload still revokes.
                if let Some((tenant_id, fragment_id)) = self.mapper.identify(&resource)
                    && self.composer.revoke(&tenant_id, &fragment_id)?
                {
                    return Ok(SyncOutcome::Revoked);
                }

                // The final state may have lost its labels; revoke the layer
                // from whichever tenant still holds it.
                let owners = self.composer.owners(&resource.uid);
                if owners.is_empty() {
                    return Ok(skipped(kind, &resource.uid));
                }
                for tenant_id in &owners {
                    tracing::info!(%kind, uid = %resource.uid, tenant = %tenant_id, "revoking layer of unlabelled delete");
                    self.composer.revoke(tenant_id, &resource.uid)?;
                }
                Ok(SyncOutcome::Revoked)
            }
        }
    }
}

fn skipped(kind: ResourceKind, uid: &str) -> SyncOutcome {
    tracing::debug!(%kind, uid, "resource maps to no fragment, skipping");
    counter!(SYNC_SKIPPED, "kind" => kind.as_str()).increment(1);
    SyncOutcome::Skipped
}

/// Bridges resource watches into a [`ConfigFragmentComposer`].
///
/// Any number of watches may feed one adapter concurrently; their merges and
/// revokes interleave safely because the composer serialises updates per
/// call.
pub struct ResourceSyncAdapter {
    syncer: Syncer,
    watches: Mutex<Vec<Box<dyn Watch>>>,
}

impl ResourceSyncAdapter {
    pub fn new(composer: ConfigFragmentComposer, labels: LabelSelector) -> Self {
        ResourceSyncAdapter {
            syncer: Syncer {
                composer,
                mapper: Arc::new(FragmentMapper::new(labels)),
            },
            watches: Mutex::new(Vec::new()),
        }
    }

    /// Applies one event synchronously.
    pub fn handle(
        &self,
        kind: ResourceKind,
        event: ResourceEvent,
    ) -> Result<SyncOutcome, FeedError> {
        self.syncer.handle(kind, event)
    }

    /// Starts a watch that applies every event received on `rx`. Must be
    /// called from within a tokio runtime.
    pub fn watch(&self, kind: ResourceKind, rx: mpsc::Receiver<ResourceEvent>) {
        let watch = ChannelWatch::spawn(kind, self.syncer.clone(), rx);
        self.register(Box::new(watch));
    }

    /// Takes ownership of an externally driven watch so that
    /// [`ResourceSyncAdapter::close`] stops it.
    pub fn register(&self, watch: Box<dyn Watch>) {
        tracing::info!(kind = %watch.kind(), "watch registered");
        self.watches.lock().push(watch);
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().len()
    }

    /// Stops every watch. Failures are logged and do not prevent the
    /// remaining watches from being closed.
    pub fn close(&self) {
        let watches = std::mem::take(&mut *self.watches.lock());
        for mut watch in watches {
            let kind = watch.kind();
            match watch.close() {
                Ok(()) => tracing::debug!(%kind, "watch closed"),
                Err(error) => tracing::error!(%kind, %error, "failed to close watch"),
            }
        }
    }
}

impl Drop for ResourceSyncAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
