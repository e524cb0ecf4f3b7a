use crate::sync::adapter::Syncer;
use crate::sync::resource::{ResourceEvent, ResourceKind};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WatchError {
    #[error("{0} watch stopped before it was closed")]
    Terminated(ResourceKind),
}

/// A running subscription to one kind of external resource.
pub trait Watch: Send {
    fn kind(&self) -> ResourceKind;

    /// Stops the watch. Closing an already closed watch is a no-op.
    fn close(&mut self) -> Result<(), WatchError>;
}

/// Watch that drains resource events from a channel on a tokio task.
pub struct ChannelWatch {
    kind: ResourceKind,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ChannelWatch {
    pub(crate) fn spawn(
        kind: ResourceKind,
        syncer: Syncer,
        mut rx: mpsc::Receiver<ResourceEvent>,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            if let Err(error) = syncer.handle(kind, event) {
                                tracing::error!(%kind, %error, "stopping watch");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(%kind, "watch stopped");
        });

        ChannelWatch {
            kind,
            shutdown: Some(shutdown),
            handle,
        }
    }
}

impl Watch for ChannelWatch {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn close(&mut self) -> Result<(), WatchError> {
        match self.shutdown.take() {
            None => Ok(()),
            Some(_) if self.handle.is_finished() => Err(WatchError::Terminated(self.kind)),
            Some(shutdown) => {
                // The task may exit between the check and the send; either way it is stopped.
                let _ = shutdown.send(());
                Ok(())
            }
        }
    }
}
