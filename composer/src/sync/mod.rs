//! Resource watch integration: turns add/update/delete events of external
//! resources into fragment merges and revokes.

mod adapter;
mod mapper;
mod resource;
mod watch;

pub use adapter::{ResourceSyncAdapter, SyncOutcome};
pub use mapper::{FragmentMapper, LabelSelector};
pub use resource::{Resource, ResourceEvent, ResourceKind};
pub use watch::{ChannelWatch, Watch, WatchError};
