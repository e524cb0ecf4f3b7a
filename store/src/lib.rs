//! Concurrent in-memory state containers.
//!
//! - [`MultiIndexStore`] keeps a primary map and any number of secondary
//!   indices behind a single lock, so a reader never observes an index that
//!   disagrees with the primary map.
//! - [`ChangeFeed`] is a key/value map whose subscribers first receive a
//!   snapshot of the current entries and then every live change.

mod change_feed;
mod multi_index;

pub use change_feed::{ChangeEvent, ChangeFeed, Modification, Subscription};
pub use multi_index::{Index, MultiIndexStore};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("item has no identity")]
    MissingIdentity,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FeedError {
    #[error("change feed is closed")]
    Closed,

    #[error("subscriber fell behind and missed {missed} events")]
    Lagged { missed: u64 },
}
