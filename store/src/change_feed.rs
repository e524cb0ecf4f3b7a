use crate::FeedError;
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent<K, V> {
    Put { key: K, value: V },
    Remove { key: K, value: V },
    Clear,
}

/// Result of the closure passed to [`ChangeFeed::modify`].
#[derive(Debug)]
pub enum Modification<V> {
    Keep,
    Put(V),
    Remove,
}

struct FeedState<K, V> {
    entries: HashMap<K, V>,
    // None once the feed has been closed.
    sender: Option<broadcast::Sender<ChangeEvent<K, V>>>,
}

/// Concurrent key/value map that publishes every change to its subscribers.
///
/// Writes apply to the map and publish the matching event while holding the
/// write lock. [`ChangeFeed::observe`] captures the snapshot and attaches to
/// the live channel under the read lock, so no write can fall between the
/// two. Publishing never waits for subscribers: each one has a buffer of
/// `capacity` events and a subscriber that overruns it gets
/// [`FeedError::Lagged`] instead of a silently shortened stream.
pub struct ChangeFeed<K, V> {
    state: Arc<RwLock<FeedState<K, V>>>,
}

impl<K, V> Clone for ChangeFeed<K, V> {
    fn clone(&self) -> Self {
        ChangeFeed {
            state: self.state.clone(),
        }
    }
}

impl<K, V> ChangeFeed<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ChangeFeed {
            state: Arc::new(RwLock::new(FeedState {
                entries: HashMap::new(),
                sender: Some(sender),
            })),
        }
    }

    pub fn get<B>(&self, key: &B) -> Option<V>
    where
        K: Borrow<B>,
        B: Hash + Eq + ?Sized,
    {
        self.state.read().entries.get(key).cloned()
    }

    pub fn contains_key<B>(&self, key: &B) -> bool
    where
        K: Borrow<B>,
        B: Hash + Eq + ?Sized,
    {
        self.state.read().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.state.read().entries.keys().cloned().collect()
    }

    /// Inserts `value` and publishes a `Put`. Returns the previous value.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>, FeedError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let sender = state.sender.as_ref().ok_or(FeedError::Closed)?;

        let previous = state.entries.insert(key.clone(), value.clone());
        publish(sender, ChangeEvent::Put { key, value });
        Ok(previous)
    }

    /// Removes `key` and publishes a `Remove`. Nothing is published when the
    /// key is absent.
    pub fn remove<B>(&self, key: &B) -> Result<Option<V>, FeedError>
    where
        K: Borrow<B>,
        B: Hash + Eq + ?Sized,
    {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let sender = state.sender.as_ref().ok_or(FeedError::Closed)?;

        let removed = state.entries.remove_entry(key);
        if let Some((key, value)) = &removed {
            publish(
                sender,
                ChangeEvent::Remove {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
        }
        Ok(removed.map(|(_, value)| value))
    }

    pub fn clear(&self) -> Result<(), FeedError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let sender = state.sender.as_ref().ok_or(FeedError::Closed)?;

        state.entries.clear();
        publish(sender, ChangeEvent::Clear);
        Ok(())
    }

    /// Atomic read-modify-write of a single entry. `f` runs under the write
    /// lock with the current value; its result decides what is stored and
    /// published. Returns whether anything changed.
    pub fn modify<F>(&self, key: K, f: F) -> Result<bool, FeedError>
    where
        F: FnOnce(Option<&V>) -> Modification<V>,
    {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let sender = state.sender.as_ref().ok_or(FeedError::Closed)?;

        match f(state.entries.get(&key)) {
            Modification::Keep => Ok(false),
            Modification::Put(value) => {
                state.entries.insert(key.clone(), value.clone());
                publish(sender, ChangeEvent::Put { key, value });
                Ok(true)
            }
            Modification::Remove => match state.entries.remove(&key) {
                Some(value) => {
                    publish(sender, ChangeEvent::Remove { key, value });
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// Subscribes to the feed. The subscription yields one `Put` per entry
    /// held right now, then every change applied afterwards.
    pub fn observe(&self) -> Subscription<K, V> {
        let state = self.state.read();
        let snapshot = state
            .entries
            .iter()
            .map(|(key, value)| ChangeEvent::Put {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        let receiver = state.sender.as_ref().map(|sender| sender.subscribe());

        Subscription { snapshot, receiver }
    }

    /// Completes every subscription and rejects further writes. Entries stay
    /// readable. Closing twice is a no-op.
    pub fn close(&self) {
        if self.state.write().sender.take().is_some() {
            tracing::debug!("change feed closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().sender.is_none()
    }
}

fn publish<K, V>(sender: &broadcast::Sender<ChangeEvent<K, V>>, event: ChangeEvent<K, V>) {
    // An error only means nobody is subscribed right now.
    let _ = sender.send(event);
}

/// Per-subscriber view of a [`ChangeFeed`]. Dropping it unsubscribes.
pub struct Subscription<K, V> {
    snapshot: VecDeque<ChangeEvent<K, V>>,
    receiver: Option<broadcast::Receiver<ChangeEvent<K, V>>>,
}

impl<K, V> Subscription<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Next event, or `None` once the feed is closed. A lagged subscriber
    /// receives a single `Err(FeedError::Lagged)` and then `None`.
    pub async fn recv(&mut self) -> Option<Result<ChangeEvent<K, V>, FeedError>> {
        if let Some(event) = self.snapshot.pop_front() {
            return Some(Ok(event));
        }

        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(RecvError::Closed) => {
                self.receiver = None;
                None
            }
            Err(RecvError::Lagged(missed)) => {
                self.receiver = None;
                Some(Err(FeedError::Lagged { missed }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Event = ChangeEvent<String, u32>;

    async fn next(sub: &mut Subscription<String, u32>) -> Option<Result<Event, FeedError>> {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for event")
    }

    fn put(key: &str, value: u32) -> Event {
        ChangeEvent::Put {
            key: key.into(),
            value,
        }
    }

    #[test]
    fn test_map_operations() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        assert!(feed.is_empty());
        assert_eq!(feed.put("a".into(), 1), Ok(None));
        assert_eq!(feed.put("a".into(), 2), Ok(Some(1)));
        assert_eq!(feed.get("a"), Some(2));
        assert!(feed.contains_key("a"));
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.remove("a"), Ok(Some(2)));
        assert_eq!(feed.remove("a"), Ok(None));
        assert!(feed.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_then_live() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        feed.put("k1".into(), 1).unwrap();
        feed.put("k2".into(), 2).unwrap();

        let mut sub = feed.observe();
        feed.put("k3".into(), 3).unwrap();
        feed.remove("k1").unwrap();

        let mut snapshot = vec![
            next(&mut sub).await.unwrap().unwrap(),
            next(&mut sub).await.unwrap().unwrap(),
        ];
        snapshot.sort_by_key(|event| match event {
            ChangeEvent::Put { key, .. } => key.clone(),
            _ => String::new(),
        });
        assert_eq!(snapshot, vec![put("k1", 1), put("k2", 2)]);

        assert_eq!(next(&mut sub).await, Some(Ok(put("k3", 3))));
        assert_eq!(
            next(&mut sub).await,
            Some(Ok(ChangeEvent::Remove {
                key: "k1".into(),
                value: 1
            }))
        );
    }

    #[tokio::test]
    async fn test_remove_absent_publishes_nothing() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        let mut sub = feed.observe();

        feed.remove("missing").unwrap();
        feed.clear().unwrap();

        assert_eq!(next(&mut sub).await, Some(Ok(ChangeEvent::Clear)));
    }

    #[tokio::test]
    async fn test_modify() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        let mut sub = feed.observe();

        let bump = |current: Option<&u32>| Modification::Put(current.copied().unwrap_or(0) + 1);
        assert_eq!(feed.modify("a".into(), bump), Ok(true));
        assert_eq!(feed.modify("a".into(), bump), Ok(true));
        assert_eq!(feed.modify("a".into(), |_| Modification::Keep), Ok(false));
        assert_eq!(feed.modify("b".into(), |_| Modification::Remove), Ok(false));
        assert_eq!(feed.modify("a".into(), |_| Modification::Remove), Ok(true));

        assert_eq!(next(&mut sub).await, Some(Ok(put("a", 1))));
        assert_eq!(next(&mut sub).await, Some(Ok(put("a", 2))));
        assert_eq!(
            next(&mut sub).await,
            Some(Ok(ChangeEvent::Remove {
                key: "a".into(),
                value: 2
            }))
        );
    }

    #[tokio::test]
    async fn test_independent_subscribers() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        let mut first = feed.observe();
        feed.put("a".into(), 1).unwrap();
        let mut second = feed.observe();
        feed.put("b".into(), 2).unwrap();

        assert_eq!(next(&mut first).await, Some(Ok(put("a", 1))));
        assert_eq!(next(&mut first).await, Some(Ok(put("b", 2))));

        // The late subscriber sees "a" from the snapshot, not from the live stream
        assert_eq!(next(&mut second).await, Some(Ok(put("a", 1))));
        assert_eq!(next(&mut second).await, Some(Ok(put("b", 2))));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_fails_loudly() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(2);
        let mut slow = feed.observe();

        for value in 0..5 {
            feed.put("a".into(), value).unwrap();
        }

        assert_eq!(next(&mut slow).await, Some(Err(FeedError::Lagged { missed: 3 })));
        assert_eq!(next(&mut slow).await, None);

        // Writers and new subscribers are unaffected
        feed.put("a".into(), 9).unwrap();
        let mut fresh = feed.observe();
        assert_eq!(next(&mut fresh).await, Some(Ok(put("a", 9))));
    }

    #[tokio::test]
    async fn test_close() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        feed.put("a".into(), 1).unwrap();
        let mut active = feed.observe();

        feed.close();
        feed.close();
        assert!(feed.is_closed());

        assert_eq!(feed.put("b".into(), 2), Err(FeedError::Closed));
        assert_eq!(feed.remove("a"), Err(FeedError::Closed));
        assert_eq!(feed.clear(), Err(FeedError::Closed));
        assert_eq!(feed.get("a"), Some(1));

        // The snapshot taken before closing is still delivered
        assert_eq!(next(&mut active).await, Some(Ok(put("a", 1))));
        assert_eq!(next(&mut active).await, None);

        let mut future = feed.observe();
        assert_eq!(next(&mut future).await, Some(Ok(put("a", 1))));
        assert_eq!(next(&mut future).await, None);
    }

    #[tokio::test]
    async fn test_dropping_subscription_does_not_affect_feed() {
        let feed: ChangeFeed<String, u32> = ChangeFeed::new(16);
        let sub = feed.observe();
        drop(sub);

        feed.put("a".into(), 1).unwrap();
        assert_eq!(feed.get("a"), Some(1));
    }
}
