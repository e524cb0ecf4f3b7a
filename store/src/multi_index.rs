use crate::StoreError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::Any;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

type IdentityFn<K, T> = dyn Fn(&T) -> Option<K> + Send + Sync;
type KeysFn<Q, T> = dyn Fn(&T) -> Vec<Q> + Send + Sync;

/// Type-erased secondary index, maintained under the store's write lock.
trait IndexTable<K, T>: Send + Sync {
    fn insert(&mut self, id: &K, item: &Arc<T>);
    fn remove(&mut self, id: &K, item: &T);
    fn clear(&mut self);
    fn as_any(&self) -> &dyn Any;
}

struct KeyedTable<Q, K, T> {
    keys_fn: Box<KeysFn<Q, T>>,
    // Buckets keep insertion order so lookups are stable between calls.
    buckets: HashMap<Q, IndexMap<K, Arc<T>>>,
}

impl<Q, K, T> IndexTable<K, T> for KeyedTable<Q, K, T>
where
    Q: Hash + Eq + Send + Sync + 'static,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn insert(&mut self, id: &K, item: &Arc<T>) {
        for key in (self.keys_fn)(item) {
            self.buckets
                .entry(key)
                .or_default()
                .insert(id.clone(), item.clone());
        }
    }

    fn remove(&mut self, id: &K, item: &T) {
        for key in (self.keys_fn)(item) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.shift_remove(id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Inner<K, T> {
    items: HashMap<K, Arc<T>>,
    indices: Vec<Box<dyn IndexTable<K, T>>>,
}

/// Identity-keyed store with secondary indices.
///
/// The primary map and every index live in one aggregate behind a single
/// `RwLock`: reads share the lock, while every mutation and index
/// creation hold it exclusively for the whole update.
pub struct MultiIndexStore<K, T> {
    inner: Arc<RwLock<Inner<K, T>>>,
    identity: Arc<IdentityFn<K, T>>,
}

impl<K, T> Clone for MultiIndexStore<K, T> {
    fn clone(&self) -> Self {
        MultiIndexStore {
            inner: self.inner.clone(),
            identity: self.identity.clone(),
        }
    }
}

impl<K, T> MultiIndexStore<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Creates an empty store. `identity` returns `None` for items that have
    /// no usable identity; such items are rejected by [`MultiIndexStore::add`].
    pub fn new<F>(identity: F) -> Self
    where
        F: Fn(&T) -> Option<K> + Send + Sync + 'static,
    {
        MultiIndexStore {
            inner: Arc::new(RwLock::new(Inner {
                items: HashMap::new(),
                indices: Vec::new(),
            })),
            identity: Arc::new(identity),
        }
    }

    /// Inserts `item`, replacing any item with the same identity. Returns the
    /// replaced item.
    pub fn add(&self, item: T) -> Result<Option<Arc<T>>, StoreError> {
        let id = (self.identity)(&item).ok_or(StoreError::MissingIdentity)?;
        let item = Arc::new(item);

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let previous = inner.items.insert(id.clone(), item.clone());
        for index in inner.indices.iter_mut() {
            if let Some(old) = &previous {
                index.remove(&id, old);
            }
            index.insert(&id, &item);
        }

        Ok(previous)
    }

    pub fn get<B>(&self, id: &B) -> Option<Arc<T>>
    where
        K: Borrow<B>,
        B: Hash + Eq + ?Sized,
    {
        self.inner.read().items.get(id).cloned()
    }

    /// Removes the item with the given identity. Removing an absent id is a
    /// no-op that returns `None`.
    pub fn remove<B>(&self, id: &B) -> Option<Arc<T>>
    where
        K: Borrow<B>,
        B: Hash + Eq + ?Sized,
    {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let (id, removed) = inner.items.remove_entry(id)?;
        for index in inner.indices.iter_mut() {
            index.remove(&id, &removed);
        }
        Some(removed)
    }

    /// Removes every item for which `keep` returns false, under one write
    /// lock. Returns the number of items removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let dropped: Vec<K> = inner
            .items
            .iter()
            .filter(|(_, item)| !keep(item))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &dropped {
            if let Some(removed) = inner.items.remove(id) {
                for index in inner.indices.iter_mut() {
                    index.remove(id, &removed);
                }
            }
        }
        dropped.len()
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write();
        guard.items.clear();
        for index in guard.indices.iter_mut() {
            index.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Point-in-time copy of every stored item, in no particular order.
    pub fn values(&self) -> Vec<Arc<T>> {
        self.inner.read().items.values().cloned().collect()
    }

    /// Creates a single-valued index: each item is filed under at most one key.
    pub fn create_index<Q, F>(&self, key_fn: F) -> Index<Q, K, T>
    where
        Q: Hash + Eq + Send + Sync + 'static,
        F: Fn(&T) -> Option<Q> + Send + Sync + 'static,
    {
        self.create_multi_index(move |item: &T| key_fn(item))
    }

    /// Creates a multi-valued index: each item is filed under every key
    /// returned by `keys_fn`. Existing items are indexed immediately while the
    /// write lock is held.
    pub fn create_multi_index<Q, I, F>(&self, keys_fn: F) -> Index<Q, K, T>
    where
        Q: Hash + Eq + Send + Sync + 'static,
        I: IntoIterator<Item = Q>,
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        let mut table = KeyedTable {
            keys_fn: Box::new(move |item: &T| keys_fn(item).into_iter().collect()),
            buckets: HashMap::new(),
        };

        let mut guard = self.inner.write();
        for (id, item) in guard.items.iter() {
            table.insert(id, item);
        }
        let slot = guard.indices.len();
        guard.indices.push(Box::new(table));

        Index {
            inner: self.inner.clone(),
            slot,
            _key: PhantomData,
        }
    }
}

/// Lookup handle for a secondary index of a [`MultiIndexStore`].
pub struct Index<Q, K, T> {
    inner: Arc<RwLock<Inner<K, T>>>,
    slot: usize,
    _key: PhantomData<fn(&Q)>,
}

impl<Q, K, T> Clone for Index<Q, K, T> {
    fn clone(&self) -> Self {
        Index {
            inner: self.inner.clone(),
            slot: self.slot,
            _key: PhantomData,
        }
    }
}

impl<Q, K, T> Index<Q, K, T>
where
    Q: Hash + Eq + Send + Sync + 'static,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Items filed under `key`, in the order they were indexed.
    pub fn lookup<B>(&self, key: &B) -> Vec<Arc<T>>
    where
        Q: Borrow<B>,
        B: Hash + Eq + ?Sized,
    {
        let guard = self.inner.read();
        guard
            .indices
            .get(self.slot)
            .and_then(|table| table.as_any().downcast_ref::<KeyedTable<Q, K, T>>())
            .and_then(|table| table.buckets.get(key))
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct keys currently present in the index.
    pub fn key_count(&self) -> usize {
        let guard = self.inner.read();
        guard
            .indices
            .get(self.slot)
            .and_then(|table| table.as_any().downcast_ref::<KeyedTable<Q, K, T>>())
            .map(|table| table.buckets.len())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Clone, Debug, PartialEq)]
    struct Item {
        id: String,
        group: Option<String>,
        tags: Vec<String>,
    }

    fn item(id: &str, group: Option<&str>, tags: &[&str]) -> Item {
        Item {
            id: id.into(),
            group: group.map(String::from),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn new_store() -> MultiIndexStore<String, Item> {
        MultiIndexStore::new(|item: &Item| (!item.id.trim().is_empty()).then(|| item.id.clone()))
    }

    fn ids(items: Vec<Arc<Item>>) -> HashSet<String> {
        items.iter().map(|i| i.id.clone()).collect()
    }

    fn expected_by_tag(store: &MultiIndexStore<String, Item>, tag: &str) -> HashSet<String> {
        store
            .values()
            .into_iter()
            .filter(|i| i.tags.iter().any(|t| t == tag))
            .map(|i| i.id.clone())
            .collect()
    }

    #[test]
    fn test_add_get_remove() {
        let store = new_store();
        assert!(store.is_empty());

        assert_eq!(store.add(item("a", None, &[])), Ok(None));
        assert_eq!(store.get("a").unwrap().id, "a");
        assert_eq!(store.len(), 1);

        // Replace keeps a single entry and returns the old value
        let previous = store.add(item("a", Some("g"), &[])).unwrap().unwrap();
        assert_eq!(previous.group, None);
        assert_eq!(store.len(), 1);

        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_missing_identity() {
        let store = new_store();
        assert_eq!(
            store.add(item("  ", None, &[])),
            Err(StoreError::MissingIdentity)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_single_index() {
        let store = new_store();
        let by_group = store.create_index(|item: &Item| item.group.clone());

        store.add(item("a", Some("g1"), &[])).unwrap();
        store.add(item("b", Some("g1"), &[])).unwrap();
        store.add(item("c", None, &[])).unwrap();

        assert_eq!(ids(by_group.lookup("g1")), HashSet::from(["a".into(), "b".into()]));
        assert!(by_group.lookup("g2").is_empty());

        // Moving an item between keys updates both buckets
        store.add(item("a", Some("g2"), &[])).unwrap();
        assert_eq!(ids(by_group.lookup("g1")), HashSet::from(["b".into()]));
        assert_eq!(ids(by_group.lookup("g2")), HashSet::from(["a".into()]));

        store.remove("b");
        assert!(by_group.lookup("g1").is_empty());
        assert_eq!(by_group.key_count(), 1);
    }

    #[test]
    fn test_lookup_order_is_insertion_order() {
        let store = new_store();
        let by_group = store.create_index(|item: &Item| item.group.clone());
        for id in ["c", "a", "b"] {
            store.add(item(id, Some("g"), &[])).unwrap();
        }

        let order: Vec<String> = by_group.lookup("g").iter().map(|i| i.id.clone()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_index_created_after_items() {
        let store = new_store();
        store.add(item("a", None, &["x", "y"])).unwrap();
        store.add(item("b", None, &["y"])).unwrap();

        let by_tag = store.create_multi_index(|item: &Item| item.tags.clone());
        assert_eq!(ids(by_tag.lookup("x")), HashSet::from(["a".into()]));
        assert_eq!(ids(by_tag.lookup("y")), HashSet::from(["a".into(), "b".into()]));
    }

    #[test]
    fn test_index_consistency_over_operation_sequence() {
        let store = new_store();
        let early = store.create_multi_index(|item: &Item| item.tags.clone());

        let tags = ["x", "y", "z"];
        let mut late = None;
        for step in 0..60usize {
            let id = format!("item{}", step % 7);
            match step % 5 {
                0 | 1 | 2 => {
                    let picked: Vec<&str> =
                        tags.iter().copied().filter(|_| step % 3 != 0).take(step % 4).collect();
                    store.add(item(&id, None, &picked)).unwrap();
                }
                3 => {
                    store.remove(id.as_str());
                }
                _ => {
                    if step == 29 {
                        store.clear();
                    }
                }
            }

            if step == 20 {
                late = Some(store.create_multi_index(|item: &Item| item.tags.clone()));
            }

            for tag in tags {
                let expected = expected_by_tag(&store, tag);
                assert_eq!(ids(early.lookup(tag)), expected, "early index, step {step}");
                if let Some(late) = &late {
                    assert_eq!(ids(late.lookup(tag)), expected, "late index, step {step}");
                }
            }
        }
    }

    #[test]
    fn test_duplicate_keys_from_one_item() {
        let store = new_store();
        let by_tag = store.create_multi_index(|item: &Item| item.tags.clone());

        store.add(item("a", None, &["x", "x"])).unwrap();
        assert_eq!(by_tag.lookup("x").len(), 1);

        store.remove("a");
        assert!(by_tag.lookup("x").is_empty());
        assert_eq!(by_tag.key_count(), 0);
    }

    #[test]
    fn test_clear() {
        let store = new_store();
        let by_tag = store.create_multi_index(|item: &Item| item.tags.clone());
        store.add(item("a", None, &["x"])).unwrap();
        store.clear();

        assert!(store.is_empty());
        assert!(by_tag.lookup("x").is_empty());

        // Indices keep working after a clear
        store.add(item("b", None, &["x"])).unwrap();
        assert_eq!(ids(by_tag.lookup("x")), HashSet::from(["b".into()]));
    }

    #[test]
    fn test_retain() {
        let store = new_store();
        let by_group = store.create_index(|item: &Item| item.group.clone());
        store.add(item("a", Some("keep"), &[])).unwrap();
        store.add(item("b", Some("drop"), &[])).unwrap();
        store.add(item("c", Some("drop"), &[])).unwrap();

        assert_eq!(store.retain(|item| item.group.as_deref() == Some("keep")), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("b").is_none());
        assert!(by_group.lookup("drop").is_empty());
        assert_eq!(ids(by_group.lookup("keep")), HashSet::from(["a".into()]));

        assert_eq!(store.retain(|_| true), 0);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = new_store();
        let by_tag = store.create_multi_index(|item: &Item| item.tags.clone());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..200 {
                        let id = format!("w{worker}-{}", n % 10);
                        let tag = if n % 2 == 0 { "even" } else { "odd" };
                        store.add(item(&id, None, &[tag])).unwrap();
                        if n % 3 == 0 {
                            store.remove(id.as_str());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for tag in ["even", "odd"] {
            assert_eq!(ids(by_tag.lookup(tag)), expected_by_tag(&store, tag));
        }
    }
}
