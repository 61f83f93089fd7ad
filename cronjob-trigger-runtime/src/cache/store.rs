use super::{ready_token::ReadyToken, ObjectKey};
use crate::events::{DeletedObject, ObjectEvent};
use ahash::AHashMap;
use kube::{runtime::watcher, Resource};
use parking_lot::RwLock;
use std::{mem, sync::Arc};

type Cache<K> = Arc<RwLock<AHashMap<ObjectKey, Arc<K>>>>;

/// A writable Store handle
///
/// This is exclusive since it's not safe to share a single `Store` between multiple watchers.
/// In particular, a relist will clobber the state of other connected watchers.
#[derive(Debug)]
pub struct Writer<K: 'static> {
    store: Cache<K>,
    buffer: AHashMap<ObjectKey, Arc<K>>,
    ready: ReadyToken,
}

impl<K: 'static> Default for Writer<K> {
    fn default() -> Self {
        Self {
            store: Arc::default(),
            buffer: AHashMap::new(),
            ready: ReadyToken::default(),
        }
    }
}

impl<K: 'static + Resource + Clone> Writer<K> {
    /// Return a read handle to the store
    ///
    /// Multiple read handles may be obtained, by either calling `as_reader` multiple times,
    /// or by calling `Store::clone()` afterwards.
    #[must_use]
    pub fn as_reader(&self) -> Store<K> {
        Store {
            store: self.store.clone(),
            ready: self.ready.clone(),
        }
    }

    /// Applies a single watcher event to the store
    ///
    /// Returns the changes the event caused, comparing against the previously cached state.
    /// A completed relist reports objects that vanished in the meantime as tombstones,
    /// carrying the last state this store saw.
    pub fn apply_watcher_event(&mut self, event: &watcher::Event<K>) -> Vec<ObjectEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                let key = ObjectKey::from_obj(obj);
                let new = Arc::new(obj.clone());
                let previous = self.store.write().insert(key, new.clone());
                vec![match previous {
                    Some(old) => ObjectEvent::Updated { old, new },
                    None => ObjectEvent::Added(new),
                }]
            }
            watcher::Event::Delete(obj) => {
                self.store.write().remove(&ObjectKey::from_obj(obj));
                vec![ObjectEvent::Deleted(DeletedObject::Full(Arc::new(obj.clone())))]
            }
            watcher::Event::Init => {
                self.buffer = AHashMap::new();
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.buffer.insert(ObjectKey::from_obj(obj), Arc::new(obj.clone()));
                Vec::new()
            }
            watcher::Event::InitDone => {
                let mut store = self.store.write();
                let previous = mem::replace(&mut *store, mem::take(&mut self.buffer));
                let mut changes = store
                    .iter()
                    .map(|(key, new)| match previous.get(key) {
                        Some(old) => ObjectEvent::Updated {
                            old: old.clone(),
                            new: new.clone(),
                        },
                        None => ObjectEvent::Added(new.clone()),
                    })
                    .collect::<Vec<_>>();
                changes.extend(
                    previous
                        .into_iter()
                        .filter(|(key, _)| !store.contains_key(key))
                        .map(|(key, last_known)| {
                            ObjectEvent::Deleted(DeletedObject::Tombstone { key, last_known })
                        }),
                );
                drop(store);
                self.ready.make_ready();
                changes
            }
        }
    }
}

/// A readable cache of Kubernetes objects of kind `K`
///
/// Cloning will produce a new reference to the same backing store.
///
/// Cannot be constructed directly since one writer handle is required,
/// use `Writer::as_reader()` instead.
#[derive(Debug)]
pub struct Store<K: 'static> {
    store: Cache<K>,
    ready: ReadyToken,
}

impl<K: 'static> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ready: self.ready.clone(),
        }
    }
}

impl<K: 'static> Store<K> {
    /// Retrieve the entry referred to by `key`, if it is in the cache.
    ///
    /// Note that this is a cache and may be stale. Deleted objects may still exist in the cache
    /// despite having been deleted in the cluster, and new objects may not yet exist in the cache.
    /// The returned object is shared with the cache: clone it before modifying it.
    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.store.read().get(key).cloned()
    }

    /// All cached objects of a namespace
    #[must_use]
    pub fn list(&self, namespace: &str) -> Vec<Arc<K>> {
        self.store
            .read()
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Return a full snapshot of the current values
    #[must_use]
    pub fn state(&self) -> Vec<Arc<K>> {
        self.store.read().values().cloned().collect()
    }

    /// Whether the initial list has been loaded
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.ready.is_ready()
    }

    /// Wait for the initial list to be loaded
    pub async fn wait_until_ready(&self) {
        self.ready.ready().await;
    }
}
