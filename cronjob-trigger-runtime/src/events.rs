//! Change notifications produced by the caches, and the filtering that turns them into work
use crate::{cache::ObjectKey, queue::WorkQueue};
use cronjob_trigger_core::CronJobTrigger;
use kube::Resource;
use std::sync::Arc;

/// A change applied to a cache
#[derive(Debug, Clone)]
pub enum ObjectEvent<K> {
    /// The object was not cached before
    Added(Arc<K>),
    /// The object replaced a cached version
    Updated {
        /// The previously cached version
        old: Arc<K>,
        /// The version now in the cache
        new: Arc<K>,
    },
    /// The object is no longer in the cluster
    Deleted(DeletedObject<K>),
}

/// The state of a deleted object
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// The deletion was observed directly, with the final state of the object
    Full(Arc<K>),
    /// The deletion was missed and only noticed on a relist
    ///
    /// `last_known` is the last state this cache saw, which may be stale.
    Tombstone {
        /// Key of the vanished object
        key: ObjectKey,
        /// Last cached state of the object
        last_known: Arc<K>,
    },
}

impl<K: Resource> DeletedObject<K> {
    /// Key of the deleted object
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Full(obj) => ObjectKey::from_obj(obj.as_ref()),
            Self::Tombstone { key, .. } => key.clone(),
        }
    }

    /// The best known state of the deleted object
    #[must_use]
    pub fn object(&self) -> &Arc<K> {
        match self {
            Self::Full(obj) | Self::Tombstone { last_known: obj, .. } => obj,
        }
    }
}

/// Whether an update of a trigger needs a reconcile
///
/// Only a change of the deletion timestamp, the resource version or the schedule counts,
/// anything else is ignored.
#[must_use]
pub fn trigger_changed(old: &CronJobTrigger, new: &CronJobTrigger) -> bool {
    old.metadata.deletion_timestamp != new.metadata.deletion_timestamp
        || old.metadata.resource_version != new.metadata.resource_version
        || old.spec.schedule != new.spec.schedule
}

/// Turns trigger cache changes into work queue keys
#[derive(Clone)]
pub struct TriggerEventHandler {
    queue: WorkQueue<ObjectKey>,
}

impl TriggerEventHandler {
    /// Handler feeding `queue`
    #[must_use]
    pub fn new(queue: WorkQueue<ObjectKey>) -> Self {
        Self { queue }
    }

    /// Enqueue the key of the trigger if the change needs a reconcile
    pub fn handle(&self, event: &ObjectEvent<CronJobTrigger>) {
        let key = match event {
            ObjectEvent::Added(obj) => ObjectKey::from_obj(obj.as_ref()),
            ObjectEvent::Updated { old, new } => {
                if !trigger_changed(old, new) {
                    tracing::trace!(key = %ObjectKey::from_obj(new.as_ref()), "ignoring unchanged trigger");
                    return;
                }
                ObjectKey::from_obj(new.as_ref())
            }
            ObjectEvent::Deleted(deleted) => deleted.key(),
        };
        tracing::debug!(%key, "queueing trigger");
        self.queue.add(key);
    }
}
