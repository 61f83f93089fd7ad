//! Caches objects in memory

mod ready_token;
pub mod store;

pub use store::{Store, Writer};

use crate::events::ObjectEvent;
use async_stream::stream;
use futures::{Stream, StreamExt};
use kube::{runtime::watcher, Resource, ResourceExt};
use std::fmt::{self, Display};

/// The `namespace/name` key of a namespaced object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// The namespace of the object
    pub namespace: String,
    /// The name of the object
    pub name: String,
}

impl ObjectKey {
    /// Creates `ObjectKey` from a namespace and name
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Creates `ObjectKey` from the resource
    #[must_use]
    pub fn from_obj<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Cache objects from a [`watcher()`](kube::runtime::watcher()) stream into a [`Writer`]
///
/// Yields the changes each watch event made to the cache, see [`Writer::apply_watcher_event`].
/// Watch errors are logged and skipped: the watcher restarts itself, and a restart ends in a
/// relist that reconciles the cache with whatever was missed.
pub fn informer<K, W>(mut writer: Writer<K>, stream: W) -> impl Stream<Item = ObjectEvent<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default,
    W: Stream<Item = watcher::Result<watcher::Event<K>>>,
{
    let kind = K::kind(&K::DynamicType::default()).into_owned();
    let mut stream = Box::pin(stream);
    stream! {
        while let Some(event) = stream.next().await {
            match event {
                Ok(ev) => {
                    for change in writer.apply_watcher_event(&ev) {
                        yield change;
                    }
                }
                Err(err) => tracing::warn!(%kind, error = %err, "watch failed, waiting for it to recover"),
            }
        }
    }
}
