//! # Watch Triggers
//!
//! Turns a kube-runtime watcher stream into the changes that should trigger a cycle.
//!
//! Only the managed object counts, and an object redelivered with a `resourceVersion`
//! already seen (a relist after a dropped watch, or a write that changed nothing)
//! triggers nothing.

use futures::{future, Stream, TryStreamExt};
use kube::Resource;
use kube_runtime::{predicates, watcher, WatchStreamExt};

/// Whether `obj` is exactly the managed object
///
/// `namespace` is `None` for cluster-scoped objects.
pub fn is_target_object<K: Resource>(obj: &K, namespace: Option<&str>, name: &str) -> bool {
    let meta = obj.meta();
    meta.name.as_deref() == Some(name) && meta.namespace.as_deref() == namespace
}

/// Versions of the managed object that differ from the last one seen
///
/// Applies and deletes both count. Stream errors are passed through.
pub fn object_changes<K, S>(
    events: S,
    namespace: Option<String>,
    name: String,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: Resource<DynamicType = ()> + Clone + Send + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
{
    events
        .touched_objects()
        .predicate_filter(predicates::resource_version)
        .try_filter(move |obj| future::ready(is_target_object(obj, namespace.as_deref(), &name)))
}
