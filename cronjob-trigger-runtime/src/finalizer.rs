//! Keeps triggers around until their cron job has been cleaned up
//!
//! The controller adds [`FINALIZER`] to every live trigger it sees. Kubernetes then only marks a
//! deleted trigger with a deletion timestamp, and waits for the controller to delete the derived
//! cron job and drop the finalizer before removing the trigger for good.
use crate::client::ClusterApi;
use cronjob_trigger_core::CronJobTrigger;
use kube::ResourceExt;

/// Finalizer owned by this controller
pub const FINALIZER: &str = "kubeless.io/cronjobtrigger";

/// Whether the trigger carries [`FINALIZER`]
#[must_use]
pub fn has_finalizer(trigger: &CronJobTrigger) -> bool {
    trigger.finalizers().iter().any(|fin| fin == FINALIZER)
}

/// Add [`FINALIZER`] to a copy of `trigger` and persist it
///
/// # Errors
///
/// Returns the error of the replace call, including optimistic concurrency conflicts when
/// `trigger` is stale.
pub async fn add_finalizer<C: ClusterApi>(
    client: &C,
    namespace: &str,
    trigger: &CronJobTrigger,
) -> kube::Result<CronJobTrigger> {
    let mut updated = trigger.clone();
    updated.finalizers_mut().push(FINALIZER.to_string());
    client.replace_trigger(namespace, &updated).await
}

/// Remove [`FINALIZER`] from a copy of `trigger` and persist it
///
/// # Errors
///
/// Returns the error of the replace call.
pub async fn remove_finalizer<C: ClusterApi>(
    client: &C,
    namespace: &str,
    trigger: &CronJobTrigger,
) -> kube::Result<CronJobTrigger> {
    let mut updated = trigger.clone();
    let finalizers = updated
        .finalizers()
        .iter()
        .filter(|fin| *fin != FINALIZER)
        .cloned()
        .collect::<Vec<_>>();
    updated.metadata.finalizers = (!finalizers.is_empty()).then_some(finalizers);
    client.replace_trigger(namespace, &updated).await
}
