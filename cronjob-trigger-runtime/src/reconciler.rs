//! Drives the cron job of a single trigger towards its desired state
use crate::{
    cache::{ObjectKey, Store},
    client::{is_already_exists, is_not_found, ClusterApi},
    finalizer::{add_finalizer, has_finalizer, remove_finalizer},
};
use cronjob_trigger_core::{
    desired_cron_job, job::cron_job_name, labels::has_owner_label, ControllerConfig, CronJobTrigger,
    Function,
};
use k8s_openapi::api::batch::v1::CronJob;
use kube::ResourceExt;
use std::sync::Arc;
use thiserror::Error;

/// Everything a reconcile needs, shared by all workers
pub struct Context<C> {
    /// Access to the API server
    pub client: C,
    /// Cached triggers
    pub triggers: Store<CronJobTrigger>,
    /// Cached functions
    pub functions: Store<Function>,
    /// Cluster-wide settings
    pub config: Arc<ControllerConfig>,
}

/// How an existing cron job was brought in line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No cron job existed, a new one was created
    Created,
    /// A cron job owned by the controller was overwritten
    Updated,
}

/// What a successful reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do
    Noop,
    /// The finalizer was added, the resulting update event triggers the next step
    FinalizerAdded,
    /// The cron job of a deleted trigger was removed and the finalizer released
    CleanedUp,
    /// The cron job was created or updated
    Applied(ApplyOutcome),
}

/// Failure of a single reconcile
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to delete cron job {namespace}/{name}: {source}")]
    DeleteCronJob {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to add finalizer: {0}")]
    AddFinalizer(#[source] kube::Error),
    #[error("failed to remove finalizer: {0}")]
    RemoveFinalizer(#[source] kube::Error),
    #[error("function {namespace}/{name} not found")]
    FunctionNotFound { namespace: String, name: String },
    #[error("failed to build cron job: {0}")]
    Synthesis(#[from] cronjob_trigger_core::Error),
    #[error("cron job {namespace}/{name} already exists and is not managed by kubeless")]
    Conflict { namespace: String, name: String },
    #[error("failed to create cron job {namespace}/{name}: {source}")]
    CreateCronJob {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to get cron job {namespace}/{name}: {source}")]
    GetCronJob {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to update cron job {namespace}/{name}: {source}")]
    ReplaceCronJob {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

impl Error {
    /// Whether retrying cannot help until someone edits the objects involved
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Synthesis(_) | Self::Conflict { .. })
    }
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

struct TriggerState {
    is_deleting: bool,
    has_finalizer: bool,
}

impl TriggerState {
    fn for_trigger(trigger: &CronJobTrigger) -> Self {
        Self {
            is_deleting: trigger.metadata.deletion_timestamp.is_some(),
            has_finalizer: has_finalizer(trigger),
        }
    }
}

/// Reconcile the trigger stored under `key`
///
/// Reads the trigger and its function from the caches, so the outcome is based on what the
/// watches have seen so far. Every step is idempotent: running it again after a partial
/// failure picks up where the previous attempt stopped.
///
/// # Errors
///
/// Fails if an API call fails (other than deleting an already deleted cron job), the function
/// is not cached, the cron job cannot be built, or the cron job name is taken by an object the
/// controller does not own.
pub async fn reconcile<C: ClusterApi>(key: &ObjectKey, ctx: &Context<C>) -> Result<Action> {
    let Some(trigger) = ctx.triggers.get(key) else {
        tracing::debug!(%key, "trigger is gone");
        return Ok(Action::Noop);
    };

    match TriggerState::for_trigger(&trigger) {
        TriggerState {
            is_deleting: true,
            has_finalizer: false,
        } => Ok(Action::Noop),
        TriggerState {
            is_deleting: true,
            has_finalizer: true,
        } => {
            delete_cron_job_of(&ctx.client, key, &trigger).await?;
            remove_finalizer(&ctx.client, &key.namespace, &trigger)
                .await
                .map_err(Error::RemoveFinalizer)?;
            Ok(Action::CleanedUp)
        }
        TriggerState {
            is_deleting: false,
            has_finalizer: false,
        } => {
            add_finalizer(&ctx.client, &key.namespace, &trigger)
                .await
                .map_err(Error::AddFinalizer)?;
            tracing::debug!(%key, "added finalizer");
            Ok(Action::FinalizerAdded)
        }
        TriggerState {
            is_deleting: false,
            has_finalizer: true,
        } => {
            let function_key = ObjectKey::new(&key.namespace, &trigger.spec.function_name);
            let function = ctx.functions.get(&function_key).ok_or_else(|| Error::FunctionNotFound {
                namespace: function_key.namespace.clone(),
                name: function_key.name.clone(),
            })?;
            let desired = desired_cron_job(&trigger, &function, &ctx.config)?;
            let outcome = ensure_cron_job(&ctx.client, desired).await?;
            tracing::info!(%key, ?outcome, "cron job is up to date");
            Ok(Action::Applied(outcome))
        }
    }
}

/// Whether `job` was created by the controller for `trigger`
fn is_owned_by(job: &CronJob, trigger: &CronJobTrigger) -> bool {
    let Some(uid) = trigger.uid() else {
        return false;
    };
    has_owner_label(job.metadata.labels.as_ref()) && job.owner_references().iter().any(|owner| owner.uid == uid)
}

/// Delete the cron job of a deleted trigger
///
/// A cron job under that name that lacks the ownership label, or that belongs to another
/// trigger of the same function, is left alone.
async fn delete_cron_job_of<C: ClusterApi>(client: &C, key: &ObjectKey, trigger: &CronJobTrigger) -> Result<()> {
    let name = cron_job_name(&trigger.spec.function_name);
    let existing = match client.get_cron_job(&key.namespace, &name).await {
        Ok(existing) => existing,
        Err(err) if is_not_found(&err) => {
            tracing::debug!(%key, cronjob = %name, "cron job already gone");
            return Ok(());
        }
        Err(source) => {
            return Err(Error::GetCronJob {
                namespace: key.namespace.clone(),
                name,
                source,
            })
        }
    };
    if !is_owned_by(&existing, trigger) {
        tracing::info!(%key, cronjob = %name, "cron job is not owned by this trigger, keeping it");
        return Ok(());
    }
    match client.delete_cron_job(&key.namespace, &name).await {
        Ok(()) => tracing::info!(%key, cronjob = %name, "deleted cron job"),
        Err(err) if is_not_found(&err) => tracing::debug!(%key, cronjob = %name, "cron job already gone"),
        Err(source) => {
            return Err(Error::DeleteCronJob {
                namespace: key.namespace.clone(),
                name,
                source,
            })
        }
    }
    Ok(())
}

/// Create `desired`, or overwrite the existing cron job of the same name
///
/// An existing cron job is only touched if it carries the ownership label; its spec,
/// labels and owner references are replaced, everything else the server manages is kept.
///
/// # Errors
///
/// Fails with [`Error::Conflict`] if the name is taken by a cron job the controller does not own,
/// or with the error of the failed API call.
pub async fn ensure_cron_job<C: ClusterApi>(client: &C, desired: CronJob) -> Result<ApplyOutcome> {
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();
    match client.create_cron_job(&namespace, &desired).await {
        Ok(_) => return Ok(ApplyOutcome::Created),
        Err(err) if is_already_exists(&err) => {}
        Err(source) => {
            return Err(Error::CreateCronJob {
                namespace,
                name,
                source,
            })
        }
    }

    let mut existing = match client.get_cron_job(&namespace, &name).await {
        Ok(existing) => existing,
        Err(source) => {
            return Err(Error::GetCronJob {
                namespace,
                name,
                source,
            })
        }
    };
    if !has_owner_label(existing.metadata.labels.as_ref()) {
        return Err(Error::Conflict { namespace, name });
    }
    existing.spec = desired.spec;
    existing.metadata.labels = desired.metadata.labels;
    existing.metadata.owner_references = desired.metadata.owner_references;
    match client.replace_cron_job(&namespace, &existing).await {
        Ok(_) => Ok(ApplyOutcome::Updated),
        Err(source) => Err(Error::ReplaceCronJob {
            namespace,
            name,
            source,
        }),
    }
}
