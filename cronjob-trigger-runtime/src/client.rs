//! The calls the controller makes against the API server
//!
//! Everything that mutates the cluster goes through [`ClusterApi`], so that the reconcile
//! logic can be driven against an in-memory cluster in tests.
use async_trait::async_trait;
use cronjob_trigger_core::CronJobTrigger;
use k8s_openapi::api::batch::v1::CronJob;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    core::ErrorResponse,
    Api, Client, ResourceExt,
};

/// Cluster operations used by the reconciler and the cleanup hook
#[async_trait]
pub trait ClusterApi: Clone + Send + Sync + 'static {
    /// Replace a trigger, used to persist finalizer changes
    async fn replace_trigger(&self, namespace: &str, trigger: &CronJobTrigger) -> kube::Result<CronJobTrigger>;

    /// Delete a trigger
    async fn delete_trigger(&self, namespace: &str, name: &str) -> kube::Result<()>;

    /// List every trigger in a namespace, bypassing the cache
    async fn list_triggers(&self, namespace: &str) -> kube::Result<Vec<CronJobTrigger>>;

    /// Create a cron job
    async fn create_cron_job(&self, namespace: &str, job: &CronJob) -> kube::Result<CronJob>;

    /// Fetch a cron job
    async fn get_cron_job(&self, namespace: &str, name: &str) -> kube::Result<CronJob>;

    /// Replace a cron job
    async fn replace_cron_job(&self, namespace: &str, job: &CronJob) -> kube::Result<CronJob>;

    /// Delete a cron job
    async fn delete_cron_job(&self, namespace: &str, name: &str) -> kube::Result<()>;
}

/// [`ClusterApi`] backed by a [`kube::Client`]
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn triggers(&self, namespace: &str) -> Api<CronJobTrigger> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cron_jobs(&self, namespace: &str) -> Api<CronJob> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn replace_trigger(&self, namespace: &str, trigger: &CronJobTrigger) -> kube::Result<CronJobTrigger> {
        self.triggers(namespace)
            .replace(&trigger.name_any(), &PostParams::default(), trigger)
            .await
    }

    async fn delete_trigger(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.triggers(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn list_triggers(&self, namespace: &str) -> kube::Result<Vec<CronJobTrigger>> {
        Ok(self.triggers(namespace).list(&ListParams::default()).await?.items)
    }

    async fn create_cron_job(&self, namespace: &str, job: &CronJob) -> kube::Result<CronJob> {
        self.cron_jobs(namespace).create(&PostParams::default(), job).await
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> kube::Result<CronJob> {
        self.cron_jobs(namespace).get(name).await
    }

    async fn replace_cron_job(&self, namespace: &str, job: &CronJob) -> kube::Result<CronJob> {
        self.cron_jobs(namespace)
            .replace(&job.name_any(), &PostParams::default(), job)
            .await
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.cron_jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
    }
}

/// Whether the API server reported that the object does not exist
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: 404, .. }))
}

/// Whether the API server refused a create because the name is taken
#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: 409, reason, .. }) if reason == "AlreadyExists")
}
