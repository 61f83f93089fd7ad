use crate::{
    cache::Writer,
    client::ClusterApi,
    reconciler::Context,
};
use async_trait::async_trait;
use cronjob_trigger_core::{ControllerConfig, CronJobTrigger, CronJobTriggerSpec, Function, FunctionSpec};
use k8s_openapi::{api::batch::v1::CronJob, apimachinery::pkg::apis::meta::v1::Time};
use kube::{runtime::watcher, ResourceExt};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Build the error the API server returns for `code` and `reason`
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(
        serde_json::from_value(serde_json::json!({
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code,
        }))
        .unwrap(),
    )
}

pub(crate) fn trigger(namespace: &str, name: &str, function_name: &str) -> CronJobTrigger {
    let mut trigger = CronJobTrigger::new(name, CronJobTriggerSpec {
        function_name: function_name.to_string(),
        schedule: "*/5 * * * *".to_string(),
        payload: serde_json::json!({"a": 1}),
    });
    trigger.metadata.namespace = Some(namespace.to_string());
    trigger.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    trigger
}

pub(crate) fn function(namespace: &str, name: &str) -> Function {
    let mut function = Function::new(name, FunctionSpec::default());
    function.metadata.namespace = Some(namespace.to_string());
    function.metadata.uid = Some(format!("uid-{namespace}-{name}"));
    function
}

/// A cron job not created by the controller
pub(crate) fn cron_job(namespace: &str, name: &str, schedule: &str) -> CronJob {
    let mut job = CronJob::default();
    job.metadata.name = Some(name.to_string());
    job.metadata.namespace = Some(namespace.to_string());
    job.spec = Some(k8s_openapi::api::batch::v1::CronJobSpec {
        schedule: schedule.to_string(),
        ..Default::default()
    });
    job
}

pub(crate) fn config() -> ControllerConfig {
    ControllerConfig {
        provision_image: "kubeless/unzip".to_string(),
        ..ControllerConfig::default()
    }
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct ClusterState {
    triggers: BTreeMap<Key, CronJobTrigger>,
    functions: BTreeMap<Key, Function>,
    cron_jobs: BTreeMap<Key, CronJob>,
    resource_version: u64,
    /// Every call, as `verb namespace/name`
    calls: Vec<String>,
    /// Successful calls that changed the cluster
    writes: Vec<String>,
    /// One-shot failures per verb, as `(code, reason)`
    failures: BTreeMap<&'static str, (u16, String)>,
}

impl ClusterState {
    fn next_resource_version(&mut self) -> Option<String> {
        self.resource_version += 1;
        Some(self.resource_version.to_string())
    }

    /// Record the call, failing it if a failure was injected for `verb`
    fn call(&mut self, verb: &'static str, namespace: &str, name: &str) -> kube::Result<()> {
        self.calls.push(format!("{verb} {namespace}/{name}"));
        match self.failures.remove(verb) {
            Some((code, reason)) => Err(api_error(code, &reason)),
            None => Ok(()),
        }
    }

    fn wrote(&mut self, verb: &'static str, namespace: &str, name: &str) {
        self.writes.push(format!("{verb} {namespace}/{name}"));
    }
}

/// An in-memory API server
///
/// Follows the parts of the API semantics the controller relies on: deleting an object with
/// finalizers only sets its deletion timestamp, and an object that is being deleted disappears
/// once its last finalizer is removed.
#[derive(Clone, Default)]
pub(crate) struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub(crate) fn insert_trigger(&self, mut trigger: CronJobTrigger) {
        let mut state = self.state.lock();
        trigger.metadata.resource_version = state.next_resource_version();
        let k = key(&trigger.namespace().unwrap_or_default(), &trigger.name_any());
        state.triggers.insert(k, trigger);
    }

    pub(crate) fn insert_function(&self, mut function: Function) {
        let mut state = self.state.lock();
        function.metadata.resource_version = state.next_resource_version();
        let k = key(&function.namespace().unwrap_or_default(), &function.name_any());
        state.functions.insert(k, function);
    }

    pub(crate) fn remove_function(&self, namespace: &str, name: &str) {
        self.state.lock().functions.remove(&key(namespace, name));
    }

    pub(crate) fn insert_cron_job(&self, mut job: CronJob) {
        let mut state = self.state.lock();
        job.metadata.resource_version = state.next_resource_version();
        let k = key(&job.namespace().unwrap_or_default(), &job.name_any());
        state.cron_jobs.insert(k, job);
    }

    /// Delete a trigger the way a user would, bypassing the call log
    pub(crate) fn request_trigger_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        delete_trigger(&mut state, namespace, name);
    }

    /// Make the next call of `verb` fail with the given status
    pub(crate) fn fail_next(&self, verb: &'static str, code: u16, reason: &str) {
        self.state.lock().failures.insert(verb, (code, reason.to_string()));
    }

    pub(crate) fn trigger(&self, namespace: &str, name: &str) -> Option<CronJobTrigger> {
        self.state.lock().triggers.get(&key(namespace, name)).cloned()
    }

    pub(crate) fn cron_job(&self, namespace: &str, name: &str) -> Option<CronJob> {
        self.state.lock().cron_jobs.get(&key(namespace, name)).cloned()
    }

    pub(crate) fn cron_jobs(&self) -> Vec<CronJob> {
        self.state.lock().cron_jobs.values().cloned().collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }
}

fn relist<K: kube::Resource + Clone + 'static>(objects: &BTreeMap<Key, K>, writer: &mut Writer<K>) {
    writer.apply_watcher_event(&watcher::Event::Init);
    for obj in objects.values() {
        writer.apply_watcher_event(&watcher::Event::InitApply(obj.clone()));
    }
    writer.apply_watcher_event(&watcher::Event::InitDone);
}

fn delete_trigger(state: &mut ClusterState, namespace: &str, name: &str) -> bool {
    let k = key(namespace, name);
    let Some(trigger) = state.triggers.get(&k) else {
        return false;
    };
    if trigger.finalizers().is_empty() {
        state.triggers.remove(&k);
    } else if trigger.metadata.deletion_timestamp.is_none() {
        let rv = state.next_resource_version();
        if let Some(trigger) = state.triggers.get_mut(&k) {
            trigger.metadata.deletion_timestamp = Some(Time(Default::default()));
            trigger.metadata.resource_version = rv;
        }
    }
    true
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn replace_trigger(&self, namespace: &str, trigger: &CronJobTrigger) -> kube::Result<CronJobTrigger> {
        let mut state = self.state.lock();
        let name = trigger.name_any();
        state.call("replace_trigger", namespace, &name)?;
        let k = key(namespace, &name);
        if !state.triggers.contains_key(&k) {
            return Err(api_error(404, "NotFound"));
        }
        let mut stored = trigger.clone();
        stored.metadata.resource_version = state.next_resource_version();
        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            state.triggers.remove(&k);
        } else {
            state.triggers.insert(k, stored.clone());
        }
        state.wrote("replace_trigger", namespace, &name);
        Ok(stored)
    }

    async fn delete_trigger(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let mut state = self.state.lock();
        state.call("delete_trigger", namespace, name)?;
        if !delete_trigger(&mut state, namespace, name) {
            return Err(api_error(404, "NotFound"));
        }
        state.wrote("delete_trigger", namespace, name);
        Ok(())
    }

    async fn list_triggers(&self, namespace: &str) -> kube::Result<Vec<CronJobTrigger>> {
        let mut state = self.state.lock();
        state.call("list_triggers", namespace, "")?;
        Ok(state
            .triggers
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, trigger)| trigger.clone())
            .collect())
    }

    async fn create_cron_job(&self, namespace: &str, job: &CronJob) -> kube::Result<CronJob> {
        let mut state = self.state.lock();
        let name = job.name_any();
        state.call("create_cron_job", namespace, &name)?;
        let k = key(namespace, &name);
        if state.cron_jobs.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut stored = job.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = state.next_resource_version();
        state.cron_jobs.insert(k, stored.clone());
        state.wrote("create_cron_job", namespace, &name);
        Ok(stored)
    }

    async fn get_cron_job(&self, namespace: &str, name: &str) -> kube::Result<CronJob> {
        let mut state = self.state.lock();
        state.call("get_cron_job", namespace, name)?;
        state
            .cron_jobs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn replace_cron_job(&self, namespace: &str, job: &CronJob) -> kube::Result<CronJob> {
        let mut state = self.state.lock();
        let name = job.name_any();
        state.call("replace_cron_job", namespace, &name)?;
        let k = key(namespace, &name);
        if !state.cron_jobs.contains_key(&k) {
            return Err(api_error(404, "NotFound"));
        }
        let mut stored = job.clone();
        stored.metadata.resource_version = state.next_resource_version();
        state.cron_jobs.insert(k, stored.clone());
        state.wrote("replace_cron_job", namespace, &name);
        Ok(stored)
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let mut state = self.state.lock();
        state.call("delete_cron_job", namespace, name)?;
        if state.cron_jobs.remove(&key(namespace, name)).is_none() {
            return Err(api_error(404, "NotFound"));
        }
        state.wrote("delete_cron_job", namespace, name);
        Ok(())
    }
}

/// A [`FakeCluster`] with caches that are refreshed on demand
pub(crate) struct Harness {
    pub(crate) cluster: FakeCluster,
    pub(crate) ctx: Context<FakeCluster>,
    triggers: Writer<CronJobTrigger>,
    functions: Writer<Function>,
}

impl Default for Harness {
    fn default() -> Self {
        let cluster = FakeCluster::default();
        let triggers = Writer::default();
        let functions = Writer::default();
        let ctx = Context {
            client: cluster.clone(),
            triggers: triggers.as_reader(),
            functions: functions.as_reader(),
            config: Arc::new(config()),
        };
        Self {
            cluster,
            ctx,
            triggers,
            functions,
        }
    }
}

impl Harness {
    /// Bring the caches up to date with the cluster, as a relist would
    pub(crate) fn sync(&mut self) {
        let state = self.cluster.state.lock();
        relist(&state.triggers, &mut self.triggers);
        relist(&state.functions, &mut self.functions);
    }
}
