//! Synthesis of the [`CronJob`] that fires a [`CronJobTrigger`]
//!
//! Everything in here is pure: the same trigger, function and configuration always produce
//! the same job, which is what lets the controller re-apply it on every reconcile.
use crate::{
    labels::{self, with_owner_label},
    ControllerConfig, CronJobTrigger, Error, Function, Result,
};
use k8s_openapi::{
    api::{
        batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec},
        core::v1::{
            Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec,
            ResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{ObjectMeta, OwnerReference},
    },
};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Timeout in seconds used when the function does not declare one
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 180;
/// Port used when the function service does not declare one
pub const DEFAULT_FUNCTION_PORT: i32 = 8080;
/// Completed jobs kept by every derived cronjob
pub const SUCCESSFUL_JOBS_HISTORY_LIMIT: i32 = 3;
/// Failed jobs kept by every derived cronjob
pub const FAILED_JOBS_HISTORY_LIMIT: i32 = 1;
/// Name of the single container of the job pod
pub const CONTAINER_NAME: &str = "trigger";

const EVENT_NAMESPACE: &str = "cronjobtrigger.kubeless.io";
const PAYLOAD_CONTENT_TYPE: &str = "application/json";

/// Name of the cronjob derived for triggers of `function_name`
#[must_use]
pub fn cron_job_name(function_name: &str) -> String {
    format!("trigger-{function_name}")
}

/// Build the desired [`CronJob`] for `trigger`, calling `function`
///
/// # Errors
///
/// Fails on input that will never succeed as-is: a timeout that is not an integer,
/// a payload that cannot be serialized, or objects without name, uid or namespace.
pub fn desired_cron_job(
    trigger: &CronJobTrigger,
    function: &Function,
    config: &ControllerConfig,
) -> Result<CronJob> {
    let namespace = function
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let owner = trigger_owner_reference(trigger)?;
    let timeout = parse_timeout(function.spec.timeout.as_deref())?;
    let command = curl_command(&function_endpoint(function, &namespace), &trigger.spec.payload)?;

    // function first, trigger second: trigger entries win
    let labels = with_owner_label(labels::merge(
        function.meta().labels.as_ref(),
        trigger.meta().labels.as_ref(),
    ));
    let annotations = labels::merge(
        function.meta().annotations.as_ref(),
        trigger.meta().annotations.as_ref(),
    );

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(config.provision_image.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![command]),
        env: Some(vec![EnvVar {
            name: "POD_UID".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.uid".to_string(),
                    ..ObjectFieldSelector::default()
                }),
                ..EnvVarSource::default()
            }),
            ..EnvVar::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: Some(resource_list("64Mi", "100m")),
            requests: Some(resource_list("16Mi", "10m")),
            ..ResourceRequirements::default()
        }),
        ..Container::default()
    };

    Ok(CronJob {
        metadata: ObjectMeta {
            name: Some(cron_job_name(&function.name_any())),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            annotations: Some(annotations.clone()),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(CronJobSpec {
            schedule: trigger.spec.schedule.clone(),
            successful_jobs_history_limit: Some(SUCCESSFUL_JOBS_HISTORY_LIMIT),
            failed_jobs_history_limit: Some(FAILED_JOBS_HISTORY_LIMIT),
            job_template: JobTemplateSpec {
                spec: Some(JobSpec {
                    active_deadline_seconds: Some(timeout),
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            annotations: Some(annotations),
                            ..ObjectMeta::default()
                        }),
                        spec: Some(PodSpec {
                            containers: vec![container],
                            image_pull_secrets: Some(config.image_pull_secrets.clone()),
                            restart_policy: Some("Never".to_string()),
                            ..PodSpec::default()
                        }),
                    },
                    ..JobSpec::default()
                }),
                ..JobTemplateSpec::default()
            },
            ..CronJobSpec::default()
        }),
        ..CronJob::default()
    })
}

/// Owner reference from a derived job back to its trigger
///
/// # Errors
///
/// Fails when the trigger has not been persisted yet (no name or uid).
pub fn trigger_owner_reference(trigger: &CronJobTrigger) -> Result<OwnerReference> {
    let mut owner = trigger
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    owner.block_owner_deletion = Some(true);
    Ok(owner)
}

fn parse_timeout(timeout: Option<&str>) -> Result<i64> {
    match timeout.map(str::trim) {
        None | Some("") => Ok(DEFAULT_TIMEOUT_SECONDS),
        Some(raw) => raw.parse().map_err(|source| Error::InvalidTimeout {
            value: raw.to_string(),
            source,
        }),
    }
}

fn function_endpoint(function: &Function, namespace: &str) -> String {
    let port = function
        .spec
        .service
        .as_ref()
        .and_then(|service| service.ports.as_ref())
        .and_then(|ports| ports.first())
        .map_or(DEFAULT_FUNCTION_PORT, |port| port.port);
    format!("http://{}.{namespace}.svc.cluster.local:{port}", function.name_any())
}

fn curl_command(endpoint: &str, payload: &serde_json::Value) -> Result<String> {
    let headers = [
        "Event-Id: $(POD_UID)".to_string(),
        "Event-Time: $(date --rfc-3339=seconds --utc)".to_string(),
        format!("Event-Namespace: {EVENT_NAMESPACE}"),
        format!("Event-Type: {PAYLOAD_CONTENT_TYPE}"),
        format!("Content-Type: {PAYLOAD_CONTENT_TYPE}"),
    ]
    .iter()
    .map(|header| format!("-H \"{header}\""))
    .collect::<Vec<_>>()
    .join(" ");
    let mut command = format!("curl -Lv {headers} {endpoint}");

    let body = serde_json::to_string(payload).map_err(Error::InvalidPayload)?;
    if body != "null" {
        command.push_str(&format!(" -d '{}'", body.replace('\'', r"'\''")));
    }
    Ok(command)
}

fn resource_list(memory: &str, cpu: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("memory".to_string(), Quantity(memory.to_string())),
        ("cpu".to_string(), Quantity(cpu.to_string())),
    ])
}

#[cfg(test)]
mod tests {
    use super::{cron_job_name, curl_command, desired_cron_job, parse_timeout, DEFAULT_TIMEOUT_SECONDS};
    use crate::{config::local_object_references, ControllerConfig, CronJobTrigger, Error, Function};
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    fn trigger(payload: serde_json::Value) -> CronJobTrigger {
        serde_json::from_value(json!({
            "apiVersion": "kubeless.io/v1beta1",
            "kind": "CronJobTrigger",
            "metadata": {
                "name": "t1",
                "namespace": "ns",
                "uid": "t1-uid",
                "labels": { "shared": "trigger", "trigger-only": "yes" },
                "annotations": { "note": "trigger" }
            },
            "spec": { "function-name": "fn1", "schedule": "*/5 * * * *", "payload": payload }
        }))
        .unwrap()
    }

    fn function(spec: serde_json::Value) -> Function {
        serde_json::from_value(json!({
            "apiVersion": "kubeless.io/v1beta1",
            "kind": "Function",
            "metadata": {
                "name": "fn1",
                "namespace": "ns",
                "labels": { "shared": "function", "function-only": "yes" },
                "annotations": { "note": "function", "owner": "team-a" }
            },
            "spec": spec
        }))
        .unwrap()
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            functions_namespace: None,
            provision_image: "kubeless/unzip:latest".to_string(),
            image_pull_secrets: local_object_references(["regcred"]),
        }
    }

    #[test]
    fn synthesizes_job_for_function_without_ports_or_timeout() {
        let job = desired_cron_job(&trigger(json!({"a": 1})), &function(json!({})), &config()).unwrap();
        let expected_command = "curl -Lv -H \"Event-Id: $(POD_UID)\" \
            -H \"Event-Time: $(date --rfc-3339=seconds --utc)\" \
            -H \"Event-Namespace: cronjobtrigger.kubeless.io\" \
            -H \"Event-Type: application/json\" -H \"Content-Type: application/json\" \
            http://fn1.ns.svc.cluster.local:8080 -d '{\"a\":1}'";
        assert_json_include!(
            actual: serde_json::to_value(&job).unwrap(),
            expected: json!({
                "metadata": {
                    "name": "trigger-fn1",
                    "namespace": "ns",
                    "labels": {
                        "created-by": "kubeless",
                        "shared": "trigger",
                        "trigger-only": "yes",
                        "function-only": "yes"
                    },
                    "annotations": { "note": "trigger", "owner": "team-a" },
                    "ownerReferences": [{
                        "apiVersion": "kubeless.io/v1beta1",
                        "kind": "CronJobTrigger",
                        "name": "t1",
                        "uid": "t1-uid",
                        "controller": true,
                        "blockOwnerDeletion": true
                    }]
                },
                "spec": {
                    "schedule": "*/5 * * * *",
                    "successfulJobsHistoryLimit": 3,
                    "failedJobsHistoryLimit": 1,
                    "jobTemplate": { "spec": {
                        "activeDeadlineSeconds": DEFAULT_TIMEOUT_SECONDS,
                        "template": {
                            "metadata": { "labels": { "created-by": "kubeless" } },
                            "spec": {
                                "restartPolicy": "Never",
                                "imagePullSecrets": [{ "name": "regcred" }],
                                "containers": [{
                                    "name": "trigger",
                                    "image": "kubeless/unzip:latest",
                                    "command": ["/bin/sh", "-c"],
                                    "args": [expected_command],
                                    "env": [{
                                        "name": "POD_UID",
                                        "valueFrom": { "fieldRef": { "fieldPath": "metadata.uid" } }
                                    }],
                                    "resources": {
                                        "limits": { "memory": "64Mi", "cpu": "100m" },
                                        "requests": { "memory": "16Mi", "cpu": "10m" }
                                    }
                                }]
                            }
                        }
                    }}
                }
            })
        );
    }

    #[test]
    fn uses_first_declared_port_and_timeout() {
        let function = function(json!({
            "timeout": "90",
            "service": { "ports": [{ "port": 9090 }, { "port": 9091 }] }
        }));
        let job = desired_cron_job(&trigger(json!(null)), &function, &config()).unwrap();
        let job_spec = job.spec.unwrap().job_template.spec.unwrap();
        assert_eq!(job_spec.active_deadline_seconds, Some(90));
        let args = job_spec.template.spec.unwrap().containers[0].args.clone().unwrap();
        assert!(args[0].ends_with("http://fn1.ns.svc.cluster.local:9090"));
    }

    #[test]
    fn null_payload_sends_no_body() {
        let command = curl_command("http://fn1.ns.svc.cluster.local:8080", &json!(null)).unwrap();
        assert!(!command.contains(" -d "));
        let command = curl_command("http://x", &json!("hi")).unwrap();
        assert!(command.ends_with(" -d '\"hi\"'"));
    }

    #[test]
    fn quotes_in_payload_stay_inside_the_body() {
        let command = curl_command("http://x", &json!({"msg": "it's'; rm -rf /; echo '"})).unwrap();
        assert!(command.ends_with(r#" -d '{"msg":"it'\''s'\''; rm -rf /; echo '\''"}'"#));
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let err = desired_cron_job(&trigger(json!(null)), &function(json!({"timeout": "2m"})), &config())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTimeout { ref value, .. } if value == "2m"));
    }

    #[test]
    fn empty_timeout_falls_back_to_default() {
        assert_eq!(parse_timeout(None).unwrap(), DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(parse_timeout(Some("")).unwrap(), DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(parse_timeout(Some("30")).unwrap(), 30);
    }

    #[test]
    fn unsaved_trigger_cannot_own_a_job() {
        let mut trigger = trigger(json!(null));
        trigger.metadata.uid = None;
        let err = desired_cron_job(&trigger, &function(json!({})), &config()).unwrap_err();
        assert!(matches!(err, Error::MissingObjectKey(_)));
    }

    #[test]
    fn job_name_is_derived_from_function() {
        assert_eq!(cron_job_name("fn1"), "trigger-fn1");
    }
}
