// The derived root types carry no field docs.
#![allow(missing_docs)]
use k8s_openapi::api::core::v1::ServiceSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fires an HTTP request at a function on a cron schedule
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "kubeless.io", version = "v1beta1", kind = "CronJobTrigger", namespaced)]
#[kube(shortname = "cronjobtrigger", derive = "PartialEq")]
pub struct CronJobTriggerSpec {
    /// Name of the function to call, in the namespace of the trigger
    #[serde(rename = "function-name")]
    pub function_name: String,
    /// Schedule in cron syntax
    pub schedule: String,
    /// Arbitrary JSON body sent with every call
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A deployed kubeless function
///
/// Only the fields the controller reads are typed with intent; the remaining ones are carried
/// so that objects survive a round-trip through the cache.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[kube(group = "kubeless.io", version = "v1beta1", kind = "Function", namespaced)]
#[kube(schema = "disabled", derive = "PartialEq")]
pub struct FunctionSpec {
    /// Entrypoint of the function, `file.method`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Runtime image family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    /// Source or archive of the function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Encoding of `function`
    #[serde(
        default,
        rename = "function-content-type",
        skip_serializing_if = "Option::is_none"
    )]
    pub function_content_type: Option<String>,
    /// Dependency manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<String>,
    /// Checksum of `function`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Maximum run time in seconds, as a decimal string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Service exposing the function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,
}
