//! Cluster-wide controller configuration
//!
//! The settings live in the kubeless ConfigMap and are read once at startup. The parsed
//! [`ControllerConfig`] is then handed to every component that needs it.
use crate::{Error, Result};
use k8s_openapi::api::core::v1::{ConfigMap, LocalObjectReference};
use std::collections::BTreeMap;

/// Key holding the namespace to watch, empty for all namespaces
pub const FUNCTIONS_NAMESPACE_KEY: &str = "functions-namespace";
/// Key holding the container image used by derived jobs
pub const PROVISION_IMAGE_KEY: &str = "provision-image";
/// Key holding the pull secret of the provision image
pub const PROVISION_IMAGE_SECRET_KEY: &str = "provision-image-secret";
/// Key holding the pull secret of the builder image
pub const BUILDER_IMAGE_SECRET_KEY: &str = "builder-image-secret";

/// Settings shared by every component of the controller
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerConfig {
    /// Namespace to watch triggers and functions in, `None` for all namespaces
    pub functions_namespace: Option<String>,
    /// Image running the HTTP call of each derived job
    pub provision_image: String,
    /// Pull secrets attached to the pods of derived jobs
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl ControllerConfig {
    /// Parse the configuration from the data section of the kubeless ConfigMap
    ///
    /// # Errors
    ///
    /// Fails with [`Error::MissingConfigKey`] when no provision image is configured.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self> {
        let lookup = |key: &str| data.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let provision_image = lookup(PROVISION_IMAGE_KEY).ok_or(Error::MissingConfigKey(PROVISION_IMAGE_KEY))?;
        Ok(Self {
            functions_namespace: lookup(FUNCTIONS_NAMESPACE_KEY).map(str::to_string),
            provision_image: provision_image.to_string(),
            image_pull_secrets: local_object_references(
                [PROVISION_IMAGE_SECRET_KEY, BUILDER_IMAGE_SECRET_KEY]
                    .into_iter()
                    .filter_map(lookup),
            ),
        })
    }

    /// Parse the configuration from the kubeless ConfigMap
    ///
    /// # Errors
    ///
    /// See [`ControllerConfig::from_data`].
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        Self::from_data(cm.data.as_ref().unwrap_or(&BTreeMap::new()))
    }
}

/// Turn secret names into pull secret references, skipping blanks and repeats
pub fn local_object_references<'a>(secrets: impl IntoIterator<Item = &'a str>) -> Vec<LocalObjectReference> {
    let mut refs: Vec<LocalObjectReference> = Vec::new();
    for secret in secrets.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
        let reference = LocalObjectReference {
            name: secret.to_string().into(),
        };
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }
    refs
}
