//! Label and annotation handling for derived jobs
use std::collections::BTreeMap;

type Map = BTreeMap<String, String>;

/// Label key marking objects created by this controller
pub const CREATED_BY_LABEL: &str = "created-by";

/// Value of [`CREATED_BY_LABEL`] on objects created by this controller
pub const CONTROLLER_ID: &str = "kubeless";

/// Merge two string maps into a new one
///
/// Entries of `base` are copied first, then every entry of `overrides` is inserted on top,
/// so `overrides` wins whenever both maps hold the same key. Missing maps count as empty.
///
/// ```
/// # use std::collections::BTreeMap;
/// use cronjob_trigger_core::labels::merge;
/// let function = BTreeMap::from([("app".to_string(), "fn".to_string())]);
/// let trigger = BTreeMap::from([("app".to_string(), "trigger".to_string())]);
/// assert_eq!(merge(Some(&function), Some(&trigger))["app"], "trigger");
/// ```
#[must_use]
pub fn merge(base: Option<&Map>, overrides: Option<&Map>) -> Map {
    let mut merged = base.cloned().unwrap_or_default();
    for (key, value) in overrides.into_iter().flatten() {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Stamp the ownership marker onto `labels`, replacing any previous value
#[must_use]
pub fn with_owner_label(mut labels: Map) -> Map {
    labels.insert(CREATED_BY_LABEL.to_string(), CONTROLLER_ID.to_string());
    labels
}

/// Whether `labels` carry the ownership marker of this controller
#[must_use]
pub fn has_owner_label(labels: Option<&Map>) -> bool {
    labels
        .and_then(|labels| labels.get(CREATED_BY_LABEL))
        .is_some_and(|value| value == CONTROLLER_ID)
}
