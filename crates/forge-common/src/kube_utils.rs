//! Kubernetes helpers shared by the forge controllers

use kube::api::{ApiResource, ObjectMeta};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::Error;

/// Build an ApiResource from a known apiVersion and kind.
///
/// Used for kinds forge only ever deletes in bulk and never reads, where a
/// typed struct would add nothing.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); core resources have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind using the API server's default rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Whether the object carries the finalizer
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// The object's finalizers with `finalizer` appended (if missing)
pub fn finalizers_with(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

/// The object's finalizers with every `finalizer` entry removed
pub fn finalizers_without(meta: &ObjectMeta, finalizer: &str) -> Vec<String> {
    meta.finalizers
        .iter()
        .flatten()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect()
}

/// Merge patch replacing the finalizer list, guarded by resourceVersion.
///
/// The API server rejects the patch with a conflict when the object changed
/// since `resource_version` was read.
pub fn finalizer_patch(resource_version: Option<&str>, finalizers: &[String]) -> Value {
    json!({
        "metadata": {
            "resourceVersion": resource_version,
            "finalizers": finalizers,
        }
    })
}

/// Merge patch moving the status from `current` to `desired`, guarded by
/// resourceVersion.
///
/// Fields absent from `desired` but set in `current` are sent as `null` so
/// the API server deletes them; unchanged fields are left out.
pub fn status_patch<T: Serialize>(
    resource_version: Option<&str>,
    current: &T,
    desired: &T,
) -> Result<Value, Error> {
    let to_value = |status: &T| {
        serde_json::to_value(status)
            .map_err(|e| Error::serialization_for_kind("status", e.to_string()))
    };
    let current = to_value(current)?;
    let desired = to_value(desired)?;
    Ok(json!({
        "metadata": { "resourceVersion": resource_version },
        "status": merge_diff(&current, &desired),
    }))
}

/// RFC 7386 patch that turns `from` into `to`
pub fn merge_diff(from: &Value, to: &Value) -> Value {
    let (Value::Object(from), Value::Object(to)) = (from, to) else {
        return to.clone();
    };
    let mut patch = Map::new();
    for (key, old) in from {
        match to.get(key) {
            None | Some(Value::Null) if !old.is_null() => {
                patch.insert(key.clone(), Value::Null);
            }
            Some(new) if new != old && !new.is_null() => {
                let value = match (old, new) {
                    (Value::Object(_), Value::Object(_)) => merge_diff(old, new),
                    _ => new.clone(),
                };
                patch.insert(key.clone(), value);
            }
            _ => {}
        }
    }
    for (key, new) in to {
        if !from.contains_key(key) && !new.is_null() {
            patch.insert(key.clone(), new.clone());
        }
    }
    Value::Object(patch)
}
