//! Typed view of the Contour HTTPProxy resource
//!
//! Used both for the per-namespace listener proxies forge owns and for the
//! shared global route table forge only edits. Fields forge does not model
//! are captured in `extra` maps so a read-modify-write of the shared table
//! never drops configuration that belongs to someone else.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Contour HTTPProxy object
pub type HttpProxy = HTTPProxy;

/// Contour HTTPProxy spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "projectcontour.io",
    version = "v1",
    kind = "HTTPProxy",
    plural = "httpproxies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxySpec {
    /// Routes served by this proxy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    /// Other proxies delegated to by this proxy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,

    /// Unmodelled fields (virtualhost, tcpproxy, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A route and its upstream services
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Route {
    /// Upstream services
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<RouteService>,

    /// Unmodelled fields (conditions, timeoutPolicy, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An upstream service of a route
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RouteService {
    /// Service name
    pub name: String,
    /// Service port
    pub port: i32,

    /// Unmodelled fields (weight, protocol, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Delegation to another proxy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Include {
    /// Name of the included proxy
    pub name: String,
    /// Namespace of the included proxy (defaults to the including proxy's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Match conditions for the delegation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MatchCondition>,

    /// Unmodelled fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Include {
    /// Whether this include targets the given proxy
    pub fn targets(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }
}

/// Request match condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MatchCondition {
    /// Path prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Unmodelled fields (header, queryParameter, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
