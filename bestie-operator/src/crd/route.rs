//! OpenShift Route, the external exposure object used when the cluster
//! serves `route.openshift.io/v1`.
//!
//! Only the fields the operator renders are modelled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group served by OpenShift for routes.
pub const ROUTE_GROUP: &str = "route.openshift.io";

/// API version of the route group.
pub const ROUTE_VERSION: &str = "v1";

/// Route exposes a Service under an external host name.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    plural = "routes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Requested host; the router assigns one when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Backend service.
    pub to: RouteTargetReference,

    /// Target port on the backend service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    /// TLS termination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Reference to the backend of a route.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    /// Referent kind, always `Service`.
    pub kind: String,
    /// Referent name.
    pub name: String,
}

/// Port selection for a route.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    /// Service port name or number.
    pub target_port: String,
}

/// Route TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Termination type (edge, passthrough, reencrypt).
    pub termination: String,
    /// Policy for plain HTTP traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
}
