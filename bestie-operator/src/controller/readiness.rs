//! Readiness gate for the application Deployment.

use crate::client::{ResourceClient, ResourceClientExt};
use crate::crd::Bestie;
use crate::error::{OperatorError, OperatorResult};
use crate::resources::Template;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

/// Ready replicas reported by a Deployment.
pub fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

/// Whether the Bestie's Deployment reports at least one ready replica.
///
/// A missing Deployment is not running. Read errors propagate.
pub async fn is_running(client: &dyn ResourceClient, bestie: &Bestie) -> OperatorResult<bool> {
    let name = bestie.name_any();
    let namespace = bestie.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Bestie {} must be namespaced", name))
    })?;

    let deployment: Option<Deployment> = client
        .get_typed(&namespace, &Template::Deployment.object_name(&name))
        .await?;
    Ok(deployment.is_some_and(|d| ready_replicas(&d) > 0))
}
