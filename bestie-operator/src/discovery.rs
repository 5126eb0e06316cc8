//! Platform capability detection.
//!
//! The operator exposes a Bestie through an OpenShift Route when the cluster
//! serves `route.openshift.io/v1`, and through an Ingress otherwise.
//! [`CapabilityDetector`] asks [`ApiDiscovery`] once and keeps the answer for
//! the lifetime of the process.

use crate::crd::{ROUTE_GROUP, ROUTE_VERSION};
use crate::error::OperatorResult;
use async_trait::async_trait;
use kube::Client;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Queries which API group versions the cluster serves.
#[async_trait]
pub trait ApiDiscovery: Send + Sync {
    /// Whether `group/version` is served.
    async fn supports_api(&self, group: &str, version: &str) -> OperatorResult<bool>;
}

/// [`ApiDiscovery`] backed by the API server's discovery endpoints.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    /// Wrap a kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiDiscovery for KubeDiscovery {
    async fn supports_api(&self, group: &str, version: &str) -> OperatorResult<bool> {
        let group_version = format!("{}/{}", group, version);
        match self.client.list_api_group_resources(&group_version).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write-once cache of optional platform features.
///
/// A successful discovery answer is cached for the process lifetime. A
/// failed discovery reports the feature as unavailable without caching, so
/// a later pass may still find it.
pub struct CapabilityDetector {
    discovery: Arc<dyn ApiDiscovery>,
    route_api: OnceCell<bool>,
}

impl CapabilityDetector {
    /// Create a detector that has not probed anything yet.
    pub fn new(discovery: Arc<dyn ApiDiscovery>) -> Self {
        Self {
            discovery,
            route_api: OnceCell::new(),
        }
    }

    /// Whether the cluster serves OpenShift routes.
    pub async fn route_api_available(&self) -> bool {
        let probe = self
            .route_api
            .get_or_try_init(|| self.discovery.supports_api(ROUTE_GROUP, ROUTE_VERSION))
            .await;

        match probe {
            Ok(found) => *found,
            Err(e) => {
                tracing::warn!(
                    group = ROUTE_GROUP,
                    version = ROUTE_VERSION,
                    error = %e,
                    "API discovery failed, treating route API as unavailable"
                );
                false
            }
        }
    }

    /// The cached answer, if discovery has succeeded.
    pub fn cached_route_api(&self) -> Option<bool> {
        self.route_api.get().copied()
    }
}
