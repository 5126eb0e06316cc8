//! Resource client abstraction.
//!
//! Every read and write the operator performs against the cluster goes
//! through [`ResourceClient`], keyed by [`ResourceKind`] plus namespace and
//! name. [`KubeResourceClient`] is the production implementation; the
//! `testing` module provides an in-memory one.
//!
//! Objects cross the seam as [`DynamicObject`]s. [`ResourceClientExt`] layers
//! typed access on top for any [`ManagedKind`].

use crate::crd::{Bestie, PostgresCluster, Route};
use crate::error::{OperatorError, OperatorResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{ApiResource, DynamicObject, ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "bestie-operator";

/// The kinds of objects the operator reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// The Bestie custom resource itself.
    Bestie,
    /// Application workload.
    Deployment,
    /// In-cluster network exposure.
    Service,
    /// autoscaling/v1 HorizontalPodAutoscaler.
    HorizontalPodAutoscaler,
    /// Generic external exposure.
    Ingress,
    /// OpenShift external exposure.
    Route,
    /// Application pods, read for status.
    Pod,
    /// Crunchy PostgresCluster.
    PostgresCluster,
    /// Database seed job.
    Job,
}

impl ResourceKind {
    /// API coordinates used to address this kind dynamically.
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::Bestie => ApiResource::erase::<Bestie>(&()),
            Self::Deployment => ApiResource::erase::<Deployment>(&()),
            Self::Service => ApiResource::erase::<Service>(&()),
            Self::HorizontalPodAutoscaler => ApiResource::erase::<HorizontalPodAutoscaler>(&()),
            Self::Ingress => ApiResource::erase::<Ingress>(&()),
            Self::Route => ApiResource::erase::<Route>(&()),
            Self::Pod => ApiResource::erase::<Pod>(&()),
            Self::PostgresCluster => ApiResource::erase::<PostgresCluster>(&()),
            Self::Job => ApiResource::erase::<Job>(&()),
        }
    }

    /// Kind name as the API server spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bestie => "Bestie",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::Ingress => "Ingress",
            Self::Route => "Route",
            Self::Pod => "Pod",
            Self::PostgresCluster => "PostgresCluster",
            Self::Job => "Job",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed Kubernetes object with a fixed [`ResourceKind`].
pub trait ManagedKind:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The kind this type is addressed by.
    const KIND: ResourceKind;
}

macro_rules! managed_kind {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl ManagedKind for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;
        })*
    };
}

managed_kind! {
    Bestie => Bestie,
    Deployment => Deployment,
    Service => Service,
    HorizontalPodAutoscaler => HorizontalPodAutoscaler,
    Ingress => Ingress,
    Route => Route,
    Pod => Pod,
    PostgresCluster => PostgresCluster,
    Job => Job,
}

/// Get/list/create/update access to namespaced objects.
///
/// `get` reports absence as `Ok(None)`; every other failure is an error.
/// `update` and `update_status` use optimistic concurrency: a stale
/// `resourceVersion` yields [`OperatorError::Conflict`].
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch one object.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<DynamicObject>>;

    /// List objects matching an equality label selector (`k=v,k2=v2`).
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<DynamicObject>>;

    /// Create an object; namespace and name are taken from its metadata.
    async fn create(&self, kind: ResourceKind, object: &DynamicObject)
    -> OperatorResult<DynamicObject>;

    /// Replace an object's spec and metadata.
    async fn update(&self, kind: ResourceKind, object: &DynamicObject)
    -> OperatorResult<DynamicObject>;

    /// Replace an object's status subresource.
    async fn update_status(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject>;
}

/// Typed convenience methods over any [`ResourceClient`].
#[async_trait]
pub trait ResourceClientExt: ResourceClient {
    /// Fetch and decode one object.
    async fn get_typed<K: ManagedKind>(
        &self,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<K>> {
        self.get(K::KIND, namespace, name)
            .await?
            .map(from_dynamic)
            .transpose()
    }

    /// List and decode objects.
    async fn list_typed<K: ManagedKind>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<K>> {
        self.list(K::KIND, namespace, label_selector)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    /// Create a typed object.
    async fn create_typed<K: ManagedKind>(&self, object: &K) -> OperatorResult<K> {
        let created = self.create(K::KIND, &to_dynamic(object)?).await?;
        from_dynamic(created)
    }

    /// Replace a typed object.
    async fn update_typed<K: ManagedKind>(&self, object: &K) -> OperatorResult<K> {
        let updated = self.update(K::KIND, &to_dynamic(object)?).await?;
        from_dynamic(updated)
    }

    /// Replace a typed object's status.
    async fn update_status_typed<K: ManagedKind>(&self, object: &K) -> OperatorResult<K> {
        let updated = self.update_status(K::KIND, &to_dynamic(object)?).await?;
        from_dynamic(updated)
    }
}

impl<T: ResourceClient + ?Sized> ResourceClientExt for T {}

/// Convert a typed object into its dynamic form.
pub fn to_dynamic<K: Serialize>(object: &K) -> OperatorResult<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Decode a dynamic object into a typed one.
pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> OperatorResult<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Namespace and name of an object about to be written.
pub(crate) fn object_key(
    kind: ResourceKind,
    object: &DynamicObject,
) -> OperatorResult<(String, String)> {
    let name = object.metadata.name.clone().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("{} object has no metadata.name", kind))
    })?;
    let namespace = object.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("{} {} has no metadata.namespace", kind, name))
    })?;
    Ok((namespace, name))
}

/// [`ResourceClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

/// Map a 409 on a write to [`OperatorError::Conflict`].
fn classify_write_error(kind: ResourceKind, name: &str, err: kube::Error) -> OperatorError {
    match err {
        kube::Error::Api(ref response) if response.code == 409 && response.reason == "Conflict" => {
            OperatorError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            }
        }
        other => other.into(),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<DynamicObject>> {
        Ok(self.api(kind, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<DynamicObject>> {
        let list = self
            .api(kind, namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject> {
        let (namespace, _) = object_key(kind, object)?;
        Ok(self
            .api(kind, &namespace)
            .create(&Self::post_params(), object)
            .await?)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject> {
        let (namespace, name) = object_key(kind, object)?;
        self.api(kind, &namespace)
            .replace(&name, &Self::post_params(), object)
            .await
            .map_err(|e| classify_write_error(kind, &name, e))
    }

    async fn update_status(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject> {
        let (namespace, name) = object_key(kind, object)?;
        let body = serde_json::to_vec(object)?;
        self.api(kind, &namespace)
            .replace_status(&name, &Self::post_params(), body)
            .await
            .map_err(|e| classify_write_error(kind, &name, e))
    }
}
