//! In-memory collaborators for exercising the reconciler without a cluster.
//!
//! [`InMemoryResourceClient`] keeps objects in a map, versions them the way
//! the API server does, records every call, and can be told to fail a given
//! operation. [`StaticDiscovery`] answers discovery from a fixed list.
//!
//! # Example
//!
//! ```ignore
//! use bestie_operator::testing::{ClientOp, InMemoryResourceClient};
//! use bestie_operator::client::ResourceKind;
//!
//! let client = InMemoryResourceClient::new();
//! client.fail(ClientOp::Create, ResourceKind::Service, "admission webhook denied");
//! // ... run a pass ...
//! assert!(client.mutations().is_empty());
//! ```

use crate::client::{
    ManagedKind, ResourceClient, ResourceKind, from_dynamic, object_key, to_dynamic,
};
use crate::discovery::ApiDiscovery;
use crate::error::{OperatorError, OperatorResult};
use async_trait::async_trait;
use kube::api::DynamicObject;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Client operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientOp {
    /// `get`.
    Get,
    /// `list`.
    List,
    /// `create`.
    Create,
    /// `update`.
    Update,
    /// `update_status`.
    UpdateStatus,
}

/// A call observed by [`InMemoryResourceClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCall {
    /// Operation.
    pub op: ClientOp,
    /// Kind addressed.
    pub kind: ResourceKind,
    /// Namespace addressed.
    pub namespace: String,
    /// Object name, or the label selector for `list`.
    pub target: String,
}

impl ClientCall {
    /// Whether the call writes to the store.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.op,
            ClientOp::Create | ClientOp::Update | ClientOp::UpdateStatus
        )
    }
}

/// Failure to return in place of a real result.
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    /// A transport or server error.
    Api(String),
    /// An optimistic concurrency conflict.
    Conflict,
}

type ObjectId = (ResourceKind, String, String);

/// Versioned in-memory object store implementing [`ResourceClient`].
#[derive(Default)]
pub struct InMemoryResourceClient {
    objects: RwLock<BTreeMap<ObjectId, DynamicObject>>,
    calls: RwLock<Vec<ClientCall>>,
    failures: RwLock<HashMap<(ClientOp, ResourceKind), InjectedFailure>>,
    version: AtomicU64,
}

impl InMemoryResourceClient {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, builder style.
    pub fn with_object<K: ManagedKind>(self, object: &K) -> Self {
        self.insert(object);
        self
    }

    /// Seed or overwrite an object without recording a call.
    ///
    /// Objects without a `resourceVersion` or `uid` are given one.
    pub fn insert<K: ManagedKind>(&self, object: &K) {
        let mut dynamic = to_dynamic(object).expect("seed object must serialize");
        let (namespace, name) =
            object_key(K::KIND, &dynamic).expect("seed object needs a namespace and name");
        if dynamic.metadata.uid.is_none() {
            let kind = K::KIND.as_str().to_lowercase();
            dynamic.metadata.uid = Some(format!("uid-{}-{}", kind, name));
        }
        dynamic.metadata.resource_version = Some(self.next_version());
        self.objects
            .write()
            .insert((K::KIND, namespace, name), dynamic);
    }

    /// Read an object without recording a call.
    pub fn object<K: ManagedKind>(&self, namespace: &str, name: &str) -> Option<K> {
        let objects = self.objects.read();
        objects
            .get(&(K::KIND, namespace.to_string(), name.to_string()))
            .cloned()
            .map(|o| from_dynamic(o).expect("stored object must decode"))
    }

    /// Whether an object exists.
    pub fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.objects
            .read()
            .contains_key(&(kind, namespace.to_string(), name.to_string()))
    }

    /// Remove an object, as if the platform had garbage collected it.
    pub fn remove(&self, kind: ResourceKind, namespace: &str, name: &str) {
        self.objects
            .write()
            .remove(&(kind, namespace.to_string(), name.to_string()));
    }

    /// Apply `f` to a stored object in place, bumping its version.
    pub fn modify<K: ManagedKind>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) {
        let mut object: K = self
            .object(namespace, name)
            .expect("object to modify must exist");
        f(&mut object);
        self.insert(&object);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.read().clone()
    }

    /// The write calls made so far, in order.
    pub fn mutations(&self) -> Vec<ClientCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Names of objects created for `kind`, in creation order.
    pub fn created(&self, kind: ResourceKind) -> Vec<String> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.op == ClientOp::Create && c.kind == kind)
            .map(|c| c.target.clone())
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    /// Make every `op` on `kind` fail with an API error until cleared.
    pub fn fail(&self, op: ClientOp, kind: ResourceKind, message: &str) {
        self.failures
            .write()
            .insert((op, kind), InjectedFailure::Api(message.to_string()));
    }

    /// Make every `op` on `kind` fail with a conflict until cleared.
    pub fn conflict(&self, op: ClientOp, kind: ResourceKind) {
        self.failures
            .write()
            .insert((op, kind), InjectedFailure::Conflict);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(
        &self,
        op: ClientOp,
        kind: ResourceKind,
        namespace: &str,
        target: &str,
    ) -> OperatorResult<()> {
        self.calls.write().push(ClientCall {
            op,
            kind,
            namespace: namespace.to_string(),
            target: target.to_string(),
        });

        match self.failures.read().get(&(op, kind)) {
            None => Ok(()),
            Some(InjectedFailure::Api(message)) => Err(OperatorError::ApiError(message.clone())),
            Some(InjectedFailure::Conflict) => Err(OperatorError::Conflict {
                kind: kind.to_string(),
                name: target.to_string(),
            }),
        }
    }

    /// Check the caller's resourceVersion against the stored one.
    fn check_version(
        kind: ResourceKind,
        name: &str,
        stored: &DynamicObject,
        incoming: &DynamicObject,
    ) -> OperatorResult<()> {
        match &incoming.metadata.resource_version {
            Some(version) if Some(version) != stored.metadata.resource_version.as_ref() => {
                Err(OperatorError::Conflict {
                    kind: kind.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Parse an equality-only label selector.
fn parse_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter(|term| !term.trim().is_empty())
        .filter_map(|term| {
            let (key, value) = term.split_once("==").or_else(|| term.split_once('='))?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn matches_selector(object: &DynamicObject, selector: &[(String, String)]) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

#[async_trait]
impl ResourceClient for InMemoryResourceClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<Option<DynamicObject>> {
        self.record(ClientOp::Get, kind, namespace, name)?;
        Ok(self
            .objects
            .read()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<DynamicObject>> {
        self.record(ClientOp::List, kind, namespace, label_selector)?;
        let selector = parse_selector(label_selector);
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, object)| object)
            .filter(|object| matches_selector(object, &selector))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject> {
        let (namespace, name) = object_key(kind, object)?;
        self.record(ClientOp::Create, kind, &namespace, &name)?;

        let mut objects = self.objects.write();
        let id = (kind, namespace.clone(), name.clone());
        if objects.contains_key(&id) {
            return Err(OperatorError::ApiError(format!(
                "{} {}/{} already exists",
                kind, namespace, name
            )));
        }

        let mut created = object.clone();
        created.metadata.uid = Some(format!("uid-{}-{}", kind.as_str().to_lowercase(), name));
        created.metadata.resource_version = Some(self.next_version());
        objects.insert(id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject> {
        let (namespace, name) = object_key(kind, object)?;
        self.record(ClientOp::Update, kind, &namespace, &name)?;

        let mut objects = self.objects.write();
        let id = (kind, namespace.clone(), name.clone());
        let stored = objects.get(&id).ok_or_else(|| OperatorError::NotFound {
            kind: kind.to_string(),
            name: name.clone(),
            namespace: namespace.clone(),
        })?;
        Self::check_version(kind, &name, stored, object)?;

        // Updates through the main resource never touch status.
        let mut updated = object.clone();
        match stored.data.get("status") {
            Some(status) => updated.data["status"] = status.clone(),
            None => {
                if let Some(map) = updated.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.resource_version = Some(self.next_version());
        objects.insert(id, updated.clone());
        Ok(updated)
    }

    async fn update_status(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> OperatorResult<DynamicObject> {
        let (namespace, name) = object_key(kind, object)?;
        self.record(ClientOp::UpdateStatus, kind, &namespace, &name)?;

        let mut objects = self.objects.write();
        let id = (kind, namespace.clone(), name.clone());
        let stored = objects.get(&id).ok_or_else(|| OperatorError::NotFound {
            kind: kind.to_string(),
            name: name.clone(),
            namespace: namespace.clone(),
        })?;
        Self::check_version(kind, &name, stored, object)?;

        let mut updated = stored.clone();
        updated.data["status"] = object
            .data
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        updated.metadata.resource_version = Some(self.next_version());
        objects.insert(id, updated.clone());
        Ok(updated)
    }
}

/// [`ApiDiscovery`] with a fixed answer, counting probes.
pub struct StaticDiscovery {
    served: HashSet<(String, String)>,
    failure: Option<String>,
    probes: AtomicUsize,
}

impl StaticDiscovery {
    /// Serve exactly the given `(group, version)` pairs.
    pub fn serving(apis: &[(&str, &str)]) -> Self {
        Self {
            served: apis
                .iter()
                .map(|(g, v)| (g.to_string(), v.to_string()))
                .collect(),
            failure: None,
            probes: AtomicUsize::new(0),
        }
    }

    /// Fail every probe with an API error.
    pub fn failing(message: &str) -> Self {
        Self {
            served: HashSet::new(),
            failure: Some(message.to_string()),
            probes: AtomicUsize::new(0),
        }
    }

    /// Number of probes answered so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiDiscovery for StaticDiscovery {
    async fn supports_api(&self, group: &str, version: &str) -> OperatorResult<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(OperatorError::ApiError(message.clone())),
            None => Ok(self
                .served
                .contains(&(group.to_string(), version.to_string()))),
        }
    }
}
