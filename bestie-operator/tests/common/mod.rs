//! Common test utilities for integration tests.

#![allow(dead_code)]

use bestie_operator::client::ResourceClient;
use bestie_operator::controller::{BestieController, ReconcileAction, SubReconciler};
use bestie_operator::crd::{Bestie, BestieSpec, ROUTE_GROUP, ROUTE_VERSION};
use bestie_operator::discovery::CapabilityDetector;
use bestie_operator::error::OperatorResult;
use bestie_operator::resources::{APP_CONTAINER, selector_labels};
use bestie_operator::testing::{InMemoryResourceClient, StaticDiscovery};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

/// Namespace every test Bestie lives in.
pub const NS: &str = "pets";

/// Name of the test Bestie.
pub const NAME: &str = "bestie";

/// A Bestie with the given size and version.
pub fn bestie(size: i32, version: &str) -> Bestie {
    let mut bestie = Bestie::new(
        NAME,
        BestieSpec {
            size,
            version: version.to_string(),
            ..Default::default()
        },
    );
    bestie.metadata.namespace = Some(NS.to_string());
    bestie
}

/// A Running application pod on image tag `tag`.
pub fn running_pod(name: &str, tag: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            labels: Some(selector_labels(&bestie(1, tag))),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: APP_CONTAINER.to_string(),
                image: Some(format!("quay.io/mkong/bestiev2:{}", tag)),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// A controller wired to in-memory collaborators.
pub struct Harness {
    pub client: Arc<InMemoryResourceClient>,
    pub discovery: Arc<StaticDiscovery>,
    pub controller: BestieController,
}

impl Harness {
    /// Run one pass for the test Bestie.
    pub async fn reconcile(&self) -> OperatorResult<ReconcileAction> {
        self.controller.reconcile(NS, NAME).await
    }

    /// Report `ready` ready replicas on the Deployment.
    pub fn set_ready(&self, ready: i32) {
        self.client.modify::<Deployment>(NS, "bestie-app", |d| {
            d.status = Some(DeploymentStatus {
                replicas: Some(ready),
                ready_replicas: Some(ready),
                ..Default::default()
            });
        });
    }

    /// Start `count` Running pods on `tag`.
    pub fn start_pods(&self, count: usize, tag: &str) {
        for i in 0..count {
            self.client
                .insert(&running_pod(&format!("bestie-app-{}-{}", tag, i), tag));
        }
    }

    /// Change the stored Bestie's spec.
    pub fn edit(&self, f: impl FnOnce(&mut BestieSpec)) {
        self.client
            .modify::<Bestie>(NS, NAME, |bestie| f(&mut bestie.spec));
    }

    /// Drive a fresh Bestie to its steady state, then forget the calls.
    pub async fn converge(&self, ready: i32, tag: &str) {
        self.reconcile().await.expect("first pass");
        self.set_ready(ready);
        self.start_pods(ready as usize, tag);
        assert_eq!(self.reconcile().await.expect("converging pass"), ReconcileAction::Done);
        self.client.clear_calls();
    }
}

/// Harness with no sub-reconcilers and no Route API.
pub fn harness(bestie: &Bestie) -> Harness {
    build(bestie, StaticDiscovery::serving(&[]), vec![])
}

/// Harness on a cluster serving the OpenShift Route API.
pub fn openshift_harness(bestie: &Bestie) -> Harness {
    build(
        bestie,
        StaticDiscovery::serving(&[(ROUTE_GROUP, ROUTE_VERSION)]),
        vec![],
    )
}

/// Harness with the given discovery and sub-reconcilers.
pub fn build(
    bestie: &Bestie,
    discovery: StaticDiscovery,
    units: Vec<Box<dyn SubReconciler>>,
) -> Harness {
    let client = Arc::new(InMemoryResourceClient::new().with_object(bestie));
    let discovery = Arc::new(discovery);
    let capabilities = Arc::new(CapabilityDetector::new(discovery.clone()));
    let controller = BestieController::builder(client.clone(), capabilities)
        .sub_reconcilers(units)
        .build()
        .expect("standard plan builds");

    Harness {
        client,
        discovery,
        controller,
    }
}

/// Harness using the default database sub-reconcilers.
pub fn database_harness(bestie: &Bestie) -> Harness {
    let client = Arc::new(InMemoryResourceClient::new().with_object(bestie));
    let discovery = Arc::new(StaticDiscovery::serving(&[]));
    let capabilities = Arc::new(CapabilityDetector::new(discovery.clone()));
    let resource_client: Arc<dyn ResourceClient> = client.clone();
    let controller = BestieController::builder(resource_client, capabilities)
        .build()
        .expect("standard plan builds");

    Harness {
        client,
        discovery,
        controller,
    }
}
