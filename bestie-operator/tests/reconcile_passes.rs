//! Integration tests for reconciliation passes.
//!
//! Each test drives the controller against an in-memory cluster and checks
//! which writes a pass makes.

mod common;

use bestie_operator::client::ResourceKind;
use bestie_operator::controller::{ReconcileAction, deployed_version};
use bestie_operator::crd::{Bestie, BestieStatus};
use bestie_operator::testing::{ClientCall, ClientOp};
use k8s_openapi::api::apps::v1::Deployment;
use std::time::Duration;

use common::{NAME, NS, bestie, harness};

fn kinds(calls: &[ClientCall]) -> Vec<(ClientOp, ResourceKind)> {
    calls.iter().map(|c| (c.op, c.kind)).collect()
}

#[tokio::test]
async fn fresh_bestie_converges_over_three_passes() {
    let h = harness(&bestie(3, "1.3"));

    // Pass 1: only the Deployment is created.
    assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Requeue);
    assert_eq!(
        kinds(&h.client.mutations()),
        vec![(ClientOp::Create, ResourceKind::Deployment)]
    );
    assert_eq!(h.client.created(ResourceKind::Deployment), vec!["bestie-app"]);
    h.client.clear_calls();

    // Pass 2: the Deployment exists but nothing is ready yet.
    assert_eq!(
        h.reconcile().await.unwrap(),
        ReconcileAction::RequeueAfter(Duration::from_secs(15))
    );
    assert!(h.client.mutations().is_empty());

    // Pass 3: ready at the desired version.
    h.set_ready(3);
    h.start_pods(3, "1.3");
    h.client.clear_calls();
    assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Done);
    assert_eq!(
        kinds(&h.client.mutations()),
        vec![
            (ClientOp::UpdateStatus, ResourceKind::Bestie),
            (ClientOp::Create, ResourceKind::Service),
            (ClientOp::Create, ResourceKind::HorizontalPodAutoscaler),
            (ClientOp::Create, ResourceKind::Ingress),
        ]
    );
    assert_eq!(h.client.created(ResourceKind::Service), vec!["bestie-service"]);
    assert_eq!(
        h.client.created(ResourceKind::HorizontalPodAutoscaler),
        vec!["bestie-hpa"]
    );
    assert_eq!(h.client.created(ResourceKind::Ingress), vec!["bestie-ingress"]);

    let stored: Bestie = h.client.object(NS, NAME).unwrap();
    assert_eq!(
        stored.status,
        Some(BestieStatus {
            app_version: "1.3".into(),
            pods: vec![
                "bestie-app-1.3-0".into(),
                "bestie-app-1.3-1".into(),
                "bestie-app-1.3-2".into(),
            ],
        })
    );
}

#[tokio::test]
async fn second_pass_without_changes_writes_nothing() {
    let h = harness(&bestie(3, "1.3"));
    h.converge(3, "1.3").await;

    assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Done);
    assert!(h.client.mutations().is_empty());
}

#[tokio::test]
async fn autoscaler_owns_replicas_once_present() {
    let h = harness(&bestie(3, "1.3"));
    h.converge(3, "1.3").await;

    h.edit(|spec| spec.size = 5);
    h.client.clear_calls();
    h.reconcile().await.unwrap();

    assert!(h.client.mutations().is_empty());
    let deployment: Deployment = h.client.object(NS, "bestie-app").unwrap();
    assert_eq!(deployment.spec.unwrap().replicas, Some(3));
}

#[tokio::test]
async fn replicas_follow_size_without_autoscaler() {
    let h = harness(&bestie(3, "1.3"));
    h.reconcile().await.unwrap();

    h.edit(|spec| spec.size = 5);
    h.client.clear_calls();
    assert_eq!(
        h.reconcile().await.unwrap(),
        ReconcileAction::RequeueAfter(Duration::from_secs(15))
    );

    assert_eq!(
        kinds(&h.client.mutations()),
        vec![(ClientOp::Update, ResourceKind::Deployment)]
    );
    let deployment: Deployment = h.client.object(NS, "bestie-app").unwrap();
    assert_eq!(deployment.spec.unwrap().replicas, Some(5));
}

#[tokio::test]
async fn unready_deployment_blocks_upgrade_and_status() {
    let h = harness(&bestie(3, "1.3"));
    h.reconcile().await.unwrap();
    h.set_ready(0);
    h.start_pods(1, "1.3");

    h.edit(|spec| spec.version = "1.4".into());
    h.client.clear_calls();
    assert_eq!(
        h.reconcile().await.unwrap(),
        ReconcileAction::RequeueAfter(Duration::from_secs(15))
    );

    assert!(h.client.mutations().is_empty());
    let deployment: Deployment = h.client.object(NS, "bestie-app").unwrap();
    assert_eq!(deployed_version(&deployment).as_deref(), Some("1.3"));
}

#[tokio::test]
async fn new_version_upgrades_without_touching_status() {
    let h = harness(&bestie(3, "1.3"));
    h.converge(3, "1.3").await;

    h.edit(|spec| spec.version = "1.4".into());
    h.client.clear_calls();
    assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Done);

    // Pods still run 1.3, so the observed status is unchanged.
    assert_eq!(
        kinds(&h.client.mutations()),
        vec![(ClientOp::Update, ResourceKind::Deployment)]
    );
    let deployment: Deployment = h.client.object(NS, "bestie-app").unwrap();
    assert_eq!(deployed_version(&deployment).as_deref(), Some("1.4"));
    let stored: Bestie = h.client.object(NS, NAME).unwrap();
    assert_eq!(stored.status.unwrap().app_version, "1.3");
}

#[tokio::test]
async fn empty_version_settles_on_the_bare_image() {
    let h = harness(&bestie(1, ""));
    h.converge(1, "").await;

    for _ in 0..3 {
        assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Done);
    }
    assert!(h.client.mutations().is_empty());
}

#[tokio::test]
async fn tagged_image_settles_on_the_desired_version() {
    let mut tagged = bestie(1, "1.3");
    tagged.spec.image = "quay.io/mkong/bestiev2:latest".into();
    let h = harness(&tagged);
    h.converge(1, "1.3").await;

    for _ in 0..3 {
        assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Done);
    }
    assert!(h.client.mutations().is_empty());
    let deployment: Deployment = h.client.object(NS, "bestie-app").unwrap();
    assert_eq!(deployed_version(&deployment).as_deref(), Some("1.3"));
}

#[tokio::test]
async fn upgrade_error_stops_status_and_exposure() {
    let h = harness(&bestie(3, "1.3"));
    h.converge(3, "1.3").await;

    h.edit(|spec| spec.version = "1.4".into());
    h.start_pods(1, "1.4");
    h.client.remove(ResourceKind::Service, NS, "bestie-service");
    h.client.fail(ClientOp::Update, ResourceKind::Deployment, "admission denied");

    assert!(h.reconcile().await.is_err());
    let mutations = kinds(&h.client.mutations());
    assert!(!mutations.contains(&(ClientOp::UpdateStatus, ResourceKind::Bestie)));
    assert!(h.client.created(ResourceKind::Service).is_empty());
    let stored: Bestie = h.client.object(NS, NAME).unwrap();
    assert_eq!(stored.status.unwrap().app_version, "1.3");
}

#[tokio::test]
async fn status_follows_the_rollout() {
    let h = harness(&bestie(3, "1.3"));
    h.converge(3, "1.3").await;

    h.start_pods(4, "1.4");
    h.reconcile().await.unwrap();

    let stored: Bestie = h.client.object(NS, NAME).unwrap();
    let status = stored.status.unwrap();
    assert_eq!(status.app_version, "1.4");
    assert_eq!(status.pods.len(), 7);
}

#[tokio::test]
async fn deleted_bestie_is_done() {
    let h = harness(&bestie(1, "1.3"));
    h.client.remove(ResourceKind::Bestie, NS, NAME);

    assert_eq!(h.reconcile().await.unwrap(), ReconcileAction::Done);
    assert!(h.client.mutations().is_empty());
}

#[tokio::test]
async fn missing_objects_are_recreated() {
    let h = harness(&bestie(3, "1.3"));
    h.converge(3, "1.3").await;

    h.client.remove(ResourceKind::Service, NS, "bestie-service");
    h.reconcile().await.unwrap();

    assert_eq!(h.client.created(ResourceKind::Service), vec!["bestie-service"]);
    assert_eq!(h.client.mutations().len(), 1);
}
