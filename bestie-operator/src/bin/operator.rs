//! Bestie Kubernetes Operator binary.
//!
//! Watches Bestie custom resources and the objects they own, and runs the
//! Bestie controller for each change.

use bestie_operator::client::KubeResourceClient;
use bestie_operator::config::OperatorConfig;
use bestie_operator::controller::{self, BestieController};
use bestie_operator::crd::{Bestie, Route};
use bestie_operator::discovery::{CapabilityDetector, KubeDiscovery};
use bestie_operator::telemetry::init_tracing;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::Controller;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    // Check for CRD generation mode
    if config.generate_crds {
        generate_crds()?;
        return Ok(());
    }

    init_tracing(config.log_format, &config.log_filter())?;
    let settings = config.reconcile_settings()?;

    tracing::info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        concurrency = config.concurrency,
        "Starting Bestie Kubernetes Operator"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let capabilities = Arc::new(CapabilityDetector::new(Arc::new(KubeDiscovery::new(
        client.clone(),
    ))));
    let route_api = capabilities.route_api_available().await;
    tracing::info!(route_api, "Detected platform capabilities");

    let engine = BestieController::builder(
        Arc::new(KubeResourceClient::new(client.clone())),
        capabilities,
    )
    .settings(settings)
    .build()?;

    let besties: Api<Bestie> = scoped(&client, config.namespace.as_deref());
    let deployments: Api<Deployment> = scoped(&client, config.namespace.as_deref());
    let services: Api<Service> = scoped(&client, config.namespace.as_deref());
    let autoscalers: Api<HorizontalPodAutoscaler> = scoped(&client, config.namespace.as_deref());
    let ingresses: Api<Ingress> = scoped(&client, config.namespace.as_deref());

    let mut bestie_controller = Controller::new(besties, WatcherConfig::default())
        .with_config(ControllerConfig::default().concurrency(config.concurrency))
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .owns(autoscalers, WatcherConfig::default())
        .owns(ingresses, WatcherConfig::default());
    if route_api {
        let routes: Api<Route> = scoped(&client, config.namespace.as_deref());
        bestie_controller = bestie_controller.owns(routes, WatcherConfig::default());
    }

    bestie_controller
        .shutdown_on_signal()
        .run(controller::reconcile, controller::error_policy, Arc::new(engine))
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(
                        bestie = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or_default(),
                        ?action,
                        "Reconciled Bestie"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Bestie controller stream error");
                }
            }
        })
        .await;

    tracing::info!("Bestie controller stopped");
    Ok(())
}

/// Namespaced API when a namespace is configured, cluster-wide otherwise.
fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Generate CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&Bestie::crd())?);
    Ok(())
}
