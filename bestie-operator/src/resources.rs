//! Manifest templates for the objects a Bestie owns.
//!
//! Every managed object is named `<bestie>-<role>` (see [`Template::object_name`])
//! and carries the standard `app.kubernetes.io` labels plus a controller
//! owner reference to its Bestie, so the platform garbage collector removes
//! it when the Bestie is deleted.

use crate::client::{ResourceKind, to_dynamic};
use crate::crd::{
    Bestie, PostgresCluster, PostgresClusterSpec, PostgresInstanceSet, PostgresUser, Route,
    RoutePort, RouteSpec, RouteTargetReference, TlsConfig,
};
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v1::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec, PodTemplateSpec,
    Probe, SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Name of the application container.
pub const APP_CONTAINER: &str = "bestie";

/// Port the application listens on.
pub const APP_PORT: i32 = 8000;

/// Annotation carrying the database credentials Secret name between
/// sub-reconcilers.
pub const DATABASE_SECRET_ANNOTATION: &str = "pets.bestie.com/database-secret";

/// Instance label key, used to select the application's pods.
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// A named manifest template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    /// Application Deployment.
    Deployment,
    /// ClusterIP Service in front of the Deployment.
    Service,
    /// CPU based HorizontalPodAutoscaler.
    Autoscaler,
    /// Ingress for vanilla Kubernetes.
    Ingress,
    /// Route for OpenShift.
    Route,
    /// Crunchy PostgresCluster.
    PostgresCluster,
    /// Job that seeds the database.
    SeedJob,
}

impl Template {
    /// Role suffix of the rendered object's name.
    pub fn role(&self) -> &'static str {
        match self {
            Self::Deployment => "app",
            Self::Service => "service",
            Self::Autoscaler => "hpa",
            Self::Ingress => "ingress",
            Self::Route => "route",
            Self::PostgresCluster => "postgres",
            Self::SeedJob => "seed",
        }
    }

    /// Kind of the rendered object.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment => ResourceKind::Deployment,
            Self::Service => ResourceKind::Service,
            Self::Autoscaler => ResourceKind::HorizontalPodAutoscaler,
            Self::Ingress => ResourceKind::Ingress,
            Self::Route => ResourceKind::Route,
            Self::PostgresCluster => ResourceKind::PostgresCluster,
            Self::SeedJob => ResourceKind::Job,
        }
    }

    /// Derived object name, `<bestie>-<role>`.
    pub fn object_name(&self, bestie: &str) -> String {
        format!("{}-{}", bestie, self.role())
    }
}

/// Renders a template against a Bestie into a concrete object.
pub trait ManifestRenderer: Send + Sync {
    /// Render `template` for `bestie`.
    fn render(&self, template: Template, bestie: &Bestie) -> OperatorResult<DynamicObject>;
}

/// Renderer with the operator's compiled-in manifests.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRenderer;

impl ManifestRenderer for BuiltinRenderer {
    fn render(&self, template: Template, bestie: &Bestie) -> OperatorResult<DynamicObject> {
        match template {
            Template::Deployment => to_dynamic(&build_deployment(bestie)?),
            Template::Service => to_dynamic(&build_service(bestie)?),
            Template::Autoscaler => to_dynamic(&build_autoscaler(bestie)?),
            Template::Ingress => to_dynamic(&build_ingress(bestie)?),
            Template::Route => to_dynamic(&build_route(bestie)?),
            Template::PostgresCluster => to_dynamic(&build_postgres_cluster(bestie)?),
            Template::SeedJob => to_dynamic(&build_seed_job(bestie)?),
        }
    }
}

/// Labels shared by everything a Bestie owns.
pub fn labels(bestie: &Bestie) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "bestie".to_string()),
        (INSTANCE_LABEL.to_string(), bestie.name_any()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "bestie-operator".to_string(),
        ),
    ])
}

/// Labels that select the application's pods.
pub fn selector_labels(bestie: &Bestie) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "bestie".to_string()),
        (INSTANCE_LABEL.to_string(), bestie.name_any()),
    ])
}

/// Label selector string matching the application's pods.
pub fn pod_selector(bestie: &Bestie) -> String {
    selector_labels(bestie)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Name of the Secret holding the database connection URI.
///
/// Prefers the annotation recorded by the PostgresCluster sub-reconciler.
pub fn database_secret_name(bestie: &Bestie) -> String {
    bestie
        .annotations()
        .get(DATABASE_SECRET_ANNOTATION)
        .cloned()
        .unwrap_or_else(|| {
            PostgresCluster::user_secret_name(
                &Template::PostgresCluster.object_name(&bestie.name_any()),
                &bestie.name_any(),
            )
        })
}

fn metadata(bestie: &Bestie, template: Template) -> OperatorResult<ObjectMeta> {
    let name = bestie.name_any();
    let namespace = bestie.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Bestie {} must be namespaced", name))
    })?;
    let owner = bestie.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Bestie {} has no uid to own objects with", name))
    })?;

    Ok(ObjectMeta {
        name: Some(template.object_name(&name)),
        namespace: Some(namespace),
        labels: Some(labels(bestie)),
        owner_references: Some(vec![owner]),
        ..Default::default()
    })
}

fn database_url_env(bestie: &Bestie) -> EnvVar {
    EnvVar {
        name: "DATABASE_URL".to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: database_secret_name(bestie),
                key: "uri".to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the application Deployment.
pub fn build_deployment(bestie: &Bestie) -> OperatorResult<Deployment> {
    let selector = selector_labels(bestie);

    Ok(Deployment {
        metadata: metadata(bestie, Template::Deployment)?,
        spec: Some(DeploymentSpec {
            replicas: Some(bestie.spec.size),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(bestie)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: APP_CONTAINER.to_string(),
                        image: Some(bestie.spec.image_ref()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            container_port: APP_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        env: Some(vec![database_url_env(bestie)]),
                        readiness_probe: Some(Probe {
                            http_get: Some(HTTPGetAction {
                                path: Some("/".to_string()),
                                port: IntOrString::String("http".to_string()),
                                ..Default::default()
                            }),
                            initial_delay_seconds: Some(5),
                            period_seconds: Some(10),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the ClusterIP Service.
pub fn build_service(bestie: &Bestie) -> OperatorResult<Service> {
    Ok(Service {
        metadata: metadata(bestie, Template::Service)?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(bestie)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: APP_PORT,
                target_port: Some(IntOrString::String("http".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the HorizontalPodAutoscaler targeting the Deployment.
pub fn build_autoscaler(bestie: &Bestie) -> OperatorResult<HorizontalPodAutoscaler> {
    let min = bestie.spec.size.max(1);

    Ok(HorizontalPodAutoscaler {
        metadata: metadata(bestie, Template::Autoscaler)?,
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: Template::Deployment.object_name(&bestie.name_any()),
            },
            min_replicas: Some(min),
            max_replicas: bestie.spec.max_replicas.max(min),
            target_cpu_utilization_percentage: Some(50),
        }),
        ..Default::default()
    })
}

/// Build the Ingress routing `/` to the Service.
pub fn build_ingress(bestie: &Bestie) -> OperatorResult<Ingress> {
    Ok(Ingress {
        metadata: metadata(bestie, Template::Ingress)?,
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: Template::Service.object_name(&bestie.name_any()),
                                port: Some(ServiceBackendPort {
                                    name: Some("http".to_string()),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the edge-terminated OpenShift Route to the Service.
pub fn build_route(bestie: &Bestie) -> OperatorResult<Route> {
    let spec = RouteSpec {
        host: None,
        to: RouteTargetReference {
            kind: "Service".to_string(),
            name: Template::Service.object_name(&bestie.name_any()),
        },
        port: Some(RoutePort {
            target_port: "http".to_string(),
        }),
        tls: Some(TlsConfig {
            termination: "edge".to_string(),
            insecure_edge_termination_policy: Some("Redirect".to_string()),
        }),
    };

    let mut route = Route::new(&Template::Route.object_name(&bestie.name_any()), spec);
    route.metadata = metadata(bestie, Template::Route)?;
    Ok(route)
}

/// Build the PostgresCluster backing the application.
pub fn build_postgres_cluster(bestie: &Bestie) -> OperatorResult<PostgresCluster> {
    let storage = serde_json::json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": "1Gi" } }
    });

    let spec = PostgresClusterSpec {
        postgres_version: 14,
        instances: vec![PostgresInstanceSet {
            name: "instance1".to_string(),
            replicas: 1,
            data_volume_claim_spec: storage.clone(),
        }],
        backups: Some(serde_json::json!({
            "pgbackrest": {
                "repos": [{ "name": "repo1", "volume": { "volumeClaimSpec": storage } }]
            }
        })),
        users: vec![PostgresUser {
            name: bestie.name_any(),
            databases: vec![bestie.name_any()],
        }],
    };

    let mut cluster = PostgresCluster::new(
        &Template::PostgresCluster.object_name(&bestie.name_any()),
        spec,
    );
    cluster.metadata = metadata(bestie, Template::PostgresCluster)?;
    Ok(cluster)
}

/// Seed pods must stay out of the application pod selector.
fn seed_pod_labels(bestie: &Bestie) -> BTreeMap<String, String> {
    let mut labels = labels(bestie);
    labels.insert("app.kubernetes.io/name".to_string(), "bestie-seed".to_string());
    labels
}

/// Build the Job that seeds the application database.
pub fn build_seed_job(bestie: &Bestie) -> OperatorResult<Job> {
    Ok(Job {
        metadata: metadata(bestie, Template::SeedJob)?,
        spec: Some(JobSpec {
            backoff_limit: Some(4),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(seed_pod_labels(bestie)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "seed".to_string(),
                        image: Some(bestie.spec.image_ref()),
                        command: Some(vec!["flask".to_string(), "seed-db".to_string()]),
                        env: Some(vec![database_url_env(bestie)]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}
