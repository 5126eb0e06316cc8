//! Database sub-reconcilers.
//!
//! The Bestie application stores its data in a Crunchy PostgresCluster and
//! needs a one-off Job to seed it. Both are managed here, ahead of the
//! application Deployment.

use super::chain::{SubReconciler, WorkingCopy};
use super::converge::{Ensured, ensure};
use crate::client::{ResourceClient, ResourceClientExt, from_dynamic};
use crate::crd::PostgresCluster;
use crate::error::{OperatorError, OperatorResult};
use crate::resources::{DATABASE_SECRET_ANNOTATION, ManifestRenderer, Template};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use std::sync::Arc;

/// Creates the PostgresCluster and records its credentials Secret.
pub struct PostgresClusterReconciler {
    client: Arc<dyn ResourceClient>,
    renderer: Arc<dyn ManifestRenderer>,
}

impl PostgresClusterReconciler {
    /// Create the reconciler.
    pub fn new(client: Arc<dyn ResourceClient>, renderer: Arc<dyn ManifestRenderer>) -> Self {
        Self { client, renderer }
    }
}

#[async_trait]
impl SubReconciler for PostgresClusterReconciler {
    fn name(&self) -> &'static str {
        "postgres-cluster"
    }

    async fn reconcile(&self, working: &mut WorkingCopy) -> OperatorResult<bool> {
        let name = working.name();
        let ensured = ensure(
            self.client.as_ref(),
            self.renderer.as_ref(),
            Template::PostgresCluster,
            working.bestie(),
        )
        .await?;
        if ensured.created() {
            tracing::info!(name = %name, "Created PostgresCluster");
        }

        let cluster = Template::PostgresCluster.object_name(&name);
        working.annotate(
            DATABASE_SECRET_ANNOTATION,
            PostgresCluster::user_secret_name(&cluster, &name),
        );
        Ok(false)
    }
}

/// Runs the seed Job once the database accepts connections.
pub struct DatabaseSeedJobReconciler {
    client: Arc<dyn ResourceClient>,
    renderer: Arc<dyn ManifestRenderer>,
}

impl DatabaseSeedJobReconciler {
    /// Create the reconciler.
    pub fn new(client: Arc<dyn ResourceClient>, renderer: Arc<dyn ManifestRenderer>) -> Self {
        Self { client, renderer }
    }
}

/// Whether the Job has given up retrying.
fn seed_failed(job: &Job) -> bool {
    let Some(status) = &job.status else {
        return false;
    };

    let failed_condition = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    let backoff_limit = job
        .spec
        .as_ref()
        .and_then(|s| s.backoff_limit)
        .unwrap_or(6);

    failed_condition || status.failed.unwrap_or(0) > backoff_limit
}

#[async_trait]
impl SubReconciler for DatabaseSeedJobReconciler {
    fn name(&self) -> &'static str {
        "database-seed-job"
    }

    async fn reconcile(&self, working: &mut WorkingCopy) -> OperatorResult<bool> {
        let name = working.name();
        let namespace = working.namespace().ok_or_else(|| {
            OperatorError::InvalidConfig(format!("Bestie {} must be namespaced", name))
        })?;

        let cluster_name = Template::PostgresCluster.object_name(&name);
        let cluster: Option<PostgresCluster> =
            self.client.get_typed(&namespace, &cluster_name).await?;
        if !cluster.is_some_and(|c| c.has_ready_instance()) {
            tracing::info!(
                name = %name,
                cluster = %cluster_name,
                "Database has no ready instance yet, deferring seed job"
            );
            return Ok(true);
        }

        let job = match ensure(
            self.client.as_ref(),
            self.renderer.as_ref(),
            Template::SeedJob,
            working.bestie(),
        )
        .await?
        {
            Ensured::Created(_) => {
                tracing::info!(
                    name = %name,
                    secret = working.annotation(DATABASE_SECRET_ANNOTATION).unwrap_or_default(),
                    "Created database seed job"
                );
                return Ok(false);
            }
            Ensured::Existing(object) => from_dynamic::<Job>(object)?,
        };

        if seed_failed(&job) {
            return Err(OperatorError::ReconcileError {
                kind: "Job".into(),
                name: Template::SeedJob.object_name(&name),
                cause: "database seed job failed".into(),
            });
        }
        Ok(false)
    }
}
