//! Bestie controller.
//!
//! Runs the step plan for one Bestie per call and turns the outcome into a
//! [`ReconcileAction`]. The steps are create-if-absent or compare-and-update
//! operations, so an interrupted pass is finished by the next one.

use super::chain::{SubReconciler, SubReconcilerChain, WorkingCopy};
use super::converge::{Ensured, ensure};
use super::database::{DatabaseSeedJobReconciler, PostgresClusterReconciler};
use super::plan::{StepId, StepPlan};
use super::readiness::is_running;
use super::status::sync_status;
use super::upgrade::{ImageUpgrader, OperandUpgrader};
use super::{ReconcileAction, ReconcileSettings};
use crate::client::{ResourceClient, ResourceClientExt, ResourceKind, from_dynamic};
use crate::crd::Bestie;
use crate::discovery::CapabilityDetector;
use crate::error::{OperatorError, OperatorResult};
use crate::resources::{BuiltinRenderer, ManifestRenderer, Template};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;

/// State carried between the steps of one pass.
struct Pass {
    bestie: Bestie,
    namespace: String,
    name: String,
    deployment: Option<Deployment>,
    requeue: bool,
}

impl Pass {
    fn deployment(&self) -> OperatorResult<&Deployment> {
        self.deployment.as_ref().ok_or_else(|| {
            OperatorError::InvalidConfig(
                "step plan runs a Deployment step before the workload step".into(),
            )
        })
    }
}

enum Flow {
    Continue,
    Return(ReconcileAction),
}

/// Reconciles Bestie resources.
pub struct BestieController {
    client: Arc<dyn ResourceClient>,
    renderer: Arc<dyn ManifestRenderer>,
    capabilities: Arc<CapabilityDetector>,
    chain: SubReconcilerChain,
    upgrader: Arc<dyn OperandUpgrader>,
    plan: StepPlan,
    settings: ReconcileSettings,
}

impl BestieController {
    /// Start building a controller around `client` and `capabilities`.
    pub fn builder(
        client: Arc<dyn ResourceClient>,
        capabilities: Arc<CapabilityDetector>,
    ) -> BestieControllerBuilder {
        BestieControllerBuilder {
            client,
            capabilities,
            renderer: None,
            sub_reconcilers: None,
            upgrader: None,
            plan: None,
            settings: ReconcileSettings::default(),
        }
    }

    /// Timing settings in use.
    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    /// Platform capabilities seen by this controller.
    pub fn capabilities(&self) -> &CapabilityDetector {
        &self.capabilities
    }

    /// Run one reconciliation pass for the Bestie `namespace/name`.
    ///
    /// A Bestie that no longer exists is done; its objects are removed by
    /// owner reference garbage collection.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> OperatorResult<ReconcileAction> {
        tracing::info!(name = %name, namespace = %namespace, "Reconciling Bestie");

        let Some(bestie) = self.client.get_typed::<Bestie>(namespace, name).await? else {
            tracing::info!(
                name = %name,
                namespace = %namespace,
                "Bestie not found, assuming deleted"
            );
            return Ok(ReconcileAction::Done);
        };

        let mut pass = Pass {
            bestie,
            namespace: namespace.to_string(),
            name: name.to_string(),
            deployment: None,
            requeue: false,
        };

        for &step in self.plan.steps() {
            tracing::debug!(name = %name, step = %step, "Running step");
            match self.run_step(step, &mut pass).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(action)) => {
                    tracing::debug!(
                        name = %name,
                        step = %step,
                        action = ?action,
                        "Pass ended early"
                    );
                    return Ok(action);
                }
                Err(e) => {
                    tracing::warn!(name = %name, step = %step, error = %e, "Step failed");
                    return Err(e);
                }
            }
        }

        if pass.requeue {
            Ok(ReconcileAction::Requeue)
        } else {
            tracing::info!(name = %name, "Bestie reconciled");
            Ok(ReconcileAction::Done)
        }
    }

    async fn run_step(&self, step: StepId, pass: &mut Pass) -> OperatorResult<Flow> {
        match step {
            StepId::SubReconcilers => {
                let mut working = WorkingCopy::new(&pass.bestie);
                pass.requeue |= self.chain.run(&mut working).await?;
                Ok(Flow::Continue)
            }
            StepId::Workload => self.ensure_workload(pass).await,
            StepId::Replicas => self.converge_replicas(pass).await,
            StepId::Readiness => {
                if is_running(self.client.as_ref(), &pass.bestie).await? {
                    return Ok(Flow::Continue);
                }
                tracing::info!(
                    name = %pass.name,
                    delay_secs = self.settings.readiness_delay.as_secs(),
                    "Deployment has no ready replica yet"
                );
                Ok(Flow::Return(ReconcileAction::RequeueAfter(
                    self.settings.readiness_delay,
                )))
            }
            StepId::Upgrade => {
                let upgraded = self
                    .upgrader
                    .upgrade(&pass.bestie, pass.deployment()?)
                    .await?;
                if let Some(deployment) = upgraded {
                    pass.deployment = Some(deployment);
                }
                Ok(Flow::Continue)
            }
            StepId::Status => {
                sync_status(self.client.as_ref(), &pass.bestie).await?;
                Ok(Flow::Continue)
            }
            StepId::Service => self.ensure_object(Template::Service, pass).await,
            StepId::Autoscaler => self.ensure_object(Template::Autoscaler, pass).await,
            StepId::Exposure => {
                let template = if self.capabilities.route_api_available().await {
                    Template::Route
                } else {
                    Template::Ingress
                };
                self.ensure_object(template, pass).await
            }
        }
    }

    /// Create the Deployment when absent. A new Deployment ends the pass;
    /// the following steps need its live state.
    async fn ensure_workload(&self, pass: &mut Pass) -> OperatorResult<Flow> {
        let ensured = ensure(
            self.client.as_ref(),
            self.renderer.as_ref(),
            Template::Deployment,
            &pass.bestie,
        )
        .await?;

        match ensured {
            Ensured::Created(_) => {
                tracing::info!(
                    name = %pass.name,
                    namespace = %pass.namespace,
                    "Created Deployment"
                );
                Ok(Flow::Return(ReconcileAction::Requeue))
            }
            Ensured::Existing(object) => {
                pass.deployment = Some(from_dynamic(object)?);
                Ok(Flow::Continue)
            }
        }
    }

    /// Keep replicas at `spec.size` unless an autoscaler owns them.
    async fn converge_replicas(&self, pass: &mut Pass) -> OperatorResult<Flow> {
        let hpa_name = Template::Autoscaler.object_name(&pass.name);
        let autoscaled = self
            .client
            .get(ResourceKind::HorizontalPodAutoscaler, &pass.namespace, &hpa_name)
            .await?
            .is_some();
        if autoscaled {
            tracing::debug!(name = %pass.name, "Autoscaler present, leaving replicas alone");
            return Ok(Flow::Continue);
        }

        let desired = pass.bestie.spec.size;
        let deployment = pass.deployment()?;
        let current = deployment.spec.as_ref().and_then(|s| s.replicas);
        if current == Some(desired) {
            return Ok(Flow::Continue);
        }

        tracing::info!(
            name = %pass.name,
            from = current.unwrap_or(1),
            to = desired,
            "Scaling Deployment"
        );
        let mut scaled = deployment.clone();
        if let Some(spec) = scaled.spec.as_mut() {
            spec.replicas = Some(desired);
        }
        pass.deployment = Some(self.client.update_typed(&scaled).await?);
        Ok(Flow::Continue)
    }

    async fn ensure_object(&self, template: Template, pass: &Pass) -> OperatorResult<Flow> {
        let ensured = ensure(
            self.client.as_ref(),
            self.renderer.as_ref(),
            template,
            &pass.bestie,
        )
        .await?;
        if ensured.created() {
            tracing::info!(
                name = %pass.name,
                kind = %template.kind(),
                "Created exposure object"
            );
        }
        Ok(Flow::Continue)
    }

    /// Map an engine outcome onto a runtime [`Action`].
    pub fn to_action(&self, action: ReconcileAction) -> Action {
        match action {
            ReconcileAction::Done => Action::await_change(),
            ReconcileAction::Requeue => Action::requeue(self.settings.requeue_interval),
            ReconcileAction::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Builder for [`BestieController`].
pub struct BestieControllerBuilder {
    client: Arc<dyn ResourceClient>,
    capabilities: Arc<CapabilityDetector>,
    renderer: Option<Arc<dyn ManifestRenderer>>,
    sub_reconcilers: Option<Vec<Box<dyn SubReconciler>>>,
    upgrader: Option<Arc<dyn OperandUpgrader>>,
    plan: Option<StepPlan>,
    settings: ReconcileSettings,
}

impl BestieControllerBuilder {
    /// Use a different manifest renderer.
    pub fn renderer(mut self, renderer: Arc<dyn ManifestRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Replace the default database sub-reconcilers.
    pub fn sub_reconcilers(mut self, units: Vec<Box<dyn SubReconciler>>) -> Self {
        self.sub_reconcilers = Some(units);
        self
    }

    /// Use a different upgrade mechanism.
    pub fn upgrader(mut self, upgrader: Arc<dyn OperandUpgrader>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    /// Run a custom step plan.
    pub fn plan(mut self, plan: StepPlan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Timing settings.
    pub fn settings(mut self, settings: ReconcileSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the controller.
    pub fn build(self) -> OperatorResult<BestieController> {
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(BuiltinRenderer) as Arc<dyn ManifestRenderer>);
        let units = self.sub_reconcilers.unwrap_or_else(|| {
            vec![
                Box::new(PostgresClusterReconciler::new(
                    self.client.clone(),
                    renderer.clone(),
                )) as Box<dyn SubReconciler>,
                Box::new(DatabaseSeedJobReconciler::new(
                    self.client.clone(),
                    renderer.clone(),
                )),
            ]
        });
        let upgrader = self.upgrader.unwrap_or_else(|| {
            Arc::new(ImageUpgrader::new(self.client.clone())) as Arc<dyn OperandUpgrader>
        });
        let plan = match self.plan {
            Some(plan) => plan,
            None => StepPlan::standard()?,
        };

        let chain = SubReconcilerChain::new(units);
        tracing::debug!(
            steps = ?plan.steps(),
            sub_reconcilers = ?chain.names(),
            "Built Bestie controller"
        );

        Ok(BestieController {
            client: self.client,
            renderer,
            capabilities: self.capabilities,
            chain,
            upgrader,
            plan,
            settings: self.settings,
        })
    }
}

/// Reconcile entry point for [`kube::runtime::Controller`].
pub async fn reconcile(
    bestie: Arc<Bestie>,
    controller: Arc<BestieController>,
) -> OperatorResult<Action> {
    let name = bestie.name_any();
    let namespace = bestie
        .namespace()
        .ok_or_else(|| OperatorError::InvalidConfig(format!("Bestie {} must be namespaced", name)))?;

    let action = controller.reconcile(&namespace, &name).await?;
    Ok(controller.to_action(action))
}

/// Retry delay for a failed pass.
pub fn error_delay(error: &OperatorError) -> Duration {
    if error.is_conflict() {
        return Duration::from_secs(1);
    }
    match error {
        OperatorError::KubeError(_) | OperatorError::ApiError(_) | OperatorError::NotFound { .. } => {
            Duration::from_secs(5)
        }
        OperatorError::ReconcileError { .. } => {
            Duration::from_secs(15)
        }
        OperatorError::InvalidConfig(_) | OperatorError::SerializationError(_) => {
            Duration::from_secs(60)
        }
        OperatorError::Conflict { .. } => Duration::from_secs(1),
    }
}

/// Error policy for [`kube::runtime::Controller`].
pub fn error_policy(
    bestie: Arc<Bestie>,
    error: &OperatorError,
    _controller: Arc<BestieController>,
) -> Action {
    let delay = error_delay(error);
    tracing::error!(
        name = %bestie.name_any(),
        namespace = %bestie.namespace().unwrap_or_default(),
        error = %error,
        retry_secs = delay.as_secs(),
        "Reconciliation error"
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryResourceClient, StaticDiscovery};

    fn controller() -> BestieController {
        let client = Arc::new(InMemoryResourceClient::new());
        let discovery = Arc::new(StaticDiscovery::serving(&[]));
        let capabilities = Arc::new(CapabilityDetector::new(discovery));
        BestieController::builder(client, capabilities).build().unwrap()
    }

    #[test]
    fn default_chain_manages_the_database() {
        assert_eq!(
            controller().chain.names(),
            vec!["postgres-cluster", "database-seed-job"]
        );
    }

    #[test]
    fn actions_follow_settings() {
        let controller = controller();
        assert_eq!(controller.to_action(ReconcileAction::Done), Action::await_change());
        assert_eq!(
            controller.to_action(ReconcileAction::Requeue),
            Action::requeue(controller.settings().requeue_interval)
        );
        assert_eq!(
            controller.to_action(ReconcileAction::RequeueAfter(Duration::from_secs(15))),
            Action::requeue(Duration::from_secs(15))
        );
    }

    #[test]
    fn error_delays_depend_on_category() {
        let conflict = OperatorError::Conflict {
            kind: "Deployment".into(),
            name: "bestie-app".into(),
        };
        assert_eq!(error_delay(&conflict), Duration::from_secs(1));
        assert_eq!(
            error_delay(&OperatorError::ApiError("reset".into())),
            Duration::from_secs(5)
        );
        let failed = OperatorError::ReconcileError {
            kind: "Job".into(),
            name: "bestie-seed".into(),
            cause: "failed".into(),
        };
        assert_eq!(error_delay(&failed), Duration::from_secs(15));
        assert_eq!(
            error_delay(&OperatorError::InvalidConfig("bad".into())),
            Duration::from_secs(60)
        );
    }
}
