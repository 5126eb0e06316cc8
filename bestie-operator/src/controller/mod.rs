//! Kubernetes controller for Bestie resources.
//!
//! [`BestieController`] runs one reconciliation pass per call. The pass is a
//! [`StepPlan`] of convergence steps: the sub-reconciler chain, the
//! application Deployment and its replicas, a readiness gate, the version
//! upgrade, status, and the Service, autoscaler and Route or Ingress.
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use bestie_operator::controller::{self, BestieController};
//!
//! Controller::new(besties, watcher_config)
//!     .run(controller::reconcile, controller::error_policy, Arc::new(engine))
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod bestie;
mod chain;
mod converge;
mod database;
mod plan;
mod readiness;
mod status;
mod upgrade;

pub use bestie::{
    BestieController, BestieControllerBuilder, error_delay, error_policy, reconcile,
};
pub use chain::{SubReconciler, SubReconcilerChain, WorkingCopy};
pub use converge::{Ensured, ensure};
pub use database::{DatabaseSeedJobReconciler, PostgresClusterReconciler};
pub use plan::{StepId, StepPlan, StepSpec, standard_steps};
pub use readiness::{is_running, ready_replicas};
pub use status::{compute_status, sync_status};
pub use upgrade::{ImageUpgrader, OperandUpgrader, deployed_version, image_tag};

use std::time::Duration;

/// Outcome of a successful reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing left to do until something changes.
    Done,
    /// Run again after the configured requeue interval.
    Requeue,
    /// Run again after the given delay.
    RequeueAfter(Duration),
}

/// Timing used by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Wait before re-checking a Deployment with no ready replica.
    pub readiness_delay: Duration,
    /// Wait before a requested requeue.
    pub requeue_interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            readiness_delay: Duration::from_secs(15),
            requeue_interval: Duration::from_secs(5),
        }
    }
}
