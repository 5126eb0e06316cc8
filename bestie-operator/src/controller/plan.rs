//! Ordering of the convergence steps in one reconciliation pass.
//!
//! Steps declare the steps they must run after; [`StepPlan`] resolves the
//! declarations into a single execution order once, when the controller is
//! built.

use crate::error::{OperatorError, OperatorResult};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A convergence step of the Bestie reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepId {
    /// Run the sub-reconciler chain against a working copy.
    SubReconcilers,
    /// Ensure the application Deployment exists.
    Workload,
    /// Keep the Deployment's replica count at `spec.size` unless autoscaled.
    Replicas,
    /// Pause the pass until the Deployment reports a ready replica.
    Readiness,
    /// Roll the Deployment to `spec.version`.
    Upgrade,
    /// Persist the observed status.
    Status,
    /// Ensure the Service exists.
    Service,
    /// Ensure the HorizontalPodAutoscaler exists.
    Autoscaler,
    /// Ensure the Route or Ingress exists.
    Exposure,
}

impl StepId {
    /// Step name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubReconcilers => "sub-reconcilers",
            Self::Workload => "workload",
            Self::Replicas => "replicas",
            Self::Readiness => "readiness",
            Self::Upgrade => "upgrade",
            Self::Status => "status",
            Self::Service => "service",
            Self::Autoscaler => "autoscaler",
            Self::Exposure => "exposure",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step and the steps it must follow.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// The step.
    pub id: StepId,
    /// Steps that must complete first.
    pub after: Vec<StepId>,
}

impl StepSpec {
    /// A step with no predecessors.
    pub fn new(id: StepId) -> Self {
        Self { id, after: vec![] }
    }

    /// Declare predecessors.
    pub fn after(mut self, steps: &[StepId]) -> Self {
        self.after.extend_from_slice(steps);
        self
    }
}

/// The standard Bestie step declarations.
///
/// The workload must exist before replicas are managed, must be ready
/// before it is upgraded or its status read, and exposure objects are only
/// created for a running, up to date application.
pub fn standard_steps() -> Vec<StepSpec> {
    use StepId::*;

    vec![
        StepSpec::new(SubReconcilers),
        StepSpec::new(Workload).after(&[SubReconcilers]),
        StepSpec::new(Replicas).after(&[Workload]),
        StepSpec::new(Readiness).after(&[Replicas]),
        StepSpec::new(Upgrade).after(&[Readiness]),
        StepSpec::new(Status).after(&[Upgrade]),
        StepSpec::new(Service).after(&[Status]),
        StepSpec::new(Autoscaler).after(&[Status]),
        StepSpec::new(Exposure).after(&[Status]),
    ]
}

/// A validated execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    order: Vec<StepId>,
}

impl StepPlan {
    /// Resolve declarations into a topological order.
    ///
    /// Among steps whose predecessors are done, the one declared first runs
    /// first. Duplicate steps, unknown predecessors and cycles are rejected.
    pub fn new(specs: Vec<StepSpec>) -> OperatorResult<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.id, i).is_some() {
                return Err(OperatorError::InvalidConfig(format!(
                    "step {} is declared twice",
                    spec.id
                )));
            }
        }

        let mut pending = vec![0usize; specs.len()];
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.after {
                let &d = index.get(dep).ok_or_else(|| {
                    OperatorError::InvalidConfig(format!(
                        "step {} runs after undeclared step {}",
                        spec.id, dep
                    ))
                })?;
                pending[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(specs.len());
        while let Some(i) = ready.pop_first() {
            order.push(specs[i].id);
            for &next in &dependents[i] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != specs.len() {
            let stuck: Vec<&str> = specs
                .iter()
                .enumerate()
                .filter(|(i, _)| pending[*i] > 0)
                .map(|(_, s)| s.id.as_str())
                .collect();
            return Err(OperatorError::InvalidConfig(format!(
                "step dependencies form a cycle through: {}",
                stuck.join(", ")
            )));
        }

        Ok(Self { order })
    }

    /// The plan for [`standard_steps`].
    pub fn standard() -> OperatorResult<Self> {
        Self::new(standard_steps())
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[StepId] {
        &self.order
    }
}
