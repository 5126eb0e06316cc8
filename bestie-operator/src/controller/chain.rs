//! Sub-reconciler chain.
//!
//! Sub-reconcilers manage supporting objects that are not part of the core
//! step plan, such as the database. They run in order against one
//! [`WorkingCopy`] so that later units see what earlier ones recorded.

use crate::crd::Bestie;
use crate::error::OperatorResult;
use async_trait::async_trait;
use kube::ResourceExt;

/// Pass-local copy of the Bestie shared by the sub-reconcilers.
///
/// Changes are never persisted; the copy is dropped when the chain ends.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    bestie: Bestie,
}

impl WorkingCopy {
    /// Deep copy of `bestie`.
    pub fn new(bestie: &Bestie) -> Self {
        Self {
            bestie: bestie.clone(),
        }
    }

    /// The current copy.
    pub fn bestie(&self) -> &Bestie {
        &self.bestie
    }

    /// Mutable access to the copy.
    pub fn bestie_mut(&mut self) -> &mut Bestie {
        &mut self.bestie
    }

    /// Bestie name.
    pub fn name(&self) -> String {
        self.bestie.name_any()
    }

    /// Bestie namespace, if set.
    pub fn namespace(&self) -> Option<String> {
        self.bestie.namespace()
    }

    /// Record a fact for later units.
    pub fn annotate(&mut self, key: &str, value: impl Into<String>) {
        self.bestie
            .annotations_mut()
            .insert(key.to_string(), value.into());
    }

    /// A fact recorded by an earlier unit.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.bestie.annotations().get(key).map(String::as_str)
    }
}

/// One independently developed unit of the chain.
#[async_trait]
pub trait SubReconciler: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Converge this unit's objects. `Ok(true)` asks for another pass.
    async fn reconcile(&self, working: &mut WorkingCopy) -> OperatorResult<bool>;
}

/// Ordered list of sub-reconcilers, built once per controller.
#[derive(Default)]
pub struct SubReconcilerChain {
    units: Vec<Box<dyn SubReconciler>>,
}

impl SubReconcilerChain {
    /// Chain running `units` in order.
    pub fn new(units: Vec<Box<dyn SubReconciler>>) -> Self {
        Self { units }
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the chain has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit names in run order.
    pub fn names(&self) -> Vec<&'static str> {
        self.units.iter().map(|u| u.name()).collect()
    }

    /// Run every unit against `working`.
    ///
    /// Stops at the first error and returns it unchanged. Objects created
    /// by units that already ran are left in place. Requeue requests are
    /// OR-ed across the units that ran.
    pub async fn run(&self, working: &mut WorkingCopy) -> OperatorResult<bool> {
        let mut requeue = false;
        for unit in &self.units {
            match unit.reconcile(working).await {
                Ok(again) => {
                    if again {
                        tracing::debug!(unit = unit.name(), "Sub-reconciler requested requeue");
                    }
                    requeue |= again;
                }
                Err(e) => {
                    tracing::warn!(
                        unit = unit.name(),
                        name = %working.name(),
                        error = %e,
                        "Sub-reconciler failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(requeue)
    }
}
