//! Create-if-absent convergence for managed objects.

use crate::client::ResourceClient;
use crate::crd::Bestie;
use crate::error::{OperatorError, OperatorResult};
use crate::resources::{ManifestRenderer, Template};
use kube::ResourceExt;
use kube::api::DynamicObject;

/// Result of [`ensure`].
#[derive(Debug, Clone)]
pub enum Ensured {
    /// The object already existed; it is returned as read.
    Existing(DynamicObject),
    /// The object was absent and has been created.
    Created(DynamicObject),
}

impl Ensured {
    /// Whether this call created the object.
    pub fn created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }

    /// The live object.
    pub fn into_object(self) -> DynamicObject {
        match self {
            Ensured::Existing(o) | Ensured::Created(o) => o,
        }
    }
}

/// Make sure the object rendered from `template` exists for `bestie`.
///
/// An existing object is left as it is. A failed read is returned unchanged
/// and nothing is created.
pub async fn ensure(
    client: &dyn ResourceClient,
    renderer: &dyn ManifestRenderer,
    template: Template,
    bestie: &Bestie,
) -> OperatorResult<Ensured> {
    let namespace = bestie.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Bestie {} must be namespaced", bestie.name_any()))
    })?;
    let kind = template.kind();
    let name = template.object_name(&bestie.name_any());

    if let Some(existing) = client.get(kind, &namespace, &name).await? {
        tracing::debug!(kind = %kind, name = %name, "Object already exists");
        return Ok(Ensured::Existing(existing));
    }

    tracing::info!(kind = %kind, name = %name, namespace = %namespace, "Creating object");
    let object = renderer.render(template, bestie)?;
    let created = client.create(kind, &object).await?;
    Ok(Ensured::Created(created))
}
