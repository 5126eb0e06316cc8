//! Operand upgrades.
//!
//! The application version is the tag of the `bestie` container image.
//! [`ImageUpgrader`] rolls the Deployment to `spec.version` by rewriting that
//! image; the Deployment controller does the rest.

use crate::client::{ResourceClient, ResourceClientExt};
use crate::crd::Bestie;
use crate::error::{OperatorError, OperatorResult};
use crate::resources::APP_CONTAINER;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use kube::ResourceExt;
use std::sync::Arc;

/// Tag of an image reference, ignoring any digest.
///
/// `quay.io:443/org/app:1.3` yields `1.3`; an untagged reference yields
/// `None`.
pub fn image_tag(image: &str) -> Option<&str> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
}

fn app_container(containers: &[Container]) -> Option<&Container> {
    containers
        .iter()
        .find(|c| c.name == APP_CONTAINER)
        .or_else(|| containers.first())
}

fn deployed_image(deployment: &Deployment) -> Option<&str> {
    let pod = deployment.spec.as_ref()?.template.spec.as_ref()?;
    app_container(&pod.containers)?.image.as_deref()
}

/// Version the Deployment's pod template currently asks for.
pub fn deployed_version(deployment: &Deployment) -> Option<String> {
    deployed_image(deployment)
        .and_then(image_tag)
        .map(str::to_string)
}

/// Moves a running Deployment to the Bestie's desired version.
#[async_trait]
pub trait OperandUpgrader: Send + Sync {
    /// Upgrade `deployment` if needed; returns the updated object when a
    /// write was made.
    async fn upgrade(
        &self,
        bestie: &Bestie,
        deployment: &Deployment,
    ) -> OperatorResult<Option<Deployment>>;
}

/// [`OperandUpgrader`] that rewrites the application image tag.
pub struct ImageUpgrader {
    client: Arc<dyn ResourceClient>,
}

impl ImageUpgrader {
    /// Create an upgrader writing through `client`.
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OperandUpgrader for ImageUpgrader {
    async fn upgrade(
        &self,
        bestie: &Bestie,
        deployment: &Deployment,
    ) -> OperatorResult<Option<Deployment>> {
        // Compare whole references, not parsed tags.
        let desired = bestie.spec.image_ref();
        let live = deployed_image(deployment).map(str::to_string);
        if live.as_deref() == Some(desired.as_str()) {
            return Ok(None);
        }

        let name = deployment.name_any();
        let mut updated = deployment.clone();
        let container = updated
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|pod| {
                let index = pod
                    .containers
                    .iter()
                    .position(|c| c.name == APP_CONTAINER)
                    .unwrap_or(0);
                pod.containers.get_mut(index)
            })
            .ok_or_else(|| OperatorError::ReconcileError {
                kind: "Deployment".into(),
                name: name.clone(),
                cause: "pod template has no application container".into(),
            })?;
        container.image = Some(desired.clone());

        tracing::info!(
            name = %name,
            from = live.as_deref().unwrap_or("unknown"),
            to = %desired,
            "Upgrading application"
        );
        let written = self.client.update_typed(&updated).await?;
        Ok(Some(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResourceKind;
    use crate::crd::BestieSpec;
    use crate::resources::build_deployment;
    use crate::testing::{ClientOp, InMemoryResourceClient};

    fn bestie(version: &str) -> Bestie {
        let mut bestie = Bestie::new(
            "bestie",
            BestieSpec {
                version: version.into(),
                ..Default::default()
            },
        );
        bestie.metadata.namespace = Some("pets".into());
        bestie.metadata.uid = Some("uid-bestie".into());
        bestie
    }

    #[test]
    fn tags_are_read_past_registry_ports_and_digests() {
        assert_eq!(image_tag("quay.io/mkong/bestiev2:1.3"), Some("1.3"));
        assert_eq!(image_tag("registry:5000/bestie:2.0@sha256:abc"), Some("2.0"));
        assert_eq!(image_tag("registry:5000/bestie"), None);
        assert_eq!(image_tag("bestie@sha256:abc"), None);
    }

    #[tokio::test]
    async fn matching_version_is_left_alone() {
        let deployment = build_deployment(&bestie("1.3")).unwrap();
        let client = Arc::new(InMemoryResourceClient::new().with_object(&deployment));
        let upgrader = ImageUpgrader::new(client.clone());

        let live = client.object::<Deployment>("pets", "bestie-app").unwrap();
        assert!(upgrader.upgrade(&bestie("1.3"), &live).await.unwrap().is_none());
        assert!(client.mutations().is_empty());
    }

    #[tokio::test]
    async fn new_version_rewrites_the_image() {
        let deployment = build_deployment(&bestie("1.3")).unwrap();
        let client = Arc::new(InMemoryResourceClient::new().with_object(&deployment));
        let upgrader = ImageUpgrader::new(client.clone());

        let live = client.object::<Deployment>("pets", "bestie-app").unwrap();
        let updated = upgrader.upgrade(&bestie("1.4"), &live).await.unwrap().unwrap();
        assert_eq!(deployed_version(&updated).as_deref(), Some("1.4"));

        let stored = client.object::<Deployment>("pets", "bestie-app").unwrap();
        assert_eq!(deployed_version(&stored).as_deref(), Some("1.4"));
    }

    #[tokio::test]
    async fn empty_version_settles_after_one_write() {
        let mut pinned = bestie("");
        pinned.spec.image = "quay.io/mkong/bestiev2:latest".into();
        let deployment = build_deployment(&bestie("1.3")).unwrap();
        let client = Arc::new(InMemoryResourceClient::new().with_object(&deployment));
        let upgrader = ImageUpgrader::new(client.clone());

        let live = client.object::<Deployment>("pets", "bestie-app").unwrap();
        assert!(upgrader.upgrade(&pinned, &live).await.unwrap().is_some());

        let live = client.object::<Deployment>("pets", "bestie-app").unwrap();
        assert!(upgrader.upgrade(&pinned, &live).await.unwrap().is_none());
        assert_eq!(client.mutations().len(), 1);
    }

    #[tokio::test]
    async fn conflicts_propagate() {
        let deployment = build_deployment(&bestie("1.3")).unwrap();
        let client = Arc::new(InMemoryResourceClient::new().with_object(&deployment));
        client.conflict(ClientOp::Update, ResourceKind::Deployment);
        let upgrader = ImageUpgrader::new(client.clone());

        let live = client.object::<Deployment>("pets", "bestie-app").unwrap();
        let err = upgrader.upgrade(&bestie("1.4"), &live).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
