//! Status synchronizer.
//!
//! Status reflects what is actually running, read from the pods, so it may
//! lag `spec.version` during a rollout.

use super::upgrade::image_tag;
use crate::client::{ResourceClient, ResourceClientExt};
use crate::crd::{Bestie, BestieStatus};
use crate::error::{OperatorError, OperatorResult};
use crate::resources::{APP_CONTAINER, pod_selector};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

fn pod_version(pod: &Pod) -> Option<&str> {
    let containers = &pod.spec.as_ref()?.containers;
    let container = containers
        .iter()
        .find(|c| c.name == APP_CONTAINER)
        .or_else(|| containers.first())?;
    image_tag(container.image.as_deref()?)
}

/// Status observed from the application's pods.
///
/// `app_version` is the tag most running pods use, the greatest tag on a
/// tie, and empty when nothing runs.
pub fn compute_status(pods: &[Pod]) -> BestieStatus {
    let running: Vec<&Pod> = pods.iter().filter(|p| is_running(p)).collect();

    let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
    for version in running.iter().filter_map(|p| pod_version(p)) {
        *votes.entry(version).or_default() += 1;
    }
    let app_version = votes
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
        .map(|(version, _)| version.to_string())
        .unwrap_or_default();

    let mut names: Vec<String> = running.iter().map(|p| p.name_any()).collect();
    names.sort();

    BestieStatus {
        app_version,
        pods: names,
    }
}

/// Persist the observed status when it differs from the stored one.
///
/// The whole status is compared, so a change in running pod names writes
/// even when `app_version` is unchanged. Returns whether a write was made.
pub async fn sync_status(client: &dyn ResourceClient, bestie: &Bestie) -> OperatorResult<bool> {
    let name = bestie.name_any();
    let namespace = bestie.namespace().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Bestie {} must be namespaced", name))
    })?;

    let pods: Vec<Pod> = client.list_typed(&namespace, &pod_selector(bestie)).await?;
    let observed = compute_status(&pods);
    let persisted = bestie.status.clone().unwrap_or_default();
    if observed == persisted {
        tracing::debug!(name = %name, "Status unchanged");
        return Ok(false);
    }

    tracing::info!(
        name = %name,
        app_version = %observed.app_version,
        pods = observed.pods.len(),
        "Updating Bestie status"
    );
    let mut updated = bestie.clone();
    updated.status = Some(observed);
    client.update_status_typed(&updated).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ResourceKind;
    use crate::crd::BestieSpec;
    use crate::resources::selector_labels;
    use crate::testing::{ClientOp, InMemoryResourceClient};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn bestie() -> Bestie {
        let mut bestie = Bestie::new("bestie", BestieSpec::default());
        bestie.metadata.namespace = Some("pets".into());
        bestie.metadata.uid = Some("uid-bestie".into());
        bestie
    }

    fn pod(name: &str, tag: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("pets".into()),
                labels: Some(selector_labels(&bestie())),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: APP_CONTAINER.into(),
                    image: Some(format!("quay.io/mkong/bestiev2:{}", tag)),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn majority_version_wins() {
        let status = compute_status(&[
            pod("c", "1.3", "Running"),
            pod("a", "1.4", "Running"),
            pod("b", "1.3", "Running"),
            pod("d", "1.4", "Pending"),
        ]);
        assert_eq!(status.app_version, "1.3");
        assert_eq!(status.pods, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_go_to_the_greatest_tag() {
        let status = compute_status(&[pod("a", "1.3", "Running"), pod("b", "1.4", "Running")]);
        assert_eq!(status.app_version, "1.4");
    }

    #[test]
    fn nothing_running_is_empty() {
        assert_eq!(compute_status(&[pod("a", "1.3", "Failed")]), BestieStatus::default());
    }

    #[tokio::test]
    async fn status_is_written_only_on_change() {
        let client = InMemoryResourceClient::new()
            .with_object(&bestie())
            .with_object(&pod("bestie-app-1", "1.3", "Running"));

        let stored: Bestie = client.object("pets", "bestie").unwrap();
        assert!(sync_status(&client, &stored).await.unwrap());

        let stored: Bestie = client.object("pets", "bestie").unwrap();
        assert_eq!(stored.status.as_ref().unwrap().app_version, "1.3");
        client.clear_calls();

        assert!(!sync_status(&client, &stored).await.unwrap());
        assert!(client.mutations().is_empty());
    }

    #[tokio::test]
    async fn pod_churn_writes_at_the_same_version() {
        let client = InMemoryResourceClient::new()
            .with_object(&bestie())
            .with_object(&pod("bestie-app-1", "1.3", "Running"));
        let stored: Bestie = client.object("pets", "bestie").unwrap();
        assert!(sync_status(&client, &stored).await.unwrap());

        client.remove(ResourceKind::Pod, "pets", "bestie-app-1");
        client.insert(&pod("bestie-app-2", "1.3", "Running"));
        let stored: Bestie = client.object("pets", "bestie").unwrap();
        assert!(sync_status(&client, &stored).await.unwrap());

        let stored: Bestie = client.object("pets", "bestie").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.app_version, "1.3");
        assert_eq!(status.pods, vec!["bestie-app-2"]);
    }

    #[tokio::test]
    async fn list_errors_propagate() {
        let client = InMemoryResourceClient::new().with_object(&bestie());
        client.fail(ClientOp::List, ResourceKind::Pod, "forbidden");
        assert!(sync_status(&client, &bestie()).await.is_err());
    }
}
