//! Bestie Custom Resource Definition.
//!
//! Declares the desired state of one Bestie application deployment.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default container image repository for the Bestie application.
pub const DEFAULT_IMAGE: &str = "quay.io/mkong/bestiev2";

/// Default application version (image tag).
pub const DEFAULT_VERSION: &str = "1.3";

/// Bestie is the Schema for the besties API.
///
/// A Bestie represents one deployed instance of the Bestie pet adoption
/// application. The operator creates and maintains its Deployment, Service,
/// autoscaler, external exposure object and database.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pets.bestie.com",
    version = "v1",
    kind = "Bestie",
    plural = "besties",
    namespaced,
    status = "BestieStatus",
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Running", "type":"string", "jsonPath":".status.appVersion"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BestieSpec {
    /// Desired number of application replicas.
    /// Ignored while a HorizontalPodAutoscaler manages the Deployment.
    #[serde(default = "default_size")]
    pub size: i32,

    /// Container image repository, without tag.
    #[serde(default = "default_image")]
    pub image: String,

    /// Application version, used as the image tag.
    #[serde(default = "default_version")]
    pub version: String,

    /// Upper bound for the autoscaler.
    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,
}

impl Default for BestieSpec {
    fn default() -> Self {
        Self {
            size: default_size(),
            image: default_image(),
            version: default_version(),
            max_replicas: default_max_replicas(),
        }
    }
}

impl BestieSpec {
    /// Fully qualified image reference for the desired version.
    ///
    /// A tag or digest already present on `image` is replaced by `version`.
    /// An empty `version` leaves `image` as given.
    pub fn image_ref(&self) -> String {
        if self.version.is_empty() {
            return self.image.clone();
        }
        let repository = self.image.split('@').next().unwrap_or(&self.image);
        let repository = match repository.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => repo,
            _ => repository,
        };
        format!("{}:{}", repository, self.version)
    }
}

fn default_size() -> i32 {
    1
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_max_replicas() -> i32 {
    10
}

/// Bestie status, observed from the running pods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BestieStatus {
    /// Version actually running, which may lag `spec.version` during a rollout.
    #[serde(default)]
    pub app_version: String,

    /// Names of the running application pods, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn spec_defaults_apply_to_empty_object() {
        let spec: BestieSpec = serde_json::from_str("{}").expect("empty spec should parse");
        assert_eq!(spec, BestieSpec::default());
        assert_eq!(spec.size, 1);
        assert_eq!(spec.image_ref(), "quay.io/mkong/bestiev2:1.3");
    }

    #[test]
    fn image_ref_replaces_an_existing_tag() {
        let spec = |image: &str, version: &str| BestieSpec {
            image: image.into(),
            version: version.into(),
            ..Default::default()
        };
        assert_eq!(
            spec("quay.io/mkong/bestiev2:latest", "1.4").image_ref(),
            "quay.io/mkong/bestiev2:1.4"
        );
        assert_eq!(spec("registry:5000/bestie", "1.4").image_ref(), "registry:5000/bestie:1.4");
        assert_eq!(spec("bestie@sha256:abc", "1.4").image_ref(), "bestie:1.4");
        assert_eq!(spec("quay.io/mkong/bestiev2", "").image_ref(), "quay.io/mkong/bestiev2");
    }

    #[test]
    fn status_uses_camel_case() {
        let status = BestieStatus {
            app_version: "1.3".into(),
            pods: vec!["bestie-app-abc".into()],
        };
        let json = serde_json::to_value(&status).expect("status should serialize");
        assert_eq!(json["appVersion"], "1.3");
        assert_eq!(json["pods"][0], "bestie-app-abc");
    }

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = Bestie::crd();
        assert_eq!(crd.spec.group, "pets.bestie.com");
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
