//! Crunchy Data PostgresCluster, the database the Bestie application uses.
//!
//! Only the subset of `postgres-operator.crunchydata.com/v1beta1` the
//! operator renders and reads back is modelled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PostgresCluster managed by the Crunchy postgres-operator.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "postgres-operator.crunchydata.com",
    version = "v1beta1",
    kind = "PostgresCluster",
    plural = "postgresclusters",
    namespaced,
    status = "PostgresClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterSpec {
    /// Major PostgreSQL version.
    pub postgres_version: i32,

    /// Instance sets.
    pub instances: Vec<PostgresInstanceSet>,

    /// Backup configuration, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown")]
    pub backups: Option<serde_json::Value>,

    /// Database users to create.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<PostgresUser>,
}

/// One set of PostgreSQL instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresInstanceSet {
    /// Instance set name.
    pub name: String,
    /// Number of instances.
    #[serde(default = "default_instance_replicas")]
    pub replicas: i32,
    /// Volume claim for the data directory.
    #[schemars(schema_with = "preserve_unknown")]
    pub data_volume_claim_spec: serde_json::Value,
}

fn default_instance_replicas() -> i32 {
    1
}

/// Database user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresUser {
    /// Role name.
    pub name: String,
    /// Databases the role owns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<String>,
}

/// Observed PostgresCluster status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresClusterStatus {
    /// Per instance set status.
    #[serde(default)]
    pub instances: Vec<PostgresInstanceSetStatus>,
}

/// Status of one instance set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostgresInstanceSetStatus {
    /// Instance set name.
    pub name: String,
    /// Ready instances.
    #[serde(default)]
    pub ready_replicas: i32,
}

impl PostgresCluster {
    /// Whether at least one instance accepts connections.
    pub fn has_ready_instance(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.instances.iter().any(|i| i.ready_replicas > 0))
            .unwrap_or(false)
    }

    /// Name of the Secret postgres-operator generates for `user`.
    pub fn user_secret_name(cluster: &str, user: &str) -> String {
        format!("{}-pguser-{}", cluster, user)
    }
}

fn preserve_unknown(_: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schema.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_instance_detection() {
        let mut cluster = PostgresCluster::new("bestie-postgres", PostgresClusterSpec::default());
        assert!(!cluster.has_ready_instance());

        cluster.status = Some(PostgresClusterStatus {
            instances: vec![PostgresInstanceSetStatus {
                name: "instance1".into(),
                ready_replicas: 1,
            }],
        });
        assert!(cluster.has_ready_instance());
    }

    #[test]
    fn user_secret_follows_pgo_convention() {
        assert_eq!(
            PostgresCluster::user_secret_name("bestie-postgres", "bestie"),
            "bestie-postgres-pguser-bestie"
        );
    }
}
