//! The `MySQLCluster` custom resource, the desired-state record of a cluster.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// MySQLCluster CRD
// ============================================================================

/// MySQLCluster declares a replicated set of MySQL instances.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sqlherd.io",
    version = "v1",
    kind = "MySQLCluster",
    plural = "mysqlclusters",
    shortname = "mysql",
    status = "MySQLClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type=='Available')].status"}"#,
    printcolumn = r#"{"name":"Healthy","type":"string","jsonPath":".status.conditions[?(@.type=='Healthy')].status"}"#,
    printcolumn = r#"{"name":"Primary","type":"integer","jsonPath":".status.currentPrimaryIndex"}"#,
    printcolumn = r#"{"name":"Synced replicas","type":"integer","jsonPath":".status.syncedReplicas"}"#,
    printcolumn = r#"{"name":"Errant replicas","type":"integer","jsonPath":".status.errantReplicas"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLClusterSpec {
    /// Number of instances, the primary included
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Base value of `server_id`; instance `i` uses `server_id_base + i`
    #[serde(default = "default_server_id_base", rename = "serverIDBase")]
    pub server_id_base: i32,

    /// Secret holding the external source of an intermediate primary
    #[serde(default)]
    pub replication_source_secret_name: Option<String>,

    /// Seconds mysqld may take to start; bounds clone bootstrap
    #[serde(default = "default_startup_wait_seconds")]
    pub startup_wait_seconds: i32,

    /// Restore the cluster from a backup of another cluster
    #[serde(default)]
    pub restore: Option<RestoreSpec>,
}

fn default_replicas() -> i32 {
    1
}

fn default_server_id_base() -> i32 {
    1
}

fn default_startup_wait_seconds() -> i32 {
    3600
}

/// Restore request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    pub source_name: String,
    pub source_namespace: String,
    /// RFC3339 point in time to restore to
    pub restore_point: String,
    #[serde(default)]
    pub schema: Option<String>,
}

/// Observed state written by the clustering loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MySQLClusterStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,

    /// Ordinal of the current primary; zero initially
    #[serde(default)]
    pub current_primary_index: i32,

    /// Instances, the primary included, that are in sync
    #[serde(default)]
    pub synced_replicas: i32,

    #[serde(default)]
    pub errant_replicas: i32,

    #[serde(default)]
    pub errant_replica_list: Vec<i32>,

    /// Last successful backup
    #[serde(default)]
    pub backup: Option<BackupStatus>,

    /// RFC3339 time at which a requested restore completed
    #[serde(default)]
    pub restored_time: Option<String>,

    /// Initial clone from the external source has completed
    #[serde(default)]
    pub cloned: bool,
}

/// Cluster condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status (True, False, Unknown)
    pub status: String,

    pub last_transition_time: Option<String>,

    pub reason: Option<String>,

    pub message: Option<String>,
}

/// Status of the last successful backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// RFC3339 time of the backup
    pub time: String,
    /// Seconds spent on the backup
    pub elapsed_seconds: f64,
    pub source_index: i32,
    #[serde(rename = "sourceUUID")]
    pub source_uuid: String,
    pub binlog_filename: String,
    pub gtid_set: String,
    pub dump_size: i64,
    pub binlog_size: i64,
    pub work_dir_usage: i64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

pub const CONDITION_INITIALIZED: &str = "Initialized";
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_HEALTHY: &str = "Healthy";

impl MySQLCluster {
    /// Returns `sqlherd-<name>`.
    pub fn prefixed_name(&self) -> String {
        format!("sqlherd-{}", self.name_any())
    }

    pub fn pod_name(&self, index: usize) -> String {
        format!("{}-{}", self.prefixed_name(), index)
    }

    /// Name of the secret holding the generated user passwords.
    pub fn user_secret_name(&self) -> String {
        self.prefixed_name()
    }

    pub fn headless_service_name(&self) -> String {
        self.prefixed_name()
    }

    /// Stable DNS name of instance `index`.
    pub fn pod_hostname(&self, index: usize) -> String {
        format!(
            "{}.{}.{}.svc",
            self.pod_name(index),
            self.headless_service_name(),
            self.namespace().unwrap_or_default()
        )
    }

    /// Declared instance count.
    pub fn replicas(&self) -> usize {
        self.spec.replicas.max(0) as usize
    }

    /// Whether the cluster replicates from an external source.
    pub fn is_intermediate(&self) -> bool {
        self.spec.replication_source_secret_name.is_some()
    }

    pub fn current_primary_index(&self) -> usize {
        self.status
            .as_ref()
            .map(|s| s.current_primary_index.max(0) as usize)
            .unwrap_or(0)
    }

    /// `namespace/name` key used by the manager registry.
    pub fn key(&self) -> ClusterKey {
        ClusterKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }
}

impl MySQLClusterStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&ClusterCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Insert or update a condition.
    ///
    /// `last_transition_time` only moves when the status value changes.
    pub fn set_condition(&mut self, condition_type: &str, status: bool, reason: &str, message: &str) {
        let status = if status { "True" } else { "False" };
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status.to_string();
                    existing.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
                }
                existing.reason = Some(reason.to_string());
                existing.message = Some(message.to_string());
            }
            None => self.conditions.push(ClusterCondition {
                condition_type: condition_type.to_string(),
                status: status.to_string(),
                last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
            }),
        }
    }
}

/// Identity of a cluster: namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
