//! Core types shared by the clustering loop and its collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational state assigned to a cluster once per evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClusterState {
    #[default]
    Undecided,
    Incomplete,
    Healthy,
    Cloning,
    Restoring,
    Degraded,
    Failed,
    Lost,
}

impl ClusterState {
    /// All states, in declaration order.
    pub const ALL: [ClusterState; 8] = [
        ClusterState::Undecided,
        ClusterState::Incomplete,
        ClusterState::Healthy,
        ClusterState::Cloning,
        ClusterState::Restoring,
        ClusterState::Degraded,
        ClusterState::Failed,
        ClusterState::Lost,
    ];

    /// Name used as condition reason and log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Undecided => "Undecided",
            ClusterState::Incomplete => "Incomplete",
            ClusterState::Healthy => "Healthy",
            ClusterState::Cloning => "Cloning",
            ClusterState::Restoring => "Restoring",
            ClusterState::Degraded => "Degraded",
            ClusterState::Failed => "Failed",
            ClusterState::Lost => "Lost",
        }
    }

    /// Whether writes are being served by a primary in this state.
    pub fn is_available(&self) -> bool {
        matches!(self, ClusterState::Healthy | ClusterState::Degraded)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of one MySQL instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MySQLInstanceStatus {
    /// Set by the status gatherer, never by the database operator.
    pub is_errant: bool,
    pub global_variables: GlobalVariables,
    /// Rows of `SHOW REPLICAS`.
    pub replica_hosts: Vec<ReplicaHost>,
    /// Absent when the instance has never been configured as a replica.
    pub replica_status: Option<ReplicaStatus>,
    /// Absent when the instance was never cloned.
    pub clone_status: Option<CloneStatus>,
}

/// Global variables read from an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariables {
    pub uuid: String,
    pub executed_gtid: String,
    pub purged_gtid: String,
    pub read_only: bool,
    pub super_read_only: bool,
    pub wait_for_replica_count: u32,
    pub semi_sync_source_enabled: bool,
    pub semi_sync_replica_enabled: bool,
}

/// A replica attached to an instance, as reported by `SHOW REPLICAS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaHost {
    pub server_id: u32,
    pub host: String,
    pub port: u16,
    pub source_id: u32,
    pub replica_uuid: String,
}

/// Replication link state, as reported by `SHOW REPLICA STATUS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub last_io_errno: i32,
    pub last_io_error: String,
    pub last_sql_errno: i32,
    pub last_sql_error: String,
    pub source_host: String,
    pub retrieved_gtid_set: String,
    pub executed_gtid_set: String,
    pub replica_io_running: String,
    pub replica_sql_running: String,
}

impl ReplicaStatus {
    /// Both replication threads report `Yes`.
    pub fn is_running(&self) -> bool {
        self.replica_io_running == "Yes" && self.replica_sql_running == "Yes"
    }
}

/// Row of `performance_schema.clone_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneStatus {
    pub state: Option<String>,
}

/// Clone state reported once a clone has finished.
pub const CLONE_STATE_COMPLETED: &str = "Completed";

impl CloneStatus {
    pub fn is_completed(&self) -> bool {
        self.state.as_deref() == Some(CLONE_STATE_COMPLETED)
    }
}

/// Replication source coordinates written to a replica.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for AccessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
