//! Client side of the per-instance sidecar agent.

mod grpc;

pub use grpc::{GrpcAgentFactory, GrpcAgentConn};

use crate::crd::MySQLCluster;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Ask an instance to replace its data with a clone of a donor.
#[derive(Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// User the agent re-creates once the clone has restarted mysqld.
    pub init_user: String,
    pub init_password: String,
    /// How long mysqld may take to come back after the clone.
    pub boot_timeout: Duration,
}

impl fmt::Debug for CloneRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("init_user", &self.init_user)
            .field("boot_timeout", &self.boot_timeout)
            .finish_non_exhaustive()
    }
}

/// Connection to the agent of one instance.
#[async_trait]
pub trait AgentConn: Send + Sync {
    /// Run a clone and return once the agent reports it finished.
    async fn clone_from(&self, req: &CloneRequest) -> Result<()>;
}

/// Opens agent connections.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn connect(&self, cluster: &MySQLCluster, index: usize) -> Result<Box<dyn AgentConn>>;
}
