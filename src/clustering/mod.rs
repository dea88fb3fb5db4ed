//! The clustering control loop.
//!
//! Each cluster is driven by one [`ManagerProcess`]. A cycle of the process
//! gathers a [`StatusSet`] from the resource store and the live instances,
//! classifies it into a [`ClusterState`](crate::types::ClusterState), and
//! runs at most one corrective operation. The [`ClusterManager`] starts and
//! stops processes on behalf of the reconciler.

mod manager;
mod operations;
mod process;
mod quorum;
mod status;

pub use manager::ClusterManager;
pub use process::{ManagerProcess, ProcessHandle};
pub use quorum::required_acks;
pub use status::{
    classify, gather_status, is_pod_ready, needs_switch, pod_index, Classification, StatusSet,
};

use crate::agent::AgentFactory;
use crate::config::HerdConfig;
use crate::dbop::OperatorFactory;
use crate::events::EventRecorder;
use crate::store::ResourceStore;
use std::sync::Arc;

/// Collaborators shared by every manager process.
#[derive(Clone)]
pub struct ClusterContext {
    pub store: Arc<dyn ResourceStore>,
    pub operators: Arc<dyn OperatorFactory>,
    pub agents: Arc<dyn AgentFactory>,
    pub events: Arc<dyn EventRecorder>,
    pub config: HerdConfig,
}

impl ClusterContext {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        operators: Arc<dyn OperatorFactory>,
        agents: Arc<dyn AgentFactory>,
        events: Arc<dyn EventRecorder>,
        config: HerdConfig,
    ) -> Self {
        Self {
            store,
            operators,
            agents,
            events,
            config,
        }
    }
}
