//! Events recorded against a cluster when the loop changes its topology.

use crate::crd::MySQLCluster;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

/// Topology change worth telling the cluster owner about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    InitCloneSucceeded,
    InitCloneFailed { error: String },
    CloneSucceeded { index: usize },
    CloneFailed { index: usize, error: String },
    SwitchOverSucceeded { index: usize },
    SwitchOverFailed { error: String },
    FailOverSucceeded { index: usize },
    FailOverFailed { error: String },
    SetWritable,
}

impl ClusterEvent {
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            ClusterEvent::InitCloneFailed { .. }
                | ClusterEvent::CloneFailed { .. }
                | ClusterEvent::SwitchOverFailed { .. }
                | ClusterEvent::FailOverFailed { .. }
        )
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ClusterEvent::InitCloneSucceeded => "InitCloned",
            ClusterEvent::InitCloneFailed { .. } => "InitCloneFailed",
            ClusterEvent::CloneSucceeded { .. } => "Cloned",
            ClusterEvent::CloneFailed { .. } => "CloneFailed",
            ClusterEvent::SwitchOverSucceeded { .. } => "SwitchOver",
            ClusterEvent::SwitchOverFailed { .. } => "SwitchOverFailed",
            ClusterEvent::FailOverSucceeded { .. } => "FailOver",
            ClusterEvent::FailOverFailed { .. } => "FailOverFailed",
            ClusterEvent::SetWritable => "Writable",
        }
    }

    pub fn note(&self) -> String {
        match self {
            ClusterEvent::InitCloneSucceeded => {
                "Clone from an external mysqld succeeded".to_string()
            }
            ClusterEvent::InitCloneFailed { error } => {
                format!("Clone from an external mysqld failed: {}", error)
            }
            ClusterEvent::CloneSucceeded { index } => {
                format!("Clone from the primary succeeded for instance {}", index)
            }
            ClusterEvent::CloneFailed { index, error } => {
                format!("Clone from the primary failed for instance {}: {}", index, error)
            }
            ClusterEvent::SwitchOverSucceeded { index } => format!(
                "The primary was changed to instance {} due to a switchover",
                index
            ),
            ClusterEvent::SwitchOverFailed { error } => {
                format!("The primary could not be changed: {}", error)
            }
            ClusterEvent::FailOverSucceeded { index } => format!(
                "The primary was changed to instance {} due to a failover",
                index
            ),
            ClusterEvent::FailOverFailed { error } => {
                format!("The primary could not be changed: {}", error)
            }
            ClusterEvent::SetWritable => "The primary became writable".to_string(),
        }
    }
}

/// Sink for cluster events. Recording never fails the caller.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, cluster: &MySQLCluster, event: ClusterEvent);
}

/// Publishes events through the Kubernetes events API.
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, cluster: &MySQLCluster, event: ClusterEvent) {
        let ev = Event {
            type_: if event.is_warning() {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: event.reason().to_string(),
            note: Some(event.note()),
            action: "Clustering".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&ev, &cluster.object_ref(&())).await {
            warn!(error = %e, reason = event.reason(), "Failed to publish event");
        }
    }
}
