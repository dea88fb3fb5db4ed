//! SQLHerd - clustering control loop for replicated MySQL on Kubernetes.
//!
//! SQLHerd keeps a fixed-size set of MySQL instances in a single-primary,
//! semi-synchronous replication topology. For every `MySQLCluster` record a
//! manager process repeatedly observes the live instances, classifies the
//! cluster and runs one corrective operation.
//!
//! # Features
//!
//! - **Status gathering**: Concurrent per-instance queries with retries and errant GTID detection.
//! - **Classification**: Healthy, Degraded, Failed, Lost and transitional states.
//! - **Switchover**: Drain-before-promote handover on pod deletion or demote requests.
//! - **Failover**: Promotion of the most advanced replica, refusing split histories.
//! - **Convergence**: Replica cloning, semi-sync setup and role labelling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ClusterManager                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ManagerProcess (one per cluster): ticker | update signal   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  gather_status → classify → clone | switchover | failover   │
//! │                             | configure                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ResourceStore | DatabaseOperator | AgentConn | Events      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use sqlherd::clustering::{ClusterContext, ClusterManager};
//! use sqlherd::config::HerdConfig;
//! use sqlherd::{agent, dbop, events, store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> sqlherd::Result<()> {
//!     let client = kube::Client::try_default().await?;
//!     let ctx = ClusterContext::new(
//!         Arc::new(store::KubeStore::new(client.clone())),
//!         Arc::new(dbop::SqlOperatorFactory::new()),
//!         Arc::new(agent::GrpcAgentFactory::new()),
//!         Arc::new(events::KubeEventRecorder::new(client, "sqlherd-operator")),
//!         HerdConfig::default().with_env_overrides(),
//!     );
//!     let manager = ClusterManager::new(ctx);
//!     manager.update(&sqlherd::crd::ClusterKey::new("default", "db"));
//!     manager.stop_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod constants;
pub mod crd;
pub mod password;

pub mod agent;
pub mod dbop;
pub mod events;
pub mod store;

pub mod clustering;
pub mod metrics;
pub mod resilience;
pub mod shutdown;

// Re-exports
pub use error::{HerdError, Result};
pub use types::*;
