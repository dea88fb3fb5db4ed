//! Per-instance database operations.
//!
//! [`DatabaseOperator`] is the capability the clustering loop uses to read
//! and change one MySQL instance. Operators are built by an
//! [`OperatorFactory`] at the start of every evaluation cycle and owned by an
//! [`OperatorSet`], which closes them when it is dropped.

mod gtid;
mod mysql;

pub use gtid::{candidate_gtid, find_top_runner};
pub use mysql::{SqlOperator, SqlOperatorFactory};

use crate::crd::MySQLCluster;
use crate::error::{HerdError, Result};
use crate::password::MySQLPassword;
use crate::types::{AccessInfo, MySQLInstanceStatus};
use async_trait::async_trait;
use std::ops::Index;

/// Operations on a single MySQL instance.
#[async_trait]
pub trait DatabaseOperator: Send + Sync {
    /// `namespace/pod` of the instance this operator works on.
    fn name(&self) -> &str;

    /// Read the live status of the instance.
    async fn get_status(&self) -> Result<MySQLInstanceStatus>;

    /// Whether `set1` is a subset of `set2`.
    async fn is_subset_gtid(&self, set1: &str, set2: &str) -> Result<bool>;

    /// GTIDs in `set1` that are not in `set2`.
    async fn subtract_gtid(&self, set1: &str, set2: &str) -> Result<String>;

    /// Point replication at `source`. Client-side semi-sync follows `semisync`;
    /// server-side semi-sync is always disabled.
    async fn configure_replica(&self, source: &AccessInfo, semisync: bool) -> Result<()>;

    /// Enable server-side semi-sync waiting for `wait_for_count` replicas.
    async fn configure_primary(&self, wait_for_count: u32) -> Result<()>;

    async fn stop_replica_io_thread(&self) -> Result<()>;

    /// Wait until `gtid_set` is executed.
    ///
    /// Returns [`HerdError::Timeout`] after `timeout_seconds`; zero waits forever.
    async fn wait_for_gtid(&self, gtid_set: &str, timeout_seconds: u32) -> Result<()>;

    /// `true` sets `super_read_only`. `false` stops replication and makes
    /// the instance writable.
    async fn set_read_only(&self, read_only: bool) -> Result<()>;

    /// Kill client connections, sparing system users and `localhost`.
    async fn kill_connections(&self) -> Result<()>;

    /// Release the underlying connections. Must be idempotent.
    fn close(&self);
}

/// Builds operators for the instances of a cluster.
#[async_trait]
pub trait OperatorFactory: Send + Sync {
    async fn create(
        &self,
        cluster: &MySQLCluster,
        password: &MySQLPassword,
        index: usize,
    ) -> Result<Box<dyn DatabaseOperator>>;
}

// ============================================================================
// Operator set
// ============================================================================

/// Operators of one evaluation cycle, indexed by instance ordinal.
///
/// Every operator is closed when the set is dropped, whichever way the
/// cycle ends.
#[derive(Default)]
pub struct OperatorSet {
    ops: Vec<Box<dyn DatabaseOperator>>,
}

impl OperatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Box<dyn DatabaseOperator>) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn DatabaseOperator> {
        self.ops.get(index).map(|op| op.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn DatabaseOperator> {
        self.ops.iter().map(|op| op.as_ref())
    }
}

impl Index<usize> for OperatorSet {
    type Output = dyn DatabaseOperator;

    fn index(&self, index: usize) -> &Self::Output {
        self.ops[index].as_ref()
    }
}

impl Drop for OperatorSet {
    fn drop(&mut self) {
        for op in &self.ops {
            op.close();
        }
    }
}

impl std::fmt::Debug for OperatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ops.iter().map(|op| op.name())).finish()
    }
}

// ============================================================================
// No-op operator
// ============================================================================

/// Operator for an instance whose address cannot be resolved.
///
/// Every operation fails with [`HerdError::Nop`].
#[derive(Debug, Clone)]
pub struct NopOperator {
    name: String,
}

impl NopOperator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DatabaseOperator for NopOperator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_status(&self) -> Result<MySQLInstanceStatus> {
        Err(HerdError::Nop)
    }

    async fn is_subset_gtid(&self, _set1: &str, _set2: &str) -> Result<bool> {
        Err(HerdError::Nop)
    }

    async fn subtract_gtid(&self, _set1: &str, _set2: &str) -> Result<String> {
        Err(HerdError::Nop)
    }

    async fn configure_replica(&self, _source: &AccessInfo, _semisync: bool) -> Result<()> {
        Err(HerdError::Nop)
    }

    async fn configure_primary(&self, _wait_for_count: u32) -> Result<()> {
        Err(HerdError::Nop)
    }

    async fn stop_replica_io_thread(&self) -> Result<()> {
        Err(HerdError::Nop)
    }

    async fn wait_for_gtid(&self, _gtid_set: &str, _timeout_seconds: u32) -> Result<()> {
        Err(HerdError::Nop)
    }

    async fn set_read_only(&self, _read_only: bool) -> Result<()> {
        Err(HerdError::Nop)
    }

    async fn kill_connections(&self) -> Result<()> {
        Err(HerdError::Nop)
    }

    fn close(&self) {}
}
