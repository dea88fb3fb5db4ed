//! Corrective operations run by a manager process.
//!
//! Each operation receives the [`StatusSet`] of the current cycle and stops
//! at the first error; the next cycle starts again from fresh state.

use super::process::ManagerProcess;
use super::quorum::required_acks;
use super::StatusSet;
use crate::agent::CloneRequest;
use crate::constants::{
    ADMIN_USER, ANN_DEMOTE, CLONE_DONOR_USER, LABEL_ROLE, MYSQL_ADMIN_PORT, MYSQL_PORT,
    REPLICATION_USER, ROLE_PRIMARY, ROLE_REPLICA,
};
use crate::dbop::{candidate_gtid, find_top_runner, DatabaseOperator};
use crate::error::{HerdError, Result};
use crate::events::ClusterEvent;
use crate::password::ReplicationSource;
use crate::resilience::retry_on_conflict;
use crate::types::{AccessInfo, MySQLInstanceStatus};
use kube::ResourceExt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const IO_RUNNING: &str = "Yes";

impl ManagerProcess {
    /// Seed an intermediate primary from its external source.
    pub(super) async fn clone_from_source(&self, ss: &StatusSet) -> Result<bool> {
        let source = self.replication_source(ss).await?;
        let boot_secs = u64::try_from(ss.cluster.spec.startup_wait_seconds).unwrap_or(0);
        let req = CloneRequest {
            host: source.host.clone(),
            port: source.port,
            user: source.user.clone(),
            password: source.password.clone(),
            init_user: source.init_user.clone(),
            init_password: source.init_password.clone(),
            boot_timeout: Duration::from_secs(boot_secs),
        };

        let agent = self.ctx.agents.connect(&ss.cluster, ss.primary).await?;
        info!(source = %req.host, "Begin cloning data");
        if let Err(e) = agent.clone_from(&req).await {
            warn!(source = %req.host, error = %e, "Clone failed");
            return Err(e);
        }
        info!(source = %req.host, "Clone succeeded");

        self.wait_for_restart(&ss.ops[ss.primary]).await;
        Ok(true)
    }

    /// Hand the primary role to `ss.candidate`.
    pub(super) async fn switchover(&self, ss: &StatusSet) -> Result<()> {
        info!(current = ss.primary, next = ss.candidate, "Begin switchover");

        let pdb = &ss.ops[ss.primary];
        pdb.set_read_only(true).await?;
        sleep(self.ctx.config.operations.settle_delay).await;
        pdb.kill_connections().await?;
        let pst = pdb.get_status().await?;

        ss.ops[ss.candidate]
            .wait_for_gtid(
                &pst.global_variables.executed_gtid,
                self.ctx.config.operations.switchover_timeout_secs,
            )
            .await?;

        self.persist_primary(ss.candidate).await?;
        self.metrics.switchover.inc();

        let ppod = &ss.pods[ss.primary];
        if ppod.annotations().contains_key(ANN_DEMOTE) {
            self.ctx
                .store
                .remove_pod_annotation(&self.key.namespace, &ppod.name_any(), ANN_DEMOTE)
                .await?;
        }
        info!(primary = ss.candidate, "Switchover finished");
        Ok(())
    }

    /// Promote the most advanced replica after the primary was lost.
    pub(super) async fn failover(&self, ss: &mut StatusSet) -> Result<()> {
        info!(current = ss.primary, "Begin failover");

        let survivors: Vec<usize> = ss
            .replica_indices()
            .filter(|&i| ss.mysql_status[i].is_some() && !ss.is_errant(i))
            .collect();

        for &i in &survivors {
            ss.ops[i].stop_replica_io_thread().await?;
        }
        sleep(self.ctx.config.operations.settle_delay).await;

        let mut statuses: Vec<Option<MySQLInstanceStatus>> = vec![None; ss.mysql_status.len()];
        for &i in &survivors {
            statuses[i] = Some(ss.ops[i].get_status().await?);
        }

        let chooser = survivors.first().copied().ok_or(HerdError::NoTopRunner)?;
        let candidate = find_top_runner(&ss.ops[chooser], &statuses).await?;
        ss.candidate = candidate;

        let gtid = statuses[candidate]
            .as_ref()
            .map(|st| candidate_gtid(st).to_string())
            .unwrap_or_default();
        info!(index = candidate, gtid = %gtid, "Waiting for the new primary to execute all retrieved transactions");
        ss.ops[candidate]
            .wait_for_gtid(&gtid, self.ctx.config.operations.failover_timeout_secs)
            .await?;

        self.persist_primary(candidate).await?;
        self.metrics.failover.inc();

        info!(primary = candidate, "Failover finished");
        Ok(())
    }

    /// Push every live instance toward its role.
    pub(super) async fn configure(&self, ss: &StatusSet) -> Result<bool> {
        let Some(pst) = ss.primary_status() else {
            return Err(HerdError::InstanceUnavailable {
                index: ss.primary,
                reason: "primary status is unknown".to_string(),
            });
        };
        let mut redo = self.strip_stale_roles(ss).await?;

        redo |= if ss.cluster.is_intermediate() {
            self.configure_intermediate_primary(ss, pst).await?
        } else {
            self.configure_primary(ss, pst).await?
        };

        for i in ss.replica_indices() {
            if ss.mysql_status[i].is_none() {
                continue;
            }
            redo |= self.configure_replica(ss, pst, i).await?;
        }

        redo |= self.apply_roles(ss).await?;

        // writes are accepted only once replication is wired
        if !ss.cluster.is_intermediate() && pst.global_variables.read_only {
            redo = true;
            info!(instance = ss.primary, "Set read_only=0");
            ss.ops[ss.primary].set_read_only(false).await?;
            self.ctx
                .events
                .record(&ss.cluster, ClusterEvent::SetWritable)
                .await;
        }
        Ok(redo)
    }

    async fn strip_stale_roles(&self, ss: &StatusSet) -> Result<bool> {
        let mut changed = Vec::new();
        for (i, pod) in ss.pods.iter().enumerate() {
            let stale = match pod.labels().get(LABEL_ROLE).map(String::as_str) {
                Some(ROLE_PRIMARY) => i != ss.primary,
                Some(ROLE_REPLICA) => i == ss.primary,
                _ => false,
            };
            if !stale {
                continue;
            }
            info!(instance = i, "Removing stale role label");
            self.ctx
                .store
                .set_pod_role(&self.key.namespace, &pod.name_any(), None)
                .await?;
            changed.push(i);
        }

        for &i in &changed {
            if ss.mysql_status[i].is_some() {
                ss.ops[i].kill_connections().await?;
            }
        }
        Ok(!changed.is_empty())
    }

    async fn configure_intermediate_primary(
        &self,
        ss: &StatusSet,
        pst: &MySQLInstanceStatus,
    ) -> Result<bool> {
        let op = &ss.ops[ss.primary];
        let mut redo = false;
        if !pst.global_variables.super_read_only {
            redo = true;
            info!(instance = ss.primary, "Set super_read_only=1");
            op.set_read_only(true).await?;
        }

        let source = self.replication_source(ss).await?.access_info();
        let linked = pst.replica_status.as_ref().is_some_and(|rs| {
            rs.replica_io_running == IO_RUNNING && rs.source_host == source.host
        });
        if !linked {
            redo = true;
            info!(instance = ss.primary, semisync = false, "Start replication");
            op.configure_replica(&source, false).await?;
        }
        Ok(redo)
    }

    async fn configure_primary(&self, ss: &StatusSet, pst: &MySQLInstanceStatus) -> Result<bool> {
        let op = &ss.ops[ss.primary];
        let mut redo = false;

        // drain what was retrieved while this instance was a replica
        if let Some(rs) = &pst.replica_status {
            if rs.replica_io_running == IO_RUNNING {
                redo = true;
                info!(instance = ss.primary, "Stop replica IO thread");
                op.stop_replica_io_thread().await?;
                sleep(self.ctx.config.operations.settle_delay).await;
            }
            if !rs.retrieved_gtid_set.is_empty() {
                redo = true;
                info!(instance = ss.primary, gtid = %rs.retrieved_gtid_set, "Waiting for all retrieved transactions to be executed");
                op.wait_for_gtid(&rs.retrieved_gtid_set, 0).await?;
            }
        }

        let replicas = ss.cluster.replicas();
        if replicas <= 1 {
            return Ok(redo);
        }

        let wait_for = u32::try_from(required_acks(replicas)).unwrap_or(u32::MAX);
        let gv = &pst.global_variables;
        if !gv.semi_sync_source_enabled || gv.wait_for_replica_count != wait_for {
            redo = true;
            info!(wait_for, "Enable semi-sync primary");
            op.configure_primary(wait_for).await?;
        }
        Ok(redo)
    }

    async fn configure_replica(
        &self,
        ss: &StatusSet,
        pst: &MySQLInstanceStatus,
        index: usize,
    ) -> Result<bool> {
        let Some(st) = &ss.mysql_status[index] else {
            return Ok(false);
        };
        let op = &ss.ops[index];

        if st.is_errant {
            let running = st
                .replica_status
                .as_ref()
                .is_some_and(|rs| rs.replica_io_running == IO_RUNNING);
            if !running {
                return Ok(false);
            }
            info!(instance = index, "Stop replica IO thread of errant instance");
            op.stop_replica_io_thread().await?;
            return Ok(true);
        }

        let mut redo = false;
        if !st.global_variables.super_read_only {
            redo = true;
            info!(instance = index, "Set super_read_only=1");
            op.set_read_only(true).await?;
        }

        let mut executed = st.global_variables.executed_gtid.clone();
        if executed.is_empty() && !ss.executed_gtid.is_empty() && st.replica_status.is_none() {
            redo = true;
            if let Some(cloned) = self.clone_from_primary(ss, index).await? {
                executed = cloned.global_variables.executed_gtid;
            }
        }

        let purged = &pst.global_variables.purged_gtid;
        if !purged.is_empty() && !ss.ops[ss.primary].is_subset_gtid(purged, &executed).await? {
            return Err(HerdError::PurgedTransactions {
                index,
                purged: purged.clone(),
                executed,
            });
        }

        let source = AccessInfo {
            host: ss.cluster.pod_hostname(ss.primary),
            port: MYSQL_PORT,
            user: REPLICATION_USER.to_string(),
            password: ss.password.replicator.clone(),
        };
        let semisync = !ss.cluster.is_intermediate();
        let linked = st.replica_status.as_ref().is_some_and(|rs| {
            rs.replica_io_running == IO_RUNNING && rs.source_host == source.host
        });
        if !linked || st.global_variables.semi_sync_replica_enabled != semisync {
            redo = true;
            info!(instance = index, semisync, "Start replication");
            op.configure_replica(&source, semisync).await?;
        }
        Ok(redo)
    }

    /// Seed an empty replica with the primary's data. Returns the status
    /// read once the instance came back, if it did.
    async fn clone_from_primary(
        &self,
        ss: &StatusSet,
        index: usize,
    ) -> Result<Option<MySQLInstanceStatus>> {
        let ppod = &ss.pods[ss.primary];
        let mut host = ppod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .unwrap_or_default();
        if host == "0.0.0.0" {
            host = ss.cluster.pod_hostname(ss.primary);
        }
        if host.is_empty() {
            return Err(HerdError::InstanceUnavailable {
                index: ss.primary,
                reason: format!("pod {} has not been assigned an IP address", ppod.name_any()),
            });
        }

        let req = CloneRequest {
            host,
            port: MYSQL_ADMIN_PORT,
            user: CLONE_DONOR_USER.to_string(),
            password: ss.password.donor.clone(),
            init_user: ADMIN_USER.to_string(),
            init_password: ss.password.admin.clone(),
            boot_timeout: Duration::from_secs(
                u64::try_from(ss.cluster.spec.startup_wait_seconds).unwrap_or(0),
            ),
        };

        let agent = self.ctx.agents.connect(&ss.cluster, index).await?;
        info!(instance = index, "Begin cloning data");
        if let Err(e) = agent.clone_from(&req).await {
            warn!(instance = index, error = %e, "Clone failed");
            self.ctx
                .events
                .record(
                    &ss.cluster,
                    ClusterEvent::CloneFailed {
                        index,
                        error: e.to_string(),
                    },
                )
                .await;
            return Err(e);
        }
        self.ctx
            .events
            .record(&ss.cluster, ClusterEvent::CloneSucceeded { index })
            .await;
        info!(instance = index, "Clone succeeded");

        Ok(self.wait_for_restart(&ss.ops[index]).await)
    }

    async fn apply_roles(&self, ss: &StatusSet) -> Result<bool> {
        let mut redo = false;
        for (i, pod) in ss.pods.iter().enumerate() {
            let current = pod.labels().get(LABEL_ROLE).map(String::as_str);
            let desired = if i == ss.primary {
                Some(ROLE_PRIMARY)
            } else if ss.mysql_status[i].is_none() {
                continue;
            } else if ss.is_errant(i) {
                None
            } else {
                Some(ROLE_REPLICA)
            };
            if current == desired {
                continue;
            }
            redo = true;
            self.ctx
                .store
                .set_pod_role(&self.key.namespace, &pod.name_any(), desired)
                .await?;
        }
        Ok(redo)
    }

    async fn replication_source(&self, ss: &StatusSet) -> Result<ReplicationSource> {
        let name = ss
            .cluster
            .spec
            .replication_source_secret_name
            .as_deref()
            .ok_or_else(|| HerdError::Internal("cluster has no replication source".to_string()))?;
        let secret = self.ctx.store.get_secret(&self.key.namespace, name).await?;
        ReplicationSource::from_secret(&secret)
    }

    /// Wait for an instance restarted by a clone to answer again.
    async fn wait_for_restart(&self, op: &dyn DatabaseOperator) -> Option<MySQLInstanceStatus> {
        let cfg = &self.ctx.config.operations;
        sleep(cfg.wait_for_restart).await;
        for _ in 0..cfg.clone_poll_attempts {
            sleep(cfg.clone_poll_interval).await;
            if let Ok(status) = op.get_status().await {
                return Some(status);
            }
        }
        warn!(instance = op.name(), "Instance did not come back after clone");
        None
    }

    /// Record a new primary index, re-reading the cluster on every conflict.
    async fn persist_primary(&self, index: usize) -> Result<()> {
        let store = &self.ctx.store;
        let key = &self.key;
        let index = i32::try_from(index)
            .map_err(|_| HerdError::Internal(format!("primary index {} overflows", index)))?;
        retry_on_conflict(move || async move {
            let mut cluster = store.get_cluster(key).await?;
            cluster.status.get_or_insert_with(Default::default).current_primary_index = index;
            store.update_cluster_status(&cluster).await?;
            Ok(())
        })
        .await
    }
}
