//! The per-cluster evaluation loop.

use super::status::{gather_status, is_pod_ready, StatusSet};
use super::ClusterContext;
use crate::crd::{ClusterKey, CONDITION_AVAILABLE, CONDITION_HEALTHY, CONDITION_INITIALIZED};
use crate::error::Result;
use crate::events::ClusterEvent;
use crate::metrics::ClusterMetrics;
use crate::resilience::retry_on_conflict;
use crate::shutdown::{ShutdownAware, ShutdownCoordinator};
use crate::types::ClusterState;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Control side of a running [`ManagerProcess`].
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    signal: mpsc::Sender<()>,
    shutdown: ShutdownCoordinator,
}

impl ProcessHandle {
    /// Ask for an evaluation cycle now. A pending request absorbs this one.
    pub fn update(&self) {
        let _ = self.signal.try_send(());
    }

    /// Stop the process. An in-flight cycle is abandoned.
    pub fn cancel(&self) {
        self.shutdown.shutdown();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_shutting_down()
    }
}

/// Drives one cluster: a cycle runs on every tick and every update signal.
///
/// Cycles never overlap; the next one starts after the previous returned.
pub struct ManagerProcess {
    pub(super) key: ClusterKey,
    pub(super) ctx: ClusterContext,
    pub(super) metrics: ClusterMetrics,
    handle: ProcessHandle,
    signals: mpsc::Receiver<()>,
}

impl ManagerProcess {
    pub fn new(key: ClusterKey, ctx: ClusterContext) -> (Self, ProcessHandle) {
        let (tx, rx) = mpsc::channel(1);
        let handle = ProcessHandle {
            signal: tx,
            shutdown: ShutdownCoordinator::new(),
        };
        let process = Self {
            metrics: ClusterMetrics::new(&key),
            key,
            ctx,
            handle: handle.clone(),
            signals: rx,
        };
        (process, handle)
    }

    pub fn key(&self) -> &ClusterKey {
        &self.key
    }

    /// Run until the handle is cancelled.
    pub async fn run(mut self) {
        // a stopped process of the same cluster may have deleted the series
        self.metrics = ClusterMetrics::new(&self.key);
        let shutdown = self.handle.shutdown.clone();
        let mut ticker = interval(self.ctx.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for_shutdown() => break,
                _ = self.signals.recv() => {}
                _ = ticker.tick() => {}
            }

            self.metrics.checks.inc();
            let timer = self.metrics.processing_time.start_timer();
            let outcome = self.run_cycle().with_shutdown(&shutdown).await;
            timer.observe_duration();

            match outcome {
                None => break,
                Some(Ok(true)) => self.handle.update(),
                Some(Ok(false)) => {}
                Some(Err(e)) => {
                    self.metrics.errors.inc();
                    error!(error = %e, "Cycle failed");
                }
            }
        }

        info!("Quit");
        self.metrics.delete();
    }

    /// One gather, classify and act cycle. Returns whether another cycle
    /// should follow right away.
    ///
    /// [`run`](Self::run) calls this on every tick; it is public so a single
    /// cycle can be driven by hand.
    pub async fn run_cycle(&self) -> Result<bool> {
        let mut ss = gather_status(&self.ctx, &self.key).await?;
        self.update_status(&ss).await?;

        info!(state = %ss.state, "Cluster state is {}", ss.state);
        match ss.state {
            ClusterState::Cloning => match self.clone_from_source(&ss).await {
                Ok(redo) => {
                    self.record(&ss, ClusterEvent::InitCloneSucceeded).await;
                    Ok(redo)
                }
                Err(e) => {
                    let error = e.to_string();
                    self.record(&ss, ClusterEvent::InitCloneFailed { error }).await;
                    Err(e)
                }
            },

            ClusterState::Healthy | ClusterState::Degraded if ss.need_switch => {
                match self.switchover(&ss).await {
                    Ok(()) => {
                        let index = ss.candidate;
                        self.record(&ss, ClusterEvent::SwitchOverSucceeded { index })
                            .await;
                        // the next cycle configures the new topology
                        Ok(true)
                    }
                    Err(e) => {
                        let error = e.to_string();
                        self.record(&ss, ClusterEvent::SwitchOverFailed { error }).await;
                        Err(e)
                    }
                }
            }

            ClusterState::Degraded | ClusterState::Incomplete => self.configure(&ss).await,

            ClusterState::Failed => match self.failover(&mut ss).await {
                Ok(()) => {
                    let index = ss.candidate;
                    self.record(&ss, ClusterEvent::FailOverSucceeded { index })
                        .await;
                    Ok(true)
                }
                Err(e) => {
                    let error = e.to_string();
                    self.record(&ss, ClusterEvent::FailOverFailed { error }).await;
                    Err(e)
                }
            },

            ClusterState::Healthy
            | ClusterState::Restoring
            | ClusterState::Lost
            | ClusterState::Undecided => Ok(false),
        }
    }

    async fn record(&self, ss: &StatusSet, event: ClusterEvent) {
        self.ctx.events.record(&ss.cluster, event).await;
    }

    /// Reflect the classification in the cluster record and the gauges.
    ///
    /// The record is written only when something changed.
    async fn update_status(&self, ss: &StatusSet) -> Result<()> {
        let state = ss.state;
        let (initialized, available, healthy) = match state {
            ClusterState::Cloning | ClusterState::Restoring => (false, false, false),
            ClusterState::Healthy => (true, true, true),
            ClusterState::Degraded => (true, true, false),
            ClusterState::Incomplete => (
                true,
                ss.primary_status().is_some() && is_pod_ready(&ss.pods[ss.primary]),
                false,
            ),
            ClusterState::Failed | ClusterState::Lost | ClusterState::Undecided => {
                (true, false, false)
            }
        };

        let synced = ss.pods.iter().filter(|p| is_pod_ready(p)).count();
        self.metrics.available.set(if available { 1.0 } else { 0.0 });
        self.metrics.healthy.set(if healthy { 1.0 } else { 0.0 });
        self.metrics.replicas.set(ss.pods.len() as f64);
        self.metrics.ready_replicas.set(synced as f64);
        self.metrics.errant_replicas.set(ss.errants.len() as f64);

        let store = &self.ctx.store;
        let key = &self.key;
        let metrics = &self.metrics;
        let reason = state.as_str();
        let message = format!("the current state is {}", reason);
        let message = message.as_str();
        let errants: Vec<i32> = ss.errants.iter().map(|&i| i as i32).collect();
        let errants = errants.as_slice();
        let cloned = ss.cluster.is_intermediate() && state != ClusterState::Cloning;

        retry_on_conflict(move || async move {
            let mut cluster = store.get_cluster(key).await?;
            let orig = cluster.status.clone().unwrap_or_default();

            let mut status = orig.clone();
            status.set_condition(CONDITION_INITIALIZED, initialized, reason, message);
            status.set_condition(CONDITION_AVAILABLE, available, reason, message);
            status.set_condition(CONDITION_HEALTHY, healthy, reason, message);
            status.synced_replicas = synced as i32;
            status.errant_replicas = errants.len() as i32;
            status.errant_replica_list = errants.to_vec();
            if cloned {
                status.cloned = true;
            }
            metrics.update_backup(&status);

            if status == orig {
                return Ok(());
            }
            info!("Updating status");
            cluster.status = Some(status);
            store.update_cluster_status(&cluster).await?;
            Ok(())
        })
        .await
    }
}
