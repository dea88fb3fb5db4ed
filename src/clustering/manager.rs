//! Registry of running manager processes.

use super::process::{ManagerProcess, ProcessHandle};
use super::ClusterContext;
use crate::crd::ClusterKey;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

/// Maximum time [`ClusterManager::stop_all`] waits for processes to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

struct Running {
    handle: ProcessHandle,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    running: HashMap<ClusterKey, Running>,
    // Cancelled processes that may still be unwinding. A restarted process
    // waits for its predecessor, which deletes the shared metric series.
    stopping: HashMap<ClusterKey, JoinHandle<()>>,
}

/// Starts, signals and stops one [`ManagerProcess`] per cluster.
///
/// Safe to call from concurrent reconciliations; every method takes the
/// registry lock for the duration of a lookup and never across an await.
pub struct ClusterManager {
    ctx: ClusterContext,
    registry: Mutex<Registry>,
}

impl ClusterManager {
    pub fn new(ctx: ClusterContext) -> Self {
        Self {
            ctx,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Signal the process of `key`, starting it first if needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn update(&self, key: &ClusterKey) {
        self.update_inner(key, false);
    }

    /// Signal the process of `key` only if it is already running.
    pub fn update_no_start(&self, key: &ClusterKey) {
        self.update_inner(key, true);
    }

    fn update_inner(&self, key: &ClusterKey, no_start: bool) {
        let mut registry = self.registry.lock();
        if let Some(running) = registry.running.get(key) {
            running.handle.update();
            return;
        }
        if no_start {
            return;
        }

        info!(cluster = %key, "Starting manager process");
        let (process, handle) = ManagerProcess::new(key.clone(), self.ctx.clone());
        let previous = registry.stopping.remove(key);
        let span = info_span!("cluster", cluster = %key);
        let task = tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                process.run().await
            }
            .instrument(span),
        );
        handle.update();
        registry.running.insert(key.clone(), Running { handle, task });
    }

    /// Cancel and forget the process of `key`. Returns whether one was running.
    pub fn stop(&self, key: &ClusterKey) -> bool {
        let mut registry = self.registry.lock();
        registry.stopping.retain(|_, task| !task.is_finished());
        match registry.running.remove(key) {
            Some(running) => {
                info!(cluster = %key, "Stopping manager process");
                running.handle.cancel();
                registry.stopping.insert(key.clone(), running.task);
                true
            }
            None => false,
        }
    }

    /// Cancel every process and wait for them to exit.
    pub async fn stop_all(&self) {
        let (stopped, mut tasks): (Vec<(ClusterKey, Running)>, Vec<JoinHandle<()>>) = {
            let mut registry = self.registry.lock();
            (
                registry.running.drain().collect(),
                registry.stopping.drain().map(|(_, task)| task).collect(),
            )
        };
        for (key, running) in stopped {
            info!(cluster = %key, "Stopping manager process");
            running.handle.cancel();
            tasks.push(running.task);
        }

        if tokio::time::timeout(STOP_TIMEOUT, join_all(tasks)).await.is_err() {
            warn!("Timed out waiting for manager processes to stop");
        }
    }

    pub fn is_running(&self, key: &ClusterKey) -> bool {
        self.registry.lock().running.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().running.is_empty()
    }
}
