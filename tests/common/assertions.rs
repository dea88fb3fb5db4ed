// Assertions on cluster records and helpers for waiting on background processes

use sqlherd::crd::MySQLCluster;
use std::time::{Duration, Instant};

/// Assert that `cluster` carries a condition with the given status and reason.
pub fn assert_condition(cluster: &MySQLCluster, condition_type: &str, status: bool, reason: &str) {
    let cond = cluster
        .status
        .as_ref()
        .and_then(|s| s.condition(condition_type))
        .unwrap_or_else(|| panic!("condition {} is missing", condition_type));
    let expected = if status { "True" } else { "False" };
    assert_eq!(
        cond.status, expected,
        "condition {} has status {}",
        condition_type, cond.status
    );
    assert_eq!(cond.reason.as_deref(), Some(reason));
    let message = format!("the current state is {}", reason);
    assert_eq!(cond.message.as_deref(), Some(message.as_str()));
}

/// Condition reason shared by every condition, i.e. the last recorded state.
pub fn recorded_state(cluster: &MySQLCluster) -> Option<String> {
    cluster
        .status
        .as_ref()
        .and_then(|s| s.condition(sqlherd::crd::CONDITION_HEALTHY))
        .and_then(|c| c.reason.clone())
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
