use super::DatabaseOperator;
use crate::error::{HerdError, Result};
use crate::types::MySQLInstanceStatus;

/// GTID set a failover candidate can offer: what it retrieved from the old
/// primary, or what it executed when it never retrieved anything.
pub fn candidate_gtid(status: &MySQLInstanceStatus) -> &str {
    match &status.replica_status {
        Some(rs) if !rs.retrieved_gtid_set.is_empty() => &rs.retrieved_gtid_set,
        _ => &status.global_variables.executed_gtid,
    }
}

/// Index of the instance whose GTID set contains every other candidate's.
///
/// `None` entries and empty sets are skipped. Two sets that are not subsets
/// of each other fail with [`HerdError::ErrantTransactions`]; no usable
/// entry fails with [`HerdError::NoTopRunner`].
pub async fn find_top_runner(
    op: &dyn DatabaseOperator,
    statuses: &[Option<MySQLInstanceStatus>],
) -> Result<usize> {
    let mut latest: Option<(usize, &str)> = None;

    for (i, status) in statuses.iter().enumerate() {
        let Some(status) = status else { continue };
        let gtid = candidate_gtid(status);
        if gtid.is_empty() {
            continue;
        }

        let Some((_, latest_gtid)) = latest else {
            latest = Some((i, gtid));
            continue;
        };

        if op.is_subset_gtid(gtid, latest_gtid).await? {
            continue;
        }
        if op.is_subset_gtid(latest_gtid, gtid).await? {
            latest = Some((i, gtid));
            continue;
        }

        return Err(HerdError::ErrantTransactions {
            set1: gtid.to_string(),
            set2: latest_gtid.to_string(),
        });
    }

    latest.map(|(i, _)| i).ok_or(HerdError::NoTopRunner)
}
