//! src/services/reconciler.rs
//!
//! One reconciliation pass over records flagged `pending_sync`. Each claimed
//! record is worked under its lease: queued copies are purged, live records
//! are copied toward the desired replica count, and tombstoned records whose
//! copies are all gone are removed. The pass runs once per call; scheduling
//! repeated passes is left to whoever invokes it.

use crate::{
    errors::FileDataResult,
    models::file_data::Row,
    services::file_data_service::{FileDataService, Lease},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Counts for one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassStats {
    pub claimed: usize,
    pub copied: usize,
    pub purged: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Claim up to `limit` pending records and reconcile each of them.
///
/// A failure on one record is logged and counted; the rest of the pass goes
/// on, and the failed record is picked up again once its lease is free.
pub async fn run_pass(service: &FileDataService, now: i64, limit: i64) -> FileDataResult<PassStats> {
    let claimed = service.claim_pending(now, limit).await?;
    let mut stats = PassStats {
        claimed: claimed.len(),
        ..PassStats::default()
    };

    for (lease, _) in claimed {
        match reconcile_record(service, &lease, now, &mut stats).await {
            Ok(true) => {}
            Ok(false) => {
                service.release_lease(&lease, now).await?;
            }
            Err(err) => {
                warn!(file_id = lease.file_id, object_type = %lease.object_type, error = %err, "reconciliation failed");
                stats.failed += 1;
                service.release_lease(&lease, now).await?;
            }
        }
    }

    info!(
        claimed = stats.claimed,
        copied = stats.copied,
        purged = stats.purged,
        removed = stats.removed,
        failed = stats.failed,
        "reconciliation pass finished"
    );
    Ok(stats)
}

/// Returns whether the record was removed, which also ends its lease.
async fn reconcile_record(
    service: &FileDataService,
    lease: &Lease,
    now: i64,
    stats: &mut PassStats,
) -> FileDataResult<bool> {
    // Copies still in flight belong to a holder whose lease has lapsed.
    let (mut row, _) = service
        .apply_under_lease(lease, now, |row, desired| {
            for bucket in row.inflight_replicas.clone() {
                if row.is_deleted {
                    row.confirm_replication(&bucket, desired);
                } else {
                    row.fail_replication(&bucket, desired);
                }
            }
        })
        .await?;

    for bucket in row.delete_from_buckets.clone() {
        row = service.purge_copy(lease, &bucket, now).await?;
        stats.purged += 1;
    }

    if row.is_purgeable() {
        let removed = service.remove_purged(lease).await?;
        if removed {
            stats.removed += 1;
        }
        return Ok(removed);
    }
    if !row.is_readable() {
        debug!(file_id = row.file_id, object_type = %row.object_type, "no confirmed copy to replicate from");
        return Ok(false);
    }

    let policy = &service.policy;
    for target in row.plan_replication(&policy.replica_buckets, policy.replica_count) {
        let (row, started) = service
            .apply_under_lease(lease, now, |row, desired| row.begin_replication(&target, desired))
            .await?;
        if !started {
            continue;
        }
        match copy_objects(service, &row, &target).await {
            Ok(()) => {
                service
                    .apply_under_lease(lease, now, |row, desired| row.confirm_replication(&target, desired))
                    .await?;
                stats.copied += 1;
                info!(file_id = row.file_id, object_type = %row.object_type, bucket = %target, "copy replicated");
            }
            Err(err) => {
                warn!(file_id = row.file_id, bucket = %target, error = %err, "copy failed");
                service
                    .apply_under_lease(lease, now, |row, desired| row.fail_replication(&target, desired))
                    .await?;
                stats.failed += 1;
            }
        }
    }
    Ok(false)
}

/// Stream every object of `row` from its read bucket into `target`.
async fn copy_objects(service: &FileDataService, row: &Row, target: &str) -> FileDataResult<()> {
    for key in row.object_keys() {
        let (file, _) = service.buckets.open_object(&row.latest_bucket, &key).await?;
        service
            .buckets
            .put_object_stream(target, &key, ReaderStream::new(file))
            .await?;
    }
    Ok(())
}
