//! src/services/file_data_service.rs
//!
//! FileDataService — replication records in SQLite plus the sidecar and
//! preview operations served to clients.
//!
//! Workers coordinate only through the `sync_locked_till` column. A lease is
//! taken with a conditional UPDATE on the value the worker observed, and every
//! write made under a lease is itself conditional on the lease value still
//! being stored. A worker that stalls past expiry therefore cannot clobber the
//! next holder's writes.

use crate::{
    errors::{FileDataError, FileDataResult},
    fault,
    models::{
        contracts::{
            Entity, GetFileData, GetFilesData, GetFilesDataResponse, GetPreviewUrlRequest,
            PreviewUploadUrl, PreviewUploadUrlRequest, PreviewUrl, PutFileDataRequest,
            Resolution, SidecarObject,
        },
        file_data::{BucketSet, NewRow, Row, StaleKeys},
        keys,
        object_type::ObjectType,
    },
    services::{
        bucket_store::BucketStore,
        url_signer::{SignedMethod, UrlSigner},
    },
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Replication settings shared by every worker.
#[derive(Clone, Debug)]
pub struct ReplicationPolicy {
    /// Bucket that receives every new upload.
    pub hot_bucket: String,

    /// Every bucket a record may be replicated to, hot bucket included.
    pub replica_buckets: Vec<String>,

    /// Confirmed copies a live record should reach.
    pub replica_count: usize,

    pub lease_duration: Duration,
}

/// Proof of reconciliation ownership for one record.
///
/// `locked_till` is the value written when the lease was taken and doubles as
/// the fencing token for every later write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    pub file_id: i64,
    pub object_type: ObjectType,
    pub locked_till: i64,
}

impl Lease {
    pub fn is_live(&self, now: i64) -> bool {
        now < self.locked_till
    }
}

#[derive(Clone)]
pub struct FileDataService {
    /// Shared SQLite connection pool holding the `file_data` table.
    pub db: Arc<SqlitePool>,

    pub buckets: BucketStore,
    pub signer: UrlSigner,
    pub policy: Arc<ReplicationPolicy>,
}

/// Raw `file_data` row; bucket sets are JSON arrays in TEXT columns.
#[derive(FromRow)]
struct FileDataRecord {
    file_id: i64,
    user_id: i64,
    data_type: String,
    size: i64,
    latest_bucket: String,
    object_id: Option<String>,
    object_nonce: Option<String>,
    replicated_buckets: Json<BucketSet>,
    delete_from_buckets: Json<BucketSet>,
    inflight_rep_buckets: Json<BucketSet>,
    stale_keys: Json<StaleKeys>,
    pending_sync: bool,
    is_deleted: bool,
    sync_locked_till: i64,
    created_at: i64,
    updated_at: i64,
}

/// Object bytes the upload path stores while it holds the record's lease.
struct PendingObject {
    key: String,
    bytes: Vec<u8>,
}

fn check_replaceable(existing: &Row, new: &NewRow) -> FileDataResult<()> {
    if existing.user_id != new.user_id {
        return Err(FileDataError::NotFound {
            file_id: new.file_id,
            object_type: new.object_type.to_string(),
        });
    }
    if existing.is_deleted {
        return Err(FileDataError::bad_request(format!(
            "file {} data is deleted",
            new.file_id
        )));
    }
    Ok(())
}

impl TryFrom<FileDataRecord> for Row {
    type Error = FileDataError;

    fn try_from(rec: FileDataRecord) -> Result<Self, Self::Error> {
        let object_type = rec
            .data_type
            .parse::<ObjectType>()
            .map_err(|err| FileDataError::Sqlx(sqlx::Error::Decode(Box::new(err))))?;
        Ok(Row {
            file_id: rec.file_id,
            user_id: rec.user_id,
            object_type,
            size: rec.size,
            latest_bucket: rec.latest_bucket,
            object_id: rec.object_id,
            object_nonce: rec.object_nonce,
            replicated_buckets: rec.replicated_buckets.0,
            delete_from_buckets: rec.delete_from_buckets.0,
            inflight_replicas: rec.inflight_rep_buckets.0,
            stale_keys: rec.stale_keys.0,
            pending_sync: rec.pending_sync,
            is_deleted: rec.is_deleted,
            sync_locked_till: rec.sync_locked_till,
            created_at: rec.created_at,
            updated_at: rec.updated_at,
        })
    }
}

const ROW_COLUMNS: &str = "file_id, user_id, data_type, size, latest_bucket, object_id, \
     object_nonce, replicated_buckets, delete_from_buckets, inflight_rep_buckets, \
     stale_keys, pending_sync, is_deleted, sync_locked_till, created_at, updated_at";

pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

impl FileDataService {
    pub fn new(
        db: Arc<SqlitePool>,
        buckets: BucketStore,
        signer: UrlSigner,
        policy: ReplicationPolicy,
    ) -> Self {
        Self {
            db,
            buckets,
            signer,
            policy: Arc::new(policy),
        }
    }

    fn lease_micros(&self) -> i64 {
        self.policy
            .lease_duration
            .num_microseconds()
            .unwrap_or(i64::MAX / 2)
    }

    // --- Record access -------------------------------------------------

    pub async fn get_row(&self, file_id: i64, object_type: ObjectType) -> FileDataResult<Option<Row>> {
        let sql = format!("SELECT {ROW_COLUMNS} FROM file_data WHERE file_id = ? AND data_type = ?");
        let rec = sqlx::query_as::<_, FileDataRecord>(&sql)
            .bind(file_id)
            .bind(object_type.as_str())
            .fetch_optional(&*self.db)
            .await?;
        rec.map(Row::try_from).transpose()
    }

    /// Records of `object_type` owned by `user_id` among `file_ids`, deleted
    /// ones included.
    pub async fn get_rows_for_user(
        &self,
        user_id: i64,
        object_type: ObjectType,
        file_ids: &[i64],
    ) -> FileDataResult<Vec<Row>> {
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ROW_COLUMNS} FROM file_data WHERE user_id = "
        ));
        builder.push_bind(user_id);
        builder.push(" AND data_type = ");
        builder.push_bind(object_type.as_str());
        builder.push(" AND file_id IN (");
        let mut ids = builder.separated(", ");
        for id in file_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let recs: Vec<FileDataRecord> = builder.build_query_as().fetch_all(&*self.db).await?;
        recs.into_iter().map(Row::try_from).collect()
    }

    async fn insert_row(&self, row: &Row) -> FileDataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_data (
                file_id, user_id, data_type, size, latest_bucket, object_id, object_nonce,
                replicated_buckets, delete_from_buckets, inflight_rep_buckets, stale_keys,
                pending_sync, is_deleted, sync_locked_till, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id, data_type) DO NOTHING
            "#,
        )
        .bind(row.file_id)
        .bind(row.user_id)
        .bind(row.object_type.as_str())
        .bind(row.size)
        .bind(&row.latest_bucket)
        .bind(&row.object_id)
        .bind(&row.object_nonce)
        .bind(Json(&row.replicated_buckets))
        .bind(Json(&row.delete_from_buckets))
        .bind(Json(&row.inflight_replicas))
        .bind(Json(&row.stale_keys))
        .bind(row.pending_sync)
        .bind(row.is_deleted)
        .bind(row.sync_locked_till)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Write every mutable column of `row`, but only while `fence` is still
    /// the stored lease value.
    async fn write_fenced(&self, row: &Row, fence: i64) -> FileDataResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_data SET
                size = ?, latest_bucket = ?, object_id = ?, object_nonce = ?,
                replicated_buckets = ?, delete_from_buckets = ?, inflight_rep_buckets = ?,
                stale_keys = ?, pending_sync = ?, is_deleted = ?, sync_locked_till = ?, updated_at = ?
            WHERE file_id = ? AND data_type = ? AND sync_locked_till = ?
            "#,
        )
        .bind(row.size)
        .bind(&row.latest_bucket)
        .bind(&row.object_id)
        .bind(&row.object_nonce)
        .bind(Json(&row.replicated_buckets))
        .bind(Json(&row.delete_from_buckets))
        .bind(Json(&row.inflight_replicas))
        .bind(Json(&row.stale_keys))
        .bind(row.pending_sync)
        .bind(row.is_deleted)
        .bind(row.sync_locked_till)
        .bind(row.updated_at)
        .bind(row.file_id)
        .bind(row.object_type.as_str())
        .bind(fence)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // --- Lease protocol ------------------------------------------------

    /// Try to take the lease on a record as last observed in `observed`.
    ///
    /// Succeeds only when the observed lease had expired and nobody has
    /// changed it since. Losers get `None` and must not touch the record.
    pub async fn try_acquire_lease(&self, observed: &Row, now: i64) -> FileDataResult<Option<Lease>> {
        if observed.lease_held(now) {
            return Ok(None);
        }
        let locked_till = now.saturating_add(self.lease_micros());
        let result = sqlx::query(
            "UPDATE file_data SET sync_locked_till = ?
             WHERE file_id = ? AND data_type = ? AND sync_locked_till = ? AND sync_locked_till <= ?",
        )
        .bind(locked_till)
        .bind(observed.file_id)
        .bind(observed.object_type.as_str())
        .bind(observed.sync_locked_till)
        .bind(now)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 1 {
            debug!(file_id = observed.file_id, object_type = %observed.object_type, locked_till, "lease acquired");
            Ok(Some(Lease {
                file_id: observed.file_id,
                object_type: observed.object_type,
                locked_till,
            }))
        } else {
            debug!(file_id = observed.file_id, object_type = %observed.object_type, "lease contended");
            Ok(None)
        }
    }

    /// Lease up to `limit` records that need reconciliation and whose lease
    /// is free. Returns the records won, oldest update first.
    pub async fn claim_pending(&self, now: i64, limit: i64) -> FileDataResult<Vec<(Lease, Row)>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM file_data
             WHERE pending_sync = 1 AND sync_locked_till <= ?
             ORDER BY updated_at ASC LIMIT ?"
        );
        let recs = sqlx::query_as::<_, FileDataRecord>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&*self.db)
            .await?;

        let mut claimed = Vec::new();
        for rec in recs {
            let mut row = Row::try_from(rec)?;
            let state = row.sync_state(now);
            if let Some(lease) = self.try_acquire_lease(&row, now).await? {
                debug!(file_id = row.file_id, object_type = %row.object_type, ?state, "claimed for reconciliation");
                row.sync_locked_till = lease.locked_till;
                claimed.push((lease, row));
            }
        }
        Ok(claimed)
    }

    /// Apply a transition to a leased record and persist it.
    ///
    /// `apply` receives the freshly read record and the desired replica count.
    /// Fails with `LeaseLost` if the lease expired or was taken over.
    pub async fn apply_under_lease<R>(
        &self,
        lease: &Lease,
        now: i64,
        apply: impl FnOnce(&mut Row, usize) -> R,
    ) -> FileDataResult<(Row, R)> {
        let lost = || FileDataError::LeaseLost {
            file_id: lease.file_id,
        };
        if !lease.is_live(now) {
            return Err(lost());
        }
        let mut row = self
            .get_row(lease.file_id, lease.object_type)
            .await?
            .filter(|row| row.sync_locked_till == lease.locked_till)
            .ok_or_else(lost)?;

        let out = apply(&mut row, self.policy.replica_count);
        row.updated_at = now;
        if !self.write_fenced(&row, lease.locked_till).await? {
            return Err(lost());
        }
        Ok((row, out))
    }

    /// Give the lease back early so another worker need not wait for expiry.
    ///
    /// The freed value is `now`, which is already expired. Brief holders
    /// re-read the record under their fence, so an observer that saw an equal
    /// value earlier cannot act on stale fields.
    pub async fn release_lease(&self, lease: &Lease, now: i64) -> FileDataResult<bool> {
        let result = sqlx::query(
            "UPDATE file_data SET sync_locked_till = ?
             WHERE file_id = ? AND data_type = ? AND sync_locked_till = ?",
        )
        .bind(now)
        .bind(lease.file_id)
        .bind(lease.object_type.as_str())
        .bind(lease.locked_till)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete the record's objects from `bucket` and confirm the purge.
    /// Buckets not queued for deletion are left alone.
    pub async fn purge_copy(&self, lease: &Lease, bucket: &str, now: i64) -> FileDataResult<Row> {
        let row = self
            .get_row(lease.file_id, lease.object_type)
            .await?
            .filter(|row| row.sync_locked_till == lease.locked_till)
            .ok_or(FileDataError::LeaseLost {
                file_id: lease.file_id,
            })?;
        if !row.delete_from_buckets.contains(bucket) {
            return Ok(row);
        }

        for key in row.purge_keys(bucket) {
            self.buckets.delete_object(bucket, &key).await?;
        }
        let (row, _) = self
            .apply_under_lease(lease, now, |row, desired| row.confirm_purge(bucket, desired))
            .await?;
        info!(file_id = row.file_id, object_type = %row.object_type, bucket, "copy purged");
        Ok(row)
    }

    /// Drop a tombstoned record whose copies are all purged.
    pub async fn remove_purged(&self, lease: &Lease) -> FileDataResult<bool> {
        let result = sqlx::query(
            "DELETE FROM file_data
             WHERE file_id = ? AND data_type = ? AND sync_locked_till = ?
               AND is_deleted = 1 AND delete_from_buckets = '[]' AND inflight_rep_buckets = '[]'",
        )
        .bind(lease.file_id)
        .bind(lease.object_type.as_str())
        .bind(lease.locked_till)
        .execute(&*self.db)
        .await?;
        let removed = result.rows_affected() == 1;
        if removed {
            info!(file_id = lease.file_id, object_type = %lease.object_type, "purged record removed");
        }
        Ok(removed)
    }

    /// Take a short lease for the upload or delete path and return the record
    /// as stored under it. Checks made on `observed` must be repeated on the
    /// returned row.
    async fn lease_briefly(&self, observed: &Row, now: i64) -> FileDataResult<(Lease, Row)> {
        let file_id = observed.file_id;
        let lease = self
            .try_acquire_lease(observed, now)
            .await?
            .ok_or(FileDataError::LeaseHeld { file_id })?;
        let fresh = self
            .get_row(file_id, observed.object_type)
            .await?
            .filter(|row| row.sync_locked_till == lease.locked_till)
            .ok_or(FileDataError::LeaseLost { file_id })?;
        Ok((lease, fresh))
    }

    /// Persist `row` and free its brief lease in the same fenced write.
    async fn finish_briefly(&self, lease: &Lease, mut row: Row, now: i64) -> FileDataResult<Row> {
        row.sync_locked_till = now;
        row.updated_at = now;
        if !self.write_fenced(&row, lease.locked_till).await? {
            return Err(FileDataError::LeaseLost {
                file_id: row.file_id,
            });
        }
        Ok(row)
    }

    async fn abandon<T>(&self, lease: &Lease, now: i64, err: FileDataError) -> FileDataResult<T> {
        self.release_lease(lease, now).await?;
        Err(err)
    }

    async fn store_pending(&self, bucket: &str, pending: Option<PendingObject>) -> FileDataResult<()> {
        if let Some(object) = pending {
            self.buckets.put_bytes(bucket, &object.key, object.bytes).await?;
        }
        Ok(())
    }

    /// Upload path: create the record, or replace the object of a live one.
    ///
    /// `pending` is written to the new bucket only while the record is leased
    /// and after ownership and tombstone checks pass; the write that
    /// publishes the record also frees the lease.
    async fn write_record(
        &self,
        new: NewRow,
        pending: Option<PendingObject>,
        now: i64,
    ) -> FileDataResult<Row> {
        match self.get_row(new.file_id, new.object_type).await? {
            None => self.create_record(new, pending, now).await,
            Some(existing) => self.replace_record(&existing, new, pending, now).await,
        }
    }

    async fn create_record(
        &self,
        new: NewRow,
        pending: Option<PendingObject>,
        now: i64,
    ) -> FileDataResult<Row> {
        let row = Row::new(new, now, self.policy.replica_count)?;
        let lease = Lease {
            file_id: row.file_id,
            object_type: row.object_type,
            locked_till: now.saturating_add(self.lease_micros()),
        };

        // Inserted leased and without a confirmed copy, so readers report it
        // as pending until its object is stored.
        let mut placeholder = row.clone();
        placeholder.replicated_buckets.clear();
        placeholder.pending_sync = false;
        placeholder.sync_locked_till = lease.locked_till;
        if !self.insert_row(&placeholder).await? {
            // Lost a race with a concurrent first write.
            return Err(FileDataError::LeaseHeld {
                file_id: row.file_id,
            });
        }

        if let Err(err) = self.store_pending(&row.latest_bucket, pending).await {
            sqlx::query(
                "DELETE FROM file_data WHERE file_id = ? AND data_type = ? AND sync_locked_till = ?",
            )
            .bind(lease.file_id)
            .bind(lease.object_type.as_str())
            .bind(lease.locked_till)
            .execute(&*self.db)
            .await?;
            return Err(err);
        }

        let row = self.finish_briefly(&lease, row, now).await?;
        info!(file_id = row.file_id, object_type = %row.object_type, bucket = %row.latest_bucket, "file data created");
        Ok(row)
    }

    async fn replace_record(
        &self,
        observed: &Row,
        new: NewRow,
        pending: Option<PendingObject>,
        now: i64,
    ) -> FileDataResult<Row> {
        check_replaceable(observed, &new)?;
        let (lease, mut row) = self.lease_briefly(observed, now).await?;
        if let Err(err) = check_replaceable(&row, &new) {
            return self.abandon(&lease, now, err).await;
        }
        let replaced = match row.supersede(new, self.policy.replica_count) {
            Ok(replaced) => replaced,
            Err(err) => return self.abandon(&lease, now, err).await,
        };
        if let Err(err) = self.store_pending(&row.latest_bucket, pending).await {
            return self.abandon(&lease, now, err).await;
        }
        let row = self.finish_briefly(&lease, row, now).await?;

        for key in &replaced {
            if let Err(err) = self.buckets.delete_object(&row.latest_bucket, key).await {
                warn!(file_id = row.file_id, bucket = %row.latest_bucket, key = %key, error = %err, "failed to remove replaced object");
            }
        }
        info!(
            file_id = row.file_id,
            object_type = %row.object_type,
            to_delete = row.delete_from_buckets.len(),
            replaced = replaced.len(),
            "file data replaced"
        );
        Ok(row)
    }

    /// Deletion path: tombstone the record and queue its copies for purge.
    /// Deleting an already deleted or missing record is a no-op.
    pub async fn mark_deleted(
        &self,
        user_id: i64,
        file_id: i64,
        object_type: ObjectType,
        now: i64,
    ) -> FileDataResult<Option<Row>> {
        let deletable = |row: &Row| row.user_id == user_id && !row.is_deleted;
        let existing = match self.get_row(file_id, object_type).await? {
            Some(row) if deletable(&row) => row,
            _ => return Ok(None),
        };
        let (lease, mut row) = self.lease_briefly(&existing, now).await?;
        if !deletable(&row) {
            self.release_lease(&lease, now).await?;
            return Ok(None);
        }
        row.tombstone(self.policy.replica_count);
        let row = self.finish_briefly(&lease, row, now).await?;
        info!(file_id, object_type = %object_type, to_delete = row.delete_from_buckets.len(), "file data deleted");
        Ok(Some(row))
    }

    // --- Client operations ---------------------------------------------

    async fn read_sidecar(&self, row: &Row) -> FileDataResult<SidecarObject> {
        let key = row.metadata_object_key();
        let bytes = self.buckets.read_bytes(&row.latest_bucket, &key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn resolve(&self, row: &Row) -> Resolution {
        if row.is_deleted {
            return Resolution::Failed;
        }
        if !row.is_readable() {
            return Resolution::PendingIndex;
        }
        match self.read_sidecar(row).await {
            Ok(sidecar) => Resolution::Data(Entity {
                file_id: row.file_id,
                object_type: row.object_type,
                encrypted_data: sidecar.encrypted_data,
                decryption_header: sidecar.decryption_header,
            }),
            Err(err) => {
                warn!(file_id = row.file_id, object_type = %row.object_type, bucket = %row.latest_bucket, error = %err, "failed to read sidecar");
                Resolution::Failed
            }
        }
    }

    /// Batch fetch of playlists or ML metadata. Per-file failures are
    /// reported in the response rather than failing the request.
    pub async fn get_files_data(
        &self,
        user_id: i64,
        req: &GetFilesData,
    ) -> FileDataResult<GetFilesDataResponse> {
        req.validate()?;
        let rows = self
            .get_rows_for_user(user_id, req.object_type, &req.file_ids)
            .await?;
        let mut resolved = HashMap::with_capacity(rows.len());
        for row in &rows {
            resolved.insert(row.file_id, self.resolve(row).await);
        }
        let resp = GetFilesDataResponse::partition(&req.file_ids, resolved);
        debug!(
            user_id,
            object_type = %req.object_type,
            data = resp.data.len(),
            pending = resp.pending_index_file_ids.len(),
            errors = resp.err_file_ids.len(),
            "files data fetched"
        );
        Ok(resp)
    }

    async fn live_row(&self, user_id: i64, file_id: i64, object_type: ObjectType) -> FileDataResult<Row> {
        self.get_row(file_id, object_type)
            .await?
            .filter(|row| row.user_id == user_id && row.is_readable())
            .ok_or_else(|| FileDataError::NotFound {
                file_id,
                object_type: object_type.to_string(),
            })
    }

    pub async fn get_file_data(&self, user_id: i64, req: &GetFileData) -> FileDataResult<Entity> {
        req.validate()?;
        let row = self.live_row(user_id, req.file_id, req.object_type).await?;
        let sidecar = self.read_sidecar(&row).await?;
        Ok(Entity {
            file_id: row.file_id,
            object_type: row.object_type,
            encrypted_data: sidecar.encrypted_data,
            decryption_header: sidecar.decryption_header,
        })
    }

    /// Record a derived object in the hot bucket, storing its sidecar under
    /// the record's lease.
    pub async fn put_file_data(
        &self,
        user_id: i64,
        client: &str,
        req: &PutFileDataRequest,
        now: DateTime<Utc>,
    ) -> FileDataResult<Row> {
        req.validate()?;
        let bucket = self.policy.hot_bucket.clone();
        let mut size = 0;

        if let Some(expected) = req.object_size {
            let key = keys::payload_key(req.file_id, user_id, req.object_type, req.object_id.as_deref())
                .unwrap_or_else(|err| fault::invalid_internal_state(err));
            match self.buckets.object_size(&bucket, &key).await? {
                Some(actual) if actual as i64 == expected => size += expected,
                Some(actual) => {
                    return Err(FileDataError::bad_request(format!(
                        "objectSize {expected} does not match uploaded size {actual}"
                    )));
                }
                None => {
                    return Err(FileDataError::bad_request(format!(
                        "object {} has not been uploaded",
                        req.object_id.as_deref().unwrap_or_default()
                    )));
                }
            }
        }

        let pending = match req.sidecar(client) {
            Some(sidecar) => {
                let key = keys::metadata_key(req.file_id, user_id, req.object_type, req.object_id.as_deref())
                    .unwrap_or_else(|err| fault::invalid_internal_state(err));
                let bytes = serde_json::to_vec(&sidecar)?;
                size += bytes.len() as i64;
                Some(PendingObject { key, bytes })
            }
            None => None,
        };

        let new = NewRow {
            file_id: req.file_id,
            user_id,
            object_type: req.object_type,
            size,
            bucket,
            object_id: req.object_id.clone(),
            object_nonce: req.object_nonce.clone(),
        };
        self.write_record(new, pending, now.timestamp_micros()).await
    }

    /// Signed download URL for a preview payload.
    pub async fn get_preview_url(
        &self,
        user_id: i64,
        req: &GetPreviewUrlRequest,
        now: DateTime<Utc>,
    ) -> FileDataResult<PreviewUrl> {
        req.validate()?;
        let row = self.live_row(user_id, req.file_id, req.object_type).await?;
        let key = keys::part_key(&row.payload_object_key(), req.suffix.as_deref());
        let url = self
            .signer
            .sign_url(SignedMethod::Get, &row.latest_bucket, &key, now);
        Ok(PreviewUrl { url })
    }

    /// Signed upload URL for a new preview payload in the hot bucket.
    pub fn preview_upload_url(
        &self,
        user_id: i64,
        req: &PreviewUploadUrlRequest,
        now: DateTime<Utc>,
    ) -> FileDataResult<PreviewUploadUrl> {
        req.validate()?;
        let object_id = Uuid::new_v4().to_string();
        let key = keys::payload_key(req.file_id, user_id, req.object_type, Some(&object_id))
            .unwrap_or_else(|err| fault::invalid_internal_state(err));
        let url = self
            .signer
            .sign_url(SignedMethod::Put, &self.policy.hot_bucket, &key, now);
        debug!(user_id, file_id = req.file_id, object_type = %req.object_type, %object_id, "issued upload url");
        Ok(PreviewUploadUrl { object_id, url })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn test_service(dir: &std::path::Path, replica_count: usize) -> FileDataService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let buckets = ["b1", "b2", "b3"].map(String::from);
        FileDataService::new(
            Arc::new(pool),
            BucketStore::new(dir, buckets.clone()),
            UrlSigner::new("test-secret", "http://files.test", Duration::minutes(5)),
            ReplicationPolicy {
                hot_bucket: "b1".into(),
                replica_buckets: buckets.to_vec(),
                replica_count,
                lease_duration: Duration::seconds(30),
            },
        )
    }

    fn ml_put(file_id: i64, data: &str) -> PutFileDataRequest {
        PutFileDataRequest {
            file_id,
            object_type: ObjectType::MlData,
            encrypted_data: Some(data.into()),
            decryption_header: Some(format!("hdr-{data}")),
            version: Some(2),
            object_id: None,
            object_nonce: None,
            object_size: None,
        }
    }

    fn new_ml_row(file_id: i64, user_id: i64) -> NewRow {
        NewRow {
            file_id,
            user_id,
            object_type: ObjectType::MlData,
            size: 10,
            bucket: "b1".into(),
            object_id: None,
            object_nonce: None,
        }
    }

    const SEC: i64 = 1_000_000;

    #[tokio::test]
    async fn record_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        let row = svc.write_record(new_ml_row(1, 7), None, 100).await.unwrap();
        let loaded = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        assert_eq!(row, loaded);
        assert!(loaded.pending_sync);
        assert!(svc.get_row(1, ObjectType::PreviewVideo).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_one_of_two_acquirers_wins() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        let observed = svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();
        let now = 10 * SEC;

        let (a, b) = tokio::join!(
            svc.try_acquire_lease(&observed, now),
            svc.try_acquire_lease(&observed, now + 1),
        );
        let won = [a.unwrap(), b.unwrap()];
        assert_eq!(won.iter().filter(|l| l.is_some()).count(), 1);

        let current = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        let lease = won.into_iter().flatten().next().unwrap();
        assert_eq!(current.sync_locked_till, lease.locked_till);
        assert!(current.lease_held(now));
        assert!(svc.try_acquire_lease(&current, now + SEC).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_observation_cannot_take_a_released_lease() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        let observed = svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();

        // First acquirer commits and releases before the second one runs.
        let first = svc.try_acquire_lease(&observed, SEC).await.unwrap().unwrap();
        svc.apply_under_lease(&first, SEC + 1, |row, d| row.begin_replication("b2", d))
            .await
            .unwrap();
        assert!(svc.release_lease(&first, 2 * SEC).await.unwrap());

        assert!(svc.try_acquire_lease(&observed, 3 * SEC).await.unwrap().is_none());
        let current = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        assert_eq!(current.inflight_replicas, BucketSet::from(["b2".to_string()]));
        assert!(svc.try_acquire_lease(&current, 3 * SEC).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reclaimed_and_fences_old_holder() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        let observed = svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();

        let first = svc.try_acquire_lease(&observed, SEC).await.unwrap().unwrap();
        let after_expiry = first.locked_till + 1;
        let current = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        let second = svc
            .try_acquire_lease(&current, after_expiry)
            .await
            .unwrap()
            .unwrap();
        assert!(second.locked_till > first.locked_till);

        // The stalled first holder can no longer write.
        let err = svc
            .apply_under_lease(&first, SEC + 1, |row, d| row.begin_replication("b2", d))
            .await
            .unwrap_err();
        assert!(matches!(err, FileDataError::LeaseLost { file_id: 1 }));

        let (row, changed) = svc
            .apply_under_lease(&second, after_expiry + 1, |row, d| row.begin_replication("b2", d))
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(row.inflight_replicas, BucketSet::from(["b2".to_string()]));
    }

    #[tokio::test]
    async fn replicate_to_second_bucket_under_lease() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();
        svc.write_record(new_ml_row(2, 7), None, 0).await.unwrap();

        let now = SEC;
        let claimed = svc.claim_pending(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(svc.claim_pending(now, 10).await.unwrap().is_empty());

        let (lease, row) = claimed.into_iter().find(|(l, _)| l.file_id == 1).unwrap();
        let targets = row.plan_replication(&svc.policy.replica_buckets, svc.policy.replica_count);
        assert_eq!(targets, vec!["b2".to_string()]);

        svc.apply_under_lease(&lease, now + 1, |row, d| row.begin_replication("b2", d))
            .await
            .unwrap();
        let (row, _) = svc
            .apply_under_lease(&lease, now + 2, |row, d| row.confirm_replication("b2", d))
            .await
            .unwrap();
        assert!(row.inflight_replicas.is_empty());
        assert_eq!(
            row.replicated_buckets,
            BucketSet::from(["b1".to_string(), "b2".to_string()])
        );
        assert!(!row.pending_sync);

        // Replayed confirmation leaves the record unchanged.
        let (replayed, changed) = svc
            .apply_under_lease(&lease, now + 3, |row, d| row.confirm_replication("b2", d))
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(replayed.replicated_buckets, row.replicated_buckets);

        assert!(svc.release_lease(&lease, now + 4).await.unwrap());
        assert!(!svc.release_lease(&lease, now + 5).await.unwrap());
        let stored = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        assert_eq!(stored.sync_locked_till, now + 4);
        assert!(!stored.lease_held(now + 4));
        assert!(!stored.pending_sync);
    }

    #[tokio::test]
    async fn delete_then_purge_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();
        let lease = svc.claim_pending(SEC, 1).await.unwrap().remove(0).0;
        svc.apply_under_lease(&lease, SEC + 1, |row, d| {
            row.begin_replication("b2", d);
            row.confirm_replication("b2", d)
        })
        .await
        .unwrap();
        svc.release_lease(&lease, SEC + 2).await.unwrap();

        // Someone else's delete is ignored.
        assert!(svc.mark_deleted(8, 1, ObjectType::MlData, 2 * SEC).await.unwrap().is_none());

        let row = svc
            .mark_deleted(7, 1, ObjectType::MlData, 2 * SEC)
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_deleted);
        assert!(row.replicated_buckets.is_empty());
        assert_eq!(
            row.delete_from_buckets,
            BucketSet::from(["b1".to_string(), "b2".to_string()])
        );
        assert_eq!(row.sync_locked_till, 2 * SEC);

        let (lease, _) = svc.claim_pending(3 * SEC, 1).await.unwrap().remove(0);
        assert!(!svc.remove_purged(&lease).await.unwrap());
        let (row, _) = svc
            .apply_under_lease(&lease, 3 * SEC + 1, |row, d| {
                row.confirm_purge("b1", d);
                row.confirm_purge("b2", d)
            })
            .await
            .unwrap();
        assert!(row.is_purgeable());
        assert!(!row.pending_sync);
        assert!(svc.remove_purged(&lease).await.unwrap());
        assert!(svc.get_row(1, ObjectType::MlData).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_copy_removes_sidecar_from_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let now = Utc::now();
        svc.put_file_data(7, "web", &ml_put(1, "enc-1"), now).await.unwrap();
        let key = keys::metadata_key(1, 7, ObjectType::MlData, None).unwrap();
        assert!(svc.buckets.object_size("b1", &key).await.unwrap().is_some());

        let t = now.timestamp_micros() + SEC;
        svc.mark_deleted(7, 1, ObjectType::MlData, t).await.unwrap().unwrap();
        let (lease, _) = svc.claim_pending(t + 1, 1).await.unwrap().remove(0);

        // Not queued for deletion: untouched.
        let row = svc.purge_copy(&lease, "b2", t + 2).await.unwrap();
        assert_eq!(row.delete_from_buckets, BucketSet::from(["b1".to_string()]));

        let row = svc.purge_copy(&lease, "b1", t + 3).await.unwrap();
        assert!(row.is_purgeable());
        assert_eq!(svc.buckets.object_size("b1", &key).await.unwrap(), None);
        assert!(svc.remove_purged(&lease).await.unwrap());
    }

    #[tokio::test]
    async fn overwrite_is_refused_while_worker_holds_lease() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let observed = svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();
        let lease = svc.try_acquire_lease(&observed, SEC).await.unwrap().unwrap();

        let err = svc.write_record(new_ml_row(1, 7), None, 2 * SEC).await.unwrap_err();
        assert!(matches!(err, FileDataError::LeaseHeld { file_id: 1 }));

        svc.release_lease(&lease, 3 * SEC).await.unwrap();
        let mut update = new_ml_row(1, 7);
        update.bucket = "b2".into();
        let row = svc.write_record(update, None, 3 * SEC).await.unwrap();
        assert_eq!(row.latest_bucket, "b2");
        assert_eq!(row.delete_from_buckets, BucketSet::from(["b1".to_string()]));
        assert!(row.pending_sync);
        assert!(!row.lease_held(3 * SEC));
    }

    #[tokio::test]
    async fn put_and_fetch_ml_data() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let now = Utc::now();
        svc.put_file_data(7, "web", &ml_put(1, "enc-1"), now).await.unwrap();
        svc.put_file_data(7, "web", &ml_put(2, "enc-2"), now).await.unwrap();
        svc.put_file_data(8, "web", &ml_put(5, "enc-5"), now).await.unwrap();

        // File 2 is mid-replication onto a new read bucket.
        let row = svc.get_row(2, ObjectType::MlData).await.unwrap().unwrap();
        let lease = svc.try_acquire_lease(&row, now.timestamp_micros()).await.unwrap().unwrap();
        svc.apply_under_lease(&lease, now.timestamp_micros() + 1, |row, d| {
            row.latest_bucket = "b2".into();
            row.begin_replication("b2", d)
        })
        .await
        .unwrap();

        // File 3 points at a sidecar that is not on disk.
        let mut broken = new_ml_row(3, 7);
        broken.bucket = "b3".into();
        svc.write_record(broken, None, 0).await.unwrap();

        // File 4 is tombstoned.
        svc.put_file_data(7, "web", &ml_put(4, "enc-4"), now).await.unwrap();
        svc.mark_deleted(7, 4, ObjectType::MlData, now.timestamp_micros()).await.unwrap();

        let req = GetFilesData {
            file_ids: vec![1, 2, 3, 4, 5, 6, 1],
            object_type: ObjectType::MlData,
        };
        let resp = svc.get_files_data(7, &req).await.unwrap();
        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.data[0].file_id, 1);
        assert_eq!(resp.data[0].encrypted_data, "enc-1");
        assert_eq!(resp.data[0].decryption_header, "hdr-enc-1");
        assert_eq!(resp.pending_index_file_ids, vec![2, 5, 6]);
        assert_eq!(resp.err_file_ids, vec![3, 4]);

        let single = svc
            .get_file_data(7, &GetFileData { file_id: 1, object_type: ObjectType::MlData })
            .await
            .unwrap();
        assert_eq!(single, resp.data[0]);
        assert!(matches!(
            svc.get_file_data(7, &GetFileData { file_id: 5, object_type: ObjectType::MlData }).await,
            Err(FileDataError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_batch_is_rejected_before_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let req = GetFilesData {
            file_ids: vec![1],
            object_type: ObjectType::PreviewImage,
        };
        assert!(matches!(
            svc.get_files_data(7, &req).await,
            Err(FileDataError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn preview_video_upload_flow() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let now = Utc::now();

        let upload = svc
            .preview_upload_url(
                7,
                &PreviewUploadUrlRequest { file_id: 9, object_type: ObjectType::PreviewVideo },
                now,
            )
            .unwrap();
        let key = keys::payload_key(9, 7, ObjectType::PreviewVideo, Some(&upload.object_id)).unwrap();
        assert!(upload.url.contains(&format!("/objects/b1/{key}?")));

        let mut put = PutFileDataRequest {
            file_id: 9,
            object_type: ObjectType::PreviewVideo,
            encrypted_data: Some("playlist".into()),
            decryption_header: Some("hdr".into()),
            version: None,
            object_id: Some(upload.object_id.clone()),
            object_nonce: None,
            object_size: Some(4),
        };
        assert!(matches!(
            svc.put_file_data(7, "web", &put, now).await,
            Err(FileDataError::BadRequest(_))
        ));
        let playlist_key =
            keys::metadata_key(9, 7, ObjectType::PreviewVideo, Some(&upload.object_id)).unwrap();
        assert_eq!(svc.buckets.object_size("b1", &playlist_key).await.unwrap(), None);

        svc.buckets.put_bytes("b1", &key, b"vide".to_vec()).await.unwrap();
        put.object_size = Some(5);
        assert!(svc.put_file_data(7, "web", &put, now).await.is_err());
        put.object_size = Some(4);
        let row = svc.put_file_data(7, "web", &put, now).await.unwrap();
        assert!(row.size > 4);
        assert_eq!(row.object_id.as_deref(), Some(upload.object_id.as_str()));

        let playlist = svc
            .get_file_data(7, &GetFileData { file_id: 9, object_type: ObjectType::PreviewVideo })
            .await
            .unwrap();
        assert_eq!(playlist.encrypted_data, "playlist");

        let preview = svc
            .get_preview_url(
                7,
                &GetPreviewUrlRequest {
                    file_id: 9,
                    object_type: ObjectType::PreviewVideo,
                    suffix: None,
                },
                now,
            )
            .await
            .unwrap();
        assert!(preview.url.contains(&format!("/objects/b1/{key}?")));

        assert!(matches!(
            svc.get_preview_url(
                8,
                &GetPreviewUrlRequest {
                    file_id: 9,
                    object_type: ObjectType::PreviewVideo,
                    suffix: None,
                },
                now,
            )
            .await,
            Err(FileDataError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_survives_an_upload_that_observed_the_live_record() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        svc.write_record(new_ml_row(1, 7), None, 0).await.unwrap();
        let stale = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();

        // Deleted within the same microsecond, so the lease column ends up
        // back at the value the upload observed.
        svc.mark_deleted(7, 1, ObjectType::MlData, 0).await.unwrap().unwrap();
        let stored = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        assert_eq!(stored.sync_locked_till, stale.sync_locked_till);

        let err = svc
            .replace_record(&stale, new_ml_row(1, 7), None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, FileDataError::BadRequest(_)));

        let stored = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        assert!(stored.is_deleted);
        assert!(stored.replicated_buckets.is_empty());
        assert_eq!(stored.delete_from_buckets, BucketSet::from(["b1".to_string()]));
        assert!(!stored.lease_held(0));

        // Later, with the clock moved on.
        let err = svc
            .replace_record(&stale, new_ml_row(1, 7), None, SEC)
            .await
            .unwrap_err();
        assert!(matches!(err, FileDataError::BadRequest(_)));
        assert!(svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap().is_deleted);
    }

    #[tokio::test]
    async fn rejected_puts_leave_buckets_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let now = Utc::now();
        let t = now.timestamp_micros();
        let key = |user_id| keys::metadata_key(1, user_id, ObjectType::MlData, None).unwrap();

        svc.put_file_data(7, "web", &ml_put(1, "enc-1"), now).await.unwrap();
        let original = svc.buckets.read_bytes("b1", &key(7)).await.unwrap();

        // A worker holds the lease: refused, sidecar unchanged.
        let row = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        let lease = svc.try_acquire_lease(&row, t).await.unwrap().unwrap();
        let err = svc
            .put_file_data(7, "web", &ml_put(1, "enc-2"), now)
            .await
            .unwrap_err();
        assert!(matches!(err, FileDataError::LeaseHeld { file_id: 1 }));
        assert_eq!(svc.buckets.read_bytes("b1", &key(7)).await.unwrap(), original);
        svc.release_lease(&lease, t).await.unwrap();

        // Another user's put stores nothing under their prefix.
        let err = svc
            .put_file_data(8, "web", &ml_put(1, "enc-8"), now)
            .await
            .unwrap_err();
        assert!(matches!(err, FileDataError::NotFound { .. }));
        assert_eq!(svc.buckets.object_size("b1", &key(8)).await.unwrap(), None);

        // Tombstoned and purged: a put must not bring the sidecar back.
        svc.mark_deleted(7, 1, ObjectType::MlData, t + 1).await.unwrap().unwrap();
        let (lease, _) = svc.claim_pending(t + 2, 1).await.unwrap().remove(0);
        svc.purge_copy(&lease, "b1", t + 3).await.unwrap();
        svc.release_lease(&lease, t + 4).await.unwrap();
        assert_eq!(svc.buckets.object_size("b1", &key(7)).await.unwrap(), None);

        let err = svc
            .put_file_data(7, "web", &ml_put(1, "enc-3"), now)
            .await
            .unwrap_err();
        assert!(matches!(err, FileDataError::BadRequest(_)));
        assert_eq!(svc.buckets.object_size("b1", &key(7)).await.unwrap(), None);
        let row = svc.get_row(1, ObjectType::MlData).await.unwrap().unwrap();
        assert!(row.is_purgeable());
    }

    async fn upload_video(svc: &FileDataService, object_id: &str, now: DateTime<Utc>) -> Row {
        let key = keys::payload_key(9, 7, ObjectType::PreviewVideo, Some(object_id)).unwrap();
        svc.buckets.put_bytes("b1", &key, b"vide".to_vec()).await.unwrap();
        let put = PutFileDataRequest {
            file_id: 9,
            object_type: ObjectType::PreviewVideo,
            encrypted_data: Some(format!("playlist-{object_id}")),
            decryption_header: Some("hdr".into()),
            version: None,
            object_id: Some(object_id.into()),
            object_nonce: None,
            object_size: Some(4),
        };
        svc.put_file_data(7, "web", &put, now).await.unwrap()
    }

    #[tokio::test]
    async fn overwritten_objects_are_purged_from_every_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 2).await;
        let now = Utc::now();
        let t = now.timestamp_micros();

        let first = upload_video(&svc, "obj-a", now).await;
        let old_keys = first.object_keys();
        assert_eq!(old_keys.len(), 2);

        // Copy the first object to b2 under a worker lease.
        let (lease, row) = svc.claim_pending(t + 1, 1).await.unwrap().remove(0);
        for key in row.object_keys() {
            let bytes = svc.buckets.read_bytes("b1", &key).await.unwrap();
            svc.buckets.put_bytes("b2", &key, bytes).await.unwrap();
        }
        svc.apply_under_lease(&lease, t + 2, |row, d| {
            row.begin_replication("b2", d);
            row.confirm_replication("b2", d)
        })
        .await
        .unwrap();
        svc.release_lease(&lease, t + 3).await.unwrap();

        // The new object id replaces the old copy in the hot bucket at once
        // and queues b2 with the old keys.
        let second = upload_video(&svc, "obj-b", now + Duration::seconds(1)).await;
        for key in &old_keys {
            assert_eq!(svc.buckets.object_size("b1", key).await.unwrap(), None);
            assert!(svc.buckets.object_size("b2", key).await.unwrap().is_some());
        }
        assert_eq!(second.delete_from_buckets, BucketSet::from(["b2".to_string()]));
        assert_eq!(second.stale_keys.get("b2"), Some(&old_keys));

        let later = t + 2 * SEC;
        svc.mark_deleted(7, 9, ObjectType::PreviewVideo, later).await.unwrap().unwrap();
        let (lease, row) = svc.claim_pending(later + 1, 1).await.unwrap().remove(0);
        for bucket in row.delete_from_buckets.clone() {
            svc.purge_copy(&lease, &bucket, later + 2).await.unwrap();
        }
        assert!(svc.remove_purged(&lease).await.unwrap());
        assert!(svc.get_row(9, ObjectType::PreviewVideo).await.unwrap().is_none());

        for key in old_keys.iter().chain(second.object_keys().iter()) {
            for bucket in ["b1", "b2"] {
                assert_eq!(svc.buckets.object_size(bucket, key).await.unwrap(), None, "{bucket}/{key}");
            }
        }
    }

    #[tokio::test]
    async fn preview_parts_are_signed_beside_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let svc = test_service(dir.path(), 1).await;
        let now = Utc::now();
        let row = upload_video(&svc, "obj-a", now).await;

        let preview = svc
            .get_preview_url(
                7,
                &GetPreviewUrlRequest {
                    file_id: 9,
                    object_type: ObjectType::PreviewVideo,
                    suffix: Some("_seg0.ts".into()),
                },
                now,
            )
            .await
            .unwrap();
        let part = format!("{}_seg0.ts", row.payload_object_key());
        assert!(preview.url.contains(&format!("/objects/b1/{part}?")));
    }
}
