#![allow(dead_code)]

//! Replication record for one (file, object type) pair.
//!
//! A `Row` is the authoritative bookkeeping for where copies of a derived
//! object live. Buckets move between three disjoint sets:
//!
//! - `replicated_buckets`: a confirmed copy exists
//! - `inflight_replicas`: a copy has been started but not confirmed
//! - `delete_from_buckets`: a copy exists and must be purged
//!
//! When an object is replaced under a new `object_id`, the keys of the old
//! object are kept in `stale_keys` for every bucket that may still hold them,
//! so the purge path can find them after the record has moved on.
//!
//! Only the holder of the record's lease (`sync_locked_till`) may apply the
//! transitions below; the store enforces that with conditional writes.

use super::keys::{self, UnsupportedObjectType};
use super::object_type::ObjectType;
use crate::errors::FileDataError;
use crate::fault;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type BucketSet = BTreeSet<String>;

/// Keys of replaced objects, by the bucket they must be purged from.
pub type StaleKeys = BTreeMap<String, BTreeSet<String>>;

/// Persistent replication record, one per `(file_id, object_type)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub file_id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,

    /// Sum of every object stored for this record.
    pub size: i64,

    /// Bucket that reads are served from.
    pub latest_bucket: String,

    pub object_id: Option<String>,

    /// Absent for video previews: the nonce travels inside the playlist sidecar.
    pub object_nonce: Option<String>,

    pub replicated_buckets: BucketSet,
    pub delete_from_buckets: BucketSet,
    pub inflight_replicas: BucketSet,

    /// Every bucket here is also in `delete_from_buckets`.
    pub stale_keys: StaleKeys,
    pub pending_sync: bool,
    pub is_deleted: bool,

    /// Lease expiry in epoch microseconds; `0` when never leased.
    pub sync_locked_till: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied by the upload path when a derived object is first written.
#[derive(Clone, Debug)]
pub struct NewRow {
    pub file_id: i64,
    pub user_id: i64,
    pub object_type: ObjectType,
    pub size: i64,
    pub bucket: String,
    pub object_id: Option<String>,
    pub object_nonce: Option<String>,
}

/// Coarse lifecycle position derived from a record's fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    ReconciliationPending,
    Reconciling,
    Deleting,
    Purged,
}

/// Check that `object_id` / `object_nonce` presence matches the object type.
pub fn check_object_fields(
    object_type: ObjectType,
    object_id: Option<&str>,
    object_nonce: Option<&str>,
) -> Result<(), FileDataError> {
    let bad = |msg: &str| Err(FileDataError::BadRequest(format!("{msg} for {object_type}")));
    match object_type {
        ObjectType::PreviewVideo => {
            if object_id.is_none() {
                return bad("objectID is required");
            }
            if object_nonce.is_some() {
                return bad("objectNonce must not be set");
            }
        }
        ObjectType::PreviewImage => {
            if object_id.is_none() {
                return bad("objectID is required");
            }
        }
        ObjectType::MlData => {
            if object_id.is_some() || object_nonce.is_some() {
                return bad("objectID and objectNonce must not be set");
            }
        }
    }
    if object_id.is_some_and(str::is_empty) {
        return bad("objectID must not be empty");
    }
    Ok(())
}

impl Row {
    /// Build the record for a first successful write into `new.bucket`.
    pub fn new(new: NewRow, now: i64, desired_replicas: usize) -> Result<Self, FileDataError> {
        check_object_fields(
            new.object_type,
            new.object_id.as_deref(),
            new.object_nonce.as_deref(),
        )?;
        if new.size < 0 {
            return Err(FileDataError::BadRequest("size must not be negative".into()));
        }
        let mut row = Self {
            file_id: new.file_id,
            user_id: new.user_id,
            object_type: new.object_type,
            size: new.size,
            latest_bucket: new.bucket.clone(),
            object_id: new.object_id,
            object_nonce: new.object_nonce,
            replicated_buckets: BucketSet::from([new.bucket]),
            delete_from_buckets: BucketSet::new(),
            inflight_replicas: BucketSet::new(),
            stale_keys: StaleKeys::new(),
            pending_sync: false,
            is_deleted: false,
            sync_locked_till: 0,
            created_at: now,
            updated_at: now,
        };
        row.refresh_pending_sync(desired_replicas);
        Ok(row)
    }

    /// Storage key of the payload object.
    ///
    /// Only video and image previews carry one; asking for any other type is
    /// a bug in the caller.
    pub fn payload_object_key(&self) -> String {
        self.try_payload_object_key()
            .unwrap_or_else(|err| fault::invalid_internal_state(err))
    }

    /// Storage key of the metadata sidecar (playlist or ML blob).
    pub fn metadata_object_key(&self) -> String {
        self.try_metadata_object_key()
            .unwrap_or_else(|err| fault::invalid_internal_state(err))
    }

    pub fn try_payload_object_key(&self) -> Result<String, UnsupportedObjectType> {
        keys::payload_key(
            self.file_id,
            self.user_id,
            self.object_type,
            self.object_id.as_deref(),
        )
    }

    pub fn try_metadata_object_key(&self) -> Result<String, UnsupportedObjectType> {
        keys::metadata_key(
            self.file_id,
            self.user_id,
            self.object_type,
            self.object_id.as_deref(),
        )
    }

    /// Keys of the current object that exist for this type.
    pub fn object_keys(&self) -> BTreeSet<String> {
        [self.try_payload_object_key(), self.try_metadata_object_key()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Everything to delete from `bucket` when its copy is purged: the
    /// current object's keys plus any replaced objects left there.
    pub fn purge_keys(&self, bucket: &str) -> BTreeSet<String> {
        let mut keys = self.object_keys();
        if let Some(stale) = self.stale_keys.get(bucket) {
            keys.extend(stale.iter().cloned());
        }
        keys
    }

    pub fn lease_held(&self, now: i64) -> bool {
        self.sync_locked_till > now
    }

    /// Readers may serve this record: live, and the read bucket holds a
    /// confirmed copy.
    pub fn is_readable(&self) -> bool {
        !self.is_deleted && self.replicated_buckets.contains(&self.latest_bucket)
    }

    /// Tombstoned and every physical copy is gone.
    pub fn is_purgeable(&self) -> bool {
        self.is_deleted && self.delete_from_buckets.is_empty() && self.inflight_replicas.is_empty()
    }

    pub fn sync_state(&self, now: i64) -> SyncState {
        if self.is_purgeable() {
            SyncState::Purged
        } else if self.lease_held(now) {
            SyncState::Reconciling
        } else if self.is_deleted {
            SyncState::Deleting
        } else if self.pending_sync {
            SyncState::ReconciliationPending
        } else {
            SyncState::Synced
        }
    }

    pub fn refresh_pending_sync(&mut self, desired_replicas: usize) {
        self.pending_sync = !self.delete_from_buckets.is_empty()
            || !self.inflight_replicas.is_empty()
            || (!self.is_deleted && self.replicated_buckets.len() < desired_replicas);
    }

    /// Pick buckets from `candidates` that a replication pass should start
    /// copying to, up to the desired replica count.
    pub fn plan_replication(&self, candidates: &[String], desired_replicas: usize) -> Vec<String> {
        if self.is_deleted {
            return Vec::new();
        }
        let held = self.replicated_buckets.len() + self.inflight_replicas.len();
        let needed = desired_replicas.saturating_sub(held);
        let mut picked = BucketSet::new();
        candidates
            .iter()
            .filter(|b| !self.tracks(b))
            .filter(|b| picked.insert((*b).clone()))
            .take(needed)
            .cloned()
            .collect()
    }

    fn tracks(&self, bucket: &str) -> bool {
        self.replicated_buckets.contains(bucket)
            || self.inflight_replicas.contains(bucket)
            || self.delete_from_buckets.contains(bucket)
    }

    /// Record that a copy to `bucket` has started. Returns whether the record
    /// changed.
    pub fn begin_replication(&mut self, bucket: &str, desired_replicas: usize) -> bool {
        let changed = !self.is_deleted
            && !self.tracks(bucket)
            && self.inflight_replicas.insert(bucket.to_string());
        self.refresh_pending_sync(desired_replicas);
        changed
    }

    /// A copy to `bucket` has been confirmed. Replays are no-ops. If the
    /// record was tombstoned while the copy ran, the new copy is queued for
    /// purge instead.
    pub fn confirm_replication(&mut self, bucket: &str, desired_replicas: usize) -> bool {
        let changed = self.inflight_replicas.remove(bucket);
        if changed {
            let target = if self.is_deleted {
                &mut self.delete_from_buckets
            } else {
                &mut self.replicated_buckets
            };
            target.insert(bucket.to_string());
        }
        self.refresh_pending_sync(desired_replicas);
        changed
    }

    /// A copy to `bucket` failed; it may be retried on a later pass.
    pub fn fail_replication(&mut self, bucket: &str, desired_replicas: usize) -> bool {
        let changed = self.inflight_replicas.remove(bucket);
        self.refresh_pending_sync(desired_replicas);
        changed
    }

    /// Queue the confirmed copy in `bucket` for purge. The read bucket of a
    /// live record is never dropped this way.
    pub fn mark_for_deletion(&mut self, bucket: &str, desired_replicas: usize) -> bool {
        let protected = !self.is_deleted && bucket == self.latest_bucket;
        let changed = !protected && self.replicated_buckets.remove(bucket);
        if changed {
            self.delete_from_buckets.insert(bucket.to_string());
        }
        self.refresh_pending_sync(desired_replicas);
        changed
    }

    /// The copy in `bucket` has been purged.
    pub fn confirm_purge(&mut self, bucket: &str, desired_replicas: usize) -> bool {
        let changed = self.delete_from_buckets.remove(bucket);
        self.stale_keys.remove(bucket);
        self.refresh_pending_sync(desired_replicas);
        changed
    }

    /// Deletion path: tombstone the record and queue every confirmed copy for
    /// purge. In-flight copies are left to the lease holder, which routes them
    /// to `delete_from_buckets` on confirmation.
    pub fn tombstone(&mut self, desired_replicas: usize) {
        self.is_deleted = true;
        let replicated = std::mem::take(&mut self.replicated_buckets);
        self.delete_from_buckets.extend(replicated);
        self.refresh_pending_sync(desired_replicas);
    }

    /// Upload path overwrite: `update` replaces the current object. Every
    /// older copy outside the new bucket is queued for purge, remembering the
    /// old object's keys there.
    ///
    /// Returns the old keys in the new bucket that the new object does not
    /// overwrite; the caller deletes them once the record is written.
    pub fn supersede(
        &mut self,
        update: NewRow,
        desired_replicas: usize,
    ) -> Result<BTreeSet<String>, FileDataError> {
        check_object_fields(
            update.object_type,
            update.object_id.as_deref(),
            update.object_nonce.as_deref(),
        )?;
        let old_keys = self.object_keys();
        let replicated = std::mem::take(&mut self.replicated_buckets);
        let inflight = std::mem::take(&mut self.inflight_replicas);
        self.delete_from_buckets.extend(replicated);
        self.delete_from_buckets.extend(inflight);
        for bucket in &self.delete_from_buckets {
            self.stale_keys
                .entry(bucket.clone())
                .or_default()
                .extend(old_keys.iter().cloned());
        }

        self.delete_from_buckets.remove(&update.bucket);
        let mut replaced = self.stale_keys.remove(&update.bucket).unwrap_or_default();
        self.replicated_buckets.insert(update.bucket.clone());
        self.latest_bucket = update.bucket;
        self.size = update.size;
        self.object_id = update.object_id;
        self.object_nonce = update.object_nonce;

        let new_keys = self.object_keys();
        replaced.retain(|key| !new_keys.contains(key));
        self.refresh_pending_sync(desired_replicas);
        Ok(replaced)
    }
}
