//! src/services/bucket_store.rs
//!
//! BucketStore — local stand-in for the replicated object-storage buckets.
//! Each configured bucket is a directory beneath `base_path`, and objects are
//! sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`. Only payload
//! bytes live here; all bookkeeping is in the `file_data` table.

use crate::errors::{FileDataError, FileDataResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Result of a completed object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub size_bytes: i64,
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct BucketStore {
    /// Base directory on disk where bucket directories live.
    pub base_path: PathBuf,

    /// Buckets this node is allowed to read and write.
    buckets: Arc<BTreeSet<String>>,
}

impl BucketStore {
    pub fn new(base_path: impl Into<PathBuf>, buckets: impl IntoIterator<Item = String>) -> Self {
        Self {
            base_path: base_path.into(),
            buckets: Arc::new(buckets.into_iter().collect()),
        }
    }

    pub fn knows_bucket(&self, bucket: &str) -> bool {
        self.buckets.contains(bucket)
    }

    /// Rejects keys that could escape the bucket directory.
    fn ensure_key_safe(key: &str) -> FileDataResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(FileDataError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(FileDataError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(FileDataError::InvalidObjectKey);
        }
        Ok(())
    }

    fn ensure_bucket_known(&self, bucket: &str) -> FileDataResult<()> {
        if self.knows_bucket(bucket) {
            Ok(())
        } else {
            Err(FileDataError::bad_request(format!("unknown bucket {bucket}")))
        }
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard directories from MD5(bucket/key).
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Stream an object to disk.
    ///
    /// Bytes go to a temp file that is fsynced and renamed into place, so
    /// readers never observe a partial object. The temp file is removed on
    /// any failure.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        stream: S,
    ) -> FileDataResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        Self::ensure_key_safe(key)?;
        self.ensure_bucket_known(bucket)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(FileDataError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(FileDataError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(FileDataError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(FileDataError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(FileDataError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());
        debug!(bucket, key, size_bytes, "stored object");
        Ok(StoredObject { size_bytes, etag })
    }

    pub async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> FileDataResult<StoredObject> {
        let body = stream::once(async move { Ok::<_, io::Error>(Bytes::from(bytes)) });
        self.put_object_stream(bucket, key, body).await
    }

    /// Open an object for streaming out, along with its length.
    pub async fn open_object(&self, bucket: &str, key: &str) -> FileDataResult<(File, u64)> {
        Self::ensure_key_safe(key)?;
        self.ensure_bucket_known(bucket)?;
        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| not_found_as(err, bucket, key))?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    pub async fn read_bytes(&self, bucket: &str, key: &str) -> FileDataResult<Vec<u8>> {
        Self::ensure_key_safe(key)?;
        self.ensure_bucket_known(bucket)?;
        fs::read(self.object_path(bucket, key))
            .await
            .map_err(|err| not_found_as(err, bucket, key))
    }

    /// Size of a stored object, or `None` if it does not exist.
    pub async fn object_size(&self, bucket: &str, key: &str) -> FileDataResult<Option<u64>> {
        Self::ensure_key_safe(key)?;
        self.ensure_bucket_known(bucket)?;
        match fs::metadata(self.object_path(bucket, key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FileDataError::Io(err)),
        }
    }

    /// Remove an object and prune the shard directories it leaves empty.
    /// Returns whether the object existed; purging a missing copy is not an
    /// error.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> FileDataResult<bool> {
        Self::ensure_key_safe(key)?;
        self.ensure_bucket_known(bucket)?;
        let file_path = self.object_path(bucket, key);
        let existed = match fs::remove_file(&file_path).await {
            Ok(()) => {
                debug!(bucket, key, "removed object");
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(bucket, key, "object already missing");
                false
            }
            Err(err) => return Err(FileDataError::Io(err)),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket)).await;
        }
        Ok(existed)
    }

    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(()) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn not_found_as(err: io::Error, bucket: &str, key: &str) -> FileDataError {
    if err.kind() == ErrorKind::NotFound {
        debug!(bucket, key, "object missing on disk");
        FileDataError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        FileDataError::Io(err)
    }
}
