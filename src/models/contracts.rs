//! Request and response shapes exchanged with clients.
//!
//! Field names follow the public JSON contract (`fileID`, `fileIDs`, ...).
//! Every request type has a `validate` that runs before any storage access.

use super::object_type::ObjectType;
use crate::errors::{FileDataError, FileDataResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const MAX_FILE_IDS_PER_BATCH: usize = 200;
const MAX_SUFFIX_LEN: usize = 64;

fn require_type(object_type: ObjectType, allowed: &[ObjectType]) -> FileDataResult<()> {
    if allowed.contains(&object_type) {
        Ok(())
    } else {
        Err(FileDataError::bad_request(format!(
            "unsupported object type {object_type}"
        )))
    }
}

/// Types that carry a metadata sidecar readers fetch directly.
const SIDECAR_TYPES: [ObjectType; 2] = [ObjectType::PreviewVideo, ObjectType::MlData];
/// Types with a payload object served through preview URLs.
const PREVIEW_TYPES: [ObjectType; 2] = [ObjectType::PreviewVideo, ObjectType::PreviewImage];

/// One resolved sidecar returned to the client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    #[serde(rename = "fileID")]
    pub file_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    #[serde(rename = "encryptedData")]
    pub encrypted_data: String,
    #[serde(rename = "decryptionHeader")]
    pub decryption_header: String,
}

/// Batch fetch of playlists or ML metadata.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GetFilesData {
    #[serde(rename = "fileIDs")]
    pub file_ids: Vec<i64>,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
}

impl GetFilesData {
    pub fn validate(&self) -> FileDataResult<()> {
        require_type(self.object_type, &SIDECAR_TYPES)?;
        if self.file_ids.is_empty() {
            return Err(FileDataError::bad_request("fileIDs are required"));
        }
        if self.file_ids.len() > MAX_FILE_IDS_PER_BATCH {
            return Err(FileDataError::bad_request(format!(
                "fileIDs should be less than or equal to {MAX_FILE_IDS_PER_BATCH}"
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GetFileData {
    #[serde(rename = "fileID")]
    pub file_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
}

impl GetFileData {
    pub fn validate(&self) -> FileDataResult<()> {
        require_type(self.object_type, &SIDECAR_TYPES)
    }
}

/// Outcome of looking up a single requested file.
#[derive(Clone, Debug)]
pub enum Resolution {
    Data(Entity),
    PendingIndex,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GetFilesDataResponse {
    pub data: Vec<Entity>,
    #[serde(rename = "pendingIndexFileIDs")]
    pub pending_index_file_ids: Vec<i64>,
    #[serde(rename = "errFileIDs")]
    pub err_file_ids: Vec<i64>,
}

impl GetFilesDataResponse {
    /// Place every requested id in exactly one bucket of the response.
    ///
    /// Ids absent from `resolved` have no record yet and count as pending.
    /// Duplicate request ids are reported once, in first-seen order.
    pub fn partition(requested: &[i64], mut resolved: HashMap<i64, Resolution>) -> Self {
        let mut seen = HashSet::with_capacity(requested.len());
        let mut resp = Self::default();
        for &file_id in requested {
            if !seen.insert(file_id) {
                continue;
            }
            match resolved.remove(&file_id).unwrap_or(Resolution::PendingIndex) {
                Resolution::Data(entity) if entity.file_id == file_id => resp.data.push(entity),
                Resolution::Data(_) | Resolution::Failed => resp.err_file_ids.push(file_id),
                Resolution::PendingIndex => resp.pending_index_file_ids.push(file_id),
            }
        }
        resp
    }
}

/// Sidecar document persisted in object storage next to the payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SidecarObject {
    #[serde(rename = "v")]
    pub version: i32,
    #[serde(rename = "encryptedData")]
    pub encrypted_data: String,
    #[serde(rename = "header")]
    pub decryption_header: String,
    pub client: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GetPreviewUrlRequest {
    #[serde(rename = "fileID")]
    pub file_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub suffix: Option<String>,
}

impl GetPreviewUrlRequest {
    pub fn validate(&self) -> FileDataResult<()> {
        require_type(self.object_type, &PREVIEW_TYPES)?;
        if let Some(suffix) = &self.suffix {
            let well_formed = !suffix.is_empty()
                && suffix.len() <= MAX_SUFFIX_LEN
                && !suffix.contains("..")
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
            if !well_formed {
                return Err(FileDataError::bad_request(format!("invalid suffix {suffix}")));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PreviewUrl {
    pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PreviewUploadUrlRequest {
    #[serde(rename = "fileID")]
    pub file_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
}

impl PreviewUploadUrlRequest {
    pub fn validate(&self) -> FileDataResult<()> {
        require_type(self.object_type, &PREVIEW_TYPES)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PreviewUploadUrl {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub url: String,
}

/// Registers a derived object after the client has encrypted and uploaded
/// it. Video previews carry a playlist sidecar and reference a payload
/// uploaded through a preview upload URL. Image previews reference a payload
/// only, with the decryption header as `objectNonce`. ML data is carried
/// entirely in the sidecar.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PutFileDataRequest {
    #[serde(rename = "fileID")]
    pub file_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    #[serde(rename = "encryptedData", default)]
    pub encrypted_data: Option<String>,
    #[serde(rename = "decryptionHeader", default)]
    pub decryption_header: Option<String>,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(rename = "objectID", default)]
    pub object_id: Option<String>,
    #[serde(rename = "objectNonce", default)]
    pub object_nonce: Option<String>,
    #[serde(rename = "objectSize", default)]
    pub object_size: Option<i64>,
}

impl PutFileDataRequest {
    pub fn validate(&self) -> FileDataResult<()> {
        let has_sidecar = self.encrypted_data.as_deref().is_some_and(|s| !s.is_empty())
            && self.decryption_header.as_deref().is_some_and(|s| !s.is_empty());
        match self.object_type {
            ObjectType::PreviewVideo | ObjectType::MlData if !has_sidecar => {
                return Err(FileDataError::bad_request(
                    "encryptedData and decryptionHeader are required",
                ));
            }
            ObjectType::PreviewImage if self.encrypted_data.is_some() => {
                return Err(FileDataError::bad_request(format!(
                    "encryptedData is not supported for {}",
                    self.object_type
                )));
            }
            ObjectType::PreviewImage if self.object_nonce.is_none() => {
                return Err(FileDataError::bad_request("objectNonce is required"));
            }
            _ => {}
        }
        match self.object_type {
            ObjectType::MlData if self.object_size.is_some() => {
                return Err(FileDataError::bad_request(
                    "objectSize is not supported for mldata",
                ));
            }
            ObjectType::PreviewVideo | ObjectType::PreviewImage
                if !self.object_size.is_some_and(|size| size > 0) =>
            {
                return Err(FileDataError::bad_request("objectSize is required"));
            }
            _ => {}
        }
        super::file_data::check_object_fields(
            self.object_type,
            self.object_id.as_deref(),
            self.object_nonce.as_deref(),
        )
    }

    /// The sidecar document to persist, for types that have one.
    pub fn sidecar(&self, client: &str) -> Option<SidecarObject> {
        match (&self.encrypted_data, &self.decryption_header) {
            (Some(data), Some(header)) => Some(SidecarObject {
                version: self.version.unwrap_or(1),
                encrypted_data: data.clone(),
                decryption_header: header.clone(),
                client: client.to_string(),
            }),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeleteFileData {
    #[serde(rename = "fileID")]
    pub file_id: i64,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
}
