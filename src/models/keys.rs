//! Deterministic storage keys for file-derived objects.
//!
//! Every object for a file lives under `{user_id}/file-data/{file_id}/`.
//! Both functions match exhaustively on [`ObjectType`]; a new variant will not
//! compile until it is placed on one side or the other of each.
//!
//! Parts derived from a payload (HLS segments and the like) are siblings of
//! it: the part suffix is appended to the payload key with no separator,
//! the same way the playlist appends `_playlist`. Clients choose the
//! separator themselves, e.g. `_seg0.ts` gives `.../vid_preview/{id}_seg0.ts`.

use super::object_type::ObjectType;

/// Requested a key that the object type never stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsupportedObjectType {
    #[error("no payload object is stored for {0}")]
    Payload(ObjectType),
    #[error("no metadata sidecar is stored for {0}")]
    Metadata(ObjectType),
}

pub fn base_prefix(file_id: i64, user_id: i64) -> String {
    format!("{}/file-data/{}/", user_id, file_id)
}

/// Key of the encrypted payload bytes (preview video or image).
pub fn payload_key(
    file_id: i64,
    user_id: i64,
    object_type: ObjectType,
    object_id: Option<&str>,
) -> Result<String, UnsupportedObjectType> {
    match object_type {
        ObjectType::PreviewVideo | ObjectType::PreviewImage => {
            let base = base_prefix(file_id, user_id);
            Ok(match object_id {
                Some(id) => format!("{}{}/{}", base, object_type, id),
                None => format!("{}{}", base, object_type),
            })
        }
        ObjectType::MlData => Err(UnsupportedObjectType::Payload(object_type)),
    }
}

/// Key of the metadata sidecar: the playlist for a streaming preview, or the
/// ML feature blob.
pub fn metadata_key(
    file_id: i64,
    user_id: i64,
    object_type: ObjectType,
    object_id: Option<&str>,
) -> Result<String, UnsupportedObjectType> {
    match object_type {
        ObjectType::MlData => Ok(format!("{}{}", base_prefix(file_id, user_id), object_type)),
        ObjectType::PreviewVideo => {
            let base = base_prefix(file_id, user_id);
            Ok(match object_id {
                Some(id) => format!("{}{}/{}_playlist", base, object_type, id),
                None => format!("{}{}_playlist", base, object_type),
            })
        }
        ObjectType::PreviewImage => Err(UnsupportedObjectType::Metadata(object_type)),
    }
}

/// Key of a part stored next to a payload. `None` is the payload itself.
pub fn part_key(payload_key: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{payload_key}{suffix}"),
        None => payload_key.to_string(),
    }
}
