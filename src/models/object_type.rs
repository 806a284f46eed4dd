//! The closed set of file-derived object kinds tracked by the service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of derived object stored next to a user's file.
///
/// The wire and database representation is the lowercase tag returned by
/// [`ObjectType::as_str`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    /// Streaming preview: an encrypted video object plus a playlist sidecar.
    #[serde(rename = "vid_preview")]
    PreviewVideo,

    /// Still preview image, a single encrypted object.
    #[serde(rename = "img_preview")]
    PreviewImage,

    /// Derived ML features, stored only as a sidecar blob.
    #[serde(rename = "mldata")]
    MlData,
}

impl ObjectType {
    pub const ALL: [ObjectType; 3] = [
        ObjectType::PreviewVideo,
        ObjectType::PreviewImage,
        ObjectType::MlData,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::PreviewVideo => "vid_preview",
            ObjectType::PreviewImage => "img_preview",
            ObjectType::MlData => "mldata",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown object type `{0}`")]
pub struct UnknownObjectType(pub String);

impl FromStr for ObjectType {
    type Err = UnknownObjectType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownObjectType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde() {
        for t in ObjectType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<ObjectType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!("thumbnail".parse::<ObjectType>().is_err());
        assert!(serde_json::from_str::<ObjectType>("\"thumbnail\"").is_err());
    }
}
