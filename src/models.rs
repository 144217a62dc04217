// Row and wire types for the replication engine: plain serde structs kept
// next to the persistence layer they describe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    UserMeta,
    Track,
    File,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::UserMeta => "UserMeta",
            SourceKind::Track => "Track",
            SourceKind::File => "File",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "UserMeta" => Some(SourceKind::UserMeta),
            "Track" => Some(SourceKind::Track),
            "File" => Some(SourceKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Metadata,
    Image,
    Audio,
    Dir,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Metadata => "metadata",
            FileType::Image => "image",
            FileType::Audio => "audio",
            FileType::Dir => "dir",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "metadata" => Some(FileType::Metadata),
            "image" => Some(FileType::Image),
            "audio" => Some(FileType::Audio),
            "dir" => Some(FileType::Dir),
            _ => None,
        }
    }
}

/// `User` row. `wallet` is the stable cross-node identifier;
/// `user_uuid` is this node's opaque local key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_uuid: String,
    pub wallet: String,
    pub latest_block_number: i64,
    pub clock: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockRecord {
    pub user_uuid: String,
    pub clock: i64,
    pub source_kind: SourceKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMetaRow {
    pub user_uuid: String,
    pub clock: i64,
    pub multihash: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRow {
    pub user_uuid: String,
    pub clock: i64,
    pub multihash: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
    pub user_uuid: String,
    pub clock: i64,
    pub multihash: String,
    pub storage_path: String,
    pub file_type: FileType,
    pub dir_multihash: Option<String>,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied payload for a new UserMeta/Track write.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUserMeta {
    pub multihash: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrack {
    pub multihash: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFile {
    pub multihash: String,
    pub storage_path: String,
    pub file_type: FileType,
    pub dir_multihash: Option<String>,
    pub file_name: Option<String>,
}

/// Receipt returned from a content write: the clock assigned to the new row.
#[derive(Debug, Clone, Serialize)]
pub struct WriteReceipt {
    pub user_uuid: String,
    pub clock: i64,
}

/// Per-user export payload, keyed by `UserUUID` in the outer response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CNodeUserExport {
    pub user: User,
    pub clock_records: Vec<ClockRecord>,
    pub user_metas: Vec<UserMetaRow>,
    pub tracks: Vec<TrackRow>,
    pub files: Vec<FileRow>,
    pub clock_info: ClockInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockInfo {
    /// The true, unclamped clock of the user on the exporting node.
    pub local_clock_max: i64,
    pub requested_clock_range_min: i64,
    pub requested_clock_range_max: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub cnode_users: std::collections::HashMap<String, CNodeUserExport>,
    pub peer_info: PeerInfo,
}
