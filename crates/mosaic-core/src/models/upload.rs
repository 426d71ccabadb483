use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::asset::MediaKind;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UploadCredentialRequest {
    pub kind: MediaKind,
    #[validate(length(min = 3, max = 255))]
    pub content_type: String,
    pub owner_id: Uuid,
    #[serde(default)]
    pub album_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub tags: Vec<String>,
    /// Declared size, checked against the per-kind limit when present.
    #[serde(default)]
    pub content_length: Option<u64>,
}

/// Time-limited write credential for a direct upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCredential {
    pub asset_id: Uuid,
    pub storage_key: String,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestRequest {
    pub asset_id: Uuid,
    #[validate(length(min = 1, max = 1024))]
    pub storage_key: String,
    pub owner_id: Uuid,
    #[serde(default)]
    pub album_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Acknowledgement that processing has been queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAccepted {
    pub asset_id: Uuid,
    pub queued_at: DateTime<Utc>,
}
