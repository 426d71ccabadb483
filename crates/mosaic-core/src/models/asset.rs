use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::tags::normalize_tags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "media_kind", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    ProfileImage,
    AlbumCover,
    Image,
    Video,
}

impl MediaKind {
    pub fn is_image(&self) -> bool {
        !matches!(self, MediaKind::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::ProfileImage => "profile_image",
            MediaKind::AlbumCover => "album_cover",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile_image" => Ok(MediaKind::ProfileImage),
            "album_cover" => Ok(MediaKind::AlbumCover),
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

/// Lifecycle of an asset after its upload credential is issued.
///
/// `Reserved -> Ingesting -> {Complete | Flagged | PendingExternal -> {Complete | Flagged | Failed}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "asset_state", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Reserved,
    Ingesting,
    PendingExternal,
    Complete,
    Flagged,
    Failed,
}

impl AssetState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssetState::Complete | AssetState::Flagged | AssetState::Failed
        )
    }

    /// States from which an ingest may start or resume.
    pub fn accepts_ingest(&self) -> bool {
        matches!(self, AssetState::Reserved | AssetState::Ingesting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetState::Reserved => "reserved",
            AssetState::Ingesting => "ingesting",
            AssetState::PendingExternal => "pending_external",
            AssetState::Complete => "complete",
            AssetState::Flagged => "flagged",
            AssetState::Failed => "failed",
        }
    }
}

impl Display for AssetState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(AssetState::Reserved),
            "ingesting" => Ok(AssetState::Ingesting),
            "pending_external" => Ok(AssetState::PendingExternal),
            "complete" => Ok(AssetState::Complete),
            "flagged" => Ok(AssetState::Flagged),
            "failed" => Ok(AssetState::Failed),
            _ => Err(anyhow::anyhow!("Invalid asset state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "moderation_flag", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ModerationFlag {
    Pending,
    Clean,
    Flagged,
}

impl Display for ModerationFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ModerationFlag::Pending => write!(f, "pending"),
            ModerationFlag::Clean => write!(f, "clean"),
            ModerationFlag::Flagged => write!(f, "flagged"),
        }
    }
}

/// One entry of the responsive rendition ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub width: u32,
    pub height: u32,
    pub storage_key: String,
    pub url: String,
}

/// Canonical record of one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MediaAsset {
    pub id: Uuid,
    pub storage_key: String,
    pub public_url: String,
    pub kind: MediaKind,
    pub content_type: String,
    pub owner_id: Uuid,
    pub album_id: Option<Uuid>,
    pub state: AssetState,
    /// Normalized union of caller-supplied and detected tags.
    pub tags: Vec<String>,
    /// Tags supplied by the uploader, kept apart so flagged assets can be
    /// shown without detection output.
    pub caller_tags: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub manifest_url: Option<String>,
    pub metadata: Option<JsonValue>,
    pub moderation: ModerationFlag,
    pub moderation_labels: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaAsset {
    /// A freshly reserved asset; the binary does not exist yet.
    #[allow(clippy::too_many_arguments)]
    pub fn reserved(
        id: Uuid,
        storage_key: String,
        public_url: String,
        kind: MediaKind,
        content_type: String,
        owner_id: Uuid,
        album_id: Option<Uuid>,
        tags: &[String],
    ) -> Self {
        let now = Utc::now();
        let caller_tags = normalize_tags(tags);
        Self {
            id,
            storage_key,
            public_url,
            kind,
            content_type,
            owner_id,
            album_id,
            state: AssetState::Reserved,
            tags: caller_tags.clone(),
            caller_tags,
            thumbnail_url: None,
            manifest_url: None,
            metadata: None,
            moderation: ModerationFlag::Pending,
            moderation_labels: Vec::new(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Overwrite top-level metadata keys with those in `patch`.
    ///
    /// Applying the same patch twice leaves the metadata unchanged.
    pub fn merge_metadata(&mut self, patch: JsonValue) {
        let JsonValue::Object(patch) = patch else {
            return;
        };
        let mut current = match self.metadata.take() {
            Some(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            current.insert(key, value);
        }
        self.metadata = Some(JsonValue::Object(current));
    }

    pub fn renditions(&self) -> Vec<Rendition> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("renditions"))
            .and_then(|r| serde_json::from_value(r.clone()).ok())
            .unwrap_or_default()
    }

    /// Best URL to represent this asset elsewhere: thumbnail, else primary.
    pub fn best_derived_url(&self) -> &str {
        self.thumbnail_url.as_deref().unwrap_or(&self.public_url)
    }

    /// Projection of the asset as seen by `requester`.
    ///
    /// Flagged assets keep their enrichment visible only to the owner.
    pub fn view_for(&self, requester: Uuid) -> AssetView {
        let is_owner = requester == self.owner_id;
        let suppress = self.moderation == ModerationFlag::Flagged && !is_owner;

        let metadata = if suppress {
            self.metadata.as_ref().map(strip_derived_metadata)
        } else {
            self.metadata.clone()
        };

        AssetView {
            id: self.id,
            kind: self.kind,
            state: self.state,
            owner_id: self.owner_id,
            album_id: self.album_id,
            url: if suppress { None } else { Some(self.public_url.clone()) },
            thumbnail_url: if suppress { None } else { self.thumbnail_url.clone() },
            manifest_url: if suppress { None } else { self.manifest_url.clone() },
            tags: if suppress {
                self.caller_tags.clone()
            } else {
                self.tags.clone()
            },
            metadata,
            moderation: self.moderation,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn strip_derived_metadata(metadata: &JsonValue) -> JsonValue {
    let mut stripped = metadata.clone();
    if let JsonValue::Object(map) = &mut stripped {
        map.remove("renditions");
        map.remove("optimized_url");
        map.remove("original_url");
    }
    stripped
}

/// Read-only projection returned by asset retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetView {
    pub id: Uuid,
    pub kind: MediaKind,
    pub state: AssetState,
    pub owner_id: Uuid,
    pub album_id: Option<Uuid>,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub manifest_url: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<JsonValue>,
    pub moderation: ModerationFlag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
