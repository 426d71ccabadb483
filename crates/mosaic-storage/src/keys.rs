//! Shared key generation for storage backends.

use uuid::Uuid;

/// Key for an uploaded original.
pub fn upload_key(owner_id: Uuid, asset_id: Uuid, extension: &str) -> String {
    format!("media/{}/{}.{}", owner_id, asset_id, extension)
}

/// Key for an artifact derived from an asset (thumbnail, rendition, ...).
pub fn derived_key(asset_id: Uuid, name: &str) -> String {
    format!("derived/{}/{}", asset_id, name)
}

/// File extension for a supported content type.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type.to_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/webm" => Some("webm"),
        _ => None,
    }
}

/// Rejects keys that could escape a backend's root.
pub fn validate_key(key: &str) -> bool {
    !key.is_empty() && !key.contains("..") && !key.starts_with('/')
}
