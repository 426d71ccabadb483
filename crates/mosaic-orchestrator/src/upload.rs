//! Upload credential issuance.
//!
//! The asset record is reserved before the binary exists, so a credential
//! always corresponds to exactly one RESERVED asset and one storage key.

use chrono::Utc;
use mosaic_core::models::{MediaAsset, UploadCredential, UploadCredentialRequest};
use mosaic_core::{AppError, MediaConfig};
use mosaic_db::{AlbumStore, AssetStore};
use mosaic_storage::keys::{extension_for_content_type, upload_key};
use mosaic_storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

/// An album referenced by an upload must exist and belong to the uploader.
pub(crate) async fn check_album_owner(
    albums: &dyn AlbumStore,
    album_id: Uuid,
    owner_id: Uuid,
) -> Result<(), AppError> {
    let album = albums
        .get_album(album_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Album {} not found", album_id)))?;
    if album.owner_id != owner_id {
        return Err(AppError::Forbidden(format!(
            "Album {} belongs to another user",
            album_id
        )));
    }
    Ok(())
}

pub struct UploadService {
    assets: Arc<dyn AssetStore>,
    albums: Arc<dyn AlbumStore>,
    storage: Arc<dyn Storage>,
    media: MediaConfig,
    upload_expiry: Duration,
}

impl UploadService {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        albums: Arc<dyn AlbumStore>,
        storage: Arc<dyn Storage>,
        media: MediaConfig,
        upload_expiry: Duration,
    ) -> Self {
        Self {
            assets,
            albums,
            storage,
            media,
            upload_expiry,
        }
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            owner_id = %request.owner_id,
            kind = %request.kind,
            content_type = %request.content_type,
            operation = "issue_upload_credential"
        )
    )]
    pub async fn issue_upload_credential(
        &self,
        request: UploadCredentialRequest,
    ) -> Result<UploadCredential, AppError> {
        request.validate()?;

        let content_type = request.content_type.trim().to_lowercase();
        let (allowed, max_size) = if request.kind.is_image() {
            (&self.media.image_content_types, self.media.max_image_size_bytes)
        } else {
            (&self.media.video_content_types, self.media.max_video_size_bytes)
        };
        if !allowed.iter().any(|t| t.eq_ignore_ascii_case(&content_type)) {
            return Err(AppError::InvalidInput(format!(
                "Content type {} is not accepted for {} uploads. Allowed: {}",
                content_type,
                request.kind,
                allowed.join(", ")
            )));
        }
        if let Some(length) = request.content_length {
            if length > max_size {
                return Err(AppError::PayloadTooLarge(format!(
                    "{} bytes exceeds the {} byte limit for {} uploads",
                    length, max_size, request.kind
                )));
            }
        }
        let extension = extension_for_content_type(&content_type).ok_or_else(|| {
            AppError::InvalidInput(format!("Unsupported content type: {}", content_type))
        })?;

        if let Some(album_id) = request.album_id {
            check_album_owner(self.albums.as_ref(), album_id, request.owner_id).await?;
        }

        let asset_id = Uuid::new_v4();
        let storage_key = upload_key(request.owner_id, asset_id, extension);
        let asset = MediaAsset::reserved(
            asset_id,
            storage_key.clone(),
            self.storage.public_url(&storage_key),
            request.kind,
            content_type.clone(),
            request.owner_id,
            request.album_id,
            &request.tags,
        );

        let upload_url = self
            .storage
            .presigned_put_url(&storage_key, &content_type, self.upload_expiry)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to generate upload URL: {}", e)))?;
        let expires_at = Utc::now() + chrono::Duration::seconds(self.upload_expiry.as_secs() as i64);

        self.assets.insert_reserved(&asset).await?;

        tracing::info!(
            asset_id = %asset_id,
            storage_key = %storage_key,
            kind = %asset.kind,
            "Issued upload credential"
        );

        Ok(UploadCredential {
            asset_id,
            storage_key,
            upload_url,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::models::{Album, AssetState, MediaKind, Visibility};
    use mosaic_db::{MemoryAlbumStore, MemoryAssetStore};
    use mosaic_storage::LocalStorage;
    use tempfile::TempDir;

    struct Fixture {
        service: UploadService,
        assets: MemoryAssetStore,
        albums: MemoryAlbumStore,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://media.test".to_string())
            .await
            .unwrap();
        let assets = MemoryAssetStore::new();
        let albums = MemoryAlbumStore::new();
        let service = UploadService::new(
            Arc::new(assets.clone()),
            Arc::new(albums.clone()),
            Arc::new(storage),
            MediaConfig::default(),
            Duration::from_secs(900),
        );
        Fixture {
            service,
            assets,
            albums,
            _dir: dir,
        }
    }

    fn request(kind: MediaKind, content_type: &str) -> UploadCredentialRequest {
        UploadCredentialRequest {
            kind,
            content_type: content_type.to_string(),
            owner_id: Uuid::new_v4(),
            album_id: None,
            tags: vec!["Beach".to_string(), "beach".to_string()],
            content_length: Some(1024),
        }
    }

    fn album(owner_id: Uuid) -> Album {
        Album {
            id: Uuid::new_v4(),
            owner_id,
            name: "Holidays".to_string(),
            visibility: Visibility::Private,
            cover_asset_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_issue_reserves_asset() {
        let f = fixture().await;
        let req = request(MediaKind::Image, "image/JPEG");
        let owner_id = req.owner_id;

        let credential = f.service.issue_upload_credential(req).await.unwrap();
        assert_eq!(
            credential.storage_key,
            format!("media/{}/{}.jpg", owner_id, credential.asset_id)
        );
        assert!(credential.upload_url.ends_with(&credential.storage_key));
        assert!(credential.expires_at > Utc::now());

        let asset = f.assets.get(credential.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.state, AssetState::Reserved);
        assert_eq!(asset.content_type, "image/jpeg");
        assert_eq!(asset.tags, vec!["beach"]);
        assert!(asset.metadata.is_none());
    }

    #[tokio::test]
    async fn test_content_type_must_match_kind() {
        let f = fixture().await;
        let err = f
            .service
            .issue_upload_credential(request(MediaKind::Video, "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let err = f
            .service
            .issue_upload_credential(request(MediaKind::Image, "application/pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_size_limit_per_kind() {
        let f = fixture().await;
        let mut req = request(MediaKind::Image, "image/png");
        req.content_length = Some(50 * 1024 * 1024);
        let err = f.service.issue_upload_credential(req).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let mut req = request(MediaKind::Video, "video/mp4");
        req.content_length = Some(50 * 1024 * 1024);
        assert!(f.service.issue_upload_credential(req).await.is_ok());
    }

    #[tokio::test]
    async fn test_album_must_exist_and_be_owned() {
        let f = fixture().await;
        let mut req = request(MediaKind::Image, "image/png");
        req.album_id = Some(Uuid::new_v4());
        let err = f.service.issue_upload_credential(req).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let someone_else = album(Uuid::new_v4());
        let mut req = request(MediaKind::Image, "image/png");
        req.album_id = Some(someone_else.id);
        f.albums.insert(someone_else).await;
        let err = f.service.issue_upload_credential(req).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let mut req = request(MediaKind::AlbumCover, "image/png");
        let own = album(req.owner_id);
        req.album_id = Some(own.id);
        f.albums.insert(own.clone()).await;
        let credential = f.service.issue_upload_credential(req).await.unwrap();
        let asset = f.assets.get(credential.asset_id).await.unwrap().unwrap();
        assert_eq!(asset.album_id, Some(own.id));
    }
}
