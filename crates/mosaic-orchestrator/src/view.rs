use mosaic_core::models::AssetView;
use mosaic_core::AppError;
use mosaic_db::{AlbumStore, AssetStore};
use std::sync::Arc;
use uuid::Uuid;

/// Read side of the asset record, with album visibility applied.
pub struct AssetViewService {
    assets: Arc<dyn AssetStore>,
    albums: Arc<dyn AlbumStore>,
}

impl AssetViewService {
    pub fn new(assets: Arc<dyn AssetStore>, albums: Arc<dyn AlbumStore>) -> Self {
        Self { assets, albums }
    }

    /// Assets outside any album are visible to everyone; assets in a private
    /// album only to the album owner. Denials look like a missing asset.
    #[tracing::instrument(skip(self), fields(asset_id = %asset_id, requester = %requester))]
    pub async fn get_asset_view(&self, asset_id: Uuid, requester: Uuid) -> Result<AssetView, AppError> {
        let not_found = || AppError::NotFound(format!("Asset {} not found", asset_id));

        let asset = self
            .assets
            .get(asset_id)
            .await?
            .filter(|a| !a.is_deleted())
            .ok_or_else(not_found)?;

        if let Some(album_id) = asset.album_id {
            let visible = match self.albums.get_album(album_id).await? {
                Some(album) => album.is_visible_to(requester),
                // Dangling album reference: fall back to owner-only.
                None => asset.owner_id == requester,
            };
            if !visible && asset.owner_id != requester {
                tracing::debug!(album_id = %album_id, "Asset hidden by album visibility");
                return Err(not_found());
            }
        }

        Ok(asset.view_for(requester))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mosaic_core::models::{Album, AssetState, MediaAsset, MediaKind, ModerationFlag, Visibility};
    use mosaic_db::{AssetTx, MemoryAlbumStore, MemoryAssetStore};
    use serde_json::json;

    struct Fixture {
        service: AssetViewService,
        assets: MemoryAssetStore,
        albums: MemoryAlbumStore,
        owner: Uuid,
    }

    fn fixture() -> Fixture {
        let assets = MemoryAssetStore::new();
        let albums = MemoryAlbumStore::new();
        Fixture {
            service: AssetViewService::new(Arc::new(assets.clone()), Arc::new(albums.clone())),
            assets,
            albums,
            owner: Uuid::new_v4(),
        }
    }

    impl Fixture {
        async fn asset(&self, album_id: Option<Uuid>, edit: impl FnOnce(&mut MediaAsset)) -> Uuid {
            let id = Uuid::new_v4();
            let key = format!("media/{}/{}.jpg", self.owner, id);
            let asset = MediaAsset::reserved(
                id,
                key.clone(),
                format!("http://media.test/{}", key),
                MediaKind::Image,
                "image/jpeg".to_string(),
                self.owner,
                album_id,
                &["sunset".to_string()],
            );
            self.assets.insert_reserved(&asset).await.unwrap();

            let mut tx = self.assets.lock(id).await.unwrap();
            let mut updated = tx.asset().clone();
            edit(&mut updated);
            tx.save(updated).await.unwrap();
            tx.commit().await.unwrap();
            id
        }

        async fn album(&self, visibility: Visibility) -> Uuid {
            let album = Album {
                id: Uuid::new_v4(),
                owner_id: self.owner,
                name: "Trip".to_string(),
                visibility,
                cover_asset_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let id = album.id;
            self.albums.insert(album).await;
            id
        }
    }

    fn complete(asset: &mut MediaAsset) {
        asset.state = AssetState::Complete;
        asset.moderation = ModerationFlag::Clean;
        asset.tags = vec!["beach".to_string(), "sunset".to_string()];
        asset.thumbnail_url = Some("http://media.test/derived/t.jpg".to_string());
        asset.merge_metadata(json!({ "renditions": [], "width": 10 }));
    }

    #[tokio::test]
    async fn test_private_album_hides_asset_from_others() {
        let f = fixture();
        let album = f.album(Visibility::Private).await;
        let id = f.asset(Some(album), complete).await;

        assert!(f.service.get_asset_view(id, f.owner).await.is_ok());
        assert!(matches!(
            f.service.get_asset_view(id, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));

        let public = f.album(Visibility::Public).await;
        let id = f.asset(Some(public), complete).await;
        assert!(f.service.get_asset_view(id, Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_deleted_asset_is_not_found() {
        let f = fixture();
        let id = f.asset(None, |a| a.deleted_at = Some(Utc::now())).await;
        assert!(matches!(
            f.service.get_asset_view(id, f.owner).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_flagged_asset_is_stripped_for_others() {
        let f = fixture();
        let id = f
            .asset(None, |a| {
                complete(a);
                a.state = AssetState::Flagged;
                a.moderation = ModerationFlag::Flagged;
            })
            .await;

        let stranger = f.service.get_asset_view(id, Uuid::new_v4()).await.unwrap();
        assert!(stranger.thumbnail_url.is_none());
        assert!(stranger.url.is_none());
        assert_eq!(stranger.tags, vec!["sunset"]);
        assert!(stranger.metadata.unwrap().get("renditions").is_none());

        let owner = f.service.get_asset_view(id, f.owner).await.unwrap();
        assert!(owner.thumbnail_url.is_some());
        assert_eq!(owner.tags, vec!["beach", "sunset"]);
    }

    #[tokio::test]
    async fn test_reserved_asset_has_no_metadata() {
        let f = fixture();
        let id = f.asset(None, |_| {}).await;
        let view = f.service.get_asset_view(id, Uuid::new_v4()).await.unwrap();
        assert_eq!(view.state, AssetState::Reserved);
        assert!(view.metadata.is_none());
        assert!(view.thumbnail_url.is_none());
    }
}
