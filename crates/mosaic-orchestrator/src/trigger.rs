//! Ingest trigger: validates an upload-complete request against the
//! reserved asset and hands it to the upload-ready queue.
//!
//! Album membership is fixed when the upload credential is issued. A request
//! naming an album must name that same album, and the album must still exist
//! and belong to the caller.

use crate::upload::check_album_owner;
use async_trait::async_trait;
use chrono::Utc;
use mosaic_core::models::{IngestAccepted, IngestRequest, UploadReadyMessage};
use mosaic_core::AppError;
use mosaic_db::{AlbumStore, AssetStore};
use std::sync::Arc;
use validator::Validate;

/// Sink for "upload ready" messages.
#[async_trait]
pub trait UploadReadyPublisher: Send + Sync {
    async fn publish(&self, message: &UploadReadyMessage) -> anyhow::Result<()>;
}

pub struct IngestTrigger {
    assets: Arc<dyn AssetStore>,
    albums: Arc<dyn AlbumStore>,
    publisher: Arc<dyn UploadReadyPublisher>,
}

impl IngestTrigger {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        albums: Arc<dyn AlbumStore>,
        publisher: Arc<dyn UploadReadyPublisher>,
    ) -> Self {
        Self {
            assets,
            albums,
            publisher,
        }
    }

    /// Queue ingest for an uploaded asset. Returns as soon as the message is
    /// accepted by the queue; the outcome is observable only through the
    /// asset record.
    #[tracing::instrument(skip(self, request), fields(asset_id = %request.asset_id))]
    pub async fn trigger_ingest(&self, request: IngestRequest) -> Result<IngestAccepted, AppError> {
        request.validate()?;

        let asset = self
            .assets
            .get(request.asset_id)
            .await?
            .filter(|a| !a.is_deleted())
            .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", request.asset_id)))?;

        if asset.owner_id != request.owner_id {
            // Same answer as a missing asset; ids of other users' uploads are not confirmed.
            return Err(AppError::NotFound(format!(
                "Asset {} not found",
                request.asset_id
            )));
        }
        if asset.storage_key != request.storage_key {
            return Err(AppError::InvalidInput(format!(
                "Storage key {} does not belong to asset {}",
                request.storage_key, request.asset_id
            )));
        }
        if let Some(album_id) = request.album_id {
            check_album_owner(self.albums.as_ref(), album_id, request.owner_id).await?;
            if asset.album_id != Some(album_id) {
                return Err(AppError::InvalidInput(format!(
                    "Asset {} was not uploaded to album {}",
                    request.asset_id, album_id
                )));
            }
        }

        let message = UploadReadyMessage {
            asset_id: request.asset_id,
            storage_key: request.storage_key,
            owner_id: request.owner_id,
            album_id: asset.album_id,
            tags: request.tags,
        };
        self.publisher
            .publish(&message)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to enqueue ingest: {}", e)))?;

        tracing::info!(state = %asset.state, "Ingest queued");
        Ok(IngestAccepted {
            asset_id: message.asset_id,
            queued_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::models::{Album, MediaAsset, MediaKind, Visibility};
    use mosaic_db::{MemoryAlbumStore, MemoryAssetStore};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct CapturingPublisher {
        messages: Mutex<Vec<UploadReadyMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl UploadReadyPublisher for CapturingPublisher {
        async fn publish(&self, message: &UploadReadyMessage) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("queue unavailable");
            }
            self.messages.lock().await.push(message.clone());
            Ok(())
        }
    }

    fn trigger_with(
        store: &MemoryAssetStore,
        albums: &MemoryAlbumStore,
        publisher: Arc<CapturingPublisher>,
    ) -> IngestTrigger {
        IngestTrigger::new(Arc::new(store.clone()), Arc::new(albums.clone()), publisher)
    }

    fn album(owner_id: Uuid) -> Album {
        Album {
            id: Uuid::new_v4(),
            owner_id,
            name: "Trips".to_string(),
            visibility: Visibility::Private,
            cover_asset_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn reserved(store: &MemoryAssetStore) -> MediaAsset {
        reserved_in(store, Uuid::new_v4(), None).await
    }

    async fn reserved_in(store: &MemoryAssetStore, owner: Uuid, album_id: Option<Uuid>) -> MediaAsset {
        let id = Uuid::new_v4();
        let key = format!("media/{}/{}.png", owner, id);
        let asset = MediaAsset::reserved(
            id,
            key.clone(),
            format!("http://media.test/{}", key),
            MediaKind::Image,
            "image/png".to_string(),
            owner,
            album_id,
            &[],
        );
        store.insert_reserved(&asset).await.unwrap();
        asset
    }

    fn request_for(asset: &MediaAsset) -> IngestRequest {
        IngestRequest {
            asset_id: asset.id,
            storage_key: asset.storage_key.clone(),
            owner_id: asset.owner_id,
            album_id: None,
            tags: vec!["sunset".to_string()],
        }
    }

    #[tokio::test]
    async fn test_trigger_publishes_ready_message() {
        let store = MemoryAssetStore::new();
        let publisher = Arc::new(CapturingPublisher::default());
        let trigger = trigger_with(&store, &MemoryAlbumStore::new(), publisher.clone());
        let asset = reserved(&store).await;

        let accepted = trigger.trigger_ingest(request_for(&asset)).await.unwrap();
        assert_eq!(accepted.asset_id, asset.id);

        let messages = publisher.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].storage_key, asset.storage_key);
        assert_eq!(messages[0].tags, vec!["sunset"]);
    }

    #[tokio::test]
    async fn test_trigger_rejects_foreign_or_mismatched_requests() {
        let store = MemoryAssetStore::new();
        let publisher = Arc::new(CapturingPublisher::default());
        let trigger = trigger_with(&store, &MemoryAlbumStore::new(), publisher.clone());
        let asset = reserved(&store).await;

        let mut foreign = request_for(&asset);
        foreign.owner_id = Uuid::new_v4();
        assert!(matches!(
            trigger.trigger_ingest(foreign).await,
            Err(AppError::NotFound(_))
        ));

        let mut mismatched = request_for(&asset);
        mismatched.storage_key = "media/other/key.png".to_string();
        assert!(matches!(
            trigger.trigger_ingest(mismatched).await,
            Err(AppError::InvalidInput(_))
        ));

        let mut missing = request_for(&asset);
        missing.asset_id = Uuid::new_v4();
        assert!(matches!(
            trigger.trigger_ingest(missing).await,
            Err(AppError::NotFound(_))
        ));

        assert!(publisher.messages.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_failure_surfaces_as_queue_error() {
        let store = MemoryAssetStore::new();
        let publisher = Arc::new(CapturingPublisher {
            fail: true,
            ..Default::default()
        });
        let trigger = trigger_with(&store, &MemoryAlbumStore::new(), publisher);
        let asset = reserved(&store).await;

        assert!(matches!(
            trigger.trigger_ingest(request_for(&asset)).await,
            Err(AppError::Queue(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_forwards_the_asset_album() {
        let store = MemoryAssetStore::new();
        let albums = MemoryAlbumStore::new();
        let publisher = Arc::new(CapturingPublisher::default());
        let trigger = trigger_with(&store, &albums, publisher.clone());
        let owner = Uuid::new_v4();
        let trips = album(owner);
        albums.insert(trips.clone()).await;
        let asset = reserved_in(&store, owner, Some(trips.id)).await;

        let mut request = request_for(&asset);
        request.album_id = Some(trips.id);
        trigger.trigger_ingest(request).await.unwrap();
        trigger.trigger_ingest(request_for(&asset)).await.unwrap();

        let messages = publisher.messages.lock().await;
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.album_id == Some(trips.id)));
    }

    #[tokio::test]
    async fn test_trigger_rejects_album_other_than_the_reserved_one() {
        let store = MemoryAssetStore::new();
        let albums = MemoryAlbumStore::new();
        let publisher = Arc::new(CapturingPublisher::default());
        let trigger = trigger_with(&store, &albums, publisher.clone());
        let owner = Uuid::new_v4();
        let trips = album(owner);
        let pets = album(owner);
        albums.insert(trips.clone()).await;
        albums.insert(pets.clone()).await;
        let in_trips = reserved_in(&store, owner, Some(trips.id)).await;
        let loose = reserved_in(&store, owner, None).await;

        let mut moved = request_for(&in_trips);
        moved.album_id = Some(pets.id);
        assert!(matches!(
            trigger.trigger_ingest(moved).await,
            Err(AppError::InvalidInput(_))
        ));

        let mut attached = request_for(&loose);
        attached.album_id = Some(trips.id);
        assert!(matches!(
            trigger.trigger_ingest(attached).await,
            Err(AppError::InvalidInput(_))
        ));

        assert!(publisher.messages.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_rejects_foreign_or_missing_album() {
        let store = MemoryAssetStore::new();
        let albums = MemoryAlbumStore::new();
        let publisher = Arc::new(CapturingPublisher::default());
        let trigger = trigger_with(&store, &albums, publisher.clone());
        let someone_else = album(Uuid::new_v4());
        albums.insert(someone_else.clone()).await;
        let asset = reserved(&store).await;

        let mut foreign = request_for(&asset);
        foreign.album_id = Some(someone_else.id);
        assert!(matches!(
            trigger.trigger_ingest(foreign).await,
            Err(AppError::Forbidden(_))
        ));

        let mut missing = request_for(&asset);
        missing.album_id = Some(Uuid::new_v4());
        assert!(matches!(
            trigger.trigger_ingest(missing).await,
            Err(AppError::NotFound(_))
        ));

        assert!(publisher.messages.lock().await.is_empty());
    }
}
