use crate::error::{DbError, DbResult};
use crate::traits::{AlbumStore, AssetStore, AssetTx};
use async_trait::async_trait;
use chrono::Utc;
use mosaic_core::models::{Album, MediaAsset};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

type AssetMap = Arc<RwLock<HashMap<Uuid, MediaAsset>>>;

/// In-process asset store with the same locking semantics as the
/// PostgreSQL repository: one open [`AssetTx`] per asset at a time, and
/// staged writes become visible only on commit.
#[derive(Clone, Default)]
pub struct MemoryAssetStore {
    assets: AssetMap,
    row_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn row_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock().await;
        locks.entry(id).or_default().clone()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn insert_reserved(&self, asset: &MediaAsset) -> DbResult<()> {
        let mut assets = self.assets.write().await;
        let key_taken = assets
            .values()
            .any(|existing| existing.storage_key == asset.storage_key);
        if assets.contains_key(&asset.id) || key_taken {
            return Err(DbError::Conflict(format!(
                "Asset {} or storage key {} already exists",
                asset.id, asset.storage_key
            )));
        }
        assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<MediaAsset>> {
        Ok(self.assets.read().await.get(&id).cloned())
    }

    async fn lock(&self, id: Uuid) -> DbResult<Box<dyn AssetTx>> {
        let guard = self.row_lock(id).await.lock_owned().await;
        let asset = self
            .assets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DbError::AssetNotFound(id))?;

        Ok(Box::new(MemoryAssetTx {
            assets: self.assets.clone(),
            asset,
            dirty: false,
            _guard: guard,
        }))
    }
}

struct MemoryAssetTx {
    assets: AssetMap,
    asset: MediaAsset,
    dirty: bool,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl AssetTx for MemoryAssetTx {
    fn asset(&self) -> &MediaAsset {
        &self.asset
    }

    async fn save(&mut self, mut asset: MediaAsset) -> DbResult<()> {
        if asset.id != self.asset.id {
            return Err(DbError::AssetNotFound(asset.id));
        }
        asset.updated_at = Utc::now();
        self.asset = asset;
        self.dirty = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryAssetTx {
            assets,
            asset,
            dirty,
            _guard,
        } = *self;
        if dirty {
            assets.write().await.insert(asset.id, asset);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryAlbumStore {
    albums: Arc<RwLock<HashMap<Uuid, Album>>>,
}

impl MemoryAlbumStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, album: Album) {
        self.albums.write().await.insert(album.id, album);
    }
}

#[async_trait]
impl AlbumStore for MemoryAlbumStore {
    async fn get_album(&self, id: Uuid) -> DbResult<Option<Album>> {
        Ok(self.albums.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::models::{AssetState, MediaKind};
    use std::time::Duration;

    fn reserved(key: &str) -> MediaAsset {
        MediaAsset::reserved(
            Uuid::new_v4(),
            key.to_string(),
            format!("https://cdn.example.com/{}", key),
            MediaKind::Image,
            "image/jpeg".to_string(),
            Uuid::new_v4(),
            None,
            &[],
        )
    }

    #[tokio::test]
    async fn test_duplicate_storage_key_conflicts() {
        let store = MemoryAssetStore::new();
        store.insert_reserved(&reserved("media/a.jpg")).await.unwrap();
        let err = store
            .insert_reserved(&reserved("media/a.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_staged_writes_visible_only_after_commit() {
        let store = MemoryAssetStore::new();
        let asset = reserved("media/b.jpg");
        store.insert_reserved(&asset).await.unwrap();

        let mut tx = store.lock(asset.id).await.unwrap();
        let mut updated = tx.asset().clone();
        updated.state = AssetState::Ingesting;
        tx.save(updated).await.unwrap();
        assert_eq!(tx.asset().state, AssetState::Ingesting);
        assert_eq!(
            store.get(asset.id).await.unwrap().unwrap().state,
            AssetState::Reserved
        );

        tx.commit().await.unwrap();
        assert_eq!(
            store.get(asset.id).await.unwrap().unwrap().state,
            AssetState::Ingesting
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryAssetStore::new();
        let asset = reserved("media/c.jpg");
        store.insert_reserved(&asset).await.unwrap();

        let mut tx = store.lock(asset.id).await.unwrap();
        let mut updated = tx.asset().clone();
        updated.thumbnail_url = Some("thumb".to_string());
        tx.save(updated).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store
            .get(asset.id)
            .await
            .unwrap()
            .unwrap()
            .thumbnail_url
            .is_none());
    }

    #[tokio::test]
    async fn test_lock_serializes_access_per_asset() {
        let store = MemoryAssetStore::new();
        let asset = reserved("media/d.jpg");
        store.insert_reserved(&asset).await.unwrap();

        let first = store.lock(asset.id).await.unwrap();
        let contender = {
            let store = store.clone();
            let id = asset.id;
            tokio::spawn(async move { store.lock(id).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        first.rollback().await.unwrap();
        contender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lock_missing_asset() {
        let store = MemoryAssetStore::new();
        let err = store.lock(Uuid::new_v4()).await.err().unwrap();
        assert!(matches!(err, DbError::AssetNotFound(_)));
    }
}
