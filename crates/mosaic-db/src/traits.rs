use crate::error::DbResult;
use async_trait::async_trait;
use mosaic_core::models::{Album, MediaAsset};
use uuid::Uuid;

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Insert a freshly reserved asset. Fails with `Conflict` if the id or
    /// storage key is taken.
    async fn insert_reserved(&self, asset: &MediaAsset) -> DbResult<()>;

    /// Committed view of an asset, without locking.
    async fn get(&self, id: Uuid) -> DbResult<Option<MediaAsset>>;

    /// Open a transaction holding the asset's row lock.
    ///
    /// Fails with `AssetNotFound` if no such asset exists.
    async fn lock(&self, id: Uuid) -> DbResult<Box<dyn AssetTx>>;
}

/// Transactional scope over one locked asset.
///
/// Dropping the scope without committing discards staged writes.
#[async_trait]
pub trait AssetTx: Send {
    /// The asset as read under the lock, including writes staged in this scope.
    fn asset(&self) -> &MediaAsset;

    /// Stage `asset` as the new state of the locked row.
    async fn save(&mut self, asset: MediaAsset) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

#[async_trait]
pub trait AlbumStore: Send + Sync {
    async fn get_album(&self, id: Uuid) -> DbResult<Option<Album>>;
}
