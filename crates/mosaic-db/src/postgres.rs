use crate::error::{DbError, DbResult};
use crate::traits::{AlbumStore, AssetStore, AssetTx};
use async_trait::async_trait;
use mosaic_core::models::{Album, MediaAsset};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const ASSET_COLUMNS: &str = "id, storage_key, public_url, kind, content_type, owner_id, album_id, \
     state, tags, caller_tags, thumbnail_url, manifest_url, metadata, moderation, \
     moderation_labels, deleted_at, created_at, updated_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Media asset repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgAssetRepository {
    pool: PgPool,
}

impl PgAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetStore for PgAssetRepository {
    #[tracing::instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn insert_reserved(&self, asset: &MediaAsset) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO media_assets (
                id, storage_key, public_url, kind, content_type, owner_id, album_id,
                state, tags, caller_tags, moderation, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(asset.id)
        .bind(&asset.storage_key)
        .bind(&asset.public_url)
        .bind(asset.kind)
        .bind(&asset.content_type)
        .bind(asset.owner_id)
        .bind(asset.album_id)
        .bind(asset.state)
        .bind(&asset.tags)
        .bind(&asset.caller_tags)
        .bind(asset.moderation)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(DbError::Conflict(format!(
                "Asset {} or storage key {} already exists",
                asset.id, asset.storage_key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<MediaAsset>> {
        let asset = sqlx::query_as::<_, MediaAsset>(&format!(
            "SELECT {} FROM media_assets WHERE id = $1",
            ASSET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(asset)
    }

    async fn lock(&self, id: Uuid) -> DbResult<Box<dyn AssetTx>> {
        let mut tx = self.pool.begin().await?;

        let asset = sqlx::query_as::<_, MediaAsset>(&format!(
            "SELECT {} FROM media_assets WHERE id = $1 FOR UPDATE",
            ASSET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        match asset {
            Some(asset) => Ok(Box::new(PgAssetTx { tx, asset })),
            None => {
                tx.rollback().await?;
                Err(DbError::AssetNotFound(id))
            }
        }
    }
}

struct PgAssetTx {
    tx: Transaction<'static, Postgres>,
    asset: MediaAsset,
}

#[async_trait]
impl AssetTx for PgAssetTx {
    fn asset(&self) -> &MediaAsset {
        &self.asset
    }

    async fn save(&mut self, asset: MediaAsset) -> DbResult<()> {
        let saved = sqlx::query_as::<_, MediaAsset>(&format!(
            r#"
            UPDATE media_assets
            SET public_url = $2,
                album_id = $3,
                state = $4,
                tags = $5,
                caller_tags = $6,
                thumbnail_url = $7,
                manifest_url = $8,
                metadata = $9,
                moderation = $10,
                moderation_labels = $11,
                deleted_at = $12,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ASSET_COLUMNS
        ))
        .bind(asset.id)
        .bind(&asset.public_url)
        .bind(asset.album_id)
        .bind(asset.state)
        .bind(&asset.tags)
        .bind(&asset.caller_tags)
        .bind(&asset.thumbnail_url)
        .bind(&asset.manifest_url)
        .bind(&asset.metadata)
        .bind(asset.moderation)
        .bind(&asset.moderation_labels)
        .bind(asset.deleted_at)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(DbError::AssetNotFound(asset.id))?;

        self.asset = saved;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Read-only album lookups.
#[derive(Clone)]
pub struct PgAlbumRepository {
    pool: PgPool,
}

impl PgAlbumRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlbumStore for PgAlbumRepository {
    async fn get_album(&self, id: Uuid) -> DbResult<Option<Album>> {
        let album = sqlx::query_as::<_, Album>(
            r#"
            SELECT id, owner_id, name, visibility, cover_asset_id, created_at, updated_at
            FROM albums
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(album)
    }
}
