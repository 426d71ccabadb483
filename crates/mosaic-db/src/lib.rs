//! Relational store for media assets and albums.
//!
//! The store is the single source of truth for asset visibility. Every
//! mutation of an asset after upload happens inside an [`AssetTx`], which
//! holds the asset's row lock until it is committed or rolled back; this is
//! the per-asset serialization point for concurrent workers.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod setup;
pub mod traits;

pub use error::{DbError, DbResult};
pub use memory::{MemoryAlbumStore, MemoryAssetStore};
pub use postgres::{PgAlbumRepository, PgAssetRepository};
pub use setup::setup_database;
pub use traits::{AlbumStore, AssetStore, AssetTx};
