//! Mosaic Storage Library
//!
//! Object Store Adapter: the `Storage` trait and its S3 and local filesystem
//! backends. The orchestrator reads uploaded binaries and writes derived
//! artifacts through it; the upload service uses it to mint presigned PUT URLs.
//!
//! # Storage key format
//!
//! - Uploaded originals: `media/{owner_id}/{asset_id}.{ext}`
//! - Derived artifacts: `derived/{asset_id}/{name}`
//!
//! Keys must not contain `..` or a leading `/`.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use mosaic_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageResult};
