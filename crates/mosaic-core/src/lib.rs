//! Mosaic Core Library
//!
//! Domain models, error types and configuration shared by every Mosaic crate:
//! the asset record and its lifecycle states, the external job ledger record,
//! queue message payloads, and the environment-driven configuration that is
//! handed to each adapter at construction time.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod tags;
pub mod task_error;

// Re-export commonly used types
pub use config::{
    AnalysisConfig, DatabaseConfig, DispatcherConfig, LedgerBackend, LedgerConfig, MediaConfig,
    MosaicConfig, OrchestratorConfig, ProfileNotifierConfig, StorageConfig, TranscodeConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
pub use tags::{merge_tags, normalize_tags};
pub use task_error::{TaskError, TaskResultExt};
