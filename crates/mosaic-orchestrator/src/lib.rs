//! Mosaic Orchestrator
//!
//! The Processing Orchestrator drives one asset from upload to its terminal
//! state: synchronous enrichment for images, external job submission and
//! reconciliation for video. The surrounding services issue upload
//! credentials, publish ingest triggers and render the asset view.

pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod trigger;
pub mod upload;
pub mod view;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{OrchestratorError, OrchestratorResult};
pub use notifier::{
    create_profile_notifier, HttpProfileNotifier, LoggingProfileNotifier, NotifyError,
    ProfileNotifier, ProfilePictureUpdated,
};
pub use orchestrator::{
    IngestOutcome, Orchestrator, OrchestratorDeps, ReconcileOutcome, SweepReport,
};
pub use trigger::{IngestTrigger, UploadReadyPublisher};
pub use upload::UploadService;
pub use view::AssetViewService;
