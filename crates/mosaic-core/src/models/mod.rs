pub mod album;
pub mod asset;
pub mod job;
pub mod messages;
pub mod upload;

pub use album::{Album, Visibility};
pub use asset::{AssetState, AssetView, MediaAsset, MediaKind, ModerationFlag, Rendition};
pub use job::{ExternalJobRecord, JobKind, JobOutcome, JobStatus};
pub use messages::{JobResultMessage, UploadReadyMessage};
pub use upload::{IngestAccepted, IngestRequest, UploadCredential, UploadCredentialRequest};
