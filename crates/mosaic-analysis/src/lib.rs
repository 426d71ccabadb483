//! Detection & Moderation Adapter.
//!
//! Object detection is an enrichment and never fails the caller. Image
//! moderation is safety-relevant and always surfaces provider failures.
//! Video moderation is asynchronous: a job is submitted with a completion
//! notification channel and its labels are fetched once the job reports in.

pub mod error;
pub mod taxonomy;
pub mod traits;

#[cfg(feature = "rekognition")]
pub mod rekognition;

pub use error::{AnalysisError, AnalysisResult};
pub use taxonomy::ModerationTaxonomy;
pub use traits::{
    ImageModerator, ModerationLabel, ModerationVerdict, ObjectDetector, VideoModerationStatus,
    VideoModerator,
};

#[cfg(feature = "rekognition")]
pub use rekognition::RekognitionAnalyzer;
