//! Mosaic Processing Library
//!
//! Image Transform Adapter (thumbnail, optimization, responsive renditions,
//! EXIF and generic metadata) and the video side: metadata probing through
//! `ffprobe` and a Transcoding Adapter that produces segmented HLS output with
//! `ffmpeg`.
//!
//! Image operations are synchronous and CPU-bound; callers run them on a
//! blocking thread.

pub mod error;
pub mod metadata;

#[cfg(feature = "image")]
pub mod image;

#[cfg(feature = "video")]
pub mod video;

pub use error::{ProcessingError, ProcessingResult};
pub use metadata::{CameraMetadata, ImageMetadata, VideoMetadata};

#[cfg(feature = "image")]
pub use self::image::{DecodedImage, EncodedImage, ImageTransformer, RenditionOutput};

#[cfg(feature = "video")]
pub use video::{FfmpegTranscoder, FfprobeProber, TranscodeState, Transcoder, VideoProber};
