//! Metadata extracted from uploaded media

use serde::{Deserialize, Serialize};

/// Image metadata
///
/// `camera` is present only when the file carried parseable EXIF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub color_type: String,
    pub size_bytes: u64,
    pub camera: Option<CameraMetadata>,
}

/// Camera fields read from EXIF
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraMetadata {
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens_model: Option<String>,
    pub exposure_time: Option<String>,
    pub f_number: Option<f64>,
    pub iso: Option<u32>,
    pub focal_length_mm: Option<f64>,
    pub taken_at: Option<String>,
    pub orientation: Option<u32>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
}

impl CameraMetadata {
    pub fn is_empty(&self) -> bool {
        self == &CameraMetadata::default()
    }
}

/// Video metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub bitrate: Option<u64>,
    pub framerate: Option<f32>,
    /// Clockwise display rotation in degrees.
    pub rotation: i32,
    /// Display aspect ratio such as `16:9`.
    pub aspect_ratio: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_camera_metadata() {
        assert!(CameraMetadata::default().is_empty());
        let camera = CameraMetadata {
            make: Some("Canon".to_string()),
            ..Default::default()
        };
        assert!(!camera.is_empty());
    }

    #[test]
    fn test_video_metadata_serializes_rotation() {
        let metadata = VideoMetadata {
            duration: 12.5,
            width: 1920,
            height: 1080,
            codec: "h264".to_string(),
            bitrate: Some(5_000_000),
            framerate: Some(29.97),
            rotation: 90,
            aspect_ratio: Some("16:9".to_string()),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["rotation"], 90);
        assert_eq!(json["aspect_ratio"], "16:9");
    }
}
