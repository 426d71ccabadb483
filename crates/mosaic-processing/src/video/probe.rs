use super::validate_executable_path;
use crate::error::{ProcessingError, ProcessingResult};
use crate::metadata::VideoMetadata;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

/// Extracts stream-level metadata from a video source.
#[async_trait]
pub trait VideoProber: Send + Sync {
    /// `source` is a local path or a URL the prober can read directly.
    async fn probe(&self, source: &str) -> ProcessingResult<VideoMetadata>;
}

pub struct FfprobeProber {
    ffprobe_path: String,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: String) -> ProcessingResult<Self> {
        validate_executable_path(&ffprobe_path)
            .map_err(|e| ProcessingError::Config(format!("Invalid ffprobe_path: {}", e)))?;
        Ok(Self { ffprobe_path })
    }
}

#[async_trait]
impl VideoProber for FfprobeProber {
    #[tracing::instrument(skip(self, source), fields(
        process.executable.name = "ffprobe",
        process.executable.path = %self.ffprobe_path,
        ffmpeg.operation = "probe"
    ))]
    async fn probe(&self, source: &str) -> ProcessingResult<VideoMetadata> {
        let start = std::time::Instant::now();

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(source)
            .output()
            .await
            .map_err(|e| ProcessingError::Probe(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(ProcessingError::Probe(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let probe_data: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ProcessingError::Probe(format!("Failed to parse ffprobe output: {}", e)))?;
        let metadata = parse_probe_output(&probe_data)?;

        tracing::info!(
            duration_ms = start.elapsed().as_millis(),
            video_duration = metadata.duration,
            width = metadata.width,
            height = metadata.height,
            codec = %metadata.codec,
            rotation = metadata.rotation,
            "Video probe completed"
        );

        Ok(metadata)
    }
}

fn parse_ratio(value: &str) -> Option<f32> {
    let (num, den) = value.split_once('/')?;
    let num: f32 = num.parse().ok()?;
    let den: f32 = den.parse().ok()?;
    if den != 0.0 {
        Some(num / den)
    } else {
        None
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Clockwise display rotation, from the legacy `rotate` tag or the display matrix side data.
fn parse_rotation(stream: &Value) -> i32 {
    if let Some(rotate) = stream["tags"]["rotate"]
        .as_str()
        .and_then(|r| r.parse::<i32>().ok())
    {
        return rotate.rem_euclid(360);
    }
    stream["side_data_list"]
        .as_array()
        .and_then(|list| list.iter().find_map(|sd| sd["rotation"].as_i64()))
        // The display matrix reports counter-clockwise rotation.
        .map(|r| (-(r as i32)).rem_euclid(360))
        .unwrap_or(0)
}

fn parse_aspect_ratio(stream: &Value, width: u32, height: u32) -> Option<String> {
    match stream["display_aspect_ratio"].as_str() {
        Some(dar) if dar != "0:1" && dar != "N/A" => Some(dar.to_string()),
        _ if width > 0 && height > 0 => {
            let d = gcd(width, height);
            Some(format!("{}:{}", width / d, height / d))
        }
        _ => None,
    }
}

/// Map `ffprobe -print_format json` output to [`VideoMetadata`].
pub fn parse_probe_output(probe_data: &Value) -> ProcessingResult<VideoMetadata> {
    let stream = probe_data["streams"]
        .get(0)
        .ok_or_else(|| ProcessingError::Probe("No video stream found".to_string()))?;
    let format = &probe_data["format"];

    let duration = format["duration"]
        .as_str()
        .or_else(|| stream["duration"].as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| ProcessingError::Probe("Could not parse duration".to_string()))?;

    let width = stream["width"]
        .as_u64()
        .ok_or_else(|| ProcessingError::Probe("Could not parse width".to_string()))?
        as u32;
    let height = stream["height"]
        .as_u64()
        .ok_or_else(|| ProcessingError::Probe("Could not parse height".to_string()))?
        as u32;

    let codec = stream["codec_name"]
        .as_str()
        .unwrap_or("unknown")
        .to_string();

    let bitrate = format["bit_rate"]
        .as_str()
        .or_else(|| stream["bit_rate"].as_str())
        .and_then(|b| b.parse::<u64>().ok());

    let framerate = stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_ratio)
        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_ratio));

    Ok(VideoMetadata {
        duration,
        width,
        height,
        codec,
        bitrate,
        framerate,
        rotation: parse_rotation(stream),
        aspect_ratio: parse_aspect_ratio(stream, width, height),
    })
}
