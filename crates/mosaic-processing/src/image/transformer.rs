use super::exif_reader;
use super::orientation::ImageOrientation;
use super::resize::ImageResize;
use crate::error::{ProcessingError, ProcessingResult};
use crate::metadata::ImageMetadata;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use mosaic_core::MediaConfig;
use std::io::Cursor;

/// Pixels decoded once and shared by every derived artifact.
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
}

impl DecodedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// An encoded artifact ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
    pub extension: &'static str,
}

#[derive(Debug, Clone)]
pub struct RenditionOutput {
    /// Rung of the ladder this output was produced for.
    pub ladder_width: u32,
    pub image: EncodedImage,
}

/// Thumbnailing, optimization, rendition ladder and metadata for images.
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    thumbnail_size: u32,
    optimize_max_width: u32,
    quality: u8,
    rendition_widths: Vec<u32>,
}

impl ImageTransformer {
    pub fn new(config: &MediaConfig) -> Self {
        let mut rendition_widths = config.rendition_widths.clone();
        rendition_widths.sort_unstable();
        rendition_widths.dedup();
        Self {
            thumbnail_size: config.thumbnail_size,
            optimize_max_width: config.optimize_max_width,
            quality: config.optimize_quality,
            rendition_widths,
        }
    }

    pub fn rendition_widths(&self) -> &[u32] {
        &self.rendition_widths
    }

    /// Decode and apply EXIF orientation so derived artifacts display upright.
    pub fn decode(&self, data: &[u8]) -> ProcessingResult<DecodedImage> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;
        let format = reader.format();
        let image = reader
            .decode()
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;

        let orientation = exif_reader::read_orientation(data);
        Ok(DecodedImage {
            image: ImageOrientation::apply(image, orientation),
            format,
        })
    }

    /// Fit inside a `thumbnail_size` square.
    pub fn thumbnail(&self, decoded: &DecodedImage) -> ProcessingResult<EncodedImage> {
        let (w, h) = decoded.dimensions();
        let size = self.thumbnail_size;
        let filter = ImageResize::select_filter(w, h, size.min(w), size.min(h));
        let thumb = if w > size || h > size {
            decoded.image.resize(size, size, filter)
        } else {
            decoded.image.clone()
        };
        self.encode_jpeg(&thumb)
    }

    /// Re-encode at the configured quality, capped at `optimize_max_width`.
    pub fn optimize(&self, decoded: &DecodedImage) -> ProcessingResult<EncodedImage> {
        let (w, h) = decoded.dimensions();
        let (nw, nh) = ImageResize::fit_width(w, h, self.optimize_max_width);
        if (nw, nh) == (w, h) {
            return self.encode_jpeg(&decoded.image);
        }
        let filter = ImageResize::select_filter(w, h, nw, nh);
        self.encode_jpeg(&decoded.image.resize_exact(nw, nh, filter))
    }

    /// One output per ladder width; rungs wider than the source reuse its width.
    pub fn renditions(&self, decoded: &DecodedImage) -> ProcessingResult<Vec<RenditionOutput>> {
        let (w, h) = decoded.dimensions();
        self.rendition_widths
            .iter()
            .map(|&ladder_width| {
                let (nw, nh) = ImageResize::fit_width(w, h, ladder_width);
                let resized = if (nw, nh) == (w, h) {
                    decoded.image.clone()
                } else {
                    let filter = ImageResize::select_filter(w, h, nw, nh);
                    decoded.image.resize_exact(nw, nh, filter)
                };
                Ok(RenditionOutput {
                    ladder_width,
                    image: self.encode_jpeg(&resized)?,
                })
            })
            .collect()
    }

    /// Camera fields from EXIF when available, otherwise a generic probe.
    ///
    /// Fails only when the data is not a readable image at all.
    pub fn extract_metadata(&self, data: &[u8]) -> ProcessingResult<ImageMetadata> {
        let mut metadata = Self::generic_metadata(data)?;
        match exif_reader::read_camera_metadata(data) {
            Ok(camera) if !camera.is_empty() => metadata.camera = Some(camera),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "EXIF unavailable, using generic image metadata");
            }
        }
        Ok(metadata)
    }

    /// Header-only probe: format, dimensions and color type without decoding pixels.
    pub fn generic_metadata(data: &[u8]) -> ProcessingResult<ImageMetadata> {
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;
        let format = reader
            .format()
            .map(|f| format!("{:?}", f).to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        let decoder = reader
            .into_decoder()
            .map_err(|e| ProcessingError::Decode(e.to_string()))?;
        let (width, height) = decoder.dimensions();
        let color_type = format!("{:?}", decoder.color_type());

        Ok(ImageMetadata {
            width,
            height,
            format,
            color_type,
            size_bytes: data.len() as u64,
            camera: None,
        })
    }

    fn encode_jpeg(&self, image: &DynamicImage) -> ProcessingResult<EncodedImage> {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut data = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut data, self.quality))
            .map_err(|e| ProcessingError::Encode(e.to_string()))?;
        Ok(EncodedImage {
            data,
            width: rgb.width(),
            height: rgb.height(),
            content_type: "image/jpeg",
            extension: "jpg",
        })
    }
}
