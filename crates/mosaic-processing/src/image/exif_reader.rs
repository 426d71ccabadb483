//! EXIF camera fields via `kamadak-exif`.

use crate::error::{ProcessingError, ProcessingResult};
use crate::metadata::CameraMetadata;
use exif::{Exif, Field, In, Reader, Tag, Value};
use std::io::Cursor;

fn read_exif(data: &[u8]) -> ProcessingResult<Exif> {
    Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .map_err(|e| ProcessingError::Exif(e.to_string()))
}

fn ascii(field: &Field) -> Option<String> {
    match field.value {
        Value::Ascii(ref parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational(field: &Field, index: usize) -> Option<f64> {
    match field.value {
        Value::Rational(ref values) => values.get(index).map(|r| r.to_f64()),
        _ => None,
    }
}

fn exposure(field: &Field) -> Option<String> {
    match field.value {
        Value::Rational(ref values) => values.first().map(|r| {
            if r.num == 1 || r.num == 0 {
                format!("{}/{}", r.num, r.denom)
            } else {
                format!("{:.4}", r.to_f64())
            }
        }),
        _ => None,
    }
}

/// Degrees/minutes/seconds plus hemisphere reference to signed decimal degrees.
fn gps_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let degrees = rational(field, 0)?;
    let minutes = rational(field, 1).unwrap_or(0.0);
    let seconds = rational(field, 2).unwrap_or(0.0);
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    let hemisphere = exif.get_field(ref_tag, In::PRIMARY).and_then(ascii);
    if matches!(hemisphere.as_deref(), Some("S") | Some("W")) {
        decimal = -decimal;
    }
    Some(decimal)
}

/// Read camera fields from EXIF.
///
/// Errors when the container has no EXIF block or it cannot be parsed; the
/// caller decides whether to fall back to a generic probe.
pub fn read_camera_metadata(data: &[u8]) -> ProcessingResult<CameraMetadata> {
    let exif = read_exif(data)?;
    let get = |tag: Tag| exif.get_field(tag, In::PRIMARY);

    Ok(CameraMetadata {
        make: get(Tag::Make).and_then(ascii),
        model: get(Tag::Model).and_then(ascii),
        lens_model: get(Tag::LensModel).and_then(ascii),
        exposure_time: get(Tag::ExposureTime).and_then(exposure),
        f_number: get(Tag::FNumber).and_then(|f| rational(f, 0)),
        iso: get(Tag::PhotographicSensitivity).and_then(|f| f.value.get_uint(0)),
        focal_length_mm: get(Tag::FocalLength).and_then(|f| rational(f, 0)),
        taken_at: get(Tag::DateTimeOriginal)
            .or_else(|| get(Tag::DateTime))
            .and_then(ascii),
        orientation: get(Tag::Orientation).and_then(|f| f.value.get_uint(0)),
        gps_latitude: gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
        gps_longitude: gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
    })
}

/// EXIF orientation (1-8), or 1 when absent.
pub fn read_orientation(data: &[u8]) -> u32 {
    read_exif(data)
        .ok()
        .and_then(|exif| {
            exif.get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|f| f.value.get_uint(0))
        })
        .filter(|o| (1..=8).contains(o))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn png_without_exif() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, Rgb([0, 128, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_missing_exif_is_an_error() {
        assert!(read_camera_metadata(&png_without_exif()).is_err());
    }

    #[test]
    fn test_missing_orientation_defaults_to_normal() {
        assert_eq!(read_orientation(&png_without_exif()), 1);
        assert_eq!(read_orientation(b"garbage"), 1);
    }
}
