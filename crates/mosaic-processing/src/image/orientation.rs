use image::{imageops, DynamicImage};

/// Rotation and flips that undo an EXIF orientation
pub struct ImageOrientation;

impl ImageOrientation {
    /// (rotate_clockwise_degrees, flip_horizontal, flip_vertical) for an EXIF orientation.
    pub fn transforms(orientation: u32) -> (Option<u16>, bool, bool) {
        match orientation {
            2 => (None, true, false),
            3 => (Some(180), false, false),
            4 => (None, false, true),
            5 => (Some(270), true, false),
            6 => (Some(90), false, false),
            7 => (Some(90), true, false),
            8 => (Some(270), false, false),
            _ => (None, false, false),
        }
    }

    pub fn apply(mut img: DynamicImage, orientation: u32) -> DynamicImage {
        let (rotate, flip_h, flip_v) = Self::transforms(orientation);
        if orientation != 1 {
            tracing::debug!(
                orientation = orientation,
                rotate = ?rotate,
                flip_horizontal = flip_h,
                flip_vertical = flip_v,
                "Applying EXIF orientation"
            );
        }

        img = match rotate {
            Some(90) => DynamicImage::ImageRgba8(imageops::rotate90(&img)),
            Some(180) => DynamicImage::ImageRgba8(imageops::rotate180(&img)),
            Some(270) => DynamicImage::ImageRgba8(imageops::rotate270(&img)),
            _ => img,
        };
        if flip_h {
            img = DynamicImage::ImageRgba8(imageops::flip_horizontal(&img));
        }
        if flip_v {
            img = DynamicImage::ImageRgba8(imageops::flip_vertical(&img));
        }
        img
    }
}
