//! Image Transform Adapter

pub mod exif_reader;
pub mod orientation;
pub mod resize;
pub mod transformer;

pub use orientation::ImageOrientation;
pub use resize::ImageResize;
pub use transformer::{DecodedImage, EncodedImage, ImageTransformer, RenditionOutput};
