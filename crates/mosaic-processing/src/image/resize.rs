use image::imageops::FilterType;

pub struct ImageResize;

impl ImageResize {
    /// Dimensions for scaling to `target_width`, keeping aspect ratio and never upscaling.
    pub fn fit_width(orig_width: u32, orig_height: u32, target_width: u32) -> (u32, u32) {
        if target_width >= orig_width || orig_width == 0 {
            return (orig_width, orig_height);
        }
        let aspect_ratio = orig_height as f64 / orig_width as f64;
        let height = (target_width as f64 * aspect_ratio).round() as u32;
        (target_width, height.max(1))
    }

    /// Cheaper filters for large reductions, Lanczos for small ones.
    pub fn select_filter(
        orig_width: u32,
        orig_height: u32,
        new_width: u32,
        new_height: u32,
    ) -> FilterType {
        let width_ratio = orig_width as f32 / new_width.max(1) as f32;
        let height_ratio = orig_height as f32 / new_height.max(1) as f32;
        let max_ratio = width_ratio.max(height_ratio);

        if max_ratio > 2.0 {
            FilterType::Triangle
        } else if max_ratio > 1.5 {
            FilterType::CatmullRom
        } else {
            FilterType::Lanczos3
        }
    }
}
