// src/services/image_processor.rs
use crate::errors::DiffError;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, GenericImageView, Rgb, RgbImage};
use log::debug;

/// Longest edge sent to the model, in pixels.
pub const MAX_DIMENSION: u32 = 1024;
/// JPEG quality used for every image sent to the model.
pub const JPEG_QUALITY: u8 = 80;
/// Uploads larger than this on either edge are refused before decoding further.
const MAX_SOURCE_DIMENSION: u32 = 16_384;

/// JPEG bytes ready for transmission together with their pixel size.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub const MIME_TYPE: &'static str = "image/jpeg";
}

#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    max_dimension: u32,
    quality: u8,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }

    /// Decodes an upload, refusing empty input and oversized sources.
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, DiffError> {
        if data.is_empty() {
            return Err(DiffError::ImageProcessing("Image is empty".to_string()));
        }
        let img = image::load_from_memory(data)
            .map_err(|e| DiffError::ImageProcessing(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();
        if width > MAX_SOURCE_DIMENSION || height > MAX_SOURCE_DIMENSION {
            return Err(DiffError::ImageProcessing(format!(
                "Image dimensions exceed {0}x{0}",
                MAX_SOURCE_DIMENSION
            )));
        }
        Ok(img)
    }

    /// Downscales so neither edge exceeds the maximum, flattens transparency onto
    /// white and re-encodes as JPEG.
    pub fn normalize(&self, data: &[u8]) -> Result<NormalizedImage, DiffError> {
        let img = self.decode(data)?;

        let (width, height) = img.dimensions();
        let (new_width, new_height) = fit_within(width, height, self.max_dimension);
        let resized = if (new_width, new_height) == (width, height) {
            img
        } else {
            img.resize_exact(
                new_width,
                new_height,
                image::imageops::FilterType::Lanczos3,
            )
        };

        let flattened = flatten_onto_white(&resized);
        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, self.quality)
            .encode(
                flattened.as_raw(),
                flattened.width(),
                flattened.height(),
                ColorType::Rgb8,
            )
            .map_err(|e| DiffError::ImageProcessing(format!("Failed to encode image: {}", e)))?;

        debug!(
            "Normalized image {}x{} -> {}x{} ({} bytes)",
            width,
            height,
            flattened.width(),
            flattened.height(),
            output.len()
        );

        Ok(NormalizedImage {
            data: Bytes::from(output),
            width: flattened.width(),
            height: flattened.height(),
        })
    }

    /// Normalizes the design and implementation images concurrently on the
    /// blocking pool.
    pub async fn normalize_pair(
        &self,
        design: Bytes,
        implementation: Bytes,
    ) -> Result<(NormalizedImage, NormalizedImage), DiffError> {
        let processor = *self;
        let design_task = tokio::task::spawn_blocking(move || processor.normalize(&design));
        let implementation_task =
            tokio::task::spawn_blocking(move || processor.normalize(&implementation));

        let (design, implementation) = tokio::try_join!(design_task, implementation_task)
            .map_err(|e| DiffError::ImageProcessing(format!("Image worker failed: {}", e)))?;
        Ok((design?, implementation?))
    }
}

/// Scales `(width, height)` so that neither edge exceeds `max`, keeping the ratio.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let ratio = max as f64 / width.max(height) as f64;
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, max);
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, max);
    (new_width, new_height)
}

fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
