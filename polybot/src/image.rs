//! Images attached to posts, and shrinking them to fit a network's limits.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::ImageError;

const JPEG_QUALITY: u8 = 90;
const MAX_SHRINK_ATTEMPTS: usize = 12;

/// An encoded image plus the alt text to publish with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub description: Option<String>,
}

impl Image {
    pub fn from_bytes(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            description: None,
        }
    }

    /// Read an image file. The MIME type is guessed from the extension,
    /// then from the file contents.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let format = ImageFormat::from_path(path)
            .or_else(|_| image::guess_format(&data))
            .map_err(ImageError::Decode)?;
        Ok(Self::from_bytes(data, format.to_mime_type()))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Width and height, read from the encoded header without a full decode.
    pub fn dimensions(&self) -> Result<(u32, u32), ImageError> {
        ImageReader::new(Cursor::new(&self.data))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(ImageError::Decode)
    }

    /// Return a copy of this image no larger than `max_size` bytes and, if
    /// given, `max_pixels` pixels. Images already within limits are returned
    /// untouched; others are scaled down and re-encoded (JPEG, or PNG when the
    /// image has an alpha channel).
    pub fn resize_to_target(
        &self,
        max_size: usize,
        max_pixels: Option<u64>,
    ) -> Result<Image, ImageError> {
        let (width, height) = self.dimensions()?;
        let pixels = u64::from(width) * u64::from(height);
        let too_many_pixels = max_pixels.is_some_and(|max| pixels > max);
        if self.data.len() <= max_size && !too_many_pixels {
            return Ok(self.clone());
        }

        let decoded = image::load_from_memory(&self.data).map_err(ImageError::Decode)?;
        let mut scale = match max_pixels {
            Some(max) if too_many_pixels => (max as f64 / pixels as f64).sqrt(),
            _ => 1.0,
        };

        for attempt in 0..MAX_SHRINK_ATTEMPTS {
            let w = ((f64::from(width) * scale).floor() as u32).max(1);
            let h = ((f64::from(height) * scale).floor() as u32).max(1);
            let resized = if (w, h) == (width, height) {
                decoded.clone()
            } else {
                decoded.resize_exact(w, h, FilterType::Lanczos3)
            };
            let (data, mime_type) = encode(&resized)?;
            tracing::debug!(
                attempt,
                width = w,
                height = h,
                size = data.len(),
                max_size,
                "Resized image"
            );
            if data.len() <= max_size {
                return Ok(Image {
                    data,
                    mime_type: mime_type.to_string(),
                    description: self.description.clone(),
                });
            }
            let step = ((max_size as f64 / data.len() as f64).sqrt() * 0.95).min(0.9);
            scale *= step;
        }

        Err(ImageError::CannotShrink { max_size })
    }
}

fn encode(image: &DynamicImage) -> Result<(Vec<u8>, &'static str), ImageError> {
    let mut buf = Vec::new();
    if image.color().has_alpha() {
        image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(ImageError::Encode)?;
        Ok((buf, "image/png"))
    } else {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
            .map_err(ImageError::Encode)?;
        Ok((buf, "image/jpeg"))
    }
}
