use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::error::AnalysisError;
use crate::overlay::Size;

/// A user-selected image: the encoded bytes sent to the model plus the
/// decoded bitmap used for geometry and rendering.
#[derive(Clone, Debug)]
pub struct SourceImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    decoded: DynamicImage,
}

impl SourceImage {
    /// Decode raw bytes. The format is sniffed from the content.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, AnalysisError> {
        let format = image::guess_format(&bytes)
            .map_err(|e| AnalysisError::ImageDecode(e.to_string()))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| AnalysisError::ImageDecode(e.to_string()))?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(AnalysisError::ImageDecode(format!(
                "image has zero size ({}x{})",
                width, height
            )));
        }
        Ok(Self {
            bytes,
            format,
            decoded,
        })
    }

    pub fn open(path: &Path) -> Result<Self, AnalysisError> {
        let bytes = std::fs::read(path).map_err(|e| {
            AnalysisError::ImageDecode(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::decode(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn width(&self) -> u32 {
        self.decoded.width()
    }

    pub fn height(&self) -> u32 {
        self.decoded.height()
    }

    pub fn size(&self) -> Size {
        Size::from_pixels(self.width(), self.height())
    }

    pub fn decoded(&self) -> &DynamicImage {
        &self.decoded
    }
}
