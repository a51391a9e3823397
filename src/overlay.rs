//! Normalized box → surface pixel mapping.
//!
//! The source image is drawn "fit" into the rendering surface: aspect ratio is
//! preserved, the image is centered, and the leftover space becomes margins on
//! one axis. Boxes are projected into that drawn region.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detect::{Detection, NormalizedBox};

/// Why a projection could not be computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// A source or surface dimension is zero or negative.
    ZeroDimension,
    /// A source or surface dimension is NaN or infinite.
    NonFiniteDimension,
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::ZeroDimension => write!(f, "image or surface has a zero dimension"),
            GeometryError::NonFiniteDimension => {
                write!(f, "image or surface dimension is not finite")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

/// Width and height in pixels. Surfaces may have fractional sizes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn from_pixels(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
        }
    }

    fn check(&self) -> Result<(), GeometryError> {
        if !self.width.is_finite() || !self.height.is_finite() {
            return Err(GeometryError::NonFiniteDimension);
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(GeometryError::ZeroDimension);
        }
        Ok(())
    }

    fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

/// Rectangle in surface pixel units. Width or height is negative when the
/// source box was inverted and [`BoxPolicy::Raw`] is in effect.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A rectangle paired with the label to draw next to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlayItem {
    pub label: String,
    pub rect: PixelRect,
}

/// What to do with boxes outside `[0, 1]` or with `min > max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxPolicy {
    /// Project coordinates as received. Rectangles may extend past the
    /// drawn image or have negative extent.
    #[default]
    Raw,
    /// Clamp coordinates to `[0, 1]` and order edges before projecting.
    Clamp,
}

/// Placement of the source image inside the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub drawn_width: f32,
    pub drawn_height: f32,
    pub x_offset: f32,
    pub y_offset: f32,
}

impl Letterbox {
    /// Fit `source` into `surface`, preserving aspect ratio and centering.
    pub fn fit(source: Size, surface: Size) -> Result<Self, GeometryError> {
        source.check()?;
        surface.check()?;

        let image_aspect = source.aspect();
        let letterbox = if image_aspect > surface.aspect() {
            let drawn_height = surface.width / image_aspect;
            Self {
                drawn_width: surface.width,
                drawn_height,
                x_offset: 0.0,
                y_offset: (surface.height - drawn_height) / 2.0,
            }
        } else {
            let drawn_width = surface.height * image_aspect;
            Self {
                drawn_width,
                drawn_height: surface.height,
                x_offset: (surface.width - drawn_width) / 2.0,
                y_offset: 0.0,
            }
        };
        // Extreme but finite sizes can still overflow the aspect ratio.
        let fields = [
            letterbox.drawn_width,
            letterbox.drawn_height,
            letterbox.x_offset,
            letterbox.y_offset,
        ];
        if !fields.iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NonFiniteDimension);
        }
        Ok(letterbox)
    }

    /// The drawn image region itself.
    pub fn image_rect(&self) -> PixelRect {
        PixelRect {
            x: self.x_offset,
            y: self.y_offset,
            width: self.drawn_width,
            height: self.drawn_height,
        }
    }

    pub fn project(&self, bbox: &NormalizedBox, policy: BoxPolicy) -> PixelRect {
        let b = match policy {
            BoxPolicy::Raw => *bbox,
            BoxPolicy::Clamp => bbox.sanitized(),
        };
        PixelRect {
            x: self.x_offset + b.x_min * self.drawn_width,
            y: self.y_offset + b.y_min * self.drawn_height,
            width: (b.x_max - b.x_min) * self.drawn_width,
            height: (b.y_max - b.y_min) * self.drawn_height,
        }
    }
}

/// Project every detection onto the surface, in detection order.
pub fn map_to_pixels(
    source: Size,
    surface: Size,
    detections: &[Detection],
    policy: BoxPolicy,
) -> Result<Vec<PixelRect>, GeometryError> {
    let letterbox = Letterbox::fit(source, surface)?;
    Ok(detections
        .iter()
        .map(|d| letterbox.project(&d.bbox, policy))
        .collect())
}

/// Like [`map_to_pixels`], keeping each rectangle's label.
pub fn map_overlay(
    source: Size,
    surface: Size,
    detections: &[Detection],
    policy: BoxPolicy,
) -> Result<Vec<OverlayItem>, GeometryError> {
    let letterbox = Letterbox::fit(source, surface)?;
    Ok(detections
        .iter()
        .map(|d| OverlayItem {
            label: d.label.clone(),
            rect: letterbox.project(&d.bbox, policy),
        })
        .collect())
}
