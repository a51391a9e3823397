use serde::{Deserialize, Serialize};

/// One labeled object returned by the model.
///
/// Serializes to the wire shape requested from the model:
/// `{"label": "...", "boundingBox": {"x_min": .., "y_min": .., "x_max": .., "y_max": ..}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(rename = "boundingBox")]
    pub bbox: NormalizedBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: NormalizedBox) -> Self {
        Self {
            label: label.into(),
            bbox,
        }
    }
}

/// Bounding box in fractions of the source image (0 = left/top, 1 = right/bottom).
///
/// The model is asked for `min <= max` inside `[0, 1]` but nothing enforces it;
/// values are carried exactly as received.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl NormalizedBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// True when both axes satisfy `min <= max`.
    pub fn is_ordered(&self) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max
    }

    /// True when every coordinate lies inside `[0, 1]`.
    pub fn is_within_unit(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }

    /// Clamp each coordinate to `[0, 1]` and swap inverted edges.
    ///
    /// Non-finite coordinates collapse to 0.
    pub fn sanitized(&self) -> Self {
        let unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let (x0, x1) = (unit(self.x_min), unit(self.x_max));
        let (y0, y1) = (unit(self.y_min), unit(self.y_max));
        Self {
            x_min: x0.min(x1),
            y_min: y0.min(y1),
            x_max: x0.max(x1),
            y_max: y0.max(y1),
        }
    }
}
