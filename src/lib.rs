//! Spatial overlay
//!
//! Ask a hosted multimodal model which objects in an image match a prompt,
//! and turn its answer into rectangles on a display surface.
//!
//! # Pipeline
//!
//! 1. [`client::SourceImage`] decodes the user's image.
//! 2. [`analysis::Analyzer`] sends image + prompt to a [`client::ModelClient`]
//!    and tracks the request as `Idle → Pending → Ready | Failed`.
//! 3. [`detect::parse_detections`] pulls the JSON array of detections out of
//!    the model's free-form reply.
//! 4. [`overlay::map_overlay`] projects normalized boxes onto the surface,
//!    accounting for letterbox margins.
//! 5. [`render::render_overlay`] draws the result (optional).
//!
//! # Module Structure
//!
//! - `detect`: `Detection`, `NormalizedBox`, reply parsing
//! - `overlay`: letterbox geometry, `PixelRect`
//! - `client`: model client trait, Gemini and stub clients, source images
//! - `analysis`: request state machine
//! - `render`, `config`, `ui`: CLI support

pub mod analysis;
pub mod client;
pub mod config;
pub mod detect;
mod error;
pub mod overlay;
pub mod render;
pub mod ui;

pub use analysis::{AnalysisHandle, AnalysisResult, Analyzer, PendingRequest};
#[cfg(feature = "gemini")]
pub use client::{GeminiClient, GeminiConfig};
pub use client::{structured_prompt, ModelClient, ModelRequest, SourceImage, StubClient};
pub use config::OverlayConfig;
pub use detect::{parse_detections, Detection, NormalizedBox, ParseError};
pub use error::AnalysisError;
pub use overlay::{
    map_overlay, map_to_pixels, BoxPolicy, GeometryError, Letterbox, OverlayItem, PixelRect, Size,
};
pub use render::{render_overlay, OverlayStyle};
