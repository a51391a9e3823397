//! Hosted model clients.
//!
//! The model is a collaborator behind the [`ModelClient`] trait: it receives
//! the image plus a prompt and answers with free-form text. Parsing that text
//! is the job of [`crate::detect::parse_detections`], not of the client.

use anyhow::Result;

#[cfg(feature = "gemini")]
mod gemini;
mod source;
mod stub;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiClient, GeminiConfig};
pub use source::SourceImage;
pub use stub::StubClient;

/// Instruction appended to every user prompt.
const STRUCTURED_OUTPUT_INSTRUCTION: &str = r#"Provide the response in a valid JSON array format like this:
[
  {
    "label": "object_label",
    "boundingBox": {
      "x_min": 0.1, "y_min": 0.2, "x_max": 0.3, "y_max": 0.4
    }
  }
]
Coordinates are fractions of the image width and height between 0 and 1.
Only output the JSON array. Do not include any other text or code fences."#;

/// Append the structured-output instruction to a user prompt.
pub fn structured_prompt(user_prompt: &str) -> String {
    format!("{}\n\n{}", user_prompt.trim(), STRUCTURED_OUTPUT_INSTRUCTION)
}

/// One composite request: an image and the full prompt text.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub prompt: String,
    pub mime_type: &'static str,
    pub image: Vec<u8>,
}

impl ModelRequest {
    /// Build the request for `user_prompt`, with the structured-output
    /// instruction already appended.
    pub fn new(user_prompt: &str, image: &SourceImage) -> Self {
        Self {
            prompt: structured_prompt(user_prompt),
            mime_type: image.mime_type(),
            image: image.bytes().to_vec(),
        }
    }
}

/// A multimodal model that answers an image + prompt with text.
///
/// Implementations own transport concerns: authentication, timeouts and
/// retries. An `Err` is reported to the user as a client failure.
pub trait ModelClient: Send {
    /// Client identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Send the request and return the reply text. A reply without text is
    /// an empty string, not an error.
    fn generate(&mut self, request: &ModelRequest) -> Result<String>;
}
