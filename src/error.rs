use std::fmt;

use crate::detect::ParseError;
use crate::overlay::GeometryError;

/// Every way an analysis request can fail.
///
/// The `Display` text is what a `Failed` state carries as its reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnalysisError {
    EmptyPrompt,
    ImageDecode(String),
    Parse(ParseError),
    Geometry(GeometryError),
    /// Network, auth, quota or service failure reported by the model client.
    Client(String),
    /// A request was issued while another one is still pending.
    ConcurrentRequestRejected,
    WorkerPanicked,
    /// The background worker thread could not be started.
    WorkerUnavailable(String),
    /// The request was dropped before it was run.
    Abandoned,
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::EmptyPrompt => write!(f, "prompt must not be empty"),
            AnalysisError::ImageDecode(detail) => write!(f, "failed to decode image: {}", detail),
            AnalysisError::Parse(err) => write!(f, "{}", err),
            AnalysisError::Geometry(err) => write!(f, "{}", err),
            AnalysisError::Client(detail) => write!(f, "model request failed: {}", detail),
            AnalysisError::ConcurrentRequestRejected => {
                write!(f, "an analysis request is already pending")
            }
            AnalysisError::WorkerPanicked => write!(f, "analysis worker panicked"),
            AnalysisError::WorkerUnavailable(detail) => {
                write!(f, "failed to start analysis worker: {}", detail)
            }
            AnalysisError::Abandoned => write!(f, "analysis request was dropped before it ran"),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Parse(err) => Some(err),
            AnalysisError::Geometry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for AnalysisError {
    fn from(err: ParseError) -> Self {
        AnalysisError::Parse(err)
    }
}

impl From<GeometryError> for AnalysisError {
    fn from(err: GeometryError) -> Self {
        AnalysisError::Geometry(err)
    }
}
