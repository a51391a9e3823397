mod parse;
mod result;

pub use parse::{extract_json_array, parse_detections, ParseError};
pub use result::{Detection, NormalizedBox};
