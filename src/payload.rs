use crate::error::{PipelineError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes a `data:image/...;base64,<data>` payload into raw image bytes.
///
/// Everything up to the first comma is treated as the MIME prefix. A payload
/// without a comma is taken to be bare base64. ASCII whitespace inside the
/// data is dropped, so line-wrapped base64 decodes.
pub fn decode_data_url(payload: &str) -> Result<Vec<u8>> {
    let data = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };
    let data: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if data.is_empty() {
        return Err(PipelineError::Decode("empty image payload".to_string()));
    }

    STANDARD
        .decode(data)
        .map_err(|e| PipelineError::Decode(format!("bad base64: {e}")))
}
