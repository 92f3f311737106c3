//! Standard-alphabet base64 with `=` padding.
//!
//! Decoding rejects any character outside `A-Z a-z 0-9 + /` (and trailing
//! `=`). Length and padding defects are recovered best-effort: a dangling
//! sixth-bit character is dropped and the rest decodes with indifferent
//! padding, logged at `warn`.

use base64::{
    alphabet,
    engine::{
        general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64},
        DecodePaddingMode,
    },
    Engine as _,
};
use tracing::warn;

use crate::error::{Result, VoxError};

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encode `data`; output length is always `4 * ceil(len / 3)`.
pub fn encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode base64 text. Surrounding ASCII whitespace is ignored.
///
/// # Errors
/// `VoxError::Format` if a non-alphabet character appears.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let trimmed = input.trim();
    let body = trimmed.trim_end_matches('=');

    if let Some((pos, ch)) = body
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '+' || *c == '/'))
    {
        return Err(VoxError::Format(format!(
            "invalid base64 character {ch:?} at offset {pos}"
        )));
    }

    if let Ok(bytes) = BASE64.decode(trimmed) {
        return Ok(bytes);
    }

    // One leftover character carries fewer than eight bits; drop it.
    let usable = if body.len() % 4 == 1 {
        body.len() - 1
    } else {
        body.len()
    };
    warn!(
        len = trimmed.len(),
        dropped = body.len() - usable,
        "malformed base64 padding, decoding leniently"
    );
    LENIENT
        .decode(&body[..usable])
        .map_err(|e| VoxError::Format(format!("base64: {e}")))
}
