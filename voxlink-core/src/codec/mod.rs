//! Stateless byte transforms applied to audio before and after transport.
//!
//! | Module | Direction | Purpose |
//! |--------|-----------|---------|
//! | [`base64`] | both | text-safe payload encoding, Basic auth |
//! | [`wav`] | both | locate PCM inside RIFF, wrap recordings for upload |
//! | [`chunked`] | out | HTTP/1.1 chunked body framing |
//! | [`mulaw`] | both | G.711 companding for 8-bit telephony formats |

pub mod base64;
pub mod chunked;
pub mod mulaw;
pub mod wav;

pub use chunked::{encode_chunk, TERMINAL_CHUNK};
pub use wav::{encode_wav, extract_pcm, locate_pcm, PcmRegion};
