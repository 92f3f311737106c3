//! WAV container handling.
//!
//! Inbound audio may arrive either as raw PCM or wrapped in a RIFF/WAVE
//! container. [`locate_pcm`] finds the sample payload without trusting the
//! header beyond the `data` chunk size; [`encode_wav`] wraps recorded PCM
//! for upload.

use std::io::Cursor;

use tracing::warn;

use crate::audio::{AudioFormat, SampleEncoding};
use crate::codec::mulaw;
use crate::error::{Result, VoxError};

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// Byte range of the PCM payload inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmRegion {
    pub offset: usize,
    pub len: usize,
}

impl PcmRegion {
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset..self.offset + self.len]
    }
}

/// Locate the PCM payload of `buf`.
///
/// A buffer starting with `RIFF` is scanned chunk by chunk from offset 12;
/// the first `data` chunk wins and its length is clamped to the bytes that
/// are actually present. Anything else is treated as raw PCM.
pub fn locate_pcm(buf: &[u8]) -> PcmRegion {
    let whole = PcmRegion {
        offset: 0,
        len: buf.len(),
    };
    if buf.len() < RIFF_HEADER_LEN || &buf[..4] != b"RIFF" {
        return whole;
    }

    let mut pos = RIFF_HEADER_LEN;
    while pos + CHUNK_HEADER_LEN <= buf.len() {
        let tag = &buf[pos..pos + 4];
        let size = u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]])
            as usize;
        let body = pos + CHUNK_HEADER_LEN;
        if tag == b"data" {
            return PcmRegion {
                offset: body,
                len: size.min(buf.len() - body),
            };
        }
        pos = match body.checked_add(size) {
            Some(next) => next,
            None => break,
        };
    }

    warn!(len = buf.len(), "RIFF buffer without data chunk, playing as raw");
    whole
}

/// PCM bytes of `buf` ready for a device expecting `encoding`.
///
/// 16-bit samples cannot be split, so an odd trailing byte is trimmed.
pub fn extract_pcm(buf: &[u8], encoding: SampleEncoding) -> &[u8] {
    let pcm = locate_pcm(buf).slice(buf);
    match encoding {
        SampleEncoding::Pcm16 if pcm.len() % 2 == 1 => &pcm[..pcm.len() - 1],
        _ => pcm,
    }
}

/// Wrap raw capture bytes in a canonical 16-bit WAV container.
///
/// Mu-law input is expanded to linear PCM16 first.
pub fn encode_wav(pcm: &[u8], format: &AudioFormat) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() * 2 + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_err)?;
        match format.encoding {
            SampleEncoding::Pcm16 => {
                for pair in pcm.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .map_err(wav_err)?;
                }
            }
            SampleEncoding::MuLaw => {
                for &byte in pcm {
                    writer
                        .write_sample(mulaw::mulaw_to_linear(byte))
                        .map_err(wav_err)?;
                }
            }
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}

fn wav_err(e: hound::Error) -> VoxError {
    VoxError::Format(format!("wav: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RIFF header + an optional `LIST` chunk + a `data` chunk.
    fn synth_wav(extra_chunk: usize, declared: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        if extra_chunk > 0 {
            buf.extend_from_slice(b"LIST");
            buf.extend_from_slice(&(extra_chunk as u32).to_le_bytes());
            buf.extend(std::iter::repeat(0xAA).take(extra_chunk));
        }
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&declared.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn finds_data_chunk_after_other_chunks() {
        let payload = [1u8, 2, 3, 4, 5, 6];
        let buf = synth_wav(10, payload.len() as u32, &payload);
        let k = 12 + 8 + 10;
        assert_eq!(
            locate_pcm(&buf),
            PcmRegion {
                offset: k + 8,
                len: 6
            }
        );
        assert_eq!(extract_pcm(&buf, SampleEncoding::Pcm16), &payload);
    }

    #[test]
    fn clamps_declared_size_to_available_bytes() {
        let buf = synth_wav(0, 1_000, &[9, 9, 9, 9]);
        assert_eq!(locate_pcm(&buf), PcmRegion { offset: 20, len: 4 });
    }

    #[test]
    fn raw_buffers_pass_through() {
        let raw = [0x10u8, 0x20, 0x30, 0x40, 0x50];
        assert_eq!(locate_pcm(&raw), PcmRegion { offset: 0, len: 5 });
        // Odd length: trimmed for 16-bit only.
        assert_eq!(extract_pcm(&raw, SampleEncoding::Pcm16), &raw[..4]);
        assert_eq!(extract_pcm(&raw, SampleEncoding::MuLaw), &raw);
    }

    #[test]
    fn riff_without_data_chunk_plays_whole_buffer() {
        let mut buf = synth_wav(4, 0, &[]);
        buf.truncate(12 + 8 + 4);
        assert_eq!(locate_pcm(&buf).offset, 0);
        assert_eq!(locate_pcm(&buf).len, buf.len());
    }

    #[test]
    fn encoded_wav_is_readable_by_hound() {
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let format = AudioFormat::default();

        let wav = encode_wav(&pcm, &format).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, format.sample_rate);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);

        // And our own scanner finds the same payload.
        assert_eq!(extract_pcm(&wav, SampleEncoding::Pcm16), pcm.as_slice());
    }

    #[test]
    fn mulaw_capture_is_expanded_to_pcm16() {
        let format = AudioFormat {
            sample_rate: 8_000,
            channels: 1,
            encoding: SampleEncoding::MuLaw,
        };
        let wav = encode_wav(&[0xFF, 0x00, 0x80], &format).unwrap();
        let reader = hound::WavReader::new(Cursor::new(&wav)).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 16);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![0, -32124, 32124]);
    }
}
