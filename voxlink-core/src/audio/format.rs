//! Fixed-per-configuration sample format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// Signed 16-bit little-endian linear PCM.
    Pcm16,
    /// 8-bit G.711 mu-law.
    MuLaw,
}

impl SampleEncoding {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleEncoding::Pcm16 => 2,
            SampleEncoding::MuLaw => 1,
        }
    }

    /// Byte value that decodes to zero amplitude.
    pub fn silence_byte(self) -> u8 {
        match self {
            SampleEncoding::Pcm16 => 0x00,
            SampleEncoding::MuLaw => 0xFF,
        }
    }
}

/// Sample rate, channel count and encoding shared by capture and playback.
///
/// Chunks never carry their own format; every byte buffer in the pipeline is
/// interpreted against the one `AudioFormat` the client was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            encoding: SampleEncoding::Pcm16,
        }
    }
}

impl AudioFormat {
    pub fn bytes_per_sample(&self) -> usize {
        self.encoding.bytes_per_sample()
    }

    /// Bytes in one interleaved frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Bytes in a device buffer of `frames` frames.
    pub fn frame_bytes(&self, frames: usize) -> usize {
        self.bytes_per_frame() * frames
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    pub fn silence_byte(&self) -> u8 {
        self.encoding.silence_byte()
    }
}
