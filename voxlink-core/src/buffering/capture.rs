//! Append-only buffer for record-then-send capture.
//!
//! Unlike [`RingBuffer`](super::RingBuffer) this never blocks the producer:
//! the capture callback cannot wait, so a frame that does not fit is dropped
//! whole and counted while recording carries on.

use crate::audio::AudioFormat;

#[derive(Debug)]
pub struct CaptureBuffer {
    data: Vec<u8>,
    capacity: usize,
    dropped_bytes: usize,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            dropped_bytes: 0,
        }
    }

    /// Buffer sized for `max_secs` of audio in `format`.
    pub fn for_duration(format: &AudioFormat, max_secs: u32) -> Self {
        Self::new(format.bytes_per_second() * max_secs as usize)
    }

    /// Append `frame` if it fits entirely. Returns `false` when it was dropped.
    pub fn append(&mut self, frame: &[u8]) -> bool {
        if self.data.len() + frame.len() > self.capacity {
            self.dropped_bytes += frame.len();
            return false;
        }
        self.data.extend_from_slice(frame);
        true
    }

    /// Take the recorded bytes, leaving the buffer empty and the drop counter reset.
    pub fn take(&mut self) -> Vec<u8> {
        self.dropped_bytes = 0;
        std::mem::take(&mut self.data)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.dropped_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes discarded since the last `take`/`clear` because the buffer was full.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleEncoding;

    #[test]
    fn drops_whole_frames_once_full_and_keeps_recording_state() {
        let mut buf = CaptureBuffer::new(10);
        assert!(buf.append(&[1; 4]));
        assert!(buf.append(&[2; 4]));
        // 8 + 4 > 10: the whole frame goes, not a partial tail.
        assert!(!buf.append(&[3; 4]));
        assert!(buf.append(&[4; 2]));
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.dropped_bytes(), 4);

        let recorded = buf.take();
        assert_eq!(recorded, [1, 1, 1, 1, 2, 2, 2, 2, 4, 4]);
        assert!(buf.is_empty());
        assert_eq!(buf.dropped_bytes(), 0);
    }

    #[test]
    fn duration_sizing_follows_format() {
        let format = AudioFormat {
            sample_rate: 8_000,
            channels: 1,
            encoding: SampleEncoding::MuLaw,
        };
        assert_eq!(CaptureBuffer::for_duration(&format, 60).capacity(), 480_000);
        let pcm = AudioFormat::default();
        assert_eq!(CaptureBuffer::for_duration(&pcm, 2).capacity(), 64_000);
    }
}
