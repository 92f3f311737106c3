//! `AudioDevice` backed by cpal.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They must not
//! block on a mutex or condvar or perform I/O. Capture therefore re-frames
//! device buffers through an SPSC `ringbuf` owned entirely by the callback,
//! and blocking-model playback hands bytes to the output callback through a
//! `ringbuf` producer/consumer pair.
//!
//! Device buffers rarely match the configured `frames_per_buffer`, so the
//! capture side accumulates bytes and emits exactly one fixed-size frame per
//! `on_frame` call.

use std::thread;
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::{debug, error, info, warn};

use super::{AudioDevice, AudioFormat, CaptureCallback, PlaybackSource, PullCallback, SampleEncoding};
use crate::codec::mulaw;
use crate::error::{Result, VoxError};

/// Capture framer depth, in frames.
const FRAMER_DEPTH: usize = 8;
/// Blocking-playback ring depth, in frames.
const PLAYBACK_DEPTH: usize = 16;
const WRITE_POLL: Duration = Duration::from_millis(2);
/// `write_playback` gives up when the output stream consumes nothing for this long.
const WRITE_STALL: Duration = Duration::from_secs(2);

/// cpal-backed capture + playback device.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct CpalDevice {
    format: AudioFormat,
    frames_per_buffer: usize,
    input: Device,
    output: Device,
    capture: Option<Stream>,
    playback: Option<Stream>,
    playback_tx: Option<HeapProd<u8>>,
}

impl CpalDevice {
    /// Resolve input and output devices by preferred name, falling back to the
    /// host defaults and then to the first device available.
    pub fn open(
        format: AudioFormat,
        frames_per_buffer: usize,
        preferred_input: Option<&str>,
        preferred_output: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let input = match find_named(host.input_devices().ok(), preferred_input) {
            Some(d) => d,
            None => match host.default_input_device() {
                Some(d) => d,
                None => host
                    .input_devices()
                    .map_err(|e| VoxError::AudioDevice(e.to_string()))?
                    .next()
                    .ok_or(VoxError::NoDefaultInputDevice)?,
            },
        };
        let output = match find_named(host.output_devices().ok(), preferred_output) {
            Some(d) => d,
            None => match host.default_output_device() {
                Some(d) => d,
                None => host
                    .output_devices()
                    .map_err(|e| VoxError::AudioDevice(e.to_string()))?
                    .next()
                    .ok_or(VoxError::NoDefaultOutputDevice)?,
            },
        };

        info!(
            input = input.name().unwrap_or_default().as_str(),
            output = output.name().unwrap_or_default().as_str(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "audio devices selected"
        );

        Ok(Self {
            format,
            frames_per_buffer: frames_per_buffer.max(1),
            input,
            output,
            capture: None,
            playback: None,
            playback_tx: None,
        })
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.format.channels,
            sample_rate: SampleRate(self.format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

fn find_named<I>(devices: Option<I>, wanted: Option<&str>) -> Option<Device>
where
    I: Iterator<Item = Device>,
{
    let wanted = wanted?;
    let found = devices?.find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
    if found.is_none() {
        warn!("preferred audio device '{}' not found, falling back", wanted);
    }
    found
}

impl AudioDevice for CpalDevice {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    fn start_capture(&mut self, on_frame: CaptureCallback) -> Result<()> {
        if self.capture.is_some() {
            return Err(VoxError::CaptureActive);
        }

        let native = self
            .input
            .default_input_config()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?
            .sample_format();
        let config = self.stream_config();
        let mut framer = Framer::new(
            self.format.frame_bytes(self.frames_per_buffer),
            self.format.encoding,
            on_frame,
        );

        let stream = match native {
            SampleFormat::I16 => self.input.build_input_stream(
                &config,
                move |data: &[i16], _| framer.push(data.iter().copied()),
                |err| error!("capture stream error: {err}"),
                None,
            ),
            SampleFormat::F32 => self.input.build_input_stream(
                &config,
                move |data: &[f32], _| framer.push(data.iter().map(|s| f32_to_i16(*s))),
                |err| error!("capture stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(VoxError::AudioStream(format!(
                    "unsupported capture sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VoxError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoxError::AudioStream(e.to_string()))?;
        self.capture = Some(stream);
        info!("capture started");
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        if let Some(stream) = self.capture.take() {
            // Pause first so the callback stops before the stream is torn down.
            if let Err(e) = stream.pause() {
                debug!(error = %e, "capture pause failed");
            }
            info!("capture stopped");
        }
        Ok(())
    }

    fn start_playback(&mut self, source: PlaybackSource) -> Result<()> {
        self.stop_playback()?;

        let native = self
            .output
            .default_output_config()
            .map_err(|e| VoxError::AudioDevice(e.to_string()))?
            .sample_format();
        let config = self.stream_config();

        let feed = match source {
            PlaybackSource::Pull(cb) => Feed::Pull(cb),
            PlaybackSource::Blocking => {
                let cap = self.format.frame_bytes(self.frames_per_buffer) * PLAYBACK_DEPTH;
                let (tx, rx) = HeapRb::<u8>::new(cap).split();
                self.playback_tx = Some(tx);
                Feed::Ring(rx)
            }
        };
        let mut player = Player::new(feed, self.format);

        let stream = match native {
            SampleFormat::I16 => self.output.build_output_stream(
                &config,
                move |data: &mut [i16], _| player.fill(data, |s| s),
                |err| error!("playback stream error: {err}"),
                None,
            ),
            SampleFormat::F32 => self.output.build_output_stream(
                &config,
                move |data: &mut [f32], _| player.fill(data, |s| s as f32 / 32768.0),
                |err| error!("playback stream error: {err}"),
                None,
            ),
            fmt => {
                self.playback_tx = None;
                return Err(VoxError::AudioStream(format!(
                    "unsupported playback sample format: {fmt:?}"
                )));
            }
        }
        .map_err(|e| VoxError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoxError::AudioStream(e.to_string()))?;
        self.playback = Some(stream);
        info!("playback started");
        Ok(())
    }

    fn write_playback(&mut self, pcm: &[u8]) -> Result<()> {
        let tx = self.playback_tx.as_mut().ok_or_else(|| {
            VoxError::AudioStream("no blocking playback stream is open".into())
        })?;

        let mut rest = pcm;
        let mut last_progress = Instant::now();
        while !rest.is_empty() {
            let n = tx.push_slice(rest);
            if n > 0 {
                rest = &rest[n..];
                last_progress = Instant::now();
                continue;
            }
            if last_progress.elapsed() >= WRITE_STALL {
                return Err(VoxError::AudioStream(
                    "playback stream stopped consuming audio".into(),
                ));
            }
            thread::sleep(WRITE_POLL);
        }
        Ok(())
    }

    fn stop_playback(&mut self) -> Result<()> {
        self.playback_tx = None;
        if let Some(stream) = self.playback.take() {
            if let Err(e) = stream.pause() {
                debug!(error = %e, "playback pause failed");
            }
            info!("playback stopped");
        }
        Ok(())
    }
}

// ── Capture framing ──────────────────────────────────────────────────────────

struct Framer {
    tx: HeapProd<u8>,
    rx: HeapCons<u8>,
    frame: Vec<u8>,
    scratch: Vec<u8>,
    encoding: SampleEncoding,
    on_frame: CaptureCallback,
}

impl Framer {
    fn new(frame_bytes: usize, encoding: SampleEncoding, on_frame: CaptureCallback) -> Self {
        let (tx, rx) = HeapRb::<u8>::new(frame_bytes * FRAMER_DEPTH).split();
        Self {
            tx,
            rx,
            frame: vec![0u8; frame_bytes],
            scratch: Vec::with_capacity(frame_bytes * 2),
            encoding,
            on_frame,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = i16>) {
        self.scratch.clear();
        match self.encoding {
            SampleEncoding::Pcm16 => {
                for s in samples {
                    self.scratch.extend_from_slice(&s.to_le_bytes());
                }
            }
            SampleEncoding::MuLaw => self.scratch.extend(samples.map(mulaw::linear_to_mulaw)),
        }

        let scratch = std::mem::take(&mut self.scratch);
        let mut pending = scratch.as_slice();
        while !pending.is_empty() {
            let n = self.tx.push_slice(pending);
            pending = &pending[n..];
            self.emit_ready();
            if n == 0 && self.tx.vacant_len() == 0 {
                warn!(bytes = pending.len(), "capture framer full, dropping samples");
                break;
            }
        }
        self.scratch = scratch;
    }

    fn emit_ready(&mut self) {
        let frame_bytes = self.frame.len();
        while self.rx.occupied_len() >= frame_bytes {
            self.rx.pop_slice(&mut self.frame);
            (self.on_frame)(&self.frame);
        }
    }
}

// ── Playback feed ────────────────────────────────────────────────────────────

enum Feed {
    Pull(PullCallback),
    Ring(HeapCons<u8>),
}

struct Player {
    feed: Feed,
    bytes: Vec<u8>,
    format: AudioFormat,
}

impl Player {
    fn new(feed: Feed, format: AudioFormat) -> Self {
        Self {
            feed,
            bytes: Vec::new(),
            format,
        }
    }

    fn fill<T>(&mut self, out: &mut [T], convert: impl Fn(i16) -> T) {
        let bps = self.format.bytes_per_sample();
        let silence = self.format.silence_byte();
        self.bytes.resize(out.len() * bps, silence);

        match &mut self.feed {
            Feed::Pull(cb) => cb(&mut self.bytes),
            Feed::Ring(rx) => {
                // Only whole frames leave the ring so sample alignment survives underflow.
                let frame = self.format.bytes_per_frame();
                let take = rx.occupied_len().min(self.bytes.len()) / frame * frame;
                let got = rx.pop_slice(&mut self.bytes[..take]);
                self.bytes[got..].fill(silence);
            }
        }

        match self.format.encoding {
            SampleEncoding::Pcm16 => {
                for (dst, pair) in out.iter_mut().zip(self.bytes.chunks_exact(2)) {
                    *dst = convert(i16::from_le_bytes([pair[0], pair[1]]));
                }
            }
            SampleEncoding::MuLaw => {
                for (dst, &code) in out.iter_mut().zip(self.bytes.iter()) {
                    *dst = convert(mulaw::mulaw_to_linear(code));
                }
            }
        }
    }
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
