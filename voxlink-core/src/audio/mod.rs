//! Audio device abstraction.
//!
//! The pipeline never touches an audio API directly. It talks to an
//! [`AudioDevice`], which owns whatever OS callback threads the backend needs
//! and reports captured audio through a [`CaptureCallback`].
//!
//! Two playback models are supported:
//!
//! - **Pull**: the device invokes a [`PullCallback`] once per output period and
//!   the callback fills the buffer (from a ring buffer, or with silence).
//! - **Blocking**: the caller pushes PCM with [`AudioDevice::write_playback`],
//!   which blocks until the device has room.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms, so `AudioDevice` has no `Send`
//! bound. Create the device on the thread that runs the service loop.

pub mod device;
pub mod format;

#[cfg(feature = "audio-cpal")]
pub mod cpal_device;

pub use format::{AudioFormat, SampleEncoding};

#[cfg(feature = "audio-cpal")]
pub use cpal_device::CpalDevice;

use crate::error::{Result, VoxError};

/// Receives one fixed-size frame of captured bytes per invocation.
/// Runs on the device's capture thread; must not block.
pub type CaptureCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Fills one output period. Runs on the device's playback thread; must not block.
pub type PullCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// How a playback session gets its audio.
pub enum PlaybackSource {
    Pull(PullCallback),
    Blocking,
}

impl PlaybackSource {
    pub fn is_pull(&self) -> bool {
        matches!(self, PlaybackSource::Pull(_))
    }
}

impl std::fmt::Debug for PlaybackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackSource::Pull(_) => f.write_str("Pull(..)"),
            PlaybackSource::Blocking => f.write_str("Blocking"),
        }
    }
}

/// Contract for capture/playback backends.
pub trait AudioDevice {
    /// The format every byte buffer exchanged with this device uses.
    fn format(&self) -> AudioFormat;

    /// Frames per capture callback. Each captured chunk is
    /// `format().frame_bytes(frames_per_buffer())` bytes.
    fn frames_per_buffer(&self) -> usize;

    /// Start delivering captured frames to `on_frame`.
    ///
    /// # Errors
    /// `CaptureActive` if capture is already running.
    fn start_capture(&mut self, on_frame: CaptureCallback) -> Result<()>;

    /// Stop capture. Stopping an idle device is a no-op.
    fn stop_capture(&mut self) -> Result<()>;

    /// Open the output stream.
    fn start_playback(&mut self, source: PlaybackSource) -> Result<()>;

    /// Push PCM into a blocking-model playback stream. Blocks while the
    /// device buffer is full.
    fn write_playback(&mut self, _pcm: &[u8]) -> Result<()> {
        Err(VoxError::AudioStream(
            "device does not support blocking playback writes".into(),
        ))
    }

    /// Close the output stream. Stopping an idle device is a no-op.
    fn stop_playback(&mut self) -> Result<()>;
}

/// Stub when the `audio-cpal` feature is disabled: always fails to open.
#[cfg(not(feature = "audio-cpal"))]
pub struct CpalDevice;

#[cfg(not(feature = "audio-cpal"))]
impl CpalDevice {
    pub fn open(
        _format: AudioFormat,
        _frames_per_buffer: usize,
        _preferred_input: Option<&str>,
        _preferred_output: Option<&str>,
    ) -> Result<Self> {
        Err(VoxError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl AudioDevice for CpalDevice {
    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    fn frames_per_buffer(&self) -> usize {
        0
    }

    fn start_capture(&mut self, _on_frame: CaptureCallback) -> Result<()> {
        Err(VoxError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn stop_capture(&mut self) -> Result<()> {
        Ok(())
    }

    fn start_playback(&mut self, _source: PlaybackSource) -> Result<()> {
        Err(VoxError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn stop_playback(&mut self) -> Result<()> {
        Ok(())
    }
}
