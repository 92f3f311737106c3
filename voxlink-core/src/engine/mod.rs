//! `VoiceClient`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceClient::new()
//!     └─► start(open) / run(...)  → transport connected, status = Connected
//!         ├─► start_capture(mode) → status = Capturing
//!         ├─► stop_capture()      → Recording returned, status = Connected
//!         └─► disconnect() / peer closes → loop exits, status = Closed
//! ```
//!
//! ## Threading
//!
//! The service loop owns the transport and the audio device. `cpal::Stream`
//! is `!Send`, so [`VoiceClient::start`] takes a factory that builds both
//! *inside* the `spawn_blocking` closure; a sync oneshot reports connect
//! success or failure back to the caller.
//!
//! Every other method is callable from any thread. Text and relay audio reach
//! the loop through the shared [`OutboundQueue`]; capture and playback control
//! travels over a command channel and is answered on a per-call reply channel.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::{AudioDevice, AudioFormat},
    buffering::CaptureBuffer,
    codec,
    dispatch::{OutboundQueue, DEFAULT_QUEUE_CAPACITY},
    error::{Result, VoxError},
    ipc::events::{
        ActivityEvent, ClientStatus, ClientStatusEvent, ServerMessageEvent, UploadEvent,
    },
    transport::{AuthHeader, Transport},
    upload::{Connector, StreamingUploadSession, UploadConfig},
};

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// How long a control call waits for the service loop to answer.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery model for inbound audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Network bytes go into a ring buffer drained by the device's pull callback.
    Pull,
    /// Network bytes are written straight to the device, blocking while it is full.
    Blocking,
}

/// Configuration for `VoiceClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Sample format for capture and playback. Default: 16 kHz mono PCM16.
    pub format: AudioFormat,
    /// Frames per capture callback. Default: 512.
    pub frames_per_buffer: usize,
    /// Outbound queue depth. Default: 10.
    pub queue_capacity: usize,
    /// Playback ring size in bytes (pull mode). Default: 1 MiB.
    pub playback_buffer_bytes: usize,
    pub playback_mode: PlaybackMode,
    /// Longest the service loop waits for ring space before dropping audio.
    /// Default: 250 ms.
    pub playback_put_timeout: Duration,
    /// Cap on record-then-send capture length. Default: 60 s.
    pub max_recording_secs: u32,
    /// Upper bound on one `Transport::service` poll. Default: 50 ms.
    pub service_timeout: Duration,
    /// Captured frames buffered for the uploader thread. Default: 50.
    pub upload_chunk_queue: usize,
    pub upload: UploadConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            frames_per_buffer: 512,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            playback_buffer_bytes: 1 << 20,
            playback_mode: PlaybackMode::Pull,
            playback_put_timeout: Duration::from_millis(250),
            max_recording_secs: 60,
            service_timeout: Duration::from_millis(50),
            upload_chunk_queue: 50,
            upload: UploadConfig::default(),
        }
    }
}

/// What captured audio is used for.
#[derive(Clone, PartialEq, Eq)]
pub enum CaptureMode {
    /// Buffer locally; the caller sends the recording when capture stops.
    Record,
    /// Stream each frame to the server over a chunked HTTP upload, and buffer locally.
    Stream { token: String },
    /// Send each frame as a binary message on the connection.
    Relay,
}

impl std::fmt::Debug for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Record => f.write_str("Record"),
            CaptureMode::Stream { .. } => f.write_str("Stream"),
            CaptureMode::Relay => f.write_str("Relay"),
        }
    }
}

/// Audio captured between `start_capture` and `stop_capture`.
#[derive(Debug, Clone)]
pub struct Recording {
    pub pcm: Vec<u8>,
    pub format: AudioFormat,
    /// Bytes discarded because the capture buffer was full.
    pub dropped_bytes: usize,
}

impl Recording {
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.pcm.len() as f64 / self.format.bytes_per_second().max(1) as f64
    }

    /// The recording wrapped in a 16-bit WAV container.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        codec::encode_wav(&self.pcm, &self.format)
    }
}

pub(crate) enum ClientCommand {
    StartCapture {
        mode: CaptureMode,
        reply: Sender<Result<()>>,
    },
    StopCapture {
        reply: Sender<Result<Recording>>,
    },
    PlayClip {
        audio: Vec<u8>,
    },
    StopPlayback,
    Disconnect,
}

/// The top-level client handle.
///
/// `VoiceClient` is `Send + Sync`; wrap it in an `Arc` to share it between
/// the console thread, event printers and the service loop.
pub struct VoiceClient {
    config: ClientConfig,
    queue: Arc<OutboundQueue>,
    /// Set by producers when the loop should ask the transport for a writable event.
    write_wanted: Arc<AtomicBool>,
    capture: Arc<Mutex<CaptureBuffer>>,
    /// `true` while the service loop is running.
    running: Arc<AtomicBool>,
    status: Arc<Mutex<ClientStatus>>,
    message_tx: broadcast::Sender<ServerMessageEvent>,
    status_tx: broadcast::Sender<ClientStatusEvent>,
    upload_tx: broadcast::Sender<UploadEvent>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
    cmd_tx: Sender<ClientCommand>,
    cmd_rx: Receiver<ClientCommand>,
}

impl VoiceClient {
    pub fn new(config: ClientConfig) -> Self {
        let (message_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (upload_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let capture = CaptureBuffer::for_duration(&config.format, config.max_recording_secs);

        Self {
            queue: Arc::new(OutboundQueue::new(config.queue_capacity)),
            write_wanted: Arc::new(AtomicBool::new(false)),
            capture: Arc::new(Mutex::new(capture)),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(ClientStatus::Idle)),
            message_tx,
            status_tx,
            upload_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
            cmd_tx,
            cmd_rx,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and run the service loop on the calling thread until the
    /// connection closes or [`disconnect`](Self::disconnect) is called.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a loop is already active.
    /// - Any error from `transport.connect`.
    pub fn run<T, D, C>(
        &self,
        mut transport: T,
        mut device: D,
        uploads: StreamingUploadSession<C>,
        auth: &AuthHeader,
    ) -> Result<()>
    where
        T: Transport,
        D: AudioDevice,
        C: Connector,
    {
        self.begin()?;
        if let Err(e) = transport.connect(auth) {
            self.fail(&e);
            return Err(e);
        }
        self.serve(&mut transport, &mut device, uploads);
        Ok(())
    }

    /// Build transport and device with `open` on a blocking worker, connect,
    /// and run the service loop there.
    ///
    /// Blocks until the connection is confirmed (or fails), then returns.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn start<T, D, C, F>(
        self: &Arc<Self>,
        open: F,
        uploads: StreamingUploadSession<C>,
        auth: AuthHeader,
    ) -> Result<()>
    where
        T: Transport + 'static,
        D: AudioDevice + 'static,
        C: Connector,
        F: FnOnce() -> Result<(T, D)> + Send + 'static,
    {
        self.begin()?;

        let client = Arc::clone(self);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            // ── Open device + transport (must happen on THIS thread: cpal::Stream is !Send) ──
            let (mut transport, mut device) = match open() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = transport.connect(&auth) {
                let _ = open_tx.send(Err(e));
                return;
            }
            let _ = open_tx.send(Ok(()));

            client.serve(&mut transport, &mut device, uploads);
            // Device and transport drop here, on the thread that created them.
        });

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!("client started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.fail(&e);
                Err(e)
            }
            Err(_) => {
                let e = VoxError::Other(anyhow::anyhow!("service task died unexpectedly"));
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Queue a text message for the server. Never blocks.
    ///
    /// # Errors
    /// `QueueFull` or `QueueClosed` from the outbound queue.
    pub fn send_text(&self, text: &str) -> Result<()> {
        let result = self.queue.enqueue_text(text);
        self.note_enqueue(&result);
        result
    }

    /// Queue a binary message for the server. Never blocks. Large buffers
    /// are handed to the transport without another copy.
    pub fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        let result = self.queue.enqueue_binary_owned(data);
        self.note_enqueue(&result);
        result
    }

    pub fn start_capture(&self, mode: CaptureMode) -> Result<()> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.command(ClientCommand::StartCapture { mode, reply })?;
        self.await_reply(rx)
    }

    pub fn stop_capture(&self) -> Result<Recording> {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.command(ClientCommand::StopCapture { reply })?;
        self.await_reply(rx)
    }

    /// Play a local clip (raw PCM or WAV) through the playback path.
    pub fn play_clip(&self, audio: Vec<u8>) -> Result<()> {
        self.command(ClientCommand::PlayClip { audio })
    }

    /// Close the playback session; buffered audio is discarded.
    pub fn stop_playback(&self) -> Result<()> {
        self.command(ClientCommand::StopPlayback)
    }

    /// Ask the service loop to close the connection and exit.
    pub fn disconnect(&self) -> Result<()> {
        self.command(ClientCommand::Disconnect)
    }

    /// Stop the loop and permanently close the outbound queue.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current client status (snapshot).
    pub fn status(&self) -> ClientStatus {
        *self.status.lock()
    }

    /// Messages waiting for a writable slot.
    pub fn pending_messages(&self) -> usize {
        self.queue.len()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ServerMessageEvent> {
        self.message_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ClientStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_uploads(&self) -> broadcast::Receiver<UploadEvent> {
        self.upload_tx.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn begin(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VoxError::AlreadyRunning);
        }
        // Drop control requests left over from a previous connection.
        while self.cmd_rx.try_recv().is_ok() {}
        self.diagnostics.reset();
        self.set_status(ClientStatus::Connecting, None);
        Ok(())
    }

    fn fail(&self, e: &VoxError) {
        self.running.store(false, Ordering::SeqCst);
        self.set_status(ClientStatus::Error, Some(e.to_string()));
    }

    fn serve<T, D, C>(&self, transport: &mut T, device: &mut D, uploads: StreamingUploadSession<C>)
    where
        T: Transport,
        D: AudioDevice,
        C: Connector,
    {
        pipeline::run(
            pipeline::PipelineContext {
                config: self.config.clone(),
                queue: Arc::clone(&self.queue),
                write_wanted: Arc::clone(&self.write_wanted),
                capture: Arc::clone(&self.capture),
                running: Arc::clone(&self.running),
                commands: self.cmd_rx.clone(),
                message_tx: self.message_tx.clone(),
                status_tx: self.status_tx.clone(),
                upload_tx: self.upload_tx.clone(),
                activity_tx: self.activity_tx.clone(),
                status: Arc::clone(&self.status),
                seq: Arc::clone(&self.seq),
                diagnostics: Arc::clone(&self.diagnostics),
            },
            transport,
            device,
            uploads,
        );
        self.running.store(false, Ordering::SeqCst);
        self.set_status(ClientStatus::Closed, None);
        info!("client stopped");
    }

    fn note_enqueue(&self, result: &Result<()>) {
        match result {
            Ok(()) => {
                self.diagnostics
                    .messages_enqueued
                    .fetch_add(1, Ordering::Relaxed);
                self.write_wanted.store(true, Ordering::Release);
            }
            Err(_) => {
                self.diagnostics
                    .queue_rejections
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn command(&self, cmd: ClientCommand) -> Result<()> {
        if !self.is_running() {
            return Err(VoxError::NotRunning);
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| VoxError::NotRunning)
    }

    fn await_reply<R>(&self, rx: Receiver<Result<R>>) -> Result<R> {
        match rx.recv_timeout(COMMAND_TIMEOUT) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(VoxError::NotRunning),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(VoxError::Other(
                anyhow::anyhow!("service loop did not answer within {COMMAND_TIMEOUT:?}"),
            )),
        }
    }

    fn set_status(&self, new_status: ClientStatus, detail: Option<String>) {
        pipeline::publish_status(&self.status, &self.status_tx, new_status, detail);
    }
}
