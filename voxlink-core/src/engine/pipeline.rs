//! Blocking service loop.
//!
//! ## Loop stages (per iteration)
//!
//! ```text
//! 1. Check running flag
//! 2. Drain control commands (capture / playback / disconnect)
//! 3. Reap a finished uploader thread
//! 4. If producers queued messages, request a writable event
//! 5. transport.service(timeout) → events
//! 6. Writable  → send ONE queued message, re-arm while the queue is non-empty
//!    Received  → text: broadcast; binary: locate PCM → playback
//!    Closed    → tear down and exit
//! ```
//!
//! ## Playback
//!
//! ```text
//! network bytes ──put_timeout──► RingBuffer ──try_get──► pull callback ──► speaker
//!                                   (pull mode; silence on underflow)
//! network bytes ──write_playback──► device                (blocking mode)
//! ```
//!
//! ## Capture
//!
//! ```text
//! capture callback ─┬─ Record: CaptureBuffer (drop frame when full)
//!                   ├─ Stream: CaptureBuffer + bounded channel ─► uploader thread
//!                   └─ Relay:  OutboundQueue (binary) + write_wanted flag
//! ```
//!
//! One iteration blocks for at most the service timeout plus the playback put
//! timeout. The exception is starting a new stream while the previous upload
//! is still waiting on its reply: that waits for the uploader to finish.

use std::io;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{AudioDevice, CaptureCallback, PlaybackSource},
    buffering::{CaptureBuffer, RingBuffer},
    codec,
    dispatch::OutboundQueue,
    engine::{CaptureMode, ClientCommand, ClientConfig, PlaybackMode, Recording},
    error::{Result, VoxError},
    ipc::events::{
        ActivityEvent, ActivityKind, ClientStatus, ClientStatusEvent, ServerMessageEvent,
        UploadEvent, UploadOutcome,
    },
    transport::{Inbound, Transport, TransportEvent},
    upload::{Connector, StreamingUploadSession},
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub messages_enqueued: AtomicUsize,
    pub queue_rejections: AtomicUsize,
    pub messages_sent: AtomicUsize,
    pub send_errors: AtomicUsize,
    pub audio_bytes_received: AtomicUsize,
    pub audio_bytes_dropped: AtomicUsize,
    pub playback_underflows: AtomicUsize,
    pub capture_bytes_dropped: AtomicUsize,
    pub upload_chunks_sent: AtomicUsize,
    pub upload_chunks_dropped: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.messages_enqueued.store(0, Ordering::Relaxed);
        self.queue_rejections.store(0, Ordering::Relaxed);
        self.messages_sent.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
        self.audio_bytes_received.store(0, Ordering::Relaxed);
        self.audio_bytes_dropped.store(0, Ordering::Relaxed);
        self.playback_underflows.store(0, Ordering::Relaxed);
        self.capture_bytes_dropped.store(0, Ordering::Relaxed);
        self.upload_chunks_sent.store(0, Ordering::Relaxed);
        self.upload_chunks_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            audio_bytes_received: self.audio_bytes_received.load(Ordering::Relaxed),
            audio_bytes_dropped: self.audio_bytes_dropped.load(Ordering::Relaxed),
            playback_underflows: self.playback_underflows.load(Ordering::Relaxed),
            capture_bytes_dropped: self.capture_bytes_dropped.load(Ordering::Relaxed),
            upload_chunks_sent: self.upload_chunks_sent.load(Ordering::Relaxed),
            upload_chunks_dropped: self.upload_chunks_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub messages_enqueued: usize,
    pub queue_rejections: usize,
    pub messages_sent: usize,
    pub send_errors: usize,
    pub audio_bytes_received: usize,
    pub audio_bytes_dropped: usize,
    pub playback_underflows: usize,
    pub capture_bytes_dropped: usize,
    pub upload_chunks_sent: usize,
    pub upload_chunks_dropped: usize,
}

/// State the service loop shares with its `VoiceClient` handle.
pub(crate) struct PipelineContext {
    pub config: ClientConfig,
    pub queue: Arc<OutboundQueue>,
    pub write_wanted: Arc<AtomicBool>,
    pub capture: Arc<Mutex<CaptureBuffer>>,
    pub running: Arc<AtomicBool>,
    pub commands: Receiver<ClientCommand>,
    pub message_tx: broadcast::Sender<ServerMessageEvent>,
    pub status_tx: broadcast::Sender<ClientStatusEvent>,
    pub upload_tx: broadcast::Sender<UploadEvent>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    pub status: Arc<Mutex<ClientStatus>>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

pub(crate) fn publish_status(
    status: &Mutex<ClientStatus>,
    tx: &broadcast::Sender<ClientStatusEvent>,
    new_status: ClientStatus,
    detail: Option<String>,
) {
    *status.lock() = new_status;
    let _ = tx.send(ClientStatusEvent {
        status: new_status,
        detail,
    });
}

// ── Per-connection state ─────────────────────────────────────────────────────

struct PlaybackSession {
    /// Present in pull mode only.
    ring: Option<Arc<RingBuffer>>,
    underflows: Arc<AtomicU64>,
    bytes: u64,
}

struct ActiveCapture {
    /// Present in stream mode: closing it tells the uploader to finish.
    chunks: Option<Sender<Vec<u8>>>,
}

struct Uploader<C: Connector> {
    handle: JoinHandle<Option<StreamingUploadSession<C>>>,
}

struct ServiceLoop<'a, T: Transport, D: AudioDevice, C: Connector> {
    ctx: PipelineContext,
    transport: &'a mut T,
    device: &'a mut D,
    /// `None` while an uploader thread owns the session.
    uploads: Option<StreamingUploadSession<C>>,
    uploader: Option<Uploader<C>>,
    playback: Option<PlaybackSession>,
    capture: Option<ActiveCapture>,
}

/// Run the blocking service loop until the connection closes or
/// `ctx.running` becomes false.
pub(crate) fn run<T, D, C>(
    ctx: PipelineContext,
    transport: &mut T,
    device: &mut D,
    uploads: StreamingUploadSession<C>,
) where
    T: Transport,
    D: AudioDevice,
    C: Connector,
{
    info!("service loop started");
    let mut svc = ServiceLoop {
        ctx,
        transport,
        device,
        uploads: Some(uploads),
        uploader: None,
        playback: None,
        capture: None,
    };

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !svc.ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Control commands ───────────────────────────────────────────
        if !svc.drain_commands() {
            break;
        }

        // ── 2. Uploader bookkeeping ───────────────────────────────────────
        svc.reap_uploader(false);

        // ── 3. Writable request ───────────────────────────────────────────
        if svc.ctx.write_wanted.swap(false, Ordering::AcqRel) {
            svc.transport.request_writable();
        }

        // ── 4. Service the connection ─────────────────────────────────────
        let events = match svc.transport.service(svc.ctx.config.service_timeout) {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "transport failed");
                break;
            }
        };

        let mut closed = false;
        for event in events {
            match event {
                TransportEvent::Connected => svc.on_connected(),
                TransportEvent::Writable => svc.on_writable(),
                TransportEvent::Received(Inbound::Text(text)) => svc.on_text(text),
                TransportEvent::Received(Inbound::Binary(data)) => svc.play(&data),
                TransportEvent::Closed => {
                    info!("connection closed by peer");
                    closed = true;
                }
            }
        }
        if closed {
            break;
        }
    }

    svc.teardown();
    info!("service loop stopped");
}

impl<T: Transport, D: AudioDevice, C: Connector> ServiceLoop<'_, T, D, C> {
    fn next_seq(&self) -> u64 {
        self.ctx.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn set_status(&self, status: ClientStatus, detail: Option<String>) {
        publish_status(&self.ctx.status, &self.ctx.status_tx, status, detail);
    }

    fn emit_activity(&self, kind: ActivityKind) {
        let _ = self.ctx.activity_tx.send(ActivityEvent {
            seq: self.next_seq(),
            kind,
        });
    }

    fn emit_upload_failed(&self, session_id: String, detail: String) {
        let _ = self.ctx.upload_tx.send(UploadEvent {
            seq: self.next_seq(),
            session_id,
            outcome: UploadOutcome::Failed { detail },
        });
    }

    fn stop_device_capture(&mut self, context: &str) {
        if let Err(e) = self.device.stop_capture() {
            warn!(error = %e, context, "failed to stop capture");
        }
    }

    // ── Transport events ──────────────────────────────────────────────────

    fn on_connected(&mut self) {
        self.set_status(ClientStatus::Connected, None);
        // Messages queued before the handshake finished.
        if !self.ctx.queue.is_empty() {
            self.transport.request_writable();
        }
    }

    /// Send exactly one message, then re-arm if more are waiting.
    fn on_writable(&mut self) {
        if let Some(msg) = self.ctx.queue.dequeue() {
            let (kind, bytes) = (msg.kind(), msg.len());
            match self.transport.send(msg) {
                Ok(()) => {
                    self.ctx
                        .diagnostics
                        .messages_sent
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(?kind, bytes, "message sent");
                }
                Err(e) => {
                    self.ctx
                        .diagnostics
                        .send_errors
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "failed to send queued message");
                }
            }
        }
        if !self.ctx.queue.is_empty() {
            self.transport.request_writable();
        }
    }

    fn on_text(&mut self, text: String) {
        info!(text = text.as_str(), "server message");
        let _ = self.ctx.message_tx.send(ServerMessageEvent {
            seq: self.next_seq(),
            text,
        });
    }

    // ── Playback ──────────────────────────────────────────────────────────

    fn ensure_playback(&mut self) -> Result<()> {
        if self.playback.is_some() {
            return Ok(());
        }

        let underflows = Arc::new(AtomicU64::new(0));
        let (source, ring) = match self.ctx.config.playback_mode {
            PlaybackMode::Blocking => (PlaybackSource::Blocking, None),
            PlaybackMode::Pull => {
                let ring = Arc::new(RingBuffer::new(self.ctx.config.playback_buffer_bytes));
                let cb = pull_callback(
                    Arc::clone(&ring),
                    Arc::clone(&underflows),
                    Arc::clone(&self.ctx.diagnostics),
                    self.ctx.config.format.silence_byte(),
                );
                (PlaybackSource::Pull(cb), Some(ring))
            }
        };

        if let Err(e) = self.device.start_playback(source) {
            if let Some(ring) = ring {
                ring.shutdown();
            }
            return Err(e);
        }
        self.playback = Some(PlaybackSession {
            ring,
            underflows,
            bytes: 0,
        });
        self.emit_activity(ActivityKind::PlaybackStarted);
        Ok(())
    }

    /// Route an inbound (or local) audio buffer to the playback device.
    fn play(&mut self, data: &[u8]) {
        let pcm = codec::extract_pcm(data, self.ctx.config.format.encoding);
        let diag = Arc::clone(&self.ctx.diagnostics);
        diag.audio_bytes_received
            .fetch_add(pcm.len(), Ordering::Relaxed);
        if pcm.is_empty() {
            return;
        }

        if let Err(e) = self.ensure_playback() {
            warn!(error = %e, bytes = pcm.len(), "playback unavailable, dropping audio");
            diag.audio_bytes_dropped
                .fetch_add(pcm.len(), Ordering::Relaxed);
            return;
        }

        let put_timeout = self.ctx.config.playback_put_timeout;
        let Some(session) = self.playback.as_mut() else {
            return;
        };

        let mut delivered = 0usize;
        match &session.ring {
            Some(ring) => {
                // Frame-aligned pieces no larger than the ring.
                let align = self.ctx.config.format.bytes_per_frame().max(1);
                let piece = (ring.capacity() / align * align).max(align);
                for part in pcm.chunks(piece) {
                    match ring.put_timeout(part, put_timeout) {
                        Ok(true) => delivered += part.len(),
                        Ok(false) => {
                            diag.audio_bytes_dropped
                                .fetch_add(part.len(), Ordering::Relaxed);
                            warn!(bytes = part.len(), "playback buffer full, dropping audio");
                        }
                        Err(e) => {
                            diag.audio_bytes_dropped
                                .fetch_add(part.len(), Ordering::Relaxed);
                            warn!(error = %e, "playback buffer rejected audio");
                        }
                    }
                }
            }
            None => match self.device.write_playback(pcm) {
                Ok(()) => delivered = pcm.len(),
                Err(e) => {
                    diag.audio_bytes_dropped
                        .fetch_add(pcm.len(), Ordering::Relaxed);
                    warn!(error = %e, "blocking playback write failed");
                }
            },
        }
        session.bytes += delivered as u64;
        debug!(bytes = delivered, "audio queued for playback");
    }

    fn stop_playback(&mut self) {
        let Some(session) = self.playback.take() else {
            return;
        };
        if let Some(ring) = &session.ring {
            ring.shutdown();
        }
        if let Err(e) = self.device.stop_playback() {
            warn!(error = %e, "failed to stop playback");
        }
        self.emit_activity(ActivityKind::PlaybackStopped {
            bytes: session.bytes,
            underflows: session.underflows.load(Ordering::Relaxed),
        });
    }

    // ── Capture ───────────────────────────────────────────────────────────

    fn start_capture(&mut self, mode: CaptureMode) -> Result<()> {
        if self.capture.is_some() {
            return Err(VoxError::CaptureActive);
        }
        self.ctx.capture.lock().clear();

        let active = match mode {
            CaptureMode::Record => {
                self.device.start_capture(record_callback(
                    Arc::clone(&self.ctx.capture),
                    Arc::clone(&self.ctx.diagnostics),
                    None,
                ))?;
                ActiveCapture { chunks: None }
            }
            CaptureMode::Relay => {
                let queue = Arc::clone(&self.ctx.queue);
                let write_wanted = Arc::clone(&self.ctx.write_wanted);
                let diag = Arc::clone(&self.ctx.diagnostics);
                self.device.start_capture(Box::new(move |frame: &[u8]| {
                    match queue.enqueue_binary(frame) {
                        Ok(()) => {
                            diag.messages_enqueued.fetch_add(1, Ordering::Relaxed);
                            write_wanted.store(true, Ordering::Release);
                        }
                        Err(_) => {
                            diag.queue_rejections.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }))?;
                ActiveCapture { chunks: None }
            }
            CaptureMode::Stream { token } => self.start_stream_capture(&token)?,
        };

        self.capture = Some(active);
        self.set_status(ClientStatus::Capturing, None);
        self.emit_activity(ActivityKind::CaptureStarted);
        Ok(())
    }

    fn start_stream_capture(&mut self, token: &str) -> Result<ActiveCapture> {
        // Capture is idle, so a previous uploader has lost its producer and is
        // only waiting on the server's reply.
        self.reap_uploader(true);
        let Some(mut session) = self.uploads.take() else {
            return Err(VoxError::SessionActive);
        };

        let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(self.ctx.config.upload_chunk_queue);
        let cb = record_callback(
            Arc::clone(&self.ctx.capture),
            Arc::clone(&self.ctx.diagnostics),
            Some(tx.clone()),
        );
        if let Err(e) = self.device.start_capture(cb) {
            self.uploads = Some(session);
            return Err(e);
        }

        let session_id = match session.init(token) {
            Ok(id) => id,
            Err(e) => {
                self.stop_device_capture("upload init failed");
                let session_id = session.last_session_id().unwrap_or_default();
                error!(session_id = session_id.as_str(), error = %e, "streaming upload could not start");
                self.emit_upload_failed(session_id, e.to_string());
                self.uploads = Some(session);
                return Err(e);
            }
        };

        let upload_tx = self.ctx.upload_tx.clone();
        let seq = Arc::clone(&self.ctx.seq);
        let diag = Arc::clone(&self.ctx.diagnostics);
        let worker_id = session_id.clone();
        let spawned = spawn_with_session(
            session,
            |body| thread::Builder::new().name("voxlink-upload".into()).spawn(body),
            move |session| upload_worker(session, worker_id, rx, upload_tx, seq, diag),
        );
        let handle = match spawned {
            Ok(handle) => handle,
            Err((e, session)) => {
                error!(session_id = session_id.as_str(), error = %e, "upload thread did not start");
                self.stop_device_capture("upload thread did not start");
                if let Some(mut session) = session {
                    session.abort();
                    self.uploads = Some(session);
                }
                self.emit_upload_failed(session_id, e.to_string());
                return Err(e.into());
            }
        };
        self.uploader = Some(Uploader { handle });
        Ok(ActiveCapture { chunks: Some(tx) })
    }

    fn stop_capture(&mut self) -> Result<Recording> {
        let Some(active) = self.capture.take() else {
            return Err(VoxError::CaptureInactive);
        };
        self.stop_device_capture("capture stopped");
        // Closing the channel lets the uploader send its terminator.
        drop(active.chunks);

        let (pcm, dropped_bytes) = {
            let mut buf = self.ctx.capture.lock();
            let dropped = buf.dropped_bytes();
            (buf.take(), dropped)
        };
        if dropped_bytes > 0 {
            warn!(dropped_bytes, "recording hit its length cap");
        }
        self.emit_activity(ActivityKind::CaptureStopped {
            bytes: pcm.len() as u64,
            dropped_bytes: dropped_bytes as u64,
        });
        self.set_status(ClientStatus::Connected, None);
        Ok(Recording {
            pcm,
            format: self.ctx.config.format,
            dropped_bytes,
        })
    }

    /// Take the session back from a finished uploader. With `wait`, join even
    /// if it is still running.
    fn reap_uploader(&mut self, wait: bool) {
        let finished = self
            .uploader
            .as_ref()
            .map(|u| wait || u.handle.is_finished())
            .unwrap_or(false);
        if !finished {
            return;
        }
        if let Some(uploader) = self.uploader.take() {
            match uploader.handle.join() {
                Ok(Some(session)) => self.uploads = Some(session),
                Ok(None) => error!("upload thread ran without a session; streaming uploads disabled"),
                Err(_) => error!("upload thread panicked; streaming uploads disabled"),
            }
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────

    /// Returns `false` when the loop should exit.
    fn drain_commands(&mut self) -> bool {
        loop {
            let cmd = match self.ctx.commands.try_recv() {
                Ok(cmd) => cmd,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            };
            match cmd {
                ClientCommand::StartCapture { mode, reply } => {
                    debug!(?mode, "start capture requested");
                    let result = self.start_capture(mode);
                    if let Err(e) = &result {
                        warn!(error = %e, "capture did not start");
                    }
                    let _ = reply.send(result);
                }
                ClientCommand::StopCapture { reply } => {
                    let _ = reply.send(self.stop_capture());
                }
                ClientCommand::PlayClip { audio } => self.play(&audio),
                ClientCommand::StopPlayback => self.stop_playback(),
                ClientCommand::Disconnect => {
                    info!("disconnect requested");
                    return false;
                }
            }
        }
    }

    fn teardown(&mut self) {
        if self.capture.is_some() {
            let _ = self.stop_capture();
        }
        self.reap_uploader(true);
        self.stop_playback();
        if let Err(e) = self.transport.close() {
            debug!(error = %e, "transport close failed");
        }
    }
}

// ── Device callbacks ─────────────────────────────────────────────────────────

/// Pull callback: whole periods from the ring, silence otherwise.
///
/// Only the transition from audio to silence counts as an underflow, so an
/// idle open stream doesn't inflate the counter.
fn pull_callback(
    ring: Arc<RingBuffer>,
    underflows: Arc<AtomicU64>,
    diag: Arc<PipelineDiagnostics>,
    silence: u8,
) -> crate::audio::PullCallback {
    let mut playing = false;
    Box::new(move |out: &mut [u8]| match ring.try_get(out) {
        Ok(true) => playing = true,
        Ok(false) | Err(_) => {
            out.fill(silence);
            if playing {
                playing = false;
                underflows.fetch_add(1, Ordering::Relaxed);
                diag.playback_underflows.fetch_add(1, Ordering::Relaxed);
            }
        }
    })
}

/// Capture callback for record and stream modes.
fn record_callback(
    buffer: Arc<Mutex<CaptureBuffer>>,
    diag: Arc<PipelineDiagnostics>,
    upload: Option<Sender<Vec<u8>>>,
) -> CaptureCallback {
    Box::new(move |frame: &[u8]| {
        if !buffer.lock().append(frame) {
            diag.capture_bytes_dropped
                .fetch_add(frame.len(), Ordering::Relaxed);
        }
        if let Some(tx) = &upload {
            match tx.try_send(frame.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    diag.upload_chunks_dropped.fetch_add(1, Ordering::Relaxed);
                }
                // Uploader already gave up; it reports its own failure.
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    })
}

/// Uploader thread body: append chunks until the channel closes, then finish.
/// Emits exactly one `UploadEvent` and hands the session back.
type SessionSlot<C> = Option<StreamingUploadSession<C>>;
type SessionThread<C> = Box<dyn FnOnce() -> SessionSlot<C> + Send>;

/// Run `work` on a thread started by `spawn`, handing it `session`. When the
/// thread cannot be started the session is returned alongside the error.
fn spawn_with_session<C, S, W>(
    session: StreamingUploadSession<C>,
    spawn: S,
    work: W,
) -> std::result::Result<JoinHandle<SessionSlot<C>>, (io::Error, SessionSlot<C>)>
where
    C: Connector,
    S: FnOnce(SessionThread<C>) -> io::Result<JoinHandle<SessionSlot<C>>>,
    W: FnOnce(StreamingUploadSession<C>) -> StreamingUploadSession<C> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(session)));
    let owned = Arc::clone(&slot);
    let body: SessionThread<C> = Box::new(move || {
        let session = owned.lock().take();
        session.map(work)
    });
    spawn(body).map_err(|e| (e, slot.lock().take()))
}

fn upload_worker<C: Connector>(
    mut session: StreamingUploadSession<C>,
    session_id: String,
    chunks: Receiver<Vec<u8>>,
    upload_tx: broadcast::Sender<UploadEvent>,
    seq: Arc<AtomicU64>,
    diag: Arc<PipelineDiagnostics>,
) -> StreamingUploadSession<C> {
    let mut sent = 0usize;
    let mut failure = None;
    for chunk in chunks.iter() {
        if let Err(e) = session.append_chunk(&chunk) {
            failure = Some(e);
            break;
        }
        sent += 1;
        diag.upload_chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    let outcome = match failure {
        Some(e) => {
            session.abort();
            error!(session_id = session_id.as_str(), error = %e, "streaming upload failed");
            UploadOutcome::Failed {
                detail: e.to_string(),
            }
        }
        None => match session.finish() {
            Ok(response) => UploadOutcome::Completed {
                status: response.status_code(),
                body: response.body().to_string(),
                chunks: sent,
            },
            Err(e) => {
                error!(session_id = session_id.as_str(), error = %e, "upload response failed");
                UploadOutcome::Failed {
                    detail: e.to_string(),
                }
            }
        },
    };

    let _ = upload_tx.send(UploadEvent {
        seq: seq.fetch_add(1, Ordering::Relaxed),
        session_id,
        outcome,
    });
    session
}
