//! Voxlink console client.
//!
//! ## Runtime note
//!
//! The service loop and the console both block, so each runs on Tokio's
//! blocking pool (`spawn_blocking`). The async side only forwards broadcast
//! events to the terminal.

mod api;
mod commands;
mod settings;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use voxlink_core::{
    audio::device::list_devices, ActivityKind, CaptureMode, ClientStatus, CpalDevice,
    StreamingUploadSession, TcpConnector, UploadOutcome, VoiceClient, WsTransport,
};

use api::ApiClient;
use commands::{ConsoleCommand, HELP};
use settings::{load_settings, resolve_settings_path, save_settings, AppSettings};

#[derive(Debug, Parser)]
#[command(name = "voxlink", version, about = "Edge voice client")]
struct Args {
    /// Settings file (default: $VOXLINK_CONFIG, then the user config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Write a settings file with default values and exit
    #[arg(long)]
    write_default_config: bool,
}

/// Which capture the console started, so `stop` knows what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveCapture {
    Record,
    Stream,
    Relay,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("voxlink=info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in list_devices() {
            println!(
                "{:<6} {}{}",
                format!("{:?}", device.direction).to_lowercase(),
                device.name,
                if device.is_default { " (default)" } else { "" }
            );
        }
        return Ok(());
    }

    let settings_path = resolve_settings_path(args.config);
    if args.write_default_config {
        save_settings(&settings_path, &AppSettings::default())
            .with_context(|| format!("writing {}", settings_path.display()))?;
        println!("wrote {}", settings_path.display());
        return Ok(());
    }

    let settings = load_settings(&settings_path);
    info!(
        path = %settings_path.display(),
        server = %settings.api_base(),
        "settings loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building Tokio runtime")?;
    let result = runtime.block_on(run(settings));
    runtime.shutdown_timeout(Duration::from_secs(2));
    result
}

async fn run(settings: AppSettings) -> Result<()> {
    let prep = settings.clone();
    let (api, token) = tokio::task::spawn_blocking(move || prepare_session(&prep))
        .await
        .context("session setup task failed")??;

    let client = Arc::new(VoiceClient::new(settings.client_config()));
    spawn_printers(&client);

    let ws_config = settings.ws_config();
    let format = client.config().format;
    let frames = client.config().frames_per_buffer;
    let input = settings.preferred_input_device.clone();
    let output = settings.preferred_output_device.clone();
    let uploads = StreamingUploadSession::new(
        TcpConnector::new(settings.server_host.clone(), settings.server_port),
        client.config().upload.clone(),
    );
    let auth = settings.auth_header(token.as_deref());

    let starter = Arc::clone(&client);
    tokio::task::spawn_blocking(move || {
        starter.start(
            move || {
                let device = CpalDevice::open(format, frames, input.as_deref(), output.as_deref())?;
                Ok((WsTransport::new(ws_config), device))
            },
            uploads,
            auth,
        )
    })
    .await
    .context("connect task failed")?
    .context("connecting to server")?;

    println!("connected to {} (type `help` for commands)", settings.ws_config().url);

    let console_client = Arc::clone(&client);
    tokio::task::spawn_blocking(move || console_loop(&console_client, &api, &settings, token))
        .await
        .context("console task failed")??;

    shutdown(&client).await;
    Ok(())
}

/// Health check and token exchange. Neither is fatal.
fn prepare_session(settings: &AppSettings) -> Result<(ApiClient, Option<String>)> {
    let api = ApiClient::new(settings.api_base())?;
    if !api.health_check() {
        warn!(server = %settings.api_base(), "server health check failed, connecting anyway");
    }
    let token = match (&settings.api_key, &settings.api_secret) {
        (Some(key), Some(secret)) => match api.fetch_token(key, secret) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "could not obtain API token");
                None
            }
        },
        _ => None,
    };
    Ok((api, token))
}

fn console_loop(
    client: &VoiceClient,
    api: &ApiClient,
    settings: &AppSettings,
    token: Option<String>,
) -> Result<()> {
    let mut active: Option<ActiveCapture> = None;

    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        if !client.is_running() {
            println!("connection closed");
            break;
        }

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
            ConsoleCommand::Record => {
                start_capture(client, &mut active, CaptureMode::Record, ActiveCapture::Record)
            }
            ConsoleCommand::Relay => {
                start_capture(client, &mut active, CaptureMode::Relay, ActiveCapture::Relay)
            }
            ConsoleCommand::Stream => match &token {
                Some(token) => start_capture(
                    client,
                    &mut active,
                    CaptureMode::Stream {
                        token: token.clone(),
                    },
                    ActiveCapture::Stream,
                ),
                None => println!("stream needs an API token: set apiKey and apiSecret"),
            },
            ConsoleCommand::Stop => {
                let recording = match client.stop_capture() {
                    Ok(r) => r,
                    Err(e) => {
                        println!("stop failed: {e}");
                        continue;
                    }
                };
                println!("captured {:.1}s", recording.duration_secs());
                if active.take() != Some(ActiveCapture::Record) || recording.is_empty() {
                    continue;
                }
                let wav = match recording.to_wav() {
                    Ok(wav) => wav,
                    Err(e) => {
                        println!("could not encode recording: {e}");
                        continue;
                    }
                };
                match &token {
                    Some(token) => {
                        match api.post_audio(&settings.upload_path, token, wav) {
                            Ok(body) => println!("upload accepted: {body}"),
                            Err(e) => println!("upload failed: {e:#}"),
                        }
                    }
                    None => {
                        if let Err(e) = client.send_binary(wav) {
                            println!("could not queue recording: {e}");
                        }
                    }
                }
            }
            ConsoleCommand::Play(path) => match std::fs::read(&path) {
                Ok(audio) => {
                    if let Err(e) = client.play_clip(audio) {
                        println!("play failed: {e}");
                    }
                }
                Err(e) => println!("cannot read {}: {e}", path.display()),
            },
            ConsoleCommand::Hush => {
                if let Err(e) = client.stop_playback() {
                    println!("hush failed: {e}");
                }
            }
            ConsoleCommand::Stats => {
                let s = client.diagnostics_snapshot();
                println!(
                    "messages: {} queued, {} sent, {} rejected, {} send errors, {} pending",
                    s.messages_enqueued,
                    s.messages_sent,
                    s.queue_rejections,
                    s.send_errors,
                    client.pending_messages()
                );
                println!(
                    "audio: {} B received, {} B dropped, {} underflows, {} B capture dropped",
                    s.audio_bytes_received,
                    s.audio_bytes_dropped,
                    s.playback_underflows,
                    s.capture_bytes_dropped
                );
                println!(
                    "upload: {} chunks sent, {} chunks dropped",
                    s.upload_chunks_sent, s.upload_chunks_dropped
                );
            }
            ConsoleCommand::Text(text) => {
                if let Err(e) = client.send_text(&text) {
                    println!("not sent: {e}");
                }
            }
        }
    }
    Ok(())
}

fn start_capture(
    client: &VoiceClient,
    active: &mut Option<ActiveCapture>,
    mode: CaptureMode,
    kind: ActiveCapture,
) {
    match client.start_capture(mode) {
        Ok(()) => {
            *active = Some(kind);
            println!("capturing ({kind:?}); `stop` to finish");
        }
        Err(e) => println!("capture failed: {e}"),
    }
}

async fn shutdown(client: &Arc<VoiceClient>) {
    if client.is_running() {
        let _ = client.disconnect();
        let deadline = Instant::now() + Duration::from_secs(2);
        while client.is_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    client.shutdown();
}

// ── Event printers ───────────────────────────────────────────────────────────

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn spawn_printers(client: &VoiceClient) {
    forward(client.subscribe_messages(), "message", |event| {
        println!("[{}] Server: {}", timestamp(), event.text);
    });

    forward(client.subscribe_status(), "status", |event| match event.status {
        ClientStatus::Closed => println!("[{}] connection closed", timestamp()),
        ClientStatus::Error => println!(
            "[{}] error: {}",
            timestamp(),
            event.detail.as_deref().unwrap_or("unknown")
        ),
        _ => {}
    });

    forward(client.subscribe_uploads(), "upload", |event| match &event.outcome {
        UploadOutcome::Completed {
            status,
            body,
            chunks,
        } => println!(
            "[{}] {} finished: {} chunks, status {}, {}",
            timestamp(),
            event.session_id,
            chunks,
            status.map_or_else(|| "?".to_string(), |s| s.to_string()),
            body.trim()
        ),
        UploadOutcome::Failed { detail } => {
            println!("[{}] {} failed: {detail}", timestamp(), event.session_id)
        }
    });

    forward(client.subscribe_activity(), "activity", |event| {
        if let ActivityKind::CaptureStopped { dropped_bytes, .. } = event.kind {
            if dropped_bytes > 0 {
                println!("[{}] recording truncated at the length cap", timestamp());
            }
        }
        tracing::debug!(seq = event.seq, kind = ?event.kind, "activity");
    });
}

fn forward<T, F>(mut rx: broadcast::Receiver<T>, channel: &'static str, mut print: F)
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print(event),
                Err(RecvError::Lagged(n)) => {
                    warn!(channel, "event receiver lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
