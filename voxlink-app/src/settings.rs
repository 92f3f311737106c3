//! Persistent client settings (JSON file in the user config directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use voxlink_core::{
    AudioFormat, AuthHeader, ClientConfig, PlaybackMode, SampleEncoding, UploadConfig, WsConfig,
};

/// Environment override for the settings file location.
pub const CONFIG_ENV: &str = "VOXLINK_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub server_host: String,
    pub server_port: u16,
    pub ws_path: String,
    /// `basic` (username/password), `token` (fetched with the API key) or `none`.
    pub auth_mode: String,
    pub username: String,
    pub password: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub upload_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// `pcm16` or `mulaw`.
    pub encoding: String,
    pub frames_per_buffer: usize,
    pub queue_capacity: usize,
    pub playback_buffer_kib: usize,
    /// `pull` or `blocking`.
    pub playback_mode: String,
    pub max_recording_secs: u32,
    pub upload_chunk_queue: usize,
    /// Keepalive ping interval; 0 disables pings.
    pub ping_interval_secs: u64,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".into(),
            server_port: 8080,
            ws_path: "/ws".into(),
            auth_mode: "basic".into(),
            username: "John".into(),
            password: "Doe".into(),
            api_key: None,
            api_secret: None,
            upload_path: "/api/v1/audio/stream".into(),
            sample_rate: 16_000,
            channels: 1,
            encoding: "pcm16".into(),
            frames_per_buffer: 512,
            queue_capacity: 10,
            playback_buffer_kib: 1024,
            playback_mode: "pull".into(),
            max_recording_secs: 60,
            upload_chunk_queue: 50,
            ping_interval_secs: 0,
            preferred_input_device: None,
            preferred_output_device: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.server_host = non_empty(&self.server_host).unwrap_or_else(|| "127.0.0.1".into());
        if self.server_port == 0 {
            self.server_port = 8080;
        }
        self.ws_path = normalize_path(&self.ws_path, "/ws");
        self.upload_path = normalize_path(&self.upload_path, "/api/v1/audio/stream");
        self.auth_mode = normalize_auth_mode(&self.auth_mode);
        self.api_key = self.api_key.as_deref().and_then(non_empty);
        self.api_secret = self.api_secret.as_deref().and_then(non_empty);
        self.sample_rate = self.sample_rate.clamp(8_000, 48_000);
        self.channels = self.channels.clamp(1, 2);
        self.encoding = normalize_encoding(&self.encoding);
        self.frames_per_buffer = self.frames_per_buffer.clamp(64, 8192);
        self.queue_capacity = self.queue_capacity.clamp(1, 1024);
        self.playback_buffer_kib = self.playback_buffer_kib.clamp(16, 16 * 1024);
        self.playback_mode = normalize_playback_mode(&self.playback_mode);
        self.max_recording_secs = self.max_recording_secs.clamp(1, 600);
        self.upload_chunk_queue = self.upload_chunk_queue.clamp(1, 1000);
        self.ping_interval_secs = self.ping_interval_secs.min(3600);
        self.preferred_input_device = self.preferred_input_device.as_deref().and_then(non_empty);
        self.preferred_output_device = self
            .preferred_output_device
            .as_deref()
            .and_then(non_empty);
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            encoding: match self.encoding.as_str() {
                "mulaw" => SampleEncoding::MuLaw,
                _ => SampleEncoding::Pcm16,
            },
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            format: self.audio_format(),
            frames_per_buffer: self.frames_per_buffer,
            queue_capacity: self.queue_capacity,
            playback_buffer_bytes: self.playback_buffer_kib * 1024,
            playback_mode: match self.playback_mode.as_str() {
                "blocking" => PlaybackMode::Blocking,
                _ => PlaybackMode::Pull,
            },
            max_recording_secs: self.max_recording_secs,
            upload_chunk_queue: self.upload_chunk_queue,
            upload: UploadConfig {
                path: self.upload_path.clone(),
                ..UploadConfig::default()
            },
            ..ClientConfig::default()
        }
    }

    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            url: format!(
                "ws://{}:{}{}",
                self.server_host, self.server_port, self.ws_path
            ),
            ping_interval: (self.ping_interval_secs > 0)
                .then(|| Duration::from_secs(self.ping_interval_secs)),
            ..WsConfig::default()
        }
    }

    /// Base URL for the REST endpoints.
    pub fn api_base(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    /// Handshake credentials. `token` is used in `token` mode only.
    pub fn auth_header(&self, token: Option<&str>) -> AuthHeader {
        match (self.auth_mode.as_str(), token) {
            ("token", Some(token)) => AuthHeader::Bearer(token.to_string()),
            ("none", _) => AuthHeader::None,
            _ => AuthHeader::Basic {
                username: self.username.clone(),
                password: self.password.clone(),
            },
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn normalize_path(raw: &str, fallback: &str) -> String {
    match non_empty(raw) {
        None => fallback.into(),
        Some(p) if p.starts_with('/') => p,
        Some(p) => format!("/{p}"),
    }
}

pub fn normalize_auth_mode(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "token" | "bearer" | "jwt" => "token".into(),
        "none" | "off" => "none".into(),
        _ => "basic".into(),
    }
}

pub fn normalize_encoding(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mulaw" | "mu-law" | "ulaw" | "g711" => "mulaw".into(),
        _ => "pcm16".into(),
    }
}

pub fn normalize_playback_mode(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "blocking" | "write" | "push" => "blocking".into(),
        _ => "pull".into(),
    }
}

/// `explicit`, else `$VOXLINK_CONFIG`, else the per-user config directory.
pub fn resolve_settings_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(default_settings_path)
}

/// `<config dir>/voxlink/settings.json`, e.g. `~/.config/voxlink/settings.json` on Linux.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxlink")
        .join("settings.json")
}

/// Missing or unreadable files yield defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
