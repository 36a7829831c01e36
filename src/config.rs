//! Runtime settings read from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::delivery::DeliveryKind;
use crate::splitter::SplitLimits;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
pub const DEFAULT_URL_CACHE_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_URL_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_CHUNK_PACING: Duration = Duration::from_secs(1);
pub const DEFAULT_OUTBOX_RETENTION: Duration = Duration::from_secs(20 * 60);

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub const FETCH_SOCKET_TIMEOUT: Duration = Duration::from_secs(120);
pub const FETCH_RETRIES: u32 = 5;
pub const AUDIO_BITRATE_KBPS: u32 = 320;
/// Upper bound on a whole extractor run, on top of its own socket timeout.
pub const FETCH_PROCESS_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub max_concurrent_downloads: usize,
    pub yt_dlp_bin: String,
    /// Parent of per-call scratch directories. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,
    pub outbox_dir: PathBuf,
    pub outbox_retention: Duration,
    pub url_cache_ttl_seconds: i64,
    pub url_cache_capacity: usize,
    pub chunk_pacing: Duration,
    pub video_delivery: DeliveryKind,
    pub no_playlist: bool,
    pub probe_timeout: Duration,
    pub socket_timeout: Duration,
    pub fetch_retries: u32,
    pub fetch_process_timeout: Duration,
    pub audio_bitrate_kbps: u32,
    pub split: SplitLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            allowed_origins: Vec::new(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            yt_dlp_bin: DEFAULT_YT_DLP_BIN.to_string(),
            scratch_dir: None,
            outbox_dir: PathBuf::from("outbox"),
            outbox_retention: DEFAULT_OUTBOX_RETENTION,
            url_cache_ttl_seconds: DEFAULT_URL_CACHE_TTL_SECONDS,
            url_cache_capacity: DEFAULT_URL_CACHE_CAPACITY,
            chunk_pacing: DEFAULT_CHUNK_PACING,
            video_delivery: DeliveryKind::Document,
            no_playlist: true,
            probe_timeout: PROBE_TIMEOUT,
            socket_timeout: FETCH_SOCKET_TIMEOUT,
            fetch_retries: FETCH_RETRIES,
            fetch_process_timeout: FETCH_PROCESS_TIMEOUT,
            audio_bitrate_kbps: AUDIO_BITRATE_KBPS,
            split: SplitLimits::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup. Unset or unparsable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(addr) = lookup("APP_ADDR").as_deref().and_then(non_empty) {
            settings.bind_addr = addr.to_string();
        } else if let Some(port) = lookup("PORT").and_then(|value| value.trim().parse::<u16>().ok())
        {
            settings.bind_addr = format!("0.0.0.0:{port}");
        }

        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            settings.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect();
        }

        if let Some(value) = parse_var::<usize, _>(&lookup, "MAX_CONCURRENT_DOWNLOADS") {
            if value > 0 {
                settings.max_concurrent_downloads = value;
            } else {
                warn!("MAX_CONCURRENT_DOWNLOADS must be positive, keeping default");
            }
        }
        if let Some(bin) = lookup("YT_DLP_BIN").as_deref().and_then(non_empty) {
            settings.yt_dlp_bin = bin.to_string();
        }
        if let Some(dir) = lookup("SCRATCH_DIR").as_deref().and_then(non_empty) {
            settings.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("OUTBOX_DIR").as_deref().and_then(non_empty) {
            settings.outbox_dir = PathBuf::from(dir);
        }
        if let Some(seconds) = parse_var::<u64, _>(&lookup, "OUTBOX_RETENTION_SECONDS") {
            settings.outbox_retention = Duration::from_secs(seconds);
        }
        if let Some(seconds) = parse_var::<i64, _>(&lookup, "URL_CACHE_TTL_SECONDS")
            .filter(|value| *value > 0)
        {
            settings.url_cache_ttl_seconds = seconds;
        }
        if let Some(capacity) =
            parse_var::<usize, _>(&lookup, "URL_CACHE_CAPACITY").filter(|value| *value > 0)
        {
            settings.url_cache_capacity = capacity;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CHUNK_PACING_MS") {
            settings.chunk_pacing = Duration::from_millis(ms);
        }
        if let Some(kind) = lookup("SEND_VIDEO_AS") {
            match kind.trim().to_ascii_lowercase().as_str() {
                "document" => settings.video_delivery = DeliveryKind::Document,
                "video" => settings.video_delivery = DeliveryKind::Video,
                other => warn!("Ignoring unknown SEND_VIDEO_AS value {other:?}"),
            }
        }
        if let Some(flag) = lookup("NO_PLAYLIST").as_deref().and_then(parse_bool) {
            settings.no_playlist = flag;
        }

        settings
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|value| value.trim().parse::<T>().ok())
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
