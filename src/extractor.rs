//! The media extraction capability and its yt-dlp implementation.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::Settings;
use crate::error::ExtractorError;
use crate::platform::Platform;

pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const MOBILE_USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15";

/// Output name template handed to the extractor, relative to the destination.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

const MAX_CLEAN_TEXT_CHARS: usize = 100;

/// Best-effort description of a media URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// Length in seconds.
    pub duration: Option<f64>,
}

impl Metadata {
    pub fn display_title(&self) -> String {
        clean_text(self.title.as_deref().unwrap_or_default())
    }

    pub fn display_uploader(&self) -> String {
        clean_text(self.uploader.as_deref().unwrap_or_default())
    }

    pub fn display_duration(&self) -> String {
        format_duration(
            self.duration
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                .map(|seconds| seconds as u64),
        )
    }
}

/// One download attempt with one format selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub selector: String,
    pub destination: PathBuf,
    pub platform: Platform,
    pub audio_only: bool,
}

impl FetchRequest {
    /// Request headers some platforms need to accept the client.
    pub fn headers(&self) -> Vec<(&'static str, &'static str)> {
        match self.platform {
            Platform::Facebook => vec![("User-Agent", DESKTOP_USER_AGENT)],
            Platform::Tiktok | Platform::Instagram => vec![("User-Agent", MOBILE_USER_AGENT)],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetches metadata without downloading media.
    async fn probe(&self, url: &str) -> Result<Metadata, ExtractorError>;

    /// Downloads into `request.destination`.
    async fn fetch(&self, request: &FetchRequest) -> Result<(), ExtractorError>;
}

/// Runs the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    probe_timeout: Duration,
    socket_timeout: Duration,
    retries: u32,
    process_timeout: Duration,
    audio_bitrate_kbps: u32,
    no_playlist: bool,
}

impl YtDlp {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            binary: settings.yt_dlp_bin.clone(),
            probe_timeout: settings.probe_timeout,
            socket_timeout: settings.socket_timeout,
            retries: settings.fetch_retries,
            process_timeout: settings.fetch_process_timeout,
            audio_bitrate_kbps: settings.audio_bitrate_kbps,
            no_playlist: settings.no_playlist,
        }
    }

    fn probe_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.probe_timeout.as_secs().to_string(),
        ];
        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }
        args.push(url.to_string());
        args
    }

    fn fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let output_template = request.destination.join(OUTPUT_TEMPLATE);
        let mut args = vec![
            "-f".to_string(),
            request.selector.clone(),
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.as_secs().to_string(),
            "--retries".to_string(),
            self.retries.to_string(),
        ];

        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }

        for (name, value) in request.headers() {
            args.push("--add-header".to_string());
            args.push(format!("{name}:{value}"));
        }

        if request.audio_only {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push("mp3".to_string());
            args.push("--audio-quality".to_string());
            args.push(format!("{}K", self.audio_bitrate_kbps));
        }

        args.push(request.url.clone());
        args
    }

    async fn run(
        &self,
        args: Vec<String>,
        limit: Duration,
    ) -> Result<std::process::Output, ExtractorError> {
        debug!(binary = %self.binary, ?args, "Running extractor");
        let command_future = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = timeout(limit, command_future)
            .await
            .map_err(|_| ExtractorError::Timeout {
                seconds: limit.as_secs(),
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ExtractorError::NotInstalled {
                        binary: self.binary.clone(),
                    }
                } else {
                    ExtractorError::Spawn(error)
                }
            })?;

        if !output.status.success() {
            return Err(ExtractorError::Failed {
                message: run_error_message(&output.stderr),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn probe(&self, url: &str) -> Result<Metadata, ExtractorError> {
        let output = self.run(self.probe_args(url), self.probe_timeout).await?;
        parse_metadata(&output.stdout)
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<(), ExtractorError> {
        self.run(self.fetch_args(request), self.process_timeout)
            .await
            .map(|_| ())
    }
}

pub fn parse_metadata(stdout: &[u8]) -> Result<Metadata, ExtractorError> {
    Ok(serde_json::from_slice(stdout)?)
}

/// Last non-empty stderr line, or a generic message.
fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("extractor exited without an error message")
        .to_string()
}

/// Makes free text from a remote site safe to display.
pub fn clean_text(text: &str) -> String {
    let cleaned: String = text
        .replace('&', "and")
        .chars()
        .filter(|c| {
            c.is_alphanumeric()
                || c.is_whitespace()
                || matches!(
                    c,
                    '_' | '-' | '.' | ',' | '!' | '?' | '(' | ')' | '[' | ']'
                )
        })
        .collect();

    if cleaned.trim().is_empty() {
        return "Unknown".to_string();
    }
    if cleaned.chars().count() > MAX_CLEAN_TEXT_CHARS {
        let head: String = cleaned.chars().take(MAX_CLEAN_TEXT_CHARS).collect();
        format!("{head}...")
    } else {
        cleaned
    }
}

/// `MM:SS`, or `HH:MM:SS` from one hour up. Missing or zero is `Unknown`.
pub fn format_duration(seconds: Option<u64>) -> String {
    match seconds {
        None | Some(0) => "Unknown".to_string(),
        Some(total) => {
            let (minutes, seconds) = (total / 60, total % 60);
            let (hours, minutes) = (minutes / 60, minutes % 60);
            if hours > 0 {
                format!("{hours:02}:{minutes:02}:{seconds:02}")
            } else {
                format!("{minutes:02}:{seconds:02}")
            }
        }
    }
}
