//! Turns a submitted URL and a chosen quality into delivered artifacts.
//!
//! Each orchestration call owns one scratch directory. Selectors are tried in
//! order until one succeeds, and the scratch directory is removed before the
//! call returns on every path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::delivery::{DeliveryContext, DeliveryKind, DeliverySink};
use crate::error::{DeliveryError, FetchError};
use crate::extractor::{Extractor, FetchRequest, Metadata};
use crate::filename::sanitize_filename;
use crate::platform::{Platform, is_supported};
use crate::quality::Quality;
use crate::registry::UrlRegistry;
use crate::splitter::{Artifact, ChunkReader, DeliveryPlan, SplitLimits, format_file_size};

const SCRATCH_PREFIX: &str = "mediadrop-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Probing,
    AwaitingQuality,
    Downloading,
    Uploading,
    Done,
    Failed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Idle, Stage::Probing)
                | (Stage::Probing, Stage::AwaitingQuality)
                | (Stage::Probing, Stage::Failed)
                | (Stage::AwaitingQuality, Stage::Downloading)
                | (Stage::Downloading, Stage::Uploading)
                | (Stage::Downloading, Stage::Failed)
                | (Stage::Uploading, Stage::Done)
                | (Stage::Uploading, Stage::Failed)
        )
    }
}

#[derive(Debug)]
struct StageTracker {
    history: Vec<Stage>,
}

impl StageTracker {
    fn starting_at(stage: Stage) -> Self {
        Self {
            history: vec![stage],
        }
    }

    fn current(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Idle)
    }

    fn advance(&mut self, next: Stage) {
        let current = self.current();
        debug_assert!(
            current.can_advance_to(next),
            "invalid stage transition {current:?} -> {next:?}"
        );
        debug!(from = ?current, to = ?next, "Stage transition");
        self.history.push(next);
    }

    fn fail(&mut self) {
        if self.current().can_advance_to(Stage::Failed) {
            self.advance(Stage::Failed);
        }
    }
}

/// Result of accepting a URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub id: String,
    pub platform: Platform,
    /// `None` when probing failed; quality options are offered regardless.
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub id: String,
    pub platform: Platform,
    pub quality: Quality,
    /// Selector that produced the file.
    pub selector: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub human_size: String,
    pub kind: DeliveryKind,
    /// Names handed to the sink, in delivery order.
    pub delivered: Vec<String>,
    pub chunked: bool,
    pub stages: Vec<Stage>,
}

#[derive(Clone)]
pub struct Orchestrator {
    extractor: Arc<dyn Extractor>,
    registry: UrlRegistry,
    scratch_root: Option<PathBuf>,
    limits: SplitLimits,
    chunk_pacing: Duration,
    video_delivery: DeliveryKind,
}

impl Orchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, registry: UrlRegistry, settings: &Settings) -> Self {
        Self {
            extractor,
            registry,
            scratch_root: settings.scratch_dir.clone(),
            limits: settings.split,
            chunk_pacing: settings.chunk_pacing,
            video_delivery: settings.video_delivery,
        }
    }

    pub fn registry(&self) -> &UrlRegistry {
        &self.registry
    }

    /// Validates, classifies and stores a URL, then probes it for metadata.
    /// A failed probe only leaves `metadata` empty.
    pub async fn submit_url(&self, text: &str) -> Result<Submission, FetchError> {
        let url = text.trim();
        let mut tracker = StageTracker::starting_at(Stage::Idle);
        tracker.advance(Stage::Probing);

        if !is_supported(url) {
            tracker.fail();
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }

        let platform = Platform::classify(url);
        let id = self.registry.store(url).await;

        let metadata = match self.extractor.probe(url).await {
            Ok(metadata) => Some(metadata),
            Err(source) => {
                let error = FetchError::ProbeFailure {
                    url: url.to_string(),
                    source,
                };
                warn!(%error, "Continuing without metadata");
                None
            }
        };

        tracker.advance(Stage::AwaitingQuality);
        info!(id = %id, %platform, has_metadata = metadata.is_some(), "URL accepted");

        Ok(Submission {
            id,
            platform,
            metadata,
        })
    }

    /// Downloads the URL behind `id` at `quality` and hands the result to
    /// `sink`.
    pub async fn select_quality(
        &self,
        id: &str,
        quality: Quality,
        sink: &dyn DeliverySink,
    ) -> Result<DeliveryReport, FetchError> {
        let url = self
            .registry
            .resolve(id)
            .await
            .ok_or_else(|| FetchError::UnknownHandle { id: id.to_string() })?;
        let platform = Platform::classify(&url);

        let mut tracker = StageTracker::starting_at(Stage::AwaitingQuality);
        tracker.advance(Stage::Downloading);

        let scratch = self.create_scratch().await.map_err(|error| {
            tracker.fail();
            FetchError::NoOutputProduced {
                scratch: self.scratch_parent(),
                detail: format!("could not create scratch directory: {error}"),
            }
        })?;
        let scratch_path = scratch.path().to_path_buf();

        let outcome = self
            .download_and_deliver(&url, platform, quality, &scratch_path, sink, &mut tracker)
            .await;
        close_scratch(scratch).await;

        match outcome {
            Ok((selector, artifact, delivered, chunked)) => {
                tracker.advance(Stage::Done);
                info!(
                    id = %id,
                    %platform,
                    %quality,
                    name = %artifact.display_name,
                    size = artifact.size_bytes,
                    parts = delivered.len(),
                    "Download completed"
                );
                Ok(DeliveryReport {
                    id: id.to_string(),
                    platform,
                    quality,
                    selector,
                    human_size: format_file_size(artifact.size_bytes),
                    display_name: artifact.display_name,
                    size_bytes: artifact.size_bytes,
                    kind: DeliveryKind::for_quality(quality, self.video_delivery),
                    delivered,
                    chunked,
                    stages: tracker.history,
                })
            }
            Err(error) => {
                tracker.fail();
                warn!(id = %id, %error, "Download failed");
                Err(error)
            }
        }
    }

    async fn download_and_deliver(
        &self,
        url: &str,
        platform: Platform,
        quality: Quality,
        scratch: &Path,
        sink: &dyn DeliverySink,
        tracker: &mut StageTracker,
    ) -> Result<(String, Artifact, Vec<String>, bool), FetchError> {
        let selector = self.fetch_with_fallback(url, platform, quality, scratch).await?;
        let artifact = locate_artifact(scratch).await?;

        tracker.advance(Stage::Uploading);
        let plan = DeliveryPlan::for_artifact(artifact, self.limits);
        let chunked = matches!(plan, DeliveryPlan::Chunked { .. });
        let delivered = self.deliver(&plan, platform, quality, sink).await?;

        let artifact = match plan {
            DeliveryPlan::Single(artifact) | DeliveryPlan::Chunked { artifact, .. } => artifact,
        };
        Ok((selector, artifact, delivered, chunked))
    }

    /// Tries each selector in order and stops at the first success.
    async fn fetch_with_fallback(
        &self,
        url: &str,
        platform: Platform,
        quality: Quality,
        scratch: &Path,
    ) -> Result<String, FetchError> {
        let mut attempted = Vec::new();
        let mut last_error = String::new();

        for selector in quality.selectors() {
            attempted.push(selector.to_string());
            let request = FetchRequest {
                url: url.to_string(),
                selector: selector.to_string(),
                destination: scratch.to_path_buf(),
                platform,
                audio_only: quality.is_audio(),
            };

            match self.extractor.fetch(&request).await {
                Ok(()) => {
                    debug!(selector, attempts = attempted.len(), "Format succeeded");
                    return Ok(selector.to_string());
                }
                Err(error) => {
                    warn!(selector, %error, "Format failed");
                    last_error = error.to_string();
                    if let Err(error) = clear_dir(scratch).await {
                        warn!(%error, "Could not clear partial output");
                    }
                }
            }
        }

        Err(FetchError::AllFormatsExhausted {
            url: url.to_string(),
            attempted,
            last_error,
        })
    }

    async fn deliver(
        &self,
        plan: &DeliveryPlan,
        platform: Platform,
        quality: Quality,
        sink: &dyn DeliverySink,
    ) -> Result<Vec<String>, FetchError> {
        let artifact = plan.artifact();
        let context = DeliveryContext {
            platform,
            quality,
            kind: DeliveryKind::for_quality(quality, self.video_delivery),
            human_size: format_file_size(artifact.size_bytes),
            size_limit: format_file_size(self.limits.max_single_unit),
        };

        match plan {
            DeliveryPlan::Single(artifact) => {
                sink.send_artifact(&context, artifact)
                    .await
                    .map_err(delivery_failure(0))?;
                Ok(vec![artifact.display_name.clone()])
            }
            DeliveryPlan::Chunked {
                artifact,
                total_parts,
            } => {
                let mut delivered = Vec::new();

                sink.announce_split(&context, artifact, *total_parts)
                    .await
                    .map_err(delivery_failure(0))?;

                let mut reader = ChunkReader::open(
                    &artifact.path,
                    &artifact.display_name,
                    self.limits.chunk_size,
                )
                .await
                .map_err(delivery_failure(0))?;

                loop {
                    let next = reader
                        .next_chunk()
                        .await
                        .map_err(delivery_failure(delivered.len()))?;
                    let Some(chunk) = next else {
                        break;
                    };
                    if !delivered.is_empty() && !self.chunk_pacing.is_zero() {
                        tokio::time::sleep(self.chunk_pacing).await;
                    }
                    sink.send_chunk(&context, &chunk, *total_parts)
                        .await
                        .map_err(delivery_failure(delivered.len()))?;
                    debug!(part = chunk.index + 1, total_parts = *total_parts, "Part delivered");
                    delivered.push(chunk.name);
                }

                Ok(delivered)
            }
        }
    }

    fn scratch_parent(&self) -> PathBuf {
        self.scratch_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    async fn create_scratch(&self) -> io::Result<TempDir> {
        let parent = self.scratch_parent();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&parent)?;
            tempfile::Builder::new()
                .prefix(SCRATCH_PREFIX)
                .tempdir_in(parent)
        })
        .await
        .map_err(io::Error::other)?
    }
}

fn delivery_failure(delivered: usize) -> impl FnOnce(DeliveryError) -> FetchError {
    move |source| FetchError::DeliveryFailure { delivered, source }
}

/// Removes the scratch directory. Dropping a `TempDir` also removes it, so
/// early returns and panics are covered as well.
async fn close_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    match tokio::task::spawn_blocking(move || scratch.close()).await {
        Ok(Ok(())) => debug!(path = %path.display(), "Scratch directory removed"),
        Ok(Err(error)) => warn!(path = %path.display(), %error, "Could not remove scratch directory"),
        Err(error) => warn!(path = %path.display(), %error, "Scratch cleanup task failed"),
    }
}

/// Finds the downloaded file. Hidden entries are ignored; if several files
/// remain the largest one is taken.
async fn locate_artifact(scratch: &Path) -> Result<Artifact, FetchError> {
    let no_output = |detail: String| FetchError::NoOutputProduced {
        scratch: scratch.to_path_buf(),
        detail,
    };

    let mut entries = tokio::fs::read_dir(scratch)
        .await
        .map_err(|error| no_output(format!("could not read scratch directory: {error}")))?;

    let mut best: Option<(PathBuf, String, u64)> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| no_output(format!("could not list scratch directory: {error}")))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(error) => {
                warn!(name = %name, %error, "Skipping unreadable output entry");
                continue;
            }
        };

        if best.as_ref().is_some_and(|(_, _, size)| *size >= metadata.len()) {
            debug!(name = %name, "Ignoring additional output file");
            continue;
        }
        best = Some((entry.path(), name, metadata.len()));
    }

    let (path, name, size_bytes) =
        best.ok_or_else(|| no_output("extractor reported success but wrote no file".to_string()))?;

    Ok(Artifact {
        path,
        display_name: sanitize_filename(&name),
        size_bytes,
    })
}

async fn clear_dir(dir: &Path) -> io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn stage_transitions_follow_the_lifecycle() {
        assert!(Stage::Idle.can_advance_to(Stage::Probing));
        assert!(Stage::Probing.can_advance_to(Stage::AwaitingQuality));
        assert!(Stage::Downloading.can_advance_to(Stage::Failed));
        assert!(Stage::Uploading.can_advance_to(Stage::Done));
        assert!(!Stage::Idle.can_advance_to(Stage::Downloading));
        assert!(!Stage::AwaitingQuality.can_advance_to(Stage::Failed));
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
    }

    #[tokio::test]
    async fn locate_skips_hidden_files() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(".hidden.mp4"), vec![0u8; 100])
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("My Clip?.mp4"), b"abc")
            .await
            .unwrap();

        let artifact = locate_artifact(dir.path()).await.unwrap();
        assert_eq!(artifact.display_name, "My Clip.mp4");
        assert_eq!(artifact.size_bytes, 3);
    }

    #[tokio::test]
    async fn locate_reports_empty_directory() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join(".only-hidden"), b"x")
            .await
            .unwrap();
        let result = locate_artifact(dir.path()).await;
        assert!(matches!(result, Err(FetchError::NoOutputProduced { .. })));
    }

    #[tokio::test]
    async fn locate_prefers_largest_file() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("thumb.jpg"), b"12").await.unwrap();
        tokio::fs::write(dir.path().join("clip.mp4"), b"123456")
            .await
            .unwrap();
        let artifact = locate_artifact(dir.path()).await.unwrap();
        assert_eq!(artifact.display_name, "clip.mp4");
    }

    #[tokio::test]
    async fn clear_dir_keeps_the_directory() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("a.part"), b"x").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();
        clear_dir(dir.path()).await.unwrap();
        assert!(dir.path().exists());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
