//! The seam between the orchestrator and whatever presents results.
//!
//! A [`DeliverySink`] receives either one whole artifact or an announcement
//! followed by ordered chunks. [`OutboxSink`] is the filesystem-backed sink
//! used by the HTTP service.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DeliveryError;
use crate::platform::Platform;
use crate::quality::Quality;
use crate::splitter::{Artifact, Chunk};

/// How a whole artifact should be presented by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Audio,
    Video,
    Document,
}

impl DeliveryKind {
    /// Audio downloads are always sent as audio; video downloads use the
    /// configured kind.
    pub fn for_quality(quality: Quality, video_delivery: DeliveryKind) -> Self {
        if quality.is_audio() {
            Self::Audio
        } else {
            video_delivery
        }
    }
}

/// Facts about the download that accompany every delivered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryContext {
    pub platform: Platform,
    pub quality: Quality,
    pub kind: DeliveryKind,
    pub human_size: String,
    /// Largest size the transport accepts in one unit, human readable.
    pub size_limit: String,
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Sends a file that fits in one transport unit.
    async fn send_artifact(
        &self,
        context: &DeliveryContext,
        artifact: &Artifact,
    ) -> Result<(), DeliveryError>;

    /// Called once before the first chunk of an oversized artifact.
    async fn announce_split(
        &self,
        context: &DeliveryContext,
        artifact: &Artifact,
        total_parts: u64,
    ) -> Result<(), DeliveryError>;

    /// Sends one chunk. Chunks arrive in index order.
    async fn send_chunk(
        &self,
        context: &DeliveryContext,
        chunk: &Chunk,
        total_parts: u64,
    ) -> Result<(), DeliveryError>;
}

/// Caption for a chunk, e.g. `Part 2 - clip.mp4.part001`.
pub fn chunk_caption(chunk: &Chunk) -> String {
    format!("Part {} - {}", chunk.index + 1, chunk.name)
}

/// Copies delivered artifacts into a directory.
#[derive(Debug, Clone)]
pub struct OutboxSink {
    dir: PathBuf,
}

impl OutboxSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DeliverySink for OutboxSink {
    async fn send_artifact(
        &self,
        context: &DeliveryContext,
        artifact: &Artifact,
    ) -> Result<(), DeliveryError> {
        let target = self.dir.join(&artifact.display_name);
        tokio::fs::copy(&artifact.path, &target)
            .await
            .map_err(|source| DeliveryError::Read {
                path: artifact.path.clone(),
                source,
            })?;
        debug!(
            name = %artifact.display_name,
            kind = ?context.kind,
            size = %context.human_size,
            "Wrote artifact to outbox"
        );
        Ok(())
    }

    async fn announce_split(
        &self,
        context: &DeliveryContext,
        artifact: &Artifact,
        total_parts: u64,
    ) -> Result<(), DeliveryError> {
        debug!(
            name = %artifact.display_name,
            size = %context.human_size,
            limit = %context.size_limit,
            total_parts,
            "Artifact exceeds single-unit limit, writing parts"
        );
        Ok(())
    }

    async fn send_chunk(
        &self,
        _context: &DeliveryContext,
        chunk: &Chunk,
        total_parts: u64,
    ) -> Result<(), DeliveryError> {
        tokio::fs::write(self.dir.join(&chunk.name), &chunk.bytes).await?;
        debug!(
            caption = %chunk_caption(chunk),
            total_parts,
            "Wrote part to outbox"
        );
        Ok(())
    }
}
