//! Size-aware delivery planning.
//!
//! Files up to [`MAX_SINGLE_UNIT`] bytes go out as one artifact. Larger files
//! are cut into consecutive [`CHUNK_SIZE`] windows named `<name>.partNNN`;
//! the chunk size stays below the single-unit limit to leave room for
//! transport overhead.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::DeliveryError;

pub const MAX_SINGLE_UNIT: u64 = 50 * 1024 * 1024;
pub const CHUNK_SIZE: u64 = 45 * 1024 * 1024;

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitLimits {
    pub max_single_unit: u64,
    pub chunk_size: u64,
}

impl Default for SplitLimits {
    fn default() -> Self {
        Self {
            max_single_unit: MAX_SINGLE_UNIT,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// A finished download ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    #[serde(skip)]
    pub path: PathBuf,
    pub display_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPlan {
    Single(Artifact),
    Chunked { artifact: Artifact, total_parts: u64 },
}

impl DeliveryPlan {
    pub fn for_artifact(artifact: Artifact, limits: SplitLimits) -> Self {
        if artifact.size_bytes <= limits.max_single_unit {
            Self::Single(artifact)
        } else {
            let total_parts = chunk_count(artifact.size_bytes, limits.chunk_size);
            Self::Chunked {
                artifact,
                total_parts,
            }
        }
    }

    pub fn artifact(&self) -> &Artifact {
        match self {
            Self::Single(artifact) | Self::Chunked { artifact, .. } => artifact,
        }
    }

    pub fn total_parts(&self) -> u64 {
        match self {
            Self::Single(_) => 1,
            Self::Chunked { total_parts, .. } => *total_parts,
        }
    }
}

/// One window of a split artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the sequence.
    pub index: u64,
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn chunk_count(size_bytes: u64, chunk_size: u64) -> u64 {
    size_bytes.div_ceil(chunk_size.max(1))
}

pub fn chunk_name(base_name: &str, index: u64) -> String {
    format!("{base_name}.part{index:03}")
}

/// Reads a file sequentially in fixed windows, one chunk in memory at a time.
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    base_name: String,
    chunk_size: usize,
    next_index: u64,
}

impl ChunkReader {
    pub async fn open(
        path: &Path,
        base_name: &str,
        chunk_size: u64,
    ) -> Result<Self, DeliveryError> {
        let file = File::open(path).await.map_err(|source| DeliveryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            base_name: base_name.to_string(),
            chunk_size: usize::try_from(chunk_size.max(1)).unwrap_or(usize::MAX),
            next_index: 0,
        })
    }

    /// Returns the next window, or `None` at end of file. Only the final
    /// window may be shorter than the chunk size.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, DeliveryError> {
        let mut bytes = Vec::with_capacity(self.chunk_size);
        let mut window = (&mut self.file).take(self.chunk_size as u64);
        window
            .read_to_end(&mut bytes)
            .await
            .map_err(|source| DeliveryError::Read {
                path: self.path.clone(),
                source,
            })?;

        if bytes.is_empty() {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(Chunk {
            index,
            name: chunk_name(&self.base_name, index),
            bytes,
        }))
    }
}

/// Human-readable size in base-1024 units, e.g. `1.5 KB`.
pub fn format_file_size(size_bytes: u64) -> String {
    if size_bytes == 0 {
        return "0B".to_string();
    }

    let mut unit = 0;
    let mut scale = 1u64;
    while unit < SIZE_UNITS.len() - 1 && size_bytes >= scale * 1024 {
        scale *= 1024;
        unit += 1;
    }

    let value = ((size_bytes as f64 / scale as f64) * 100.0).round() / 100.0;
    if value.fract() == 0.0 {
        format!("{value:.1} {}", SIZE_UNITS[unit])
    } else {
        format!("{value} {}", SIZE_UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn formats_sizes_at_unit_boundaries() {
        assert_eq!(format_file_size(0), "0B");
        assert_eq!(format_file_size(1), "1.0 B");
        assert_eq!(format_file_size(1023), "1023.0 B");
        assert_eq!(format_file_size(1024), "1.0 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_file_size(1_288_490_189), "1.2 GB");
        assert_eq!(format_file_size(1_234_567), "1.18 MB");
    }

    #[test]
    fn sizes_beyond_gigabytes_stay_in_gigabytes() {
        assert_eq!(format_file_size(2 * 1024 * 1024 * 1024 * 1024), "2048.0 GB");
    }

    #[test]
    fn plan_is_single_up_to_limit() {
        let artifact = Artifact {
            path: PathBuf::from("x.mp4"),
            display_name: "x.mp4".to_string(),
            size_bytes: MAX_SINGLE_UNIT,
        };
        let plan = DeliveryPlan::for_artifact(artifact, SplitLimits::default());
        assert!(matches!(plan, DeliveryPlan::Single(_)));
        assert_eq!(plan.total_parts(), 1);
    }

    #[test]
    fn plan_counts_chunks_above_limit() {
        for size in [
            MAX_SINGLE_UNIT + 1,
            2 * CHUNK_SIZE,
            2 * CHUNK_SIZE + 1,
            10 * CHUNK_SIZE - 7,
        ] {
            let artifact = Artifact {
                path: PathBuf::from("x.mp4"),
                display_name: "x.mp4".to_string(),
                size_bytes: size,
            };
            let plan = DeliveryPlan::for_artifact(artifact, SplitLimits::default());
            assert_eq!(plan.total_parts(), size.div_ceil(CHUNK_SIZE));
            assert!(matches!(plan, DeliveryPlan::Chunked { .. }));
        }
    }

    #[test]
    fn chunk_names_are_zero_padded() {
        assert_eq!(chunk_name("clip.mp4", 0), "clip.mp4.part000");
        assert_eq!(chunk_name("clip.mp4", 12), "clip.mp4.part012");
        assert_eq!(chunk_name("clip.mp4", 1234), "clip.mp4.part1234");
    }

    #[tokio::test]
    async fn chunks_reassemble_into_original_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp4");
        let original: Vec<u8> = (0..10_007u32).map(|n| (n % 251) as u8).collect();
        tokio::fs::write(&path, &original).await.unwrap();

        let chunk_size = 1_000;
        let mut reader = ChunkReader::open(&path, "clip.mp4", chunk_size).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }

        assert_eq!(
            chunks.len() as u64,
            chunk_count(original.len() as u64, chunk_size)
        );
        let (last, full) = chunks.split_last().unwrap();
        assert!(full.iter().all(|chunk| chunk.size_bytes() == chunk_size));
        assert_eq!(last.size_bytes(), 7);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, position as u64);
        }
        assert_eq!(last.name, "clip.mp4.part010");

        let rebuilt: Vec<u8> = chunks.into_iter().flat_map(|chunk| chunk.bytes).collect();
        assert_eq!(rebuilt, original);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("even.bin");
        tokio::fs::write(&path, vec![7u8; 3_000]).await.unwrap();

        let mut reader = ChunkReader::open(&path, "even.bin", 1_000).await.unwrap();
        let mut count = 0;
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            assert_eq!(chunk.size_bytes(), 1_000);
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        let result = ChunkReader::open(&dir.path().join("gone"), "gone", 10).await;
        assert!(matches!(result, Err(DeliveryError::Read { .. })));
    }
}
