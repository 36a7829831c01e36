use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediadrop::delivery::DeliveryContext;
use mediadrop::splitter::{Artifact, Chunk};
use mediadrop::{
    DeliveryError, DeliverySink, Extractor, ExtractorError, FetchRequest, Metadata, Orchestrator,
    Settings, SplitLimits, UrlRegistry,
};
use tempfile::TempDir;

/// What the scripted extractor does for one selector.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Step {
    Fail(&'static str),
    Write { name: &'static str, bytes: Vec<u8> },
    /// Leaves a partial file behind, then fails.
    Partial { name: &'static str, bytes: Vec<u8> },
    /// Reports success without writing anything.
    Silent,
}

/// Extractor whose behaviour is keyed by selector. Unknown selectors fail.
#[derive(Default)]
pub struct ScriptedExtractor {
    steps: HashMap<String, Step>,
    probe: Option<Metadata>,
    pub requests: Mutex<Vec<FetchRequest>>,
}

#[allow(dead_code)]
impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, selector: &str, step: Step) -> Self {
        self.steps.insert(selector.to_string(), step);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.probe = Some(metadata);
        self
    }

    pub fn attempted_selectors(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.selector.clone())
            .collect()
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.destination.clone())
            .collect()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn probe(&self, _url: &str) -> Result<Metadata, ExtractorError> {
        self.probe.clone().ok_or_else(|| ExtractorError::Failed {
            message: "ERROR: Unable to extract metadata".to_string(),
        })
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<(), ExtractorError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.steps.get(&request.selector) {
            Some(Step::Write { name, bytes }) => {
                tokio::fs::write(request.destination.join(name), bytes)
                    .await
                    .map_err(ExtractorError::Spawn)?;
                Ok(())
            }
            Some(Step::Partial { name, bytes }) => {
                tokio::fs::write(request.destination.join(name), bytes)
                    .await
                    .map_err(ExtractorError::Spawn)?;
                Err(ExtractorError::Failed {
                    message: "ERROR: interrupted".to_string(),
                })
            }
            Some(Step::Silent) => Ok(()),
            Some(Step::Fail(message)) => Err(ExtractorError::Failed {
                message: message.to_string(),
            }),
            None => Err(ExtractorError::Failed {
                message: format!("ERROR: Requested format {} is not available", request.selector),
            }),
        }
    }
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Artifact { name: String, bytes: Vec<u8> },
    Announce { name: String, total_parts: u64 },
    Chunk { index: u64, name: String, bytes: Vec<u8>, total_parts: u64 },
}

/// Sink that records everything it receives. Optionally rejects one chunk.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Delivered>>,
    pub contexts: Mutex<Vec<DeliveryContext>>,
    /// When each chunk arrived, on the tokio clock.
    pub chunk_times: Mutex<Vec<tokio::time::Instant>>,
    pub reject_chunk: Option<u64>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_chunk(index: u64) -> Self {
        Self {
            reject_chunk: Some(index),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<Delivered> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send_artifact(
        &self,
        context: &DeliveryContext,
        artifact: &Artifact,
    ) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(&artifact.path).await?;
        self.contexts.lock().unwrap().push(context.clone());
        self.events.lock().unwrap().push(Delivered::Artifact {
            name: artifact.display_name.clone(),
            bytes,
        });
        Ok(())
    }

    async fn announce_split(
        &self,
        context: &DeliveryContext,
        artifact: &Artifact,
        total_parts: u64,
    ) -> Result<(), DeliveryError> {
        self.contexts.lock().unwrap().push(context.clone());
        self.events.lock().unwrap().push(Delivered::Announce {
            name: artifact.display_name.clone(),
            total_parts,
        });
        Ok(())
    }

    async fn send_chunk(
        &self,
        _context: &DeliveryContext,
        chunk: &Chunk,
        total_parts: u64,
    ) -> Result<(), DeliveryError> {
        if self.reject_chunk == Some(chunk.index) {
            return Err(DeliveryError::Rejected {
                name: chunk.name.clone(),
                message: "Request Entity Too Large".to_string(),
            });
        }
        self.chunk_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        self.events.lock().unwrap().push(Delivered::Chunk {
            index: chunk.index,
            name: chunk.name.clone(),
            bytes: chunk.bytes.clone(),
            total_parts,
        });
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub extractor: Arc<ScriptedExtractor>,
    pub scratch_root: TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(extractor: ScriptedExtractor) -> Self {
        Self::with_limits(extractor, SplitLimits::default())
    }

    pub fn with_limits(extractor: ScriptedExtractor, split: SplitLimits) -> Self {
        Self::with_pacing(extractor, split, Duration::ZERO)
    }

    pub fn with_pacing(extractor: ScriptedExtractor, split: SplitLimits, pacing: Duration) -> Self {
        let scratch_root = TempDir::new().unwrap();
        let settings = Settings {
            scratch_dir: Some(scratch_root.path().to_path_buf()),
            chunk_pacing: pacing,
            split,
            ..Settings::default()
        };
        let extractor = Arc::new(extractor);
        let orchestrator =
            Orchestrator::new(extractor.clone(), UrlRegistry::new(3600, 100), &settings);
        Self {
            orchestrator,
            extractor,
            scratch_root,
        }
    }

    /// Number of entries left under the scratch root.
    pub fn leftover_scratch_dirs(&self) -> usize {
        std::fs::read_dir(self.scratch_root.path()).unwrap().count()
    }

    pub fn assert_scratch_removed(&self) {
        for destination in self.extractor.destinations() {
            assert!(
                !destination.exists(),
                "scratch dir {} still exists",
                destination.display()
            );
        }
        assert_eq!(self.leftover_scratch_dirs(), 0);
    }
}

pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
