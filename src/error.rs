//! Error types for the download pipeline.
//!
//! [`FetchError`] is the only error that leaves the orchestrator. Extractor
//! and filesystem failures are converted into one of its variants before they
//! reach a caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Classified outcome of a failed submission or orchestration call.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The text is not an http(s) URL on a supported platform.
    #[error("unsupported or malformed URL: {url}")]
    InvalidUrl { url: String },

    /// The handle is unknown, expired, or was evicted.
    #[error("unknown URL handle: {id}")]
    UnknownHandle { id: String },

    /// Metadata probing failed. Never returned to callers, only logged.
    #[error("metadata probe failed for {url}: {source}")]
    ProbeFailure {
        url: String,
        #[source]
        source: ExtractorError,
    },

    /// Every selector in the fallback list failed.
    #[error("all formats failed for {url} (tried {attempted:?}): {last_error}")]
    AllFormatsExhausted {
        url: String,
        attempted: Vec<String>,
        last_error: String,
    },

    /// The extractor reported success but no usable file was found.
    #[error("no output produced in {}: {detail}", scratch.display())]
    NoOutputProduced { scratch: PathBuf, detail: String },

    /// Reading the artifact or handing it to the sink failed.
    #[error("delivery failed after {delivered} artifact(s): {source}")]
    DeliveryFailure {
        delivered: usize,
        #[source]
        source: DeliveryError,
    },
}

impl FetchError {
    /// Short text suitable for showing to the requesting user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => {
                "Invalid URL. Send a public link from one of the supported platforms."
            }
            Self::UnknownHandle { .. } => "This link has expired. Send the URL again.",
            Self::ProbeFailure { .. } => "Could not read media details.",
            Self::AllFormatsExhausted { .. } => {
                "Download failed. Check that the URL is public, try another quality, or retry later."
            }
            Self::NoOutputProduced { .. } => "Download error: the file could not be found.",
            Self::DeliveryFailure { .. } => "The file was downloaded but could not be sent.",
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "INVALID_URL",
            Self::UnknownHandle { .. } => "UNKNOWN_HANDLE",
            Self::ProbeFailure { .. } => "PROBE_FAILURE",
            Self::AllFormatsExhausted { .. } => "ALL_FORMATS_EXHAUSTED",
            Self::NoOutputProduced { .. } => "NO_OUTPUT_PRODUCED",
            Self::DeliveryFailure { .. } => "DELIVERY_FAILURE",
        }
    }
}

/// Failure of a single extractor invocation.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extractor binary `{binary}` is not installed")]
    NotInstalled { binary: String },

    #[error("extractor timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("extractor failed: {message}")]
    Failed { message: String },

    #[error("could not run extractor: {0}")]
    Spawn(#[source] io::Error),

    #[error("could not parse extractor metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Failure while reading an artifact or handing it to a sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sink rejected {name}: {message}")]
    Rejected { name: String, message: String },

    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),
}
