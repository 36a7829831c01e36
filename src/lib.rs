//! Media URL download pipeline.
//!
//! A submitted URL is classified, remembered under a short handle, and later
//! resolved into a downloaded file through an ordered list of format
//! selectors. The finished file is handed to a [`DeliverySink`] either whole
//! or as fixed-size parts.

pub mod config;
pub mod delivery;
pub mod error;
pub mod extractor;
pub mod filename;
pub mod orchestrator;
pub mod platform;
pub mod quality;
pub mod registry;
pub mod splitter;

pub use config::Settings;
pub use delivery::{DeliveryKind, DeliverySink};
pub use error::{DeliveryError, ExtractorError, FetchError};
pub use extractor::{Extractor, FetchRequest, Metadata, YtDlp};
pub use orchestrator::{DeliveryReport, Orchestrator, Stage, Submission};
pub use platform::Platform;
pub use quality::Quality;
pub use registry::UrlRegistry;
pub use splitter::{Chunk, DeliveryPlan, SplitLimits, format_file_size};
