//! Chapterscope: heuristic extraction of chapter links, title metadata and
//! ordered page images from arbitrary reader pages.

pub mod chapters;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod download;
pub mod metadata;
pub mod pagination;
pub mod pipeline;
pub mod progress;
pub mod ranker;
pub mod retry;
pub mod strategies;
pub mod types;

pub use chapters::{discover_chapters, ChapterLinkExtractor};
pub use config::{ConfigError, EngineConfig};
pub use coordinator::{CoordinatorOutcome, ExtractionCoordinator};
pub use document::{DocumentQuery, DomQuery, ElementSnapshot, StaticDocument};
pub use download::{DecodedImage, HttpClient, ImageCache, ImageFetcher};
pub use metadata::extract_metadata;
pub use pipeline::{PageOutcome, PagePipeline};
pub use progress::{ProgressEvent, ProgressEventKind, ProgressReceiver, ProgressSender};
pub use retry::RetryManager;
pub use types::*;

pub use tokio_util::sync::CancellationToken;
