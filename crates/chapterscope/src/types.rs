//! Core data types for chapter records, title metadata, and page-image candidates.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Rational sort key of a chapter.
///
/// Ordinals are not necessarily integers: title-only entries live in
/// `(0, 1)` and some special types use fixed synthetic values. Ordering and
/// equality use `f64::total_cmp` so ordinals can key a `BTreeMap`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordinal(f64);

impl Ordinal {
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for Ordinal {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Ordinal {}

impl PartialOrd for Ordinal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordinal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Ordinal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<f64> for Ordinal {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

/// How a chapter's ordinal was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterType {
    Normal,
    Part,
    Full,
    Tpb,
    Omnibus,
    Special,
    Oneshot,
    Extra,
    Bonus,
    TitleOnly,
}

impl ChapterType {
    /// Snake-case tag used in the persisted schema.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Part => "part",
            Self::Full => "full",
            Self::Tpb => "tpb",
            Self::Omnibus => "omnibus",
            Self::Special => "special",
            Self::Oneshot => "oneshot",
            Self::Extra => "extra",
            Self::Bonus => "bonus",
            Self::TitleOnly => "title_only",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        let ty = match tag.trim().to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "part" => Self::Part,
            "full" => Self::Full,
            "tpb" => Self::Tpb,
            "omnibus" => Self::Omnibus,
            "special" => Self::Special,
            "oneshot" | "one_shot" | "one-shot" => Self::Oneshot,
            "extra" => Self::Extra,
            "bonus" => Self::Bonus,
            "title_only" | "titleonly" => Self::TitleOnly,
            _ => return None,
        };
        Some(ty)
    }
}

/// A single chapter link discovered on a title page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub ordinal: Ordinal,
    pub url: String,
    pub title: String,
    pub upload_date: Option<NaiveDate>,
    pub chapter_type: ChapterType,
}

/// Chapter record as exchanged with storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedChapter {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_type: Option<String>,
    pub chapter_number: f64,
}

impl From<&ChapterRecord> for PersistedChapter {
    fn from(record: &ChapterRecord) -> Self {
        Self {
            url: record.url.clone(),
            title: record.title.clone(),
            upload_date: record
                .upload_date
                .map(|d| d.format(PERSISTED_DATE_FORMAT).to_string()),
            chapter_type: Some(record.chapter_type.as_str().to_string()),
            chapter_number: record.ordinal.value(),
        }
    }
}

impl From<PersistedChapter> for ChapterRecord {
    fn from(p: PersistedChapter) -> Self {
        Self {
            ordinal: Ordinal::new(p.chapter_number),
            upload_date: p
                .upload_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, PERSISTED_DATE_FORMAT).ok()),
            chapter_type: p
                .chapter_type
                .as_deref()
                .and_then(ChapterType::parse)
                .unwrap_or(ChapterType::Normal),
            url: p.url,
            title: p.title,
        }
    }
}

const PERSISTED_DATE_FORMAT: &str = "%Y-%m-%d";

/// Ordinal-keyed chapter map produced by one extraction run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterList {
    chapters: BTreeMap<Ordinal, ChapterRecord>,
}

impl ChapterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, resolving ordinal collisions.
    ///
    /// The first record for an ordinal is kept, unless it has no upload date
    /// and the newcomer has one. Returns `true` if the record was stored.
    pub fn insert(&mut self, record: ChapterRecord) -> bool {
        match self.chapters.get(&record.ordinal) {
            Some(existing) if existing.upload_date.is_some() || record.upload_date.is_none() => {
                tracing::debug!(
                    "ordinal {} already taken by {:?}, dropping {:?}",
                    record.ordinal,
                    existing.title,
                    record.title
                );
                false
            }
            _ => {
                self.chapters.insert(record.ordinal, record);
                true
            }
        }
    }

    pub fn get(&self, ordinal: Ordinal) -> Option<&ChapterRecord> {
        self.chapters.get(&ordinal)
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    /// Chapters in ascending ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = &ChapterRecord> {
        self.chapters.values()
    }

    /// Chapters in descending ordinal order (newest first).
    pub fn newest_first(&self) -> impl Iterator<Item = &ChapterRecord> {
        self.chapters.values().rev()
    }

    /// Serialize into the persisted schema, ordered newest first.
    pub fn to_persisted(&self) -> Vec<PersistedChapter> {
        self.newest_first().map(PersistedChapter::from).collect()
    }

    pub fn from_persisted(records: Vec<PersistedChapter>) -> Self {
        let mut list = Self::new();
        for record in records {
            list.insert(record.into());
        }
        list
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_persisted())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let records: Vec<PersistedChapter> = serde_json::from_str(json)?;
        Ok(Self::from_persisted(records))
    }
}

/// Publication status of a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Releasing,
    Completed,
    Hiatus,
    Dropped,
}

/// Title-level metadata. Every field is independently optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TitleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        rename = "title_image",
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PublicationStatus>,
}

impl TitleMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.cover_image_url.is_none()
            && self.author.is_none()
            && self.status.is_none()
    }
}

/// Identifies the strategy that proposed a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Escalation strategy: walks pagination controls.
    PaginationWalk,
    DomDirect,
    HtmlSource,
    PositionSorted,
}

impl StrategyId {
    /// Strategies run concurrently before escalation is considered.
    pub const BASELINE: [StrategyId; 3] = [
        StrategyId::DomDirect,
        StrategyId::HtmlSource,
        StrategyId::PositionSorted,
    ];

    /// Position in the aggregate; earlier strategies win URL ties.
    pub fn aggregate_rank(self) -> u8 {
        match self {
            Self::DomDirect => 0,
            Self::HtmlSource => 1,
            Self::PositionSorted => 2,
            Self::PaginationWalk => 3,
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaginationWalk => write!(f, "pagination-walk"),
            Self::DomDirect => write!(f, "dom-direct"),
            Self::HtmlSource => write!(f, "html-source"),
            Self::PositionSorted => write!(f, "position-sorted"),
        }
    }
}

/// A provisional page image proposed by one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImageCandidate {
    pub url: String,
    pub width: f64,
    pub height: f64,
    /// Index or vertical offset; only comparable within one strategy.
    pub dom_position: f64,
    pub source_strategy: StrategyId,
}

/// Output of a single strategy invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub strategy_id: StrategyId,
    pub candidates: Vec<PageImageCandidate>,
}

impl ExtractionResult {
    pub fn empty(strategy_id: StrategyId) -> Self {
        Self {
            strategy_id,
            candidates: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Deduplicated candidates in final reading order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedImageSet {
    pub images: Vec<PageImageCandidate>,
}

impl RankedImageSet {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.images.iter().map(|c| c.url.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageImageCandidate> {
        self.images.iter()
    }
}

/// Failure raised by a document host while answering a query.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("Query not supported by host: {0}")]
    Unsupported(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Malformed host response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Taxonomy tag carried by every engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ScriptEvaluation,
    NoResultsFound,
    Network,
    Timeout,
    Cancelled,
}

/// Errors surfaced by the extraction engine.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("Script evaluation failed: {0}")]
    ScriptEvaluation(#[from] QueryError),

    #[error("No results found")]
    NoResultsFound,

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,
}

impl ExtractionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ScriptEvaluation(_) => ErrorKind::ScriptEvaluation,
            Self::NoResultsFound => ErrorKind::NoResultsFound,
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Convenience result type.
pub type EngineResult<T> = Result<T, ExtractionError>;
