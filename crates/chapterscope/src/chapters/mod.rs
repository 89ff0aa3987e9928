//! Chapter-link discovery.
//!
//! Turns anchor and table-row snapshots from a title page into an
//! ordinal-keyed [`ChapterList`]. Candidates are filtered by series identity
//! and chapter-likeness, dated, and classified by the ordinal grammar in
//! [`ordinal`]. Anchors with no number at all are ordered by title and given
//! ordinals below 1.

pub mod dates;
pub mod ordinal;

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use url::Url;

use crate::document::{self, DocumentQuery, DomQuery, ElementSnapshot};
use crate::types::{ChapterList, ChapterRecord, ChapterType, Ordinal};
use dates::{find_date, strip_date, tidy_title};
use ordinal::{classify, OrdinalClass};

/// Path segments that introduce a series slug.
const SERIES_PREFIXES: &[&str] = &[
    "manga", "manhwa", "manhua", "series", "comic", "comics", "title", "titles", "webtoon",
    "webtoons", "book", "books", "novel", "story", "work",
];

/// Href fragments that mark a chapter link.
const CHAPTER_HREF_MARKERS: &[&str] = &[
    "chapter", "/ch-", "/ch/", "/ch_", "/c/", "episode", "/ep-", "/ep/", "issue", "/read/",
    "/viewer", "oneshot", "one-shot", "tpb", "omnibus", "/part-",
];

/// Ancestor depth searched for the new-chapter marker.
const FAST_PATH_DEPTH: usize = 4;

fn chapter_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:chapter|chap|ch|episode|ep|issue|volume|vol|part|pt|tpb|omnibus|one[\s\-]?shot|special|extra|bonus|full)\b|#\s*\d",
        )
        .expect("chapter text regex is valid")
    })
}

fn navigation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^[\W_]*(?:next|prev|previous|first|last|latest|newest|oldest|start reading|continue reading|read first|read last|read latest)\b",
        )
        .expect("navigation regex is valid")
    })
}

/// Pull chapter links out of a loaded title page.
///
/// Query failures degrade to an empty list; "no chapters" is not an error.
pub async fn discover_chapters(doc: &dyn DocumentQuery, now: NaiveDateTime) -> ChapterList {
    let url = document::string_value(doc, &DomQuery::Url)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("chapter discovery could not read document URL: {}", e);
            String::new()
        });
    let anchors = document::elements(doc, "a[href]").await.unwrap_or_else(|e| {
        tracing::warn!("chapter discovery anchor query failed: {}", e);
        Vec::new()
    });
    let rows = document::elements(doc, "tr").await.unwrap_or_else(|e| {
        tracing::debug!("chapter discovery row query failed: {}", e);
        Vec::new()
    });

    let list = ChapterLinkExtractor::new(&url, now).extract(&anchors, &rows);
    tracing::info!(
        "Chapter discovery: {} anchors, {} rows -> {} chapters",
        anchors.len(),
        rows.len(),
        list.len()
    );
    list
}

/// Stateless chapter extractor bound to one document URL and reference time.
#[derive(Debug, Clone)]
pub struct ChapterLinkExtractor {
    base: Option<Url>,
    series_token: Option<String>,
    now: NaiveDateTime,
}

/// A classified anchor waiting for title-only resolution.
struct Pending {
    url: String,
    title: String,
    upload_date: Option<NaiveDate>,
}

impl ChapterLinkExtractor {
    pub fn new(document_url: &str, now: NaiveDateTime) -> Self {
        let base = Url::parse(document_url).ok();
        let series_token = base.as_ref().and_then(series_token_from_url);
        Self {
            base,
            series_token,
            now,
        }
    }

    /// Series identity token derived from the document URL.
    pub fn series_token(&self) -> Option<&str> {
        self.series_token.as_deref()
    }

    /// Build the chapter list from anchor and `tr` snapshots.
    pub fn extract(&self, anchors: &[ElementSnapshot], rows: &[ElementSnapshot]) -> ChapterList {
        let row_dates = self.row_date_map(rows);
        let mut list = ChapterList::new();
        let mut numbered_urls: HashSet<String> = HashSet::new();
        let mut title_only: Vec<Pending> = Vec::new();

        for anchor in anchors {
            let Some(href) = anchor.attr("href") else {
                continue;
            };
            let Some(url) = self.resolve(href) else {
                continue;
            };
            if !self.same_series(&url) {
                continue;
            }

            let text = anchor.clean_text();
            let fast_path = has_new_chapter_marker(anchor);
            if !fast_path && !is_chapter_like(&url, &text) {
                continue;
            }
            if navigation_re().is_match(&text) && !text.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }

            let (title, upload_date) = self.split_date(anchor, &text, href, &url, &row_dates);

            match classify(&title, &url, fast_path) {
                OrdinalClass::Numbered {
                    ordinal,
                    chapter_type,
                } => {
                    let title = if title.is_empty() {
                        format!("Chapter {ordinal}")
                    } else {
                        title
                    };
                    numbered_urls.insert(url.clone());
                    list.insert(ChapterRecord {
                        ordinal: Ordinal::new(ordinal),
                        url,
                        title,
                        upload_date,
                        chapter_type,
                    });
                }
                OrdinalClass::TitleOnly => title_only.push(Pending {
                    url,
                    title,
                    upload_date,
                }),
                OrdinalClass::Rejected => {
                    tracing::trace!("rejected chapter candidate {:?}", text);
                }
            }
        }

        self.resolve_title_only(&mut list, title_only, &numbered_urls);
        list
    }

    /// Assign `k/100` ordinals to title-only entries in title order.
    fn resolve_title_only(
        &self,
        list: &mut ChapterList,
        mut pending: Vec<Pending>,
        numbered_urls: &HashSet<String>,
    ) {
        pending.retain(|p| !numbered_urls.contains(&p.url));
        pending.sort_by(|a, b| a.title.cmp(&b.title));
        let mut seen = HashSet::new();
        pending.retain(|p| seen.insert(p.url.clone()));

        // Stay strictly below 1 even for very long lists.
        let denominator = if pending.len() < 100 {
            100.0
        } else {
            10f64.powi((pending.len() as f64 + 1.0).log10().ceil() as i32)
        };

        for (k, p) in pending.into_iter().enumerate() {
            list.insert(ChapterRecord {
                ordinal: Ordinal::new((k + 1) as f64 / denominator),
                url: p.url,
                title: p.title,
                upload_date: p.upload_date,
                chapter_type: ChapterType::TitleOnly,
            });
        }
    }

    /// Find a date for the anchor and return the cleaned title with it.
    fn split_date(
        &self,
        anchor: &ElementSnapshot,
        text: &str,
        href: &str,
        url: &str,
        row_dates: &HashMap<String, NaiveDate>,
    ) -> (String, Option<NaiveDate>) {
        if let Some(m) = find_date(text, self.now) {
            return (strip_date(text, &m), Some(m.date));
        }
        let title = tidy_title(text);
        let from_row = row_dates
            .get(url)
            .or_else(|| row_dates.get(href))
            .or_else(|| row_dates.get(&row_text_key(text)))
            .copied();
        if from_row.is_some() {
            return (title, from_row);
        }
        let from_context = anchor
            .context_text
            .as_deref()
            .and_then(|ctx| find_date(ctx, self.now))
            .map(|m| m.date);
        (title, from_context)
    }

    /// Map each row's links and text cells to the date found in a sibling cell.
    fn row_date_map(&self, rows: &[ElementSnapshot]) -> HashMap<String, NaiveDate> {
        let mut map = HashMap::new();
        for row in rows {
            let Some(date) = row
                .children
                .iter()
                .filter(|cell| cell.hrefs.is_empty())
                .find_map(|cell| find_date(&cell.text, self.now).map(|m| m.date))
            else {
                continue;
            };
            for cell in &row.children {
                for href in &cell.hrefs {
                    map.entry(href.clone()).or_insert(date);
                    if let Some(resolved) = self.resolve(href) {
                        map.entry(resolved).or_insert(date);
                    }
                }
                if !cell.hrefs.is_empty() && !cell.text.is_empty() {
                    map.entry(row_text_key(&cell.text)).or_insert(date);
                }
            }
        }
        map
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        let lower = href.to_ascii_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || lower.starts_with("javascript:")
            || lower.starts_with("mailto:")
        {
            return None;
        }
        match &self.base {
            Some(base) => base.join(href).ok().map(String::from),
            None => Url::parse(href).ok().map(String::from),
        }
    }

    /// False when the URL names a different series under a known prefix.
    fn same_series(&self, url: &str) -> bool {
        let Some(token) = self.series_token.as_deref() else {
            return true;
        };
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let segments: Vec<String> = path_segments(&parsed);
        for pair in segments.windows(2) {
            if SERIES_PREFIXES.contains(&pair[0].as_str()) && !is_numeric(&pair[1]) {
                let slug = pair[1].as_str();
                return slug.starts_with(token) || token.starts_with(slug);
            }
        }
        true
    }
}

fn row_text_key(text: &str) -> String {
    format!("text:{}", document::collapse_whitespace(text).to_lowercase())
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segs| {
            segs.filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// Series slug from the document URL path.
fn series_token_from_url(url: &Url) -> Option<String> {
    let segments = path_segments(url);
    for (i, seg) in segments.iter().enumerate() {
        if SERIES_PREFIXES.contains(&seg.as_str()) {
            if let Some(slug) = segments[i + 1..].iter().find(|s| !is_numeric(s)) {
                return Some(slug.clone());
            }
        }
    }
    segments
        .into_iter()
        .filter(|s| !is_numeric(s) && s.len() >= 3 && !s.contains("chapter"))
        .max_by_key(|s| s.len())
}

fn is_chapter_like(url: &str, text: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    CHAPTER_HREF_MARKERS.iter().any(|m| lower.contains(m)) || chapter_text_re().is_match(text)
}

/// True when a close ancestor has a `data-*` value pointing at `/chapters/`.
fn has_new_chapter_marker(anchor: &ElementSnapshot) -> bool {
    anchor.ancestors.iter().take(FAST_PATH_DEPTH).any(|a| {
        a.attributes
            .iter()
            .any(|(k, v)| k.starts_with("data-") && v.contains("/chapters/"))
    })
}
