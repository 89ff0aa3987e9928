//! Baseline page-image strategies.
//!
//! Each strategy looks at the same read-only document from a different angle
//! and proposes candidates independently:
//!
//! - [`DomDirect`]: `img` elements with a resolvable content source.
//! - [`HtmlSource`]: image URLs anywhere in the serialized markup, including
//!   inline scripts and JSON blobs.
//! - [`PositionSorted`]: large rendered images in vertical reading order.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::document::{self, DocumentQuery, DomQuery, ElementSnapshot};
use crate::types::{ExtractionResult, PageImageCandidate, QueryError, StrategyId};

/// Attributes that may hold the real image source, in priority order.
const SOURCE_ATTRIBUTES: &[&str] = &[
    "src",
    "data-src",
    "data-lazy-src",
    "data-original",
    "data-url",
];

/// Hosting substrings that serve chapter pages.
const CONTENT_HOSTS: &[&str] = &[
    "blogspot",
    "googleusercontent",
    "wp-content/uploads",
    "imgur",
    "imgbox",
    "mangadex",
    "cdn",
];

/// Images with both edges below this are treated as decoration when size is known.
const MIN_DECORATION_EDGE: f64 = 50.0;

fn image_extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(?:jpe?g|png|webp|gif|avif|bmp)(?:[?#].*)?$")
            .expect("image extension regex is valid")
    })
}

/// URL fragments that mark site chrome rather than page content.
fn non_content_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)avatar|icon|logo|banner|(?:^|[/_\-.])ads?(?:[/_\-.]|$)")
            .expect("non-content regex is valid")
    })
}

fn html_image_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)(?:https?:)?//[^\s"'<>()\\]+?\.(?:jpe?g|png|webp|gif|avif)(?:\?[^\s"'<>\\]*)?"#,
        )
        .expect("html image url regex is valid")
    })
}

/// One way of proposing page-image candidates.
#[async_trait]
pub trait ImageStrategy: Send + Sync {
    fn id(&self) -> StrategyId;

    async fn extract(&self, doc: &dyn DocumentQuery) -> Result<ExtractionResult, QueryError>;
}

/// Resolve an element's image source through the lazy-load attributes.
///
/// `data:` placeholders are skipped; `srcset` is consulted last and its
/// final (usually largest) entry is used.
pub fn image_source(el: &ElementSnapshot) -> Option<&str> {
    for attr in SOURCE_ATTRIBUTES {
        if let Some(value) = el.attr(attr) {
            if !is_placeholder(value) {
                return Some(value.trim());
            }
        }
    }
    let srcset = el.attr("srcset").or_else(|| el.attr("data-srcset"))?;
    srcset
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
        .filter(|u| !is_placeholder(u))
        .last()
}

fn is_placeholder(value: &str) -> bool {
    value.trim_start().to_ascii_lowercase().starts_with("data:")
}

/// Whether a URL looks like page content rather than site chrome.
pub fn is_content_url(url: &str) -> bool {
    !non_content_re().is_match(url)
}

/// Positive content check for `img` sources: a known image host, a
/// chapter or page path fragment, or any digit.
pub fn looks_like_page_content(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    CONTENT_HOSTS.iter().any(|host| lower.contains(host))
        || lower.contains("/chapter/")
        || lower.contains("page")
        || lower.bytes().any(|b| b.is_ascii_digit())
}

pub fn has_image_extension(url: &str) -> bool {
    image_extension_re().is_match(url)
}

fn resolve(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.starts_with("//") {
        let scheme = base.map(Url::scheme).unwrap_or("https");
        return Some(format!("{scheme}:{raw}"));
    }
    match base {
        Some(b) => b.join(raw).ok().map(String::from),
        None => Url::parse(raw).ok().map(String::from),
    }
}

async fn document_url(doc: &dyn DocumentQuery) -> Option<Url> {
    document::string_value(doc, &DomQuery::Url)
        .await
        .ok()
        .and_then(|u| Url::parse(&u).ok())
}

/// `img` elements with an image-extension source that passes the content check.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomDirect;

impl DomDirect {
    /// Candidates from already-fetched `img` snapshots.
    pub fn from_snapshots(
        images: &[ElementSnapshot],
        base: Option<&Url>,
        strategy: StrategyId,
    ) -> Vec<PageImageCandidate> {
        let mut seen = HashSet::new();
        images
            .iter()
            .filter_map(|img| {
                let raw = image_source(img)?;
                let url = resolve(base, raw)?;
                if !has_image_extension(&url)
                    || !looks_like_page_content(&url)
                    || !is_content_url(&url)
                {
                    return None;
                }
                let (w, h) = (img.width(), img.height());
                if w > 0.0 && h > 0.0 && w < MIN_DECORATION_EDGE && h < MIN_DECORATION_EDGE {
                    return None;
                }
                seen.insert(url.clone()).then(|| PageImageCandidate {
                    url,
                    width: w,
                    height: h,
                    dom_position: img.index as f64,
                    source_strategy: strategy,
                })
            })
            .collect()
    }

    /// Run against the document's current state, tagging candidates with `strategy`.
    pub async fn collect(
        doc: &dyn DocumentQuery,
        strategy: StrategyId,
    ) -> Result<Vec<PageImageCandidate>, QueryError> {
        let base = document_url(doc).await;
        let images = document::elements(doc, "img").await?;
        Ok(Self::from_snapshots(&images, base.as_ref(), strategy))
    }
}

#[async_trait]
impl ImageStrategy for DomDirect {
    fn id(&self) -> StrategyId {
        StrategyId::DomDirect
    }

    async fn extract(&self, doc: &dyn DocumentQuery) -> Result<ExtractionResult, QueryError> {
        Ok(ExtractionResult {
            strategy_id: self.id(),
            candidates: Self::collect(doc, self.id()).await?,
        })
    }
}

/// Regex scan of the serialized markup.
#[derive(Debug, Clone, Copy)]
pub struct HtmlSource {
    pub min_url_len: usize,
}

impl Default for HtmlSource {
    fn default() -> Self {
        Self { min_url_len: 25 }
    }
}

impl HtmlSource {
    /// Image URLs in `html`, unescaped, filtered and deduplicated in order.
    pub fn scan(&self, html: &str, base: Option<&Url>) -> Vec<PageImageCandidate> {
        let unescaped = html.replace("\\/", "/").replace("&amp;", "&");
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for m in html_image_url_re().find_iter(&unescaped) {
            let Some(url) = resolve(base, m.as_str()) else {
                continue;
            };
            if url.len() < self.min_url_len || !is_content_url(&url) || !seen.insert(url.clone())
            {
                continue;
            }
            candidates.push(PageImageCandidate {
                url,
                width: 0.0,
                height: 0.0,
                dom_position: candidates.len() as f64,
                source_strategy: StrategyId::HtmlSource,
            });
        }
        candidates
    }
}

#[async_trait]
impl ImageStrategy for HtmlSource {
    fn id(&self) -> StrategyId {
        StrategyId::HtmlSource
    }

    async fn extract(&self, doc: &dyn DocumentQuery) -> Result<ExtractionResult, QueryError> {
        let base = document_url(doc).await;
        let html = document::string_value(doc, &DomQuery::Html).await?;
        Ok(ExtractionResult {
            strategy_id: self.id(),
            candidates: self.scan(&html, base.as_ref()),
        })
    }
}

/// Wide images ordered by vertical offset.
#[derive(Debug, Clone, Copy)]
pub struct PositionSorted {
    pub min_width: f64,
}

impl Default for PositionSorted {
    fn default() -> Self {
        Self { min_width: 200.0 }
    }
}

impl PositionSorted {
    pub fn rank(&self, images: &[ElementSnapshot], base: Option<&Url>) -> Vec<PageImageCandidate> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<PageImageCandidate> = images
            .iter()
            .filter(|img| img.width() > self.min_width)
            .filter_map(|img| {
                let url = resolve(base, image_source(img)?)?;
                if !is_content_url(&url) || !seen.insert(url.clone()) {
                    return None;
                }
                // Without layout, document order stands in for the offset.
                let offset = img.rect.map(|r| r.top).unwrap_or(img.index as f64);
                Some(PageImageCandidate {
                    url,
                    width: img.width(),
                    height: img.height(),
                    dom_position: offset,
                    source_strategy: StrategyId::PositionSorted,
                })
            })
            .collect();
        candidates.sort_by(|a, b| a.dom_position.total_cmp(&b.dom_position));
        candidates
    }
}

#[async_trait]
impl ImageStrategy for PositionSorted {
    fn id(&self) -> StrategyId {
        StrategyId::PositionSorted
    }

    async fn extract(&self, doc: &dyn DocumentQuery) -> Result<ExtractionResult, QueryError> {
        let base = document_url(doc).await;
        let images = document::elements(doc, "img").await?;
        Ok(ExtractionResult {
            strategy_id: self.id(),
            candidates: self.rank(&images, base.as_ref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Rect, StaticDocument};

    fn img(attrs: &[(&str, &str)]) -> ElementSnapshot {
        ElementSnapshot {
            tag: "img".into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn base() -> Url {
        Url::parse("https://reader.test/manga/demo/chapter-3/").unwrap()
    }

    #[test]
    fn test_image_source_priority() {
        let el = img(&[("src", "data:image/gif;base64,R0lG"), ("data-src", "/p/01.jpg")]);
        assert_eq!(image_source(&el), Some("/p/01.jpg"));
        let el = img(&[("srcset", "/p/a-400.jpg 400w, /p/a-1200.jpg 1200w")]);
        assert_eq!(image_source(&el), Some("/p/a-1200.jpg"));
        assert_eq!(image_source(&img(&[("alt", "x")])), None);
    }

    #[test]
    fn test_content_url_markers() {
        assert!(is_content_url("https://x.test/wp-content/uploads/2024/01/p01.jpg"));
        assert!(!is_content_url("https://x.test/ads/slot-1.jpg"));
        assert!(!is_content_url("https://x.test/img/user-avatar.png"));
        assert!(!is_content_url("https://x.test/banner_top.webp"));
    }

    #[test]
    fn test_page_content_markers() {
        assert!(looks_like_page_content("https://x.test/read/chapter/intro.jpg"));
        assert!(looks_like_page_content("https://bp.blogspot.com/a/b/cover.jpg"));
        assert!(looks_like_page_content("https://x.test/img/page-a.webp"));
        assert!(looks_like_page_content("https://x.test/p/07.png"));
        assert!(!looks_like_page_content("https://reader.test/assets/background.jpg"));
    }

    #[test]
    fn test_dom_direct_skips_site_art_without_content_markers() {
        let images = vec![
            img(&[("src", "/assets/background.jpg"), ("width", "1920"), ("height", "1080")]),
            img(&[("src", "/assets/p/01.jpg")]),
        ];
        let found = DomDirect::from_snapshots(&images, Some(&base()), StrategyId::DomDirect);
        let urls: Vec<_> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://reader.test/assets/p/01.jpg"]);
    }

    #[test]
    fn test_dom_direct_filters_and_resolves() {
        let images = vec![
            img(&[("src", "01.jpg")]),
            img(&[("src", "/static/logo.png")]),
            img(&[("src", "/reader/next")]),
            img(&[("data-lazy-src", "//cdn.test/p/02.webp?v=3")]),
            img(&[("src", "/tiny.png"), ("width", "16"), ("height", "16")]),
            img(&[("src", "01.jpg")]),
        ];
        let found = DomDirect::from_snapshots(&images, Some(&base()), StrategyId::DomDirect);
        let urls: Vec<_> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://reader.test/manga/demo/chapter-3/01.jpg",
                "https://cdn.test/p/02.webp?v=3",
            ]
        );
    }

    #[test]
    fn test_html_source_scan() {
        let html = r#"
            <script>var pages = ["https:\/\/cdn.reader.test\/data\/ch3\/001.jpg",
                                 "https:\/\/cdn.reader.test\/data\/ch3\/002.jpg"];</script>
            <img src="https://cdn.reader.test/user/avatar_77.png">
            <img src="https://a.io/x.png">
            <div style="background:url(https://cdn.reader.test/data/ch3/001.jpg)"></div>
        "#;
        let found = HtmlSource::default().scan(html, Some(&base()));
        let urls: Vec<_> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.reader.test/data/ch3/001.jpg",
                "https://cdn.reader.test/data/ch3/002.jpg",
            ]
        );
        assert_eq!(found[1].dom_position, 1.0);
    }

    #[test]
    fn test_position_sorted_uses_offset_then_index() {
        let mut low = img(&[("src", "/p/2.jpg")]);
        low.natural_width = Some(800.0);
        low.rect = Some(Rect {
            top: 2400.0,
            ..Default::default()
        });
        low.index = 1;
        let mut high = img(&[("src", "/p/1.jpg")]);
        high.natural_width = Some(800.0);
        high.rect = Some(Rect {
            top: 100.0,
            ..Default::default()
        });
        high.index = 9;
        let mut narrow = img(&[("src", "/p/thumb.jpg")]);
        narrow.natural_width = Some(150.0);

        let ranked = PositionSorted::default().rank(&[low, high, narrow], Some(&base()));
        let urls: Vec<_> = ranked.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://reader.test/p/1.jpg", "https://reader.test/p/2.jpg"]
        );
    }

    #[tokio::test]
    async fn test_strategies_against_static_document() {
        let html = r#"<html><body>
            <img src="/p/001.jpg" width="900" height="1300">
            <img src="/p/002.jpg" width="900" height="1300">
            <img src="/img/site-logo.png" width="120" height="40">
        </body></html>"#;
        let doc = StaticDocument::new("https://reader.test/manga/demo/chapter-1", html);

        let dom = DomDirect.extract(&doc).await.unwrap();
        assert_eq!(dom.len(), 2);
        assert_eq!(dom.strategy_id, StrategyId::DomDirect);

        let pos = PositionSorted::default().extract(&doc).await.unwrap();
        assert_eq!(pos.len(), 2);
        assert!(pos.candidates[0].dom_position < pos.candidates[1].dom_position);

        let src = HtmlSource::default().extract(&doc).await.unwrap();
        assert!(src.is_empty());
    }
}
