//! Pagination walk: the escalation strategy for paged readers.
//!
//! Some readers show one page image at a time behind numbered or "next"
//! controls. The walk clicks through them, collecting DOM-direct candidates
//! after each settle delay, until the controls run out, a step adds nothing
//! new, the page cap is reached, or the token is cancelled.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::document::{self, DocumentQuery, ElementSnapshot};
use crate::progress::{ProgressEmitter, ProgressEventKind};
use crate::strategies::DomDirect;
use crate::types::{ExtractionResult, PageImageCandidate, QueryError, StrategyId};

/// Elements inspected for pagination controls.
const CONTROL_SELECTOR: &str = "a, button";

fn page_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^page\s*(\d{1,4})$").expect("page label regex is valid"))
}

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,4})\s*/\s*(\d{1,4})$").expect("page counter regex is valid"))
}

fn bare_int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{1,3}$").expect("bare page regex is valid"))
}

fn next_arrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:next(?:\s+page)?(?:\s*[›»→>])?|›|»|→|>|>>|⟩)$").expect("next arrow regex is valid")
    })
}

/// A recognised pagination control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    /// Jumps to a numbered page (`Page N` or a bare integer).
    Page(usize),
    /// `N/M` position indicator.
    Counter { current: usize, total: usize },
    /// Advances one page.
    Next,
}

/// Classify a control by its text and attributes.
pub fn classify_control(el: &ElementSnapshot) -> Option<PageControl> {
    let text = el.clean_text();
    let href = el.attr("href").unwrap_or("").to_ascii_lowercase();
    let class = el.attr("class").unwrap_or("").to_ascii_lowercase();

    // Controls that leave the chapter are never pagination.
    let lower_text = text.to_lowercase();
    if ["chapter", "chap", "episode"]
        .iter()
        .any(|k| lower_text.contains(k) || href.contains(k) || class.contains(k))
    {
        return None;
    }

    if let Some(caps) = page_label_re().captures(&text) {
        return caps[1].parse().ok().map(PageControl::Page);
    }
    if let Some(caps) = counter_re().captures(&text) {
        let current = caps[1].parse().ok()?;
        let total = caps[2].parse().ok()?;
        return Some(PageControl::Counter { current, total });
    }
    if bare_int_re().is_match(&text) {
        return text.parse().ok().map(PageControl::Page);
    }
    if next_arrow_re().is_match(&text)
        || el.attr("rel").is_some_and(|r| r.eq_ignore_ascii_case("next"))
        || class.split_whitespace().any(|c| c == "next" || c.starts_with("next-page"))
    {
        return Some(PageControl::Next);
    }
    None
}

/// Pick the control index to click to reach page `next_page`.
///
/// A numbered control for exactly that page wins over a next arrow.
pub fn choose_target(controls: &[(usize, PageControl)], next_page: usize) -> Option<usize> {
    controls
        .iter()
        .find(|(_, c)| *c == PageControl::Page(next_page))
        .or_else(|| controls.iter().find(|(_, c)| *c == PageControl::Next))
        .map(|(i, _)| *i)
}

/// Page count announced by an `N/M` indicator, if any.
pub fn counter_total(controls: &[(usize, PageControl)]) -> Option<usize> {
    controls.iter().find_map(|(_, c)| match c {
        PageControl::Counter { current, total } if current <= total => Some(*total),
        _ => None,
    })
}

/// Result of one walk.
#[derive(Debug, Clone)]
pub struct WalkOutcome {
    pub result: ExtractionResult,
    /// Pages whose images were collected, including the first.
    pub pages_visited: usize,
    pub cancelled: bool,
}

/// The pagination walker.
#[derive(Debug, Clone, Copy)]
pub struct PaginationWalk {
    pub max_pages: usize,
    pub settle_delay: Duration,
}

impl Default for PaginationWalk {
    fn default() -> Self {
        Self {
            max_pages: 30,
            settle_delay: Duration::from_millis(800),
        }
    }
}

impl PaginationWalk {
    /// Walk the document's pagination, starting from the current page.
    ///
    /// Query failures on later steps end the walk with what was collected;
    /// only a failure on the first page is returned as an error.
    pub async fn walk(
        &self,
        doc: &dyn DocumentQuery,
        token: &CancellationToken,
        progress: &ProgressEmitter,
    ) -> Result<WalkOutcome, QueryError> {
        let mut acc = Accumulator::default();

        if token.is_cancelled() {
            return Ok(acc.finish(0, true));
        }
        acc.add(DomDirect::collect(doc, StrategyId::PaginationWalk).await?);
        let mut pages_visited = 1;
        progress.emit(ProgressEventKind::WalkStep {
            page: 1,
            accumulated: acc.len() as u32,
        });

        while pages_visited < self.max_pages {
            if token.is_cancelled() {
                tracing::info!("Pagination walk cancelled after {} pages", pages_visited);
                return Ok(acc.finish(pages_visited, true));
            }

            let controls = match find_controls(doc).await {
                Ok(c) => c,
                Err(e) => {
                    progress.warn(format!("pagination control query failed: {e}"));
                    break;
                }
            };
            if let Some(total) = counter_total(&controls) {
                if pages_visited >= total {
                    tracing::debug!("page counter reports {} pages, stopping walk", total);
                    break;
                }
            }
            let Some(index) = choose_target(&controls, pages_visited + 1) else {
                tracing::debug!("no pagination control for page {}", pages_visited + 1);
                break;
            };
            match document::click(doc, CONTROL_SELECTOR, index).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    progress.warn(format!("pagination click failed: {e}"));
                    break;
                }
            }

            tokio::time::sleep(self.settle_delay).await;
            if token.is_cancelled() {
                tracing::info!("Pagination walk cancelled after {} pages", pages_visited);
                return Ok(acc.finish(pages_visited, true));
            }

            let found = match DomDirect::collect(doc, StrategyId::PaginationWalk).await {
                Ok(found) => found,
                Err(e) => {
                    progress.warn(format!("pagination step query failed: {e}"));
                    break;
                }
            };
            pages_visited += 1;
            let before = acc.len();
            acc.add(found);
            progress.emit(ProgressEventKind::WalkStep {
                page: pages_visited as u32,
                accumulated: acc.len() as u32,
            });
            if acc.len() == before {
                tracing::debug!("page {} added nothing new, stopping walk", pages_visited);
                break;
            }
        }

        let cancelled = token.is_cancelled();
        Ok(acc.finish(pages_visited, cancelled))
    }
}

async fn find_controls(doc: &dyn DocumentQuery) -> Result<Vec<(usize, PageControl)>, QueryError> {
    let elements = document::elements(doc, CONTROL_SELECTOR).await?;
    Ok(elements
        .iter()
        .enumerate()
        .filter_map(|(i, el)| classify_control(el).map(|c| (i, c)))
        .collect())
}

/// Unique candidates in walk order.
#[derive(Default)]
struct Accumulator {
    seen: HashSet<String>,
    candidates: Vec<PageImageCandidate>,
}

impl Accumulator {
    fn add(&mut self, found: Vec<PageImageCandidate>) {
        for mut candidate in found {
            if self.seen.insert(candidate.url.clone()) {
                candidate.dom_position = self.candidates.len() as f64;
                self.candidates.push(candidate);
            }
        }
    }

    fn len(&self) -> usize {
        self.candidates.len()
    }

    fn finish(self, pages_visited: usize, cancelled: bool) -> WalkOutcome {
        WalkOutcome {
            result: ExtractionResult {
                strategy_id: StrategyId::PaginationWalk,
                candidates: self.candidates,
            },
            pages_visited,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DomQuery, StaticDocument};
    use crate::progress;
    use async_trait::async_trait;
    use serde_json::Value;

    /// Serves images but fails every control lookup.
    struct BrokenControls(StaticDocument);

    #[async_trait]
    impl DocumentQuery for BrokenControls {
        async fn evaluate(&self, query: &DomQuery) -> Result<Value, QueryError> {
            if let DomQuery::Elements { selector } = query {
                if selector == CONTROL_SELECTOR {
                    return Err(QueryError::Script("controls detached".into()));
                }
            }
            self.0.evaluate(query).await
        }
    }

    fn control(text: &str, attrs: &[(&str, &str)]) -> ElementSnapshot {
        ElementSnapshot {
            tag: "a".into(),
            text: text.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn paged_reader(pages: usize) -> StaticDocument {
        let nav: String = (1..=pages)
            .map(|i| format!(r#"<a href="?p={i}">{i}</a>"#))
            .collect();
        let html = (1..=pages)
            .map(|i| {
                format!(
                    r#"<html><body>{nav}<a class="next" href="?next">Next</a>
                    <img src="/data/page-{i:03}.jpg" width="900" height="1300"></body></html>"#
                )
            })
            .collect();
        StaticDocument::paged("https://reader.test/manga/demo/chapter-1/", html)
    }

    fn walker() -> PaginationWalk {
        PaginationWalk {
            max_pages: 30,
            settle_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_classify_controls() {
        assert_eq!(classify_control(&control("Page 4", &[])), Some(PageControl::Page(4)));
        assert_eq!(classify_control(&control("7", &[])), Some(PageControl::Page(7)));
        assert_eq!(
            classify_control(&control("3 / 30", &[])),
            Some(PageControl::Counter {
                current: 3,
                total: 30
            })
        );
        assert_eq!(classify_control(&control("›", &[])), Some(PageControl::Next));
        assert_eq!(
            classify_control(&control("", &[("rel", "next")])),
            Some(PageControl::Next)
        );
        assert_eq!(classify_control(&control("Next Chapter", &[])), None);
        assert_eq!(
            classify_control(&control("Next", &[("href", "/manga/demo/chapter-2")])),
            None
        );
        assert_eq!(classify_control(&control("2024", &[])), None);
    }

    #[test]
    fn test_choose_target_prefers_numbered() {
        let controls = vec![
            (0, PageControl::Page(1)),
            (1, PageControl::Next),
            (2, PageControl::Page(2)),
        ];
        assert_eq!(choose_target(&controls, 2), Some(2));
        assert_eq!(choose_target(&controls, 5), Some(1));
        assert_eq!(choose_target(&[(0, PageControl::Page(1))], 2), None);
    }

    #[tokio::test]
    async fn test_walk_collects_every_page() {
        let doc = paged_reader(4);
        let token = CancellationToken::new();
        let outcome = walker()
            .walk(&doc, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        assert!(!outcome.cancelled);
        assert_eq!(outcome.pages_visited, 4);
        let urls: Vec<_> = outcome.result.candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls.len(), 4);
        assert!(urls[3].ends_with("/data/page-004.jpg"));
        assert!(outcome
            .result
            .candidates
            .iter()
            .all(|c| c.source_strategy == StrategyId::PaginationWalk));
    }

    #[tokio::test]
    async fn test_walk_respects_page_cap() {
        let doc = paged_reader(10);
        let token = CancellationToken::new();
        let walk = PaginationWalk {
            max_pages: 3,
            settle_delay: Duration::ZERO,
        };
        let outcome = walk
            .walk(&doc, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        assert_eq!(outcome.pages_visited, 3);
        assert_eq!(outcome.result.len(), 3);
    }

    #[tokio::test]
    async fn test_walk_stops_when_nothing_new() {
        let page = r#"<body><a href="?n">Next</a><img src="/data/same-page.jpg"></body>"#;
        let doc = StaticDocument::paged(
            "https://reader.test/c/1",
            vec![page.to_string(), page.to_string(), page.to_string()],
        );
        let token = CancellationToken::new();
        let outcome = walker()
            .walk(&doc, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        assert_eq!(outcome.result.len(), 1);
        assert_eq!(outcome.pages_visited, 2);
    }

    #[tokio::test]
    async fn test_walk_stops_at_counter_total() {
        let html = (1..=5)
            .map(|i| {
                format!(
                    r#"<html><body><button class="counter">{i}/2</button>
                    <a class="next" href="?next">Next</a>
                    <img src="/data/page-{i:03}.jpg"></body></html>"#
                )
            })
            .collect();
        let doc = StaticDocument::paged("https://reader.test/manga/demo/chapter-2/", html);
        let token = CancellationToken::new();
        let outcome = walker()
            .walk(&doc, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        assert_eq!(outcome.pages_visited, 2);
        assert_eq!(outcome.result.len(), 2);
    }

    #[test]
    fn test_counter_total_ignores_inconsistent_counter() {
        assert_eq!(counter_total(&[(0, PageControl::Counter { current: 1, total: 9 })]), Some(9));
        assert_eq!(counter_total(&[(0, PageControl::Counter { current: 9, total: 1 })]), None);
        assert_eq!(counter_total(&[(0, PageControl::Next)]), None);
    }

    #[tokio::test]
    async fn test_walk_warns_when_controls_fail() {
        let doc = BrokenControls(paged_reader(3));
        let (tx, mut rx) = progress::channel();
        let emitter = ProgressEmitter::new(Some(tx), "walk-warn");
        let outcome = walker()
            .walk(&doc, &CancellationToken::new(), &emitter)
            .await
            .unwrap();
        assert_eq!(outcome.pages_visited, 1);
        assert_eq!(outcome.result.len(), 1);

        let mut warnings = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEventKind::Warning { message } = event.event {
                warnings.push(message);
            }
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("controls detached"));
    }

    #[tokio::test]
    async fn test_walk_precancelled() {
        let doc = paged_reader(3);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = walker()
            .walk(&doc, &token, &ProgressEmitter::silent())
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.result.is_empty());
    }
}
