//! `DocumentQuery` host backed by static HTML.
//!
//! Answers queries with the `scraper` crate. There is no layout engine, so
//! snapshots carry no rect and sizes come from `width`/`height` attributes.
//! A document built from several pages treats clicks as pagination: a
//! numeric control jumps to that page, anything else advances by one.

use std::sync::Mutex;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::{
    collapse_whitespace, AncestorSnapshot, ChildSnapshot, DocumentQuery, DomQuery,
    ElementSnapshot,
};
use crate::types::QueryError;

/// Ancestors recorded per snapshot.
const MAX_ANCESTORS: usize = 6;

/// Context text is clipped to this many characters.
const MAX_CONTEXT_CHARS: usize = 300;

/// A document made of one or more pre-rendered HTML pages.
pub struct StaticDocument {
    url: String,
    pages: Vec<String>,
    current: Mutex<usize>,
}

impl StaticDocument {
    /// A single-page document.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self::paged(url, vec![html.into()])
    }

    /// A document whose clicks move between `pages`.
    pub fn paged(url: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            url: url.into(),
            pages,
            current: Mutex::new(0),
        }
    }

    /// Zero-based index of the page currently shown.
    pub fn current_page(&self) -> usize {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_html(&self) -> &str {
        self.pages
            .get(self.current_page())
            .map(String::as_str)
            .unwrap_or("")
    }

    fn answer(&self, query: &DomQuery) -> Result<Value, QueryError> {
        match query {
            DomQuery::Url => Ok(Value::String(self.url.clone())),
            DomQuery::Html => Ok(Value::String(self.current_html().to_string())),
            DomQuery::Text => {
                let document = Html::parse_document(self.current_html());
                let text = parse_selector("body")
                    .ok()
                    .and_then(|sel| document.select(&sel).next().map(|b| element_text(&b)))
                    .unwrap_or_default();
                Ok(Value::String(text))
            }
            DomQuery::Elements { selector } => {
                let document = Html::parse_document(self.current_html());
                let snapshots = snapshot_all(&document, selector)?;
                Ok(serde_json::to_value(snapshots)?)
            }
            DomQuery::Click { selector, index } => self.click(selector, *index).map(Value::Bool),
        }
    }

    fn click(&self, selector: &str, index: usize) -> Result<bool, QueryError> {
        if self.pages.len() <= 1 {
            return Ok(false);
        }
        let label = {
            let document = Html::parse_document(self.current_html());
            let sel = parse_selector(selector)?;
            match document.select(&sel).nth(index) {
                Some(el) => element_text(&el),
                None => return Ok(false),
            }
        };

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let last = self.pages.len() - 1;
        let target = page_number_from_label(&label)
            .filter(|n| (1..=self.pages.len()).contains(n))
            .map(|n| n - 1)
            .unwrap_or_else(|| (*current + 1).min(last));
        let moved = target != *current;
        *current = target;
        Ok(moved)
    }
}

#[async_trait]
impl DocumentQuery for StaticDocument {
    async fn evaluate(&self, query: &DomQuery) -> Result<Value, QueryError> {
        self.answer(query)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, QueryError> {
    Selector::parse(selector).map_err(|e| QueryError::Selector(format!("{selector}: {e:?}")))
}

fn page_number_from_label(label: &str) -> Option<usize> {
    let trimmed = label.trim();
    let digits = trimmed
        .strip_prefix("Page")
        .or_else(|| trimmed.strip_prefix("page"))
        .unwrap_or(trimmed)
        .trim();
    digits.parse().ok()
}

/// Collect all visible text of an element, whitespace-collapsed.
fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn attributes_of(el: &ElementRef<'_>) -> std::collections::BTreeMap<String, String> {
    el.value()
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn snapshot_all(document: &Html, selector: &str) -> Result<Vec<ElementSnapshot>, QueryError> {
    let sel = parse_selector(selector)?;
    let all = parse_selector("*")?;
    let href_sel = parse_selector("a[href]")?;

    let snapshots = document
        .select(&all)
        .enumerate()
        .filter(|(_, el)| sel.matches(el))
        .map(|(index, el)| snapshot(&el, index, &href_sel))
        .collect();
    Ok(snapshots)
}

fn snapshot(el: &ElementRef<'_>, index: usize, href_sel: &Selector) -> ElementSnapshot {
    let text = element_text(el);

    let ancestors: Vec<ElementRef<'_>> = el
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(MAX_ANCESTORS)
        .collect();

    let context_text = ancestors
        .iter()
        .map(element_text)
        .find(|t| !t.is_empty() && *t != text)
        .map(|t| t.chars().take(MAX_CONTEXT_CHARS).collect::<String>());

    let children = el
        .children()
        .filter_map(ElementRef::wrap)
        .map(|child| {
            let mut hrefs: Vec<String> = child
                .select(href_sel)
                .filter_map(|a| a.value().attr("href"))
                .map(String::from)
                .collect();
            if let Some(own) = child.value().attr("href") {
                hrefs.insert(0, own.to_string());
            }
            ChildSnapshot {
                tag: child.value().name().to_string(),
                text: element_text(&child),
                hrefs,
            }
        })
        .collect();

    ElementSnapshot {
        tag: el.value().name().to_string(),
        text,
        attributes: attributes_of(el),
        index,
        rect: None,
        natural_width: None,
        natural_height: None,
        ancestors: ancestors
            .iter()
            .map(|a| AncestorSnapshot {
                tag: a.value().name().to_string(),
                attributes: attributes_of(a),
            })
            .collect(),
        context_text,
        children,
    }
}
