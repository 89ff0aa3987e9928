//! Document abstraction over the host rendering engine.
//!
//! The engine never talks to a browser directly. It sends typed
//! [`DomQuery`] requests to a [`DocumentQuery`] implementation and decodes
//! the JSON-like answers into [`ElementSnapshot`]s in a single validating
//! step. Hosts with a scripting runtime (see the CLI's Chromium host) answer
//! with small scripts; [`StaticDocument`] answers from parsed HTML.

pub mod static_html;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::QueryError;

pub use static_html::StaticDocument;

/// A request the engine can make of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum DomQuery {
    /// The document's own URL, as a string.
    Url,
    /// The full serialized document, as a string.
    Html,
    /// Visible body text, as a string.
    Text,
    /// All elements matching a CSS selector, as an array of snapshots.
    Elements { selector: String },
    /// Simulate a click on the `index`-th match of `selector`; returns a bool.
    Click { selector: String, index: usize },
}

/// Host-provided document surface.
#[async_trait]
pub trait DocumentQuery: Send + Sync {
    /// Evaluate a query and return the host's JSON-like answer.
    async fn evaluate(&self, query: &DomQuery) -> Result<Value, QueryError>;
}

/// Absolute layout box of an element, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

/// Tag and attributes of an ancestor element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AncestorSnapshot {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl AncestorSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Lowercased `class` and `id` joined, for keyword checks.
    pub fn class_and_id(&self) -> String {
        format!(
            "{} {}",
            self.attr("class").unwrap_or(""),
            self.attr("id").unwrap_or("")
        )
        .to_lowercase()
    }
}

/// Summary of a direct child element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildSnapshot {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    /// `href` values of anchors inside the child.
    #[serde(default)]
    pub hrefs: Vec<String>,
}

/// Everything the engine needs to know about one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Position in document order among all elements.
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub natural_width: Option<f64>,
    #[serde(default)]
    pub natural_height: Option<f64>,
    /// Nearest ancestor first.
    #[serde(default)]
    pub ancestors: Vec<AncestorSnapshot>,
    /// Text of the surrounding container (parent or nearest sibling block).
    #[serde(default)]
    pub context_text: Option<String>,
    #[serde(default)]
    pub children: Vec<ChildSnapshot>,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Whitespace-collapsed text content.
    pub fn clean_text(&self) -> String {
        collapse_whitespace(&self.text)
    }

    /// Rendered width, falling back to the declared `width` attribute.
    pub fn width(&self) -> f64 {
        self.natural_width
            .or(self.rect.map(|r| r.width))
            .or_else(|| self.attr("width").and_then(parse_dimension))
            .unwrap_or(0.0)
    }

    /// Rendered height, falling back to the declared `height` attribute.
    pub fn height(&self) -> f64 {
        self.natural_height
            .or(self.rect.map(|r| r.height))
            .or_else(|| self.attr("height").and_then(parse_dimension))
            .unwrap_or(0.0)
    }
}

fn parse_dimension(raw: &str) -> Option<f64> {
    raw.trim()
        .trim_end_matches("px")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Query all elements matching `selector` and decode them.
pub async fn elements(
    doc: &dyn DocumentQuery,
    selector: &str,
) -> Result<Vec<ElementSnapshot>, QueryError> {
    let value = doc
        .evaluate(&DomQuery::Elements {
            selector: selector.to_string(),
        })
        .await?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value)?)
}

/// Query a string-valued property (`Url`, `Html`, `Text`).
pub async fn string_value(doc: &dyn DocumentQuery, query: &DomQuery) -> Result<String, QueryError> {
    match doc.evaluate(query).await? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// Ask the host to click an element. Returns whether the click happened.
pub async fn click(
    doc: &dyn DocumentQuery,
    selector: &str,
    index: usize,
) -> Result<bool, QueryError> {
    let value = doc
        .evaluate(&DomQuery::Click {
            selector: selector.to_string(),
            index,
        })
        .await?;
    Ok(value.as_bool().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_decodes_sparse_json() {
        let snap: ElementSnapshot = serde_json::from_value(json!({
            "tag": "img",
            "attributes": { "src": "/p/1.jpg", "width": "800px" }
        }))
        .unwrap();
        assert_eq!(snap.attr("src"), Some("/p/1.jpg"));
        assert_eq!(snap.width(), 800.0);
        assert_eq!(snap.height(), 0.0);
        assert!(snap.ancestors.is_empty());
    }

    #[test]
    fn test_natural_size_wins_over_attribute() {
        let snap = ElementSnapshot {
            tag: "img".into(),
            natural_width: Some(1200.0),
            attributes: [("width".to_string(), "300".to_string())].into(),
            ..Default::default()
        };
        assert_eq!(snap.width(), 1200.0);
    }

    #[test]
    fn test_blank_attribute_is_absent() {
        let snap = ElementSnapshot {
            tag: "img".into(),
            attributes: [("src".to_string(), "  ".to_string())].into(),
            ..Default::default()
        };
        assert_eq!(snap.attr("src"), None);
    }

    #[test]
    fn test_query_serialization() {
        let q = DomQuery::Click {
            selector: "a.page".into(),
            index: 2,
        };
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["query"], "click");
        assert_eq!(v["index"], 2);
    }
}
