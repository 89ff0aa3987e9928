//! Title-level metadata heuristics: title, cover, author, status.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::document::{self, DocumentQuery, DomQuery, ElementSnapshot};
use crate::strategies::image_source;
use crate::types::{PublicationStatus, TitleMetadata};

/// Minimum cover edge in pixels when the size is known.
const MIN_COVER_EDGE: f64 = 100.0;

/// Longest author string accepted after cleaning.
const MAX_AUTHOR_CHARS: usize = 60;

const URL_TITLE_PREFIXES: &[&str] = &[
    "manga", "manhwa", "manhua", "series", "comic", "comics", "title", "titles", "webtoon",
    "webtoons", "book", "books", "novel", "story", "work", "read", "info", "detail", "details",
];

const TITLE_SELECTORS: &str = "[class*=title], [id*=title], [class*=series], [id*=series], [class*=manga], [id*=manga]";
const AUTHOR_SELECTORS: &str = "[class*=author], [id*=author], [itemprop=author], a[href*='/author/']";
const STATUS_SELECTORS: &str = "[class*=status], [id*=status]";
const STATUS_ATTR_SELECTORS: &str = "[data-status], [itemprop*=status], meta[property*=status], meta[name*=status]";

fn author_colon_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:author\(s\)|authors?|writers?|written by|story by|created by|by|creators?|mangaka)\s*:\s*([^\n|•]{2,120})",
        )
        .expect("author label regex is valid")
    })
}

fn author_bare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?i:written by|story by|author|by)\s+(\p{Lu}[\w.'\-]*(?:\s+\p{Lu}[\w.'\-]*){0,3})")
            .expect("bare author regex is valid")
    })
}

fn next_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s(?:status|genres?|genre\(s\)|artists?|illustrators?|published|type|rating|released|serialization|alternative|updated|views|tags|chapters?|year)\b",
        )
        .expect("label terminator regex is valid")
    })
}

fn parenthetical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("parenthetical regex is valid"))
}

fn et_al_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*(?:,\s*)?(?:and others|et\.? al\.?)").expect("et al regex is valid")
    })
}

fn author_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*(?:,|;|&|/|\band\b)\s*").expect("author split regex is valid"))
}

fn author_row_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:author\(s\)|authors?|creators?|writers?)\s*:?$").expect("author row regex is valid")
    })
}

fn status_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bstatus\s*:?\s*([a-z]+(?:\s+[a-z]+)?)").expect("status phrase regex is valid")
    })
}

fn status_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(completed?|finished|ongoing|releasing|publishing|continuing|hiatus|on\s+hold|paused|dropped|cancell?ed|canceled|discontinued|axed)\b",
        )
        .expect("status word regex is valid")
    })
}

/// Extract title metadata from a loaded title page.
///
/// Returns `None` when no field could be determined.
pub async fn extract_metadata(doc: &dyn DocumentQuery) -> Option<TitleMetadata> {
    let url = document::string_value(doc, &DomQuery::Url)
        .await
        .unwrap_or_default();
    let text = document::string_value(doc, &DomQuery::Text)
        .await
        .unwrap_or_default();

    let title = match title_from_url(&url) {
        Some(t) => Some(t),
        None => {
            let mut headings = query(doc, "h1").await;
            headings.extend(query(doc, "h2").await);
            headings.extend(query(doc, TITLE_SELECTORS).await);
            dom_title(&headings)
        }
    };

    let cover_image_url = pick_cover(&query(doc, "img").await, &url);

    let author = match author_from_text(&text) {
        Some(a) => Some(a),
        None => author_from_elements(&query(doc, AUTHOR_SELECTORS).await)
            .or(author_from_rows(&query(doc, "tr").await)),
    };

    let status = match status_from_text(&text) {
        Some(s) => Some(s),
        None => status_from_elements(&query(doc, STATUS_SELECTORS).await)
            .or(status_from_attributes(&query(doc, STATUS_ATTR_SELECTORS).await)),
    };

    let meta = TitleMetadata {
        title,
        cover_image_url,
        author,
        status,
    };
    tracing::debug!("Metadata for {}: {:?}", url, meta);
    (!meta.is_empty()).then_some(meta)
}

async fn query(doc: &dyn DocumentQuery, selector: &str) -> Vec<ElementSnapshot> {
    document::elements(doc, selector).await.unwrap_or_else(|e| {
        tracing::warn!("metadata query {:?} failed: {}", selector, e);
        Vec::new()
    })
}

/// Title derived from the URL path, title-cased.
pub fn title_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let mut segments: Vec<String> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(|s| strip_extension(s).to_lowercase())
        .collect();

    while let Some(last) = segments.last() {
        if is_numeric(last) || last.contains("chapter") || is_chapter_token(last) {
            segments.pop();
        } else {
            break;
        }
    }
    let slug = segments
        .into_iter()
        .rev()
        .find(|s| !URL_TITLE_PREFIXES.contains(&s.as_str()) && !is_numeric(s))?;

    let words: Vec<String> = slug
        .replace("%20", " ")
        .split(|c: char| c == '-' || c == '_' || c == '+' || c == '.' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect();
    if words.is_empty() || !words.iter().any(|w| w.chars().any(char::is_alphabetic)) {
        return None;
    }
    Some(words.join(" "))
}

fn strip_extension(segment: &str) -> &str {
    for ext in [".html", ".htm", ".php", ".aspx", ".jsp"] {
        if let Some(stem) = segment.strip_suffix(ext) {
            return stem;
        }
    }
    segment
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// `c12`, `ch-3`, `ep5`, `episode-2`.
fn is_chapter_token(s: &str) -> bool {
    let stripped = s
        .trim_start_matches("episode")
        .trim_start_matches("ch")
        .trim_start_matches("ep")
        .trim_start_matches('c')
        .trim_start_matches(['-', '_']);
    stripped.len() < s.len() && is_numeric(stripped)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// First usable heading or title-like element text.
pub fn dom_title(candidates: &[ElementSnapshot]) -> Option<String> {
    candidates
        .iter()
        .map(ElementSnapshot::clean_text)
        .find(|t| !t.is_empty() && t.chars().count() <= 200)
}

/// Highest-scoring cover image, resolved against `base_url`.
pub fn pick_cover(images: &[ElementSnapshot], base_url: &str) -> Option<String> {
    let base = Url::parse(base_url).ok();
    images
        .iter()
        .filter_map(|img| {
            let src = image_source(img)?;
            let score = cover_score(img, src)?;
            let resolved = match &base {
                Some(b) => b.join(src).ok()?.to_string(),
                None => src.to_string(),
            };
            Some((score, resolved))
        })
        .fold(None, |best: Option<(f64, String)>, (score, url)| match best {
            Some((s, _)) if s >= score => best,
            _ => Some((score, url)),
        })
        .map(|(_, url)| url)
}

fn cover_score(img: &ElementSnapshot, src: &str) -> Option<f64> {
    let (w, h) = (img.width(), img.height());
    let size_known = w > 0.0 && h > 0.0;
    if size_known && (w < MIN_COVER_EDGE || h < MIN_COVER_EDGE) {
        return None;
    }

    let haystack = format!(
        "{} {} {} {}",
        src,
        img.attr("alt").unwrap_or(""),
        img.attr("class").unwrap_or(""),
        img.attr("id").unwrap_or("")
    )
    .to_lowercase();
    let mut score = 0.0;
    if haystack.contains("cover") {
        score += 50.0;
    }
    if haystack.contains("title") {
        score += 25.0;
    }
    if img.ancestors.iter().any(|a| {
        let ci = a.class_and_id();
        ["cover", "hero", "banner", "poster", "thumb"]
            .iter()
            .any(|k| ci.contains(k))
    }) {
        score += 30.0;
    }

    // Unknown size only qualifies on keyword evidence.
    if !size_known && score == 0.0 {
        return None;
    }
    if size_known {
        score += (w * h / 10_000.0).min(100.0);
    }
    Some(score)
}

/// Author from labelled phrases in body text, colon forms first.
pub fn author_from_text(text: &str) -> Option<String> {
    author_colon_re()
        .captures_iter(text)
        .find_map(|caps| {
            let raw = caps.get(1)?.as_str();
            let cut = next_label_re().find(raw).map(|m| &raw[..m.start()]).unwrap_or(raw);
            clean_author(cut)
        })
        .or_else(|| {
            author_bare_re()
                .captures_iter(text)
                .find_map(|caps| clean_author(caps.get(1)?.as_str()))
        })
}

/// Strip parentheticals and "et al.", keep the first of several names.
pub fn clean_author(raw: &str) -> Option<String> {
    let no_parens = parenthetical_re().replace_all(raw, " ");
    let no_et_al = et_al_re().replace_all(&no_parens, "");
    let first = author_split_re()
        .split(&no_et_al)
        .map(str::trim)
        .find(|s| !s.is_empty())?;
    let cleaned = document::collapse_whitespace(first)
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '\'')
        .to_string();
    if cleaned.is_empty()
        || cleaned.chars().count() > MAX_AUTHOR_CHARS
        || !cleaned.chars().any(char::is_alphabetic)
    {
        return None;
    }
    Some(cleaned)
}

fn author_from_elements(elements: &[ElementSnapshot]) -> Option<String> {
    elements.iter().find_map(|el| {
        let text = el
            .attr("content")
            .map(String::from)
            .unwrap_or_else(|| el.clean_text());
        let value = match text.split_once(':') {
            Some((_, after)) => after,
            None => text.as_str(),
        };
        clean_author(value)
    })
}

fn author_from_rows(rows: &[ElementSnapshot]) -> Option<String> {
    rows.iter().find_map(|row| {
        let mut cells = row.children.iter();
        let label = cells.next()?;
        if !author_row_label_re().is_match(label.text.trim()) {
            return None;
        }
        clean_author(&cells.next()?.text)
    })
}

/// Map free text onto a publication status.
pub fn normalise_status(text: &str) -> Option<PublicationStatus> {
    let caps = status_word_re().captures(text)?;
    let word = caps[1].to_lowercase();
    let status = match word.as_str() {
        "complete" | "completed" | "finished" => PublicationStatus::Completed,
        "ongoing" | "releasing" | "publishing" | "continuing" => PublicationStatus::Releasing,
        "hiatus" | "paused" => PublicationStatus::Hiatus,
        w if w.starts_with("on") => PublicationStatus::Hiatus,
        _ => PublicationStatus::Dropped,
    };
    Some(status)
}

fn status_from_text(text: &str) -> Option<PublicationStatus> {
    status_phrase_re()
        .captures_iter(text)
        .find_map(|caps| normalise_status(caps.get(1)?.as_str()))
}

fn status_from_elements(elements: &[ElementSnapshot]) -> Option<PublicationStatus> {
    elements
        .iter()
        .find_map(|el| normalise_status(&el.clean_text()))
}

fn status_from_attributes(elements: &[ElementSnapshot]) -> Option<PublicationStatus> {
    elements.iter().find_map(|el| {
        el.attr("data-status")
            .or_else(|| el.attr("content"))
            .and_then(normalise_status)
            .or_else(|| normalise_status(&el.clean_text()))
    })
}
