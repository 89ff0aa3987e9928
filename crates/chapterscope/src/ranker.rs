//! Deduplication, quality selection and reading order for page images.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::types::{ExtractionResult, PageImageCandidate, RankedImageSet};

/// Size tokens from largest to smallest. Earlier wins.
const SIZE_PRIORITY: &[&str] = &[
    "s0", "s16000", "s4000", "s3200", "s2560", "s2048", "s1600", "s1280", "s1200", "s1024",
    "s1000", "s800", "s720", "s640", "s512", "s400", "s320", "s200",
];

/// Page numbers with more digits are treated as ids.
const MAX_PAGE_DIGITS: usize = 4;

fn slash_size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(s\d+)(?:-[a-z]+)*/").expect("slash size regex is valid"))
}

fn wh_size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/w(\d+)-h(\d+)(?:-[a-z0-9]+)*/").expect("width-height size regex is valid")
    })
}

fn eq_size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"=(s\d+)(?:-[a-z0-9]+)*$").expect("eq size regex is valid"))
}

fn page_stem_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z]?(\d+)$").expect("page stem regex is valid"))
}

/// URL with size-variant segments removed.
pub fn base_key(url: &str) -> String {
    let stripped = slash_size_re().replace_all(url, "/");
    let stripped = wh_size_re().replace_all(&stripped, "/");
    eq_size_re().replace_all(&stripped, "").into_owned()
}

/// Size token carried by the URL, normalised to the `sNNN` form.
pub fn size_token(url: &str) -> Option<String> {
    if let Some(caps) = slash_size_re().captures(url) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = eq_size_re().captures(url) {
        return Some(caps[1].to_string());
    }
    let caps = wh_size_re().captures(url)?;
    let w: u32 = caps[1].parse().ok()?;
    let h: u32 = caps[2].parse().ok()?;
    Some(format!("s{}", w.max(h)))
}

fn size_priority(url: &str) -> Option<usize> {
    let token = size_token(url)?;
    SIZE_PRIORITY.iter().position(|t| *t == token)
}

/// Page number encoded by the file name, e.g. `/7.jpg`, `/p007.webp`.
///
/// Only the final path component counts, and its stem must be exactly the
/// number (optionally zero-padded, optionally after one letter).
pub fn page_number(url: &str) -> Option<u32> {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let digits = page_stem_re().captures(stem)?.get(1)?.as_str();
    if digits.len() > MAX_PAGE_DIGITS {
        return None;
    }
    digits.parse().ok()
}

/// URL-deduplicated union of strategy results, first occurrence wins.
///
/// Results are taken in aggregate rank order; within a strategy the
/// candidates keep their own order.
pub fn aggregate(results: &[ExtractionResult]) -> Vec<PageImageCandidate> {
    let mut ordered: Vec<&ExtractionResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.strategy_id.aggregate_rank());

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for result in ordered {
        for candidate in &result.candidates {
            if seen.insert(candidate.url.clone()) {
                out.push(candidate.clone());
            }
        }
    }
    out
}

/// Collapse size variants and put candidates into reading order.
pub fn rank(aggregate: Vec<PageImageCandidate>) -> RankedImageSet {
    let mut slots: Vec<PageImageCandidate> = Vec::with_capacity(aggregate.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for candidate in aggregate {
        let key = base_key(&candidate.url);
        match by_key.get(&key) {
            Some(&slot) => {
                let current = &slots[slot];
                let better = match (size_priority(&candidate.url), size_priority(&current.url)) {
                    (Some(new), Some(old)) => new < old,
                    (Some(_), None) => true,
                    _ => false,
                };
                if better {
                    tracing::trace!("{} supersedes {}", candidate.url, current.url);
                    let position = current.dom_position;
                    let strategy = current.source_strategy;
                    slots[slot] = PageImageCandidate {
                        dom_position: position,
                        source_strategy: strategy,
                        ..candidate
                    };
                }
            }
            None => {
                by_key.insert(key, slots.len());
                slots.push(candidate);
            }
        }
    }

    let mut keyed: Vec<(Option<u32>, PageImageCandidate)> = slots
        .into_iter()
        .map(|c| (page_number(&c.url), c))
        .collect();
    keyed.sort_by_key(|(page, _)| match page {
        Some(n) => (0u8, *n),
        None => (1u8, 0),
    });

    RankedImageSet {
        images: keyed.into_iter().map(|(_, c)| c).collect(),
    }
}
