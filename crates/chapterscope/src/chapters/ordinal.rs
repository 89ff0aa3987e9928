//! Chapter ordinal grammar.
//!
//! Rules are tried in order and the first match wins. The input text must
//! already have any upload date stripped, so date digits never leak in.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::ChapterType;

/// Synthetic ordinal base for a TPB volume without a part.
const TPB_BASE: f64 = 900.0;

/// Synthetic ordinal base for a bare `Part N`.
const PART_BASE: f64 = 800.0;

/// How the grammar classified one anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrdinalClass {
    /// A numeric ordinal was found.
    Numbered { ordinal: f64, chapter_type: ChapterType },
    /// No number; the anchor joins the title-only bucket.
    TitleOnly,
    /// Not a chapter.
    Rejected,
}

fn bare_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\(?\s*(?:19|20)\d{2}\s*\)?$").expect("bare year regex is valid")
    })
}

fn bare_paren_int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\(\s*\d+\s*\)$").expect("paren int regex is valid"))
}

fn paren_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*(?:19|20)\d{2}\s*\)").expect("paren year regex is valid"))
}

fn compact_chapter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bch(?:apter)?\.?\s*(\d+(?:\.\d+)?)").expect("compact chapter regex is valid")
    })
}

fn href_tail_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\D*$").expect("href tail regex is valid"))
}

fn href_chapter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[/\-_])(?:chapters?|episodes?|ch|ep)[-_/]?(\d+(?:[.\-_]\d+)?)(?:[/?#.]|$)")
            .expect("href chapter regex is valid")
    })
}

fn tpb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\btpb\s*#?\s*(\d+)").expect("tpb regex is valid"))
}

fn part_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:part|pt)\.?\s*(\d+)").expect("part regex is valid"))
}

fn chapter_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:chapter|chap|ch|issue|episode|ep)\.?\s*:?\s*#?\s*(\d+(?:\.\d+)?)")
            .expect("chapter keyword regex is valid")
    })
}

fn volume_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:volume|vol)\.?\s*:?\s*#?\s*(\d+(?:\.\d+)?)")
            .expect("volume keyword regex is valid")
    })
}

fn hash_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\s*(\d+(?:\.\d+)?)").expect("hash number regex is valid"))
}

fn standalone_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)(\d+(?:\.\d+)?)(?:\s|$|[:\-–])").expect("standalone number regex is valid")
    })
}

fn any_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("number regex is valid"))
}

fn bare_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\W*(?:chapter\s*[:\-]?\s*)?(full|omnibus|special|one[\s\-]?shot|extra|bonus)\W*$",
        )
        .expect("bare keyword regex is valid")
    })
}

/// Classify an anchor by its (date-stripped) text and href.
///
/// `fast_path` is set when an ancestor carries a `data-*` attribute whose
/// value references `/chapters/`.
pub fn classify(text: &str, href: &str, fast_path: bool) -> OrdinalClass {
    let text = text.trim();

    if bare_year_re().is_match(text) || bare_paren_int_re().is_match(text) {
        return OrdinalClass::Rejected;
    }
    let searchable = paren_year_re().replace_all(text, " ");
    let searchable = searchable.as_ref();

    if fast_path {
        if let Some(n) = first_number(compact_chapter_re(), searchable) {
            return numbered(n, ChapterType::Normal);
        }
        let without_fragment = href.split('#').next().unwrap_or(href);
        if let Some(n) = first_number(href_tail_number_re(), without_fragment) {
            return numbered(n, ChapterType::Normal);
        }
    }

    if let Some(tpb) = first_number(tpb_re(), searchable) {
        return match first_number(part_re(), searchable) {
            Some(part) => numbered((tpb - 1.0) * 2.0 + part, ChapterType::Tpb),
            None => numbered(TPB_BASE + tpb, ChapterType::Tpb),
        };
    }

    if let Some(n) = first_number(chapter_keyword_re(), searchable)
        .or_else(|| first_number(volume_keyword_re(), searchable))
    {
        return numbered(n, ChapterType::Normal);
    }

    if let Some(part) = first_number(part_re(), searchable) {
        return numbered(PART_BASE + part, ChapterType::Part);
    }

    if let Some(n) = first_number(hash_number_re(), searchable)
        .or_else(|| first_number(standalone_number_re(), searchable))
        .or_else(|| first_number(any_number_re(), searchable))
    {
        return numbered(n, ChapterType::Normal);
    }

    if let Some(caps) = bare_keyword_re().captures(searchable) {
        let (ordinal, chapter_type) = special_ordinal(&caps[1]);
        return numbered(ordinal, chapter_type);
    }

    if let Some(n) = href_chapter_number(href) {
        return numbered(n, ChapterType::Normal);
    }

    if !text.chars().any(|c| c.is_ascii_digit()) && text.chars().count() > 3 {
        return OrdinalClass::TitleOnly;
    }
    OrdinalClass::Rejected
}

fn special_ordinal(keyword: &str) -> (f64, ChapterType) {
    let lower = keyword.to_ascii_lowercase();
    match lower.as_str() {
        "full" => (701.0, ChapterType::Full),
        "omnibus" => (702.0, ChapterType::Omnibus),
        "special" => (703.0, ChapterType::Special),
        "extra" => (705.0, ChapterType::Extra),
        "bonus" => (706.0, ChapterType::Bonus),
        _ => (704.0, ChapterType::Oneshot),
    }
}

fn numbered(ordinal: f64, chapter_type: ChapterType) -> OrdinalClass {
    OrdinalClass::Numbered {
        ordinal,
        chapter_type,
    }
}

fn first_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite())
}

/// Chapter number carried by the href itself, e.g. `/chapter-12-5/`.
fn href_chapter_number(href: &str) -> Option<f64> {
    let caps = href_chapter_re().captures(href_path(href))?;
    let raw = caps.get(1)?.as_str().replace(['-', '_'], ".");
    raw.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn href_path(href: &str) -> &str {
    let end = href.find(['?', '#']).unwrap_or(href.len());
    href[..end].trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ord(text: &str) -> Option<(f64, ChapterType)> {
        match classify(text, "", false) {
            OrdinalClass::Numbered {
                ordinal,
                chapter_type,
            } => Some((ordinal, chapter_type)),
            _ => None,
        }
    }

    #[test]
    fn test_keyword_decimal() {
        assert_eq!(ord("Chapter 12.5"), Some((12.5, ChapterType::Normal)));
        assert_eq!(ord("Ch. 7"), Some((7.0, ChapterType::Normal)));
        assert_eq!(ord("Episode: 40"), Some((40.0, ChapterType::Normal)));
    }

    #[test]
    fn test_chapter_keyword_beats_volume() {
        assert_eq!(ord("Vol. 2 Chapter 15"), Some((15.0, ChapterType::Normal)));
        assert_eq!(ord("Volume 3"), Some((3.0, ChapterType::Normal)));
    }

    #[test]
    fn test_tpb_forms() {
        assert_eq!(ord("TPB 2 (Part 1)"), Some((3.0, ChapterType::Tpb)));
        assert_eq!(ord("TPB 2 Part 2"), Some((4.0, ChapterType::Tpb)));
        assert_eq!(ord("TPB 3"), Some((903.0, ChapterType::Tpb)));
    }

    #[test]
    fn test_part_only() {
        assert_eq!(ord("(Part 2)"), Some((802.0, ChapterType::Part)));
        assert_eq!(ord("Pt. 4"), Some((804.0, ChapterType::Part)));
    }

    #[test]
    fn test_bare_specials() {
        assert_eq!(ord("Special"), Some((703.0, ChapterType::Special)));
        assert_eq!(ord("Chapter: Full"), Some((701.0, ChapterType::Full)));
        assert_eq!(ord("One-Shot"), Some((704.0, ChapterType::Oneshot)));
        assert_eq!(ord("Bonus!"), Some((706.0, ChapterType::Bonus)));
    }

    #[test]
    fn test_special_inside_longer_text_is_title_only() {
        assert_eq!(
            classify("Alpha Special Issue", "", false),
            OrdinalClass::TitleOnly
        );
    }

    #[test]
    fn test_hash_and_bare_numbers() {
        assert_eq!(ord("Issue title #14"), Some((14.0, ChapterType::Normal)));
        assert_eq!(ord("The End 88"), Some((88.0, ChapterType::Normal)));
        assert_eq!(ord("Arc2"), Some((2.0, ChapterType::Normal)));
    }

    #[test]
    fn test_years_rejected_or_ignored() {
        assert_eq!(classify("2023", "", false), OrdinalClass::Rejected);
        assert_eq!(classify("(12)", "", false), OrdinalClass::Rejected);
        assert_eq!(ord("Finale (2021) 51"), Some((51.0, ChapterType::Normal)));
    }

    #[test]
    fn test_short_text_rejected() {
        assert_eq!(classify("Go", "", false), OrdinalClass::Rejected);
    }

    #[test]
    fn test_fast_path_prefers_compact_and_href() {
        assert_eq!(
            classify("ch42 new!", "/x/y", true),
            numbered(42.0, ChapterType::Normal)
        );
        assert_eq!(
            classify("Latest", "/manga/demo/chapters/118/", true),
            numbered(118.0, ChapterType::Normal)
        );
    }

    #[test]
    fn test_href_fallback_before_title_only() {
        assert_eq!(
            classify("Read now", "https://x.test/manga/demo/chapter-12-5/", false),
            numbered(12.5, ChapterType::Normal)
        );
    }
}
