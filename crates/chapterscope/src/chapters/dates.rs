//! Upload-date recognition for chapter rows.
//!
//! Absolute formats are tried before relative phrases. Every match carries
//! its byte range so the caller can strip it from the chapter title.

use std::sync::OnceLock;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};

/// A recognised date and where it sits in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateMatch {
    pub date: NaiveDate,
    pub start: usize,
    pub end: usize,
}

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

fn mdy_slash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("m/d/y regex is valid"))
}

fn mdy_dash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})-(\d{1,2})-(\d{4})\b").expect("m-d-y regex is valid"))
}

fn ymd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").expect("y-m-d regex is valid")
    })
}

fn month_day_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
        ))
        .expect("month-day-year regex is valid")
    })
}

fn day_month_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\.?,?\s+(\d{{4}})\b"
        ))
        .expect("day-month-year regex is valid")
    })
}

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d+|an?|one)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?|days?|weeks?|months?|years?)\s+ago\b",
        )
        .expect("relative time regex is valid")
    })
}

fn relative_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(just\s+now|today|yesterday)\b").expect("relative word regex is valid")
    })
}

/// Find the first recognisable date, absolute formats first.
pub fn find_date(text: &str, now: NaiveDateTime) -> Option<DateMatch> {
    find_absolute_date(text).or_else(|| find_relative_date(text, now))
}

/// Absolute dates: `M/D/YYYY`, `M-D-YYYY`, `YYYY-M-D`, and month-name forms.
pub fn find_absolute_date(text: &str) -> Option<DateMatch> {
    let numeric: [(&Regex, fn(&Captures<'_>) -> Option<NaiveDate>); 5] = [
        (mdy_slash_re(), month_first),
        (mdy_dash_re(), month_first),
        (ymd_re(), year_first),
        (month_day_year_re(), month_name_first),
        (day_month_year_re(), day_first_month_name),
    ];

    for (re, build) in numeric {
        for caps in re.captures_iter(text) {
            if let (Some(date), Some(whole)) = (build(&caps), caps.get(0)) {
                return Some(DateMatch {
                    date,
                    start: whole.start(),
                    end: whole.end(),
                });
            }
        }
    }
    None
}

/// Relative phrases (`3 days ago`, `just now`, `yesterday`) against `now`.
///
/// Only the calendar date is kept; time of day is discarded.
pub fn find_relative_date(text: &str, now: NaiveDateTime) -> Option<DateMatch> {
    if let Some(caps) = relative_re().captures(text) {
        let whole = caps.get(0)?;
        let amount = match caps[1].to_ascii_lowercase().as_str() {
            "a" | "an" | "one" => 1,
            digits => digits.parse::<u32>().ok()?,
        };
        let unit = caps[2].to_ascii_lowercase();
        let then = if unit.starts_with("sec") {
            now.checked_sub_signed(Duration::seconds(i64::from(amount)))
        } else if unit.starts_with("min") {
            now.checked_sub_signed(Duration::minutes(i64::from(amount)))
        } else if unit.starts_with('h') {
            now.checked_sub_signed(Duration::hours(i64::from(amount)))
        } else if unit.starts_with('d') {
            now.checked_sub_signed(Duration::days(i64::from(amount)))
        } else if unit.starts_with('w') {
            now.checked_sub_signed(Duration::weeks(i64::from(amount)))
        } else if unit.starts_with("mo") {
            now.checked_sub_months(Months::new(amount))
        } else {
            now.checked_sub_months(Months::new(amount.saturating_mul(12)))
        }?;
        return Some(DateMatch {
            date: then.date(),
            start: whole.start(),
            end: whole.end(),
        });
    }

    let caps = relative_word_re().captures(text)?;
    let whole = caps.get(0)?;
    let date = if caps[1].eq_ignore_ascii_case("yesterday") {
        now.date().pred_opt()?
    } else {
        now.date()
    };
    Some(DateMatch {
        date,
        start: whole.start(),
        end: whole.end(),
    })
}

/// Remove a matched date from `text` and tidy leftover punctuation.
pub fn strip_date(text: &str, m: &DateMatch) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..m.start]);
    out.push(' ');
    out.push_str(&text[m.end..]);
    tidy_title(&out)
}

/// Collapse whitespace, drop emptied brackets, and trim edge punctuation.
pub fn tidy_title(text: &str) -> String {
    let collapsed = crate::document::collapse_whitespace(text);
    let without_empty = collapsed
        .replace("( )", "")
        .replace("()", "")
        .replace("[ ]", "")
        .replace("[]", "");
    crate::document::collapse_whitespace(&without_empty)
        .trim_matches(|c: char| c.is_whitespace() || "-–—|•·,:;/~".contains(c))
        .to_string()
}

fn month_first(caps: &Captures<'_>) -> Option<NaiveDate> {
    let a: u32 = caps[1].parse().ok()?;
    let b: u32 = caps[2].parse().ok()?;
    let y: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(y, a, b).or_else(|| NaiveDate::from_ymd_opt(y, b, a))
}

fn year_first(caps: &Captures<'_>) -> Option<NaiveDate> {
    let y: i32 = caps[1].parse().ok()?;
    let m: u32 = caps[2].parse().ok()?;
    let d: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn month_name_first(caps: &Captures<'_>) -> Option<NaiveDate> {
    let m = month_number(&caps[1])?;
    let d: u32 = caps[2].parse().ok()?;
    let y: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn day_first_month_name(caps: &Captures<'_>) -> Option<NaiveDate> {
    let d: u32 = caps[1].parse().ok()?;
    let m = month_number(&caps[2])?;
    let y: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let m = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_numeric_formats() {
        assert_eq!(find_absolute_date("Ch 4 3/7/2024").unwrap().date, ymd(2024, 3, 7));
        assert_eq!(find_absolute_date("12-25-2023").unwrap().date, ymd(2023, 12, 25));
        assert_eq!(find_absolute_date("posted 2022-1-5").unwrap().date, ymd(2022, 1, 5));
    }

    #[test]
    fn test_day_month_swap_when_month_invalid() {
        assert_eq!(find_absolute_date("25/12/2023").unwrap().date, ymd(2023, 12, 25));
    }

    #[test]
    fn test_month_name_formats() {
        assert_eq!(
            find_absolute_date("Chapter 3 Jan 5, 2024").unwrap().date,
            ymd(2024, 1, 5)
        );
        assert_eq!(
            find_absolute_date("September 21st 2021").unwrap().date,
            ymd(2021, 9, 21)
        );
        assert_eq!(find_absolute_date("7 Mar 2020").unwrap().date, ymd(2020, 3, 7));
    }

    #[test]
    fn test_relative_days() {
        let text = "Chapter 12 3 days ago";
        let m = find_date(text, now()).unwrap();
        assert_eq!(m.date, ymd(2024, 5, 17));
        assert_eq!(strip_date(text, &m), "Chapter 12");
    }

    #[test]
    fn test_relative_hours_crossing_midnight() {
        let m = find_relative_date("11 hours ago", now()).unwrap();
        assert_eq!(m.date, ymd(2024, 5, 19));
    }

    #[test]
    fn test_relative_words() {
        assert_eq!(find_date("just now", now()).unwrap().date, ymd(2024, 5, 20));
        assert_eq!(find_date("Yesterday", now()).unwrap().date, ymd(2024, 5, 19));
        assert_eq!(find_date("a month ago", now()).unwrap().date, ymd(2024, 4, 20));
        assert_eq!(find_date("2 years ago", now()).unwrap().date, ymd(2022, 5, 20));
    }

    #[test]
    fn test_absolute_preferred_over_relative() {
        let m = find_date("1/2/2024 (updated 2 days ago)", now()).unwrap();
        assert_eq!(m.date, ymd(2024, 1, 2));
    }

    #[test]
    fn test_strip_keeps_bracketed_parts() {
        let text = "TPB 2 (Part 1) - 2024-02-01";
        let m = find_date(text, now()).unwrap();
        assert_eq!(strip_date(text, &m), "TPB 2 (Part 1)");
        let text = "Chapter 9 (2 hours ago)";
        let m = find_date(text, now()).unwrap();
        assert_eq!(strip_date(text, &m), "Chapter 9");
    }

    #[test]
    fn test_no_date() {
        assert!(find_date("Chapter 1000", now()).is_none());
    }
}
