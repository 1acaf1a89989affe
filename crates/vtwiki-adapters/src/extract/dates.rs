//! Free-form date parsing for infobox values.
//!
//! Patterns are tried in order and the first one whose first match parses
//! wins. Earlier, more specific patterns deliberately shadow looser ones, so
//! the order of [`DATE_PATTERNS`] must not change.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use tracing::trace;

/// Year used for dates written without one (birthdays). Year 0 is a leap
/// year, so "February 29" survives.
pub const YEARLESS: i32 = 0;

const MONTH: &str = r"(Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|June?|July?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\.?";
const ORDINAL: &str = r"(?:st|nd|rd|th)?";

/// How the capture groups of a pattern map onto a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// year, month, day
    YearMonthDay,
    /// day, month name, year
    DayMonthNameYear,
    /// month, day, year
    MonthDayYear,
    /// year, month
    YearMonth,
    /// day, abbreviated month name, year
    DayMonthAbbrYear,
    /// month name, day, year
    MonthNameDayYear,
    /// month name, year
    MonthNameYear,
    /// month name, day
    MonthNameDay,
    /// year
    Year,
}

static DATE_PATTERNS: LazyLock<Vec<(Regex, Layout)>> = LazyLock::new(|| {
    let patterns = [
        (r"\b(\d{4})[/.\-](\d{1,2})[/.\-](\d{1,2})\b".to_string(), Layout::YearMonthDay),
        (format!(r"\b(\d{{1,2}}){ORDINAL}\s+{MONTH},?\s+(\d{{4}})\b"), Layout::DayMonthNameYear),
        (r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b".to_string(), Layout::MonthDayYear),
        (r"\b(\d{4})[/.\-](\d{1,2})\b".to_string(), Layout::YearMonth),
        (r"\b(\d{1,2})/([A-Za-z]{3})/(\d{4})\b".to_string(), Layout::DayMonthAbbrYear),
        (format!(r"\b{MONTH}\s+(\d{{1,2}}){ORDINAL},?\s+(\d{{4}})\b"), Layout::MonthNameDayYear),
        (format!(r"\b{MONTH},?\s+(\d{{4}})\b"), Layout::MonthNameYear),
        (format!(r"\b{MONTH}\s+(\d{{1,2}}){ORDINAL}\b"), Layout::MonthNameDay),
        (r"\b(\d{4})\b".to_string(), Layout::Year),
    ];
    patterns
        .into_iter()
        .map(|(pattern, layout)| {
            let regex = Regex::new(&format!("(?i){pattern}")).expect("date pattern");
            (regex, layout)
        })
        .collect()
});

fn month_from_name(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
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
    Some(month)
}

fn num<T: std::str::FromStr>(caps: &Captures, index: usize) -> Option<T> {
    caps.get(index)?.as_str().parse().ok()
}

fn name(caps: &Captures, index: usize) -> Option<u32> {
    month_from_name(caps.get(index)?.as_str())
}

impl Layout {
    fn build(self, caps: &Captures) -> Option<NaiveDate> {
        let (year, month, day) = match self {
            Layout::YearMonthDay => (num(caps, 1)?, num(caps, 2)?, num(caps, 3)?),
            Layout::DayMonthNameYear => (num(caps, 3)?, name(caps, 2)?, num(caps, 1)?),
            Layout::MonthDayYear => (num(caps, 3)?, num(caps, 1)?, num(caps, 2)?),
            Layout::YearMonth => (num(caps, 1)?, num(caps, 2)?, 1),
            Layout::DayMonthAbbrYear => (num(caps, 3)?, name(caps, 2)?, num(caps, 1)?),
            Layout::MonthNameDayYear => (num(caps, 3)?, name(caps, 1)?, num(caps, 2)?),
            Layout::MonthNameYear => (num(caps, 2)?, name(caps, 1)?, 1),
            Layout::MonthNameDay => (YEARLESS, name(caps, 1)?, num(caps, 2)?),
            Layout::Year => (num(caps, 1)?, 1, 1),
        };
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// Parses the first recognizable date in `text`. Unparseable text yields
/// `None`, never an error.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for (regex, layout) in DATE_PATTERNS.iter() {
        let Some(caps) = regex.captures(text) else {
            continue;
        };
        if let Some(date) = layout.build(&caps) {
            return Some(date);
        }
    }
    trace!(text, "no date pattern matched");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn each_supported_layout_parses() {
        assert_eq!(parse_date("2022/03/05"), ymd(2022, 3, 5));
        assert_eq!(parse_date("5 March 2022"), ymd(2022, 3, 5));
        assert_eq!(parse_date("5th Mar 2022"), ymd(2022, 3, 5));
        assert_eq!(parse_date("03/05/2022"), ymd(2022, 3, 5));
        assert_eq!(parse_date("2022/03"), ymd(2022, 3, 1));
        assert_eq!(parse_date("05/Mar/2022"), ymd(2022, 3, 5));
        assert_eq!(parse_date("March 5, 2022"), ymd(2022, 3, 5));
        assert_eq!(parse_date("March 2022"), ymd(2022, 3, 1));
        assert_eq!(parse_date("2022"), ymd(2022, 1, 1));
    }

    #[test]
    fn yearless_dates_use_placeholder_year() {
        assert_eq!(parse_date("February 29"), ymd(YEARLESS, 2, 29));
        assert_eq!(parse_date("December 24th"), ymd(YEARLESS, 12, 24));
    }

    #[test]
    fn surrounding_text_is_ignored() {
        assert_eq!(parse_date("Debuted on 2021-07-16 (JST)"), ymd(2021, 7, 16));
    }

    #[test]
    fn invalid_first_match_falls_through_to_later_patterns() {
        // 2022/13/40 is structurally a full date but not a real one; the
        // year-only pattern still recovers the year.
        assert_eq!(parse_date("2022/13/40"), ymd(2022, 1, 1));
    }

    #[test]
    fn unparseable_text_is_none() {
        assert_eq!(parse_date("unknown"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("???"), None);
    }
}
