use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

// Slash dates with the year last are read month-first.
const FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
];

static MONTH_DOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|jun|jul|aug|sept?|oct|nov|dec)\.").unwrap()
});
static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").unwrap());
static COMPACT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap());
static EMBEDDED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\d{4}[-/]\d{1,2}[-/]\d{1,2}|\d{1,2}/\d{1,2}/\d{4}|\d{1,2}\.\d{1,2}\.\d{4}|[a-z]{3,9} \d{1,2},? \d{4}|\d{1,2} [a-z]{3,9},? \d{4}|\b\d{8}\b",
    )
    .unwrap()
});

/// Parse any of the date spellings patent pages use into one calendar date.
/// Returns `None` rather than guessing when nothing parses cleanly.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let text = clean(raw);
    if text.is_empty() {
        return None;
    }
    parse_exact(&text).or_else(|| {
        EMBEDDED_RE
            .find_iter(&text)
            .find_map(|m| parse_exact(m.as_str()))
    })
}

fn parse_exact(text: &str) -> Option<NaiveDate> {
    if let Some(caps) = COMPACT_RE.captures(text) {
        let y = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let d = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn clean(raw: &str) -> String {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = MONTH_DOT_RE.replace_all(&text, "$1");
    let text = ORDINAL_RE.replace_all(&text, "$1");
    // chrono knows "Sep" and "September" but not "Sept"
    text.replace("Sept ", "Sep ").replace("sept ", "sep ")
}
