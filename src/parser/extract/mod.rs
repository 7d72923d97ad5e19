pub mod claims;
pub mod dates;
pub mod identity;
pub mod people;
pub mod sections;
pub mod text;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::page::{collapse, Page};
use crate::record::{normalize_identifier, PatentRecord};

static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static PATENT_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:US|WO|EP|CN|JP|CA|KR|DE|FR|GB|AU)\d{4,}[A-Z]?\d?\b").unwrap()
});

/// Run every field's strategy table over `page`. Each field is independent:
/// a field that finds nothing leaves a `missing` mark and the rest carry on.
pub fn extract_all(page: &Page, rec: &mut PatentRecord) {
    identity::extract(page, rec);
    text::extract(page, rec);
    people::extract(page, rec);
    dates::extract(page, rec);
    claims::extract(page, rec);
    sections::extract(page, rec);
}

/// Split a labeled run of names. Semicolons win over commas since "Last, First"
/// entries are common; parenthesised country codes are dropped.
pub fn split_names(text: &str) -> Vec<String> {
    let cleaned = PAREN_RE.replace_all(text, " ");
    let sep = if cleaned.contains(';') { ';' } else { ',' };
    cleaned
        .split(sep)
        .map(collapse)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Patent numbers mentioned in `text`, normalized, first occurrence kept.
pub fn patent_numbers(text: &str) -> Vec<String> {
    dedup(
        PATENT_NUMBER_RE
            .find_iter(text)
            .map(|m| normalize_identifier(m.as_str()))
            .collect(),
    )
}

pub fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
